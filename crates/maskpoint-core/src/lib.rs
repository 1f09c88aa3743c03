//! Session engine for interactive point-prompted segmentation against a
//! remote inference server.
//!
//! The engine owns one explicit state value ([`EngineState`]) transitioned by
//! a single reducer ([`state::reduce`]); every asynchronous completion carries
//! the generation it was issued under and stale completions are dropped
//! before they can touch visible state. Network access goes through the
//! [`transport::SegmentTransport`] seam so the whole engine is testable
//! without sockets.

pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod mask;
pub mod session;
pub mod state;
pub mod transport;

pub use compose::{ComposeOptions, compose};
pub use config::EngineConfig;
pub use engine::SegmentEngine;
pub use error::EngineError;
pub use geometry::{CanvasPoint, CanvasSize, ImagePoint, PixelSize, Rect, ViewTransform};
pub use state::{
    EmbeddingState, EngineEvent, EngineState, ImageSelection, Prediction, PromptLabel, PromptPoint,
    UploadReady,
};
pub use transport::SegmentTransport;
