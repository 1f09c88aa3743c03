//! The engine's explicit state and the reducer that transitions it.
//!
//! All visible state lives in one [`EngineState`] value. Mutation happens in
//! exactly one place, [`reduce`], keyed on [`EngineEvent`]. Events produced
//! by asynchronous completions carry the generation they were issued under;
//! the reducer compares it against the live generation before anything else,
//! so a stale completion can never mutate state no matter how late or
//! out-of-order it resumes.

use std::sync::Arc;

use image::GrayImage;
use tracing::debug;

use crate::geometry::PixelSize;
use crate::session::SessionSlot;

/// Foreground (include) or background (exclude) prompt label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptLabel {
    Background,
    Foreground,
}

impl PromptLabel {
    /// Wire encoding: 1 = foreground, 0 = background.
    #[must_use]
    pub fn as_wire(self) -> u8 {
        match self {
            Self::Background => 0,
            Self::Foreground => 1,
        }
    }
}

/// One user prompt point in image-pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PromptPoint {
    pub x: f64,
    pub y: f64,
    pub label: PromptLabel,
}

impl PromptPoint {
    #[must_use]
    pub fn foreground(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            label: PromptLabel::Foreground,
        }
    }

    #[must_use]
    pub fn background(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            label: PromptLabel::Background,
        }
    }
}

/// The currently active image. Superseded, never mutated, by the next
/// selection; the bytes are shared so a stale upload still in flight does not
/// keep its own copy alive longer than needed.
#[derive(Clone, Debug)]
pub struct ImageSelection {
    pub bytes: Arc<Vec<u8>>,
    pub file_name: String,
    pub size: PixelSize,
}

impl ImageSelection {
    #[must_use]
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            bytes: Arc::new(bytes),
            file_name: file_name.into(),
            size: PixelSize::new(width, height),
        }
    }
}

/// Per-image embedding lifecycle. Forward-only, reset to `Idle` by a new
/// selection.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum EmbeddingState {
    #[default]
    Idle,
    Computing,
    Ready {
        width: u32,
        height: u32,
        elapsed_ms: f64,
    },
    Error {
        message: String,
    },
}

impl EmbeddingState {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// A successfully decoded prediction. The previous value (and its raster) is
/// dropped when a newer one is stored.
#[derive(Clone, Debug)]
pub struct Prediction {
    pub mask: GrayImage,
    pub score: f64,
    pub mask_area: u64,
    pub elapsed_ms: f64,
}

#[derive(Default, Debug)]
pub struct EngineState {
    /// Monotonic generation token, bumped once per image selection (and on
    /// model switch / disconnect, which also invalidate in-flight work).
    pub generation: u64,
    pub connected: bool,
    pub model_key: Option<String>,
    pub session: SessionSlot,
    pub selection: Option<ImageSelection>,
    pub embedding: EmbeddingState,
    pub prompts: Vec<PromptPoint>,
    pub box_prompt: Option<[f64; 4]>,
    pub prediction: Option<Prediction>,
    /// Last display-worthy failure for the in-flight user action.
    pub last_error: Option<String>,
}

impl EngineState {
    /// A predict call may be issued only with a ready embedding and at least
    /// one prompt (points or box).
    #[must_use]
    pub fn can_predict(&self) -> bool {
        self.embedding.is_ready()
            && (!self.prompts.is_empty() || self.box_prompt.is_some())
            && self.session.id().is_some()
    }
}

/// Everything that can happen to the engine. Completion events carry the
/// generation captured when their request was issued.
#[derive(Debug)]
pub enum EngineEvent {
    Connected {
        model_key: String,
    },
    Disconnected,
    ImageSelected {
        selection: ImageSelection,
    },
    UploadStarted {
        generation: u64,
    },
    UploadResolved {
        generation: u64,
        outcome: Result<UploadReady, String>,
    },
    PointAdded {
        point: PromptPoint,
    },
    BoxSet {
        corners: [f64; 4],
    },
    PromptsCleared,
    PredictResolved {
        generation: u64,
        outcome: Result<Prediction, String>,
    },
    ModelSwitched {
        model_key: String,
    },
}

/// Server-reported result of a completed embedding upload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UploadReady {
    pub width: u32,
    pub height: u32,
    pub elapsed_ms: f64,
}

/// Applies one event. Stale completions (generation mismatch) are dropped
/// here, before any field is touched; dropping the event also releases any
/// raster it carried.
pub fn reduce(state: &mut EngineState, event: EngineEvent) {
    match event {
        EngineEvent::Connected { model_key } => {
            state.connected = true;
            state.model_key = Some(model_key);
            state.last_error = None;
        }
        EngineEvent::Disconnected => {
            state.generation += 1;
            state.connected = false;
            state.session.forget();
            state.embedding = EmbeddingState::Idle;
            state.prompts.clear();
            state.box_prompt = None;
            state.prediction = None;
        }
        EngineEvent::ImageSelected { selection } => {
            state.generation += 1;
            state.selection = Some(selection);
            state.embedding = EmbeddingState::Idle;
            state.prompts.clear();
            state.box_prompt = None;
            state.prediction = None;
            state.last_error = None;
        }
        EngineEvent::UploadStarted { generation } => {
            if generation != state.generation {
                debug!(generation, live = state.generation, "drop stale upload start");
                return;
            }
            state.embedding = EmbeddingState::Computing;
        }
        EngineEvent::UploadResolved {
            generation,
            outcome,
        } => {
            if generation != state.generation {
                debug!(generation, live = state.generation, "drop stale upload result");
                return;
            }
            state.embedding = match outcome {
                Ok(ready) => EmbeddingState::Ready {
                    width: ready.width,
                    height: ready.height,
                    elapsed_ms: ready.elapsed_ms,
                },
                Err(message) => EmbeddingState::Error { message },
            };
        }
        EngineEvent::PointAdded { point } => {
            state.prompts.push(point);
        }
        EngineEvent::BoxSet { corners } => {
            state.box_prompt = Some(corners);
        }
        EngineEvent::PromptsCleared => {
            state.prompts.clear();
            state.box_prompt = None;
            state.prediction = None;
        }
        EngineEvent::PredictResolved {
            generation,
            outcome,
        } => {
            if generation != state.generation {
                debug!(generation, live = state.generation, "drop stale predict result");
                return;
            }
            match outcome {
                Ok(prediction) => {
                    state.prediction = Some(prediction);
                    state.last_error = None;
                }
                Err(message) => state.last_error = Some(message),
            }
        }
        EngineEvent::ModelSwitched { model_key } => {
            state.generation += 1;
            state.model_key = Some(model_key);
            state.session.forget();
            state.embedding = EmbeddingState::Idle;
            state.prompts.clear();
            state.box_prompt = None;
            state.prediction = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(name: &str) -> ImageSelection {
        ImageSelection::new(vec![1, 2, 3], name, 640, 480)
    }

    fn ready(width: u32, height: u32) -> UploadReady {
        UploadReady {
            width,
            height,
            elapsed_ms: 10.0,
        }
    }

    fn prediction(area: u64) -> Prediction {
        Prediction {
            mask: GrayImage::new(2, 2),
            score: 0.9,
            mask_area: area,
            elapsed_ms: 5.0,
        }
    }

    #[test]
    fn image_selection_bumps_generation_and_resets_transients() {
        let mut state = EngineState::default();
        state.prompts.push(PromptPoint::foreground(1.0, 1.0));
        state.box_prompt = Some([0.0, 0.0, 5.0, 5.0]);
        state.prediction = Some(prediction(9));
        state.embedding = EmbeddingState::Ready {
            width: 1,
            height: 1,
            elapsed_ms: 1.0,
        };

        reduce(
            &mut state,
            EngineEvent::ImageSelected {
                selection: selection("a.png"),
            },
        );

        assert_eq!(state.generation, 1);
        assert_eq!(state.embedding, EmbeddingState::Idle);
        assert!(state.prompts.is_empty());
        assert!(state.box_prompt.is_none());
        assert!(state.prediction.is_none());
    }

    #[test]
    fn stale_upload_result_is_invisible() {
        // Two selections in quick succession; the first upload resolves after
        // the second selection became current.
        let mut state = EngineState::default();
        reduce(
            &mut state,
            EngineEvent::ImageSelected {
                selection: selection("first.png"),
            },
        );
        let first_generation = state.generation;
        reduce(&mut state, EngineEvent::UploadStarted { generation: first_generation });

        reduce(
            &mut state,
            EngineEvent::ImageSelected {
                selection: selection("second.png"),
            },
        );
        let second_generation = state.generation;
        reduce(&mut state, EngineEvent::UploadStarted { generation: second_generation });

        // Late completion for the first image: must not be applied.
        reduce(
            &mut state,
            EngineEvent::UploadResolved {
                generation: first_generation,
                outcome: Ok(ready(111, 111)),
            },
        );
        assert_eq!(state.embedding, EmbeddingState::Computing);

        reduce(
            &mut state,
            EngineEvent::UploadResolved {
                generation: second_generation,
                outcome: Ok(ready(222, 222)),
            },
        );
        assert_eq!(
            state.embedding,
            EmbeddingState::Ready {
                width: 222,
                height: 222,
                elapsed_ms: 10.0
            }
        );
    }

    #[test]
    fn stale_suppression_is_order_independent() {
        // Same pair of completions in both orders must converge on the state
        // produced by the live one alone.
        for late_first in [true, false] {
            let mut state = EngineState::default();
            reduce(
                &mut state,
                EngineEvent::ImageSelected {
                    selection: selection("first.png"),
                },
            );
            let stale = state.generation;
            reduce(
                &mut state,
                EngineEvent::ImageSelected {
                    selection: selection("second.png"),
                },
            );
            let live = state.generation;

            let events: Vec<EngineEvent> = if late_first {
                vec![
                    EngineEvent::UploadResolved {
                        generation: stale,
                        outcome: Ok(ready(1, 1)),
                    },
                    EngineEvent::UploadResolved {
                        generation: live,
                        outcome: Ok(ready(2, 2)),
                    },
                ]
            } else {
                vec![
                    EngineEvent::UploadResolved {
                        generation: live,
                        outcome: Ok(ready(2, 2)),
                    },
                    EngineEvent::UploadResolved {
                        generation: stale,
                        outcome: Ok(ready(1, 1)),
                    },
                ]
            };
            for event in events {
                reduce(&mut state, event);
            }
            assert_eq!(
                state.embedding,
                EmbeddingState::Ready {
                    width: 2,
                    height: 2,
                    elapsed_ms: 10.0
                }
            );
        }
    }

    #[test]
    fn stale_predict_result_is_dropped() {
        let mut state = EngineState::default();
        reduce(
            &mut state,
            EngineEvent::ImageSelected {
                selection: selection("a.png"),
            },
        );
        let stale = state.generation;
        reduce(
            &mut state,
            EngineEvent::ImageSelected {
                selection: selection("b.png"),
            },
        );

        reduce(
            &mut state,
            EngineEvent::PredictResolved {
                generation: stale,
                outcome: Ok(prediction(42)),
            },
        );
        assert!(state.prediction.is_none());
    }

    #[test]
    fn newer_prediction_supersedes_older() {
        let mut state = EngineState::default();
        reduce(
            &mut state,
            EngineEvent::ImageSelected {
                selection: selection("a.png"),
            },
        );
        let generation = state.generation;
        reduce(
            &mut state,
            EngineEvent::PredictResolved {
                generation,
                outcome: Ok(prediction(1)),
            },
        );
        reduce(
            &mut state,
            EngineEvent::PredictResolved {
                generation,
                outcome: Ok(prediction(2)),
            },
        );
        assert_eq!(state.prediction.as_ref().map(|p| p.mask_area), Some(2));
    }

    #[test]
    fn predict_failure_keeps_previous_prediction() {
        let mut state = EngineState::default();
        reduce(
            &mut state,
            EngineEvent::ImageSelected {
                selection: selection("a.png"),
            },
        );
        let generation = state.generation;
        reduce(
            &mut state,
            EngineEvent::PredictResolved {
                generation,
                outcome: Ok(prediction(7)),
            },
        );
        reduce(
            &mut state,
            EngineEvent::PredictResolved {
                generation,
                outcome: Err("server_http_500:boom".to_string()),
            },
        );
        assert_eq!(state.prediction.as_ref().map(|p| p.mask_area), Some(7));
        assert_eq!(state.last_error.as_deref(), Some("server_http_500:boom"));
    }

    #[test]
    fn model_switch_clears_session_prompts_and_prediction() {
        let mut state = EngineState::default();
        state.session.adopt("sess-1".to_string());
        reduce(
            &mut state,
            EngineEvent::ImageSelected {
                selection: selection("a.png"),
            },
        );
        let generation = state.generation;
        reduce(
            &mut state,
            EngineEvent::UploadResolved {
                generation,
                outcome: Ok(ready(640, 480)),
            },
        );
        reduce(
            &mut state,
            EngineEvent::PointAdded {
                point: PromptPoint::foreground(10.0, 10.0),
            },
        );
        reduce(
            &mut state,
            EngineEvent::PredictResolved {
                generation,
                outcome: Ok(prediction(3)),
            },
        );

        reduce(
            &mut state,
            EngineEvent::ModelSwitched {
                model_key: "sam2.1_hiera_small".to_string(),
            },
        );

        assert!(state.session.id().is_none());
        assert_eq!(state.embedding, EmbeddingState::Idle);
        assert!(state.prompts.is_empty());
        assert!(state.prediction.is_none());
        assert_eq!(state.model_key.as_deref(), Some("sam2.1_hiera_small"));
        // In-flight work from before the switch is now stale.
        reduce(
            &mut state,
            EngineEvent::PredictResolved {
                generation,
                outcome: Ok(prediction(99)),
            },
        );
        assert!(state.prediction.is_none());
    }

    #[test]
    fn prompt_order_is_preserved() {
        let mut state = EngineState::default();
        reduce(
            &mut state,
            EngineEvent::PointAdded {
                point: PromptPoint::foreground(10.0, 10.0),
            },
        );
        reduce(
            &mut state,
            EngineEvent::PointAdded {
                point: PromptPoint::background(50.0, 50.0),
            },
        );
        assert_eq!(
            state.prompts,
            vec![
                PromptPoint::foreground(10.0, 10.0),
                PromptPoint::background(50.0, 50.0)
            ]
        );
    }

    #[test]
    fn can_predict_requires_ready_embedding_session_and_prompts() {
        let mut state = EngineState::default();
        assert!(!state.can_predict());

        state.embedding = EmbeddingState::Ready {
            width: 1,
            height: 1,
            elapsed_ms: 0.0,
        };
        assert!(!state.can_predict());

        state.session.adopt("s".to_string());
        assert!(!state.can_predict());

        state.prompts.push(PromptPoint::foreground(0.0, 0.0));
        assert!(state.can_predict());

        state.prompts.clear();
        state.box_prompt = Some([0.0, 0.0, 1.0, 1.0]);
        assert!(state.can_predict());
    }
}
