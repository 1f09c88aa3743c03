//! Async driver that owns the engine state and a transport.
//!
//! All operations run on one logical task; suspension points exist only
//! around transport calls. Every operation captures the live generation
//! before its first await and re-checks it at each resume, so a completion
//! that outlived its image selection (or a model switch) is discarded
//! instead of applied. Discarded results are dropped on the spot, which
//! releases any raster they carried.

use image::RgbaImage;
use maskpoint_remote_client::{
    HealthResponse, ModelsResponse, PredictRequest, PredictResponse, SelectModelResponse,
    SessionImageResponse,
};
use tracing::{debug, info, warn};

use crate::compose::{ComposeOptions, compose};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::geometry::{CanvasPoint, CanvasSize, ViewTransform};
use crate::mask;
use crate::session;
use crate::state::{
    EngineEvent, EngineState, ImageSelection, Prediction, PromptLabel, PromptPoint, UploadReady,
    reduce,
};
use crate::transport::SegmentTransport;

pub struct SegmentEngine<T: SegmentTransport> {
    config: EngineConfig,
    transport: T,
    state: EngineState,
}

impl<T: SegmentTransport> SegmentEngine<T> {
    #[must_use]
    pub fn new(transport: T, config: EngineConfig) -> Self {
        Self {
            config,
            transport,
            state: EngineState::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn transport_ref(&self) -> &T {
        &self.transport
    }

    /// Probes the server and marks the engine connected on success.
    pub async fn connect(&mut self) -> Result<HealthResponse, EngineError> {
        let health = self.transport.health().await?;
        info!(model = %health.model.model_key, sessions = health.sessions, "connected");
        reduce(
            &mut self.state,
            EngineEvent::Connected {
                model_key: health.model.model_key.clone(),
            },
        );
        Ok(health)
    }

    /// Tears down the session (best effort) and resets transient state.
    pub async fn disconnect(&mut self) {
        if let Some(id) = self.state.session.id().map(str::to_string) {
            // The server garbage-collects sessions by TTL, so a failed delete
            // is not worth surfacing.
            if let Err(error) = self.transport.delete_session(&id).await {
                debug!(session_id = %id, %error, "session delete failed");
            }
        }
        reduce(&mut self.state, EngineEvent::Disconnected);
    }

    pub async fn refresh_models(&mut self) -> Result<ModelsResponse, EngineError> {
        Ok(self.transport.list_models().await?)
    }

    /// Switches the server-side model. This invalidates every session on the
    /// server, so the held session id, prompts, embedding, and prediction are
    /// all reset before any further action is accepted.
    pub async fn switch_model(&mut self, model_key: &str) -> Result<SelectModelResponse, EngineError> {
        let response = self.transport.select_model(model_key).await?;
        reduce(
            &mut self.state,
            EngineEvent::ModelSwitched {
                model_key: response.model.model_key.clone(),
            },
        );
        Ok(response)
    }

    /// Makes `selection` the active image and drives its embedding upload.
    /// A later selection supersedes this one; if that happens while the
    /// upload is in flight, the completion is discarded.
    pub async fn select_image(&mut self, selection: ImageSelection) -> Result<(), EngineError> {
        reduce(
            &mut self.state,
            EngineEvent::ImageSelected {
                selection: selection.clone(),
            },
        );
        let generation = self.state.generation;

        if !self.state.connected {
            reduce(
                &mut self.state,
                EngineEvent::UploadResolved {
                    generation,
                    outcome: Err("no server connection".to_string()),
                },
            );
            return Err(EngineError::NotConnected);
        }

        reduce(&mut self.state, EngineEvent::UploadStarted { generation });

        let outcome = self.upload_once_or_retry(generation, &selection).await;
        if self.state.generation != generation {
            debug!(generation, "upload resumed stale; result discarded");
            return Ok(());
        }
        match outcome {
            Ok(None) => Ok(()),
            Ok(Some(response)) => {
                reduce(
                    &mut self.state,
                    EngineEvent::UploadResolved {
                        generation,
                        outcome: Ok(UploadReady {
                            width: response.width,
                            height: response.height,
                            elapsed_ms: response.elapsed_ms,
                        }),
                    },
                );
                Ok(())
            }
            Err(error) => {
                reduce(
                    &mut self.state,
                    EngineEvent::UploadResolved {
                        generation,
                        outcome: Err(error.to_string()),
                    },
                );
                Err(error)
            }
        }
    }

    /// Appends an image-pixel prompt point and immediately attempts a
    /// predict. The predict is a no-op unless the embedding is ready.
    pub async fn add_point(
        &mut self,
        x: f64,
        y: f64,
        label: PromptLabel,
    ) -> Result<(), EngineError> {
        if self.state.selection.is_none() {
            return Err(EngineError::NoActiveImage);
        }
        reduce(
            &mut self.state,
            EngineEvent::PointAdded {
                point: PromptPoint { x, y, label },
            },
        );
        self.try_predict().await.map(|_| ())
    }

    /// Appends several prompt points at once and issues a single predict for
    /// the whole set.
    pub async fn add_points(
        &mut self,
        points: impl IntoIterator<Item = PromptPoint>,
    ) -> Result<(), EngineError> {
        if self.state.selection.is_none() {
            return Err(EngineError::NoActiveImage);
        }
        for point in points {
            reduce(&mut self.state, EngineEvent::PointAdded { point });
        }
        self.try_predict().await.map(|_| ())
    }

    /// Maps a canvas click to image pixels and adds it as a prompt point.
    /// Returns `Ok(false)` without adding a point when the click misses the
    /// displayed image (letterbox margins, degenerate canvas).
    pub async fn add_canvas_point(
        &mut self,
        canvas: CanvasSize,
        click: CanvasPoint,
        label: PromptLabel,
    ) -> Result<bool, EngineError> {
        let selection = self
            .state
            .selection
            .as_ref()
            .ok_or(EngineError::NoActiveImage)?;
        let Some(transform) = ViewTransform::fit(canvas, selection.size) else {
            return Ok(false);
        };
        if !transform.dest_contains(click) {
            return Ok(false);
        }
        let point = transform.canvas_to_image(click);
        self.add_point(point.x, point.y, label).await?;
        Ok(true)
    }

    /// Sets the rectangular prompt (image-pixel corners `[x0, y0, x1, y1]`)
    /// and immediately attempts a predict.
    pub async fn set_box(&mut self, corners: [f64; 4]) -> Result<(), EngineError> {
        if self.state.selection.is_none() {
            return Err(EngineError::NoActiveImage);
        }
        reduce(&mut self.state, EngineEvent::BoxSet { corners });
        self.try_predict().await.map(|_| ())
    }

    pub fn clear_prompts(&mut self) {
        reduce(&mut self.state, EngineEvent::PromptsCleared);
    }

    /// Issues a predict for the accumulated prompts. Returns `Ok(false)` when
    /// the call was skipped (embedding not ready, no prompts, or no session).
    pub async fn predict_now(&mut self) -> Result<bool, EngineError> {
        self.try_predict().await
    }

    /// Renders the current frame: contain-fit base, dim, mask punch-out,
    /// prompt markers. Pure with respect to engine state.
    #[must_use]
    pub fn render(&self, canvas_width: u32, canvas_height: u32, base: &RgbaImage) -> Option<RgbaImage> {
        let options = ComposeOptions {
            dim_factor: self.config.dim_factor,
            marker_radius: self.config.marker_radius,
            ..Default::default()
        };
        compose(
            canvas_width,
            canvas_height,
            base,
            self.state.prediction.as_ref().map(|p| &p.mask),
            &self.state.prompts,
            &options,
        )
    }

    async fn try_predict(&mut self) -> Result<bool, EngineError> {
        if !self.state.can_predict() {
            debug!("predict skipped: embedding not ready or no prompts");
            return Ok(false);
        }
        let generation = self.state.generation;
        let request = PredictRequest {
            points: self.state.prompts.iter().map(|p| [p.x, p.y]).collect(),
            labels: self.state.prompts.iter().map(|p| p.label.as_wire()).collect(),
            box_prompt: self.state.box_prompt,
            multimask: self.config.multimask,
            return_format: "png_base64",
        };

        let outcome = self.predict_once_or_retry(generation, &request).await;
        if self.state.generation != generation {
            debug!(generation, "predict resumed stale; result discarded");
            return Ok(true);
        }
        match outcome {
            Ok(None) => Ok(true),
            Ok(Some(response)) => match mask::decode_mask_png(&response.mask_png_base64) {
                Ok(mask) => {
                    reduce(
                        &mut self.state,
                        EngineEvent::PredictResolved {
                            generation,
                            outcome: Ok(Prediction {
                                mask,
                                score: response.score,
                                mask_area: response.mask_area,
                                elapsed_ms: response.elapsed_ms,
                            }),
                        },
                    );
                    Ok(true)
                }
                Err(error) => {
                    reduce(
                        &mut self.state,
                        EngineEvent::PredictResolved {
                            generation,
                            outcome: Err(error.to_string()),
                        },
                    );
                    Err(error)
                }
            },
            Err(error) => {
                reduce(
                    &mut self.state,
                    EngineEvent::PredictResolved {
                        generation,
                        outcome: Err(error.to_string()),
                    },
                );
                Err(error)
            }
        }
    }

    /// Upload with the one-shot stale-session recovery: a 404 clears the held
    /// id, ensures a fresh session, and retries exactly once. `Ok(None)`
    /// means the operation went stale mid-flight and was abandoned.
    async fn upload_once_or_retry(
        &mut self,
        generation: u64,
        selection: &ImageSelection,
    ) -> Result<Option<SessionImageResponse>, EngineError> {
        let session_id =
            session::ensure_session(&mut self.state.session, &self.transport).await?;
        if self.state.generation != generation {
            return Ok(None);
        }
        match self
            .transport
            .upload_image(&session_id, &selection.file_name, selection.bytes.as_ref().clone())
            .await
        {
            Ok(response) => Ok(Some(response)),
            Err(error) if error.is_session_not_found() => {
                warn!(session_id = %session_id, "session unknown to server; recreating once");
                self.state.session.forget();
                if self.state.generation != generation {
                    return Ok(None);
                }
                let session_id =
                    session::ensure_session(&mut self.state.session, &self.transport).await?;
                if self.state.generation != generation {
                    return Ok(None);
                }
                Ok(Some(
                    self.transport
                        .upload_image(
                            &session_id,
                            &selection.file_name,
                            selection.bytes.as_ref().clone(),
                        )
                        .await?,
                ))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Predict with the one-shot stale-session recovery. The fresh session
    /// holds no embedding, so the recovery re-uploads the active image before
    /// the single retried predict. A second 404 surfaces as a hard failure.
    async fn predict_once_or_retry(
        &mut self,
        generation: u64,
        request: &PredictRequest,
    ) -> Result<Option<PredictResponse>, EngineError> {
        let Some(session_id) = self.state.session.id().map(str::to_string) else {
            return Ok(None);
        };
        match self.transport.predict(&session_id, request).await {
            Ok(response) => Ok(Some(response)),
            Err(error) if error.is_session_not_found() => {
                warn!(session_id = %session_id, "session unknown to server; recreating once");
                self.state.session.forget();
                if self.state.generation != generation {
                    return Ok(None);
                }
                let selection = self
                    .state
                    .selection
                    .clone()
                    .ok_or(EngineError::NoActiveImage)?;
                let session_id =
                    session::ensure_session(&mut self.state.session, &self.transport).await?;
                if self.state.generation != generation {
                    return Ok(None);
                }
                let upload = self
                    .transport
                    .upload_image(
                        &session_id,
                        &selection.file_name,
                        selection.bytes.as_ref().clone(),
                    )
                    .await?;
                if self.state.generation != generation {
                    return Ok(None);
                }
                reduce(
                    &mut self.state,
                    EngineEvent::UploadResolved {
                        generation,
                        outcome: Ok(UploadReady {
                            width: upload.width,
                            height: upload.height,
                            elapsed_ms: upload.elapsed_ms,
                        }),
                    },
                );
                Ok(Some(self.transport.predict(&session_id, request).await?))
            }
            Err(error) => Err(error.into()),
        }
    }
}
