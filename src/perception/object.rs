//! Object adapter
//!
//! Reports every detection above zero score; gating against the configured
//! threshold happens in the detection loop.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{BoundingBox, DetectionEvent, DetectionKind, Frame, ModalityStatus, Overlay, OverlaySink, Ready};
use crate::{Error, Result};

/// A raw object detection
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetection {
    /// Class label as reported by the model (e.g. "cup")
    pub label: String,

    /// Class score
    pub score: f32,

    /// Outline in pixels
    pub bounds: BoundingBox,
}

/// An object detection model
#[async_trait]
pub trait ObjectModel: Send {
    /// Load weights; may take seconds
    async fn load(&mut self) -> Result<()>;

    /// Detect objects in the frame
    ///
    /// Called once per frame from the blocking pool, so inference may block.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObjectDetection>>;

    /// Release model resources
    fn close(&mut self) {}
}

/// Case-insensitive substring match of a detected label against the
/// expected one ("blue cup" matches "cup")
#[must_use]
pub fn label_matches(label: &str, expected: &str) -> bool {
    let expected = expected.trim().to_lowercase();
    !expected.is_empty() && label.to_lowercase().contains(&expected)
}

/// Object adapter around an [`ObjectModel`]
pub struct ObjectAdapter {
    model: Box<dyn ObjectModel>,
    overlay: Arc<dyn OverlaySink>,
    status: ModalityStatus,
}

impl ObjectAdapter {
    /// Wrap a model; call [`Self::initialize`] before use
    #[must_use]
    pub fn new(model: Box<dyn ObjectModel>, overlay: Arc<dyn OverlaySink>) -> Self {
        Self {
            model,
            overlay,
            status: ModalityStatus::Idle,
        }
    }

    /// Current load state
    #[must_use]
    pub const fn status(&self) -> &ModalityStatus {
        &self.status
    }

    /// Whether frames are being classified
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == ModalityStatus::Ready
    }

    /// Load the model once; later calls return immediately
    ///
    /// # Errors
    ///
    /// Returns error if the model fails to load or the adapter was disposed
    pub async fn initialize(&mut self) -> Result<Ready> {
        match &self.status {
            ModalityStatus::Ready => {
                return Ok(Ready {
                    modality: DetectionKind::Object,
                    load_time: std::time::Duration::ZERO,
                });
            }
            ModalityStatus::Failed(reason) => {
                return Err(Error::Perception(format!("object model unavailable: {reason}")));
            }
            ModalityStatus::Disposed => {
                return Err(Error::Perception("object adapter disposed".to_string()));
            }
            ModalityStatus::Idle | ModalityStatus::Loading => {}
        }

        self.status = ModalityStatus::Loading;
        let started = Instant::now();

        if let Err(e) = self.model.load().await {
            tracing::warn!(error = %e, "object model failed to load");
            self.status = ModalityStatus::Failed(e.to_string());
            return Err(e);
        }

        let load_time = started.elapsed();
        self.status = ModalityStatus::Ready;
        tracing::info!(load_ms = load_time.as_millis(), "object model ready");

        Ok(Ready {
            modality: DetectionKind::Object,
            load_time,
        })
    }

    /// Detect objects in one frame
    ///
    /// Empty when not ready or when inference fails.
    pub fn detect_once(&mut self, frame: &Frame) -> Vec<DetectionEvent> {
        if !self.is_ready() {
            return Vec::new();
        }

        let detections = match self.model.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::debug!(error = %e, "object inference failed");
                return Vec::new();
            }
        };

        if detections.is_empty() {
            self.overlay.render(&Overlay::Clear(DetectionKind::Object));
            return Vec::new();
        }

        detections
            .into_iter()
            .filter(|d| d.score > 0.0)
            .map(|d| {
                self.overlay.render(&Overlay::Object {
                    label: d.label.clone(),
                    confidence: d.score,
                    bounds: d.bounds,
                });
                DetectionEvent::object(d.label, d.score)
            })
            .collect()
    }

    /// Release the model; the adapter cannot be used again
    pub fn dispose(&mut self) {
        if self.status != ModalityStatus::Disposed {
            self.model.close();
            self.status = ModalityStatus::Disposed;
            tracing::debug!("object adapter disposed");
        }
    }
}
