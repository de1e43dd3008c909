//! Hand gesture adapter
//!
//! Provider categories are mapped to the story vocabulary through a fixed
//! table. Categories outside the table never produce an event.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{DetectionEvent, DetectionKind, Frame, Landmark, ModalityStatus, Overlay, OverlaySink, Ready};
use crate::{Error, Result};

/// Provider category → story gesture name
pub const GESTURE_CATEGORIES: &[(&str, &str)] = &[
    ("Open_Palm", "wave"),
    ("Pointing_Up", "point"),
    ("Thumb_Up", "thumbsup"),
    ("Thumb_Down", "thumbsdown"),
    ("Victory", "peace"),
    ("Closed_Fist", "fist"),
    ("ILoveYou", "love"),
];

/// Map a provider category to the story vocabulary
#[must_use]
pub fn map_category(category: &str) -> Option<&'static str> {
    GESTURE_CATEGORIES
        .iter()
        .find(|(provider, _)| *provider == category)
        .map(|(_, semantic)| *semantic)
}

/// Reverse lookup: the provider category that produces a story gesture
#[must_use]
pub fn category_for(gesture: &str) -> Option<&'static str> {
    let gesture = gesture.trim().to_lowercase();
    GESTURE_CATEGORIES
        .iter()
        .find(|(_, semantic)| *semantic == gesture)
        .map(|(provider, _)| *provider)
}

/// Top result for a hand in a frame
#[derive(Debug, Clone, PartialEq)]
pub struct HandResult {
    /// Provider category name (e.g. `Open_Palm`)
    pub category: String,

    /// Category score
    pub score: f32,

    /// Hand skeleton points
    pub landmarks: Vec<Landmark>,
}

/// A gesture recognition model
#[async_trait]
pub trait GestureModel: Send {
    /// Load weights; may take seconds
    async fn load(&mut self) -> Result<()>;

    /// Classify the most prominent hand in the frame
    ///
    /// Called once per frame from the blocking pool, so inference may block.
    fn recognize(&mut self, frame: &Frame) -> Result<Option<HandResult>>;

    /// Release model resources
    fn close(&mut self) {}
}

/// Gesture adapter around a [`GestureModel`]
pub struct GestureAdapter {
    model: Box<dyn GestureModel>,
    overlay: Arc<dyn OverlaySink>,
    status: ModalityStatus,
}

impl GestureAdapter {
    /// Wrap a model; call [`Self::initialize`] before use
    #[must_use]
    pub fn new(model: Box<dyn GestureModel>, overlay: Arc<dyn OverlaySink>) -> Self {
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
    /// Returns error if the model fails to load or the adapter was disposed.
    /// A failed adapter stays failed.
    pub async fn initialize(&mut self) -> Result<Ready> {
        match &self.status {
            ModalityStatus::Ready => {
                return Ok(Ready {
                    modality: DetectionKind::Gesture,
                    load_time: std::time::Duration::ZERO,
                });
            }
            ModalityStatus::Failed(reason) => {
                return Err(Error::Perception(format!("gesture model unavailable: {reason}")));
            }
            ModalityStatus::Disposed => {
                return Err(Error::Perception("gesture adapter disposed".to_string()));
            }
            ModalityStatus::Idle | ModalityStatus::Loading => {}
        }

        self.status = ModalityStatus::Loading;
        let started = Instant::now();

        match self.model.load().await {
            Ok(()) => {
                let load_time = started.elapsed();
                self.status = ModalityStatus::Ready;
                tracing::info!(load_ms = load_time.as_millis(), "gesture model ready");
                Ok(Ready {
                    modality: DetectionKind::Gesture,
                    load_time,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "gesture model failed to load");
                self.status = ModalityStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Classify one frame
    ///
    /// Returns `None` when not ready, when no hand is visible, when the
    /// category is outside the vocabulary, or when inference fails.
    pub fn detect_once(&mut self, frame: &Frame) -> Option<DetectionEvent> {
        if !self.is_ready() {
            return None;
        }

        let hand = match self.model.recognize(frame) {
            Ok(Some(hand)) => hand,
            Ok(None) => {
                self.overlay.render(&Overlay::Clear(DetectionKind::Gesture));
                return None;
            }
            Err(e) => {
                tracing::debug!(error = %e, "gesture inference failed");
                return None;
            }
        };

        self.overlay.render(&Overlay::Hand {
            landmarks: hand.landmarks,
            category: hand.category.clone(),
        });

        let Some(gesture) = map_category(&hand.category) else {
            tracing::trace!(category = %hand.category, "unmapped gesture category");
            return None;
        };

        tracing::trace!(gesture, score = hand.score, "gesture detected");
        Some(DetectionEvent::gesture(gesture, hand.score))
    }

    /// Release the model; the adapter cannot be used again
    pub fn dispose(&mut self) {
        if self.status != ModalityStatus::Disposed {
            self.model.close();
            self.status = ModalityStatus::Disposed;
            tracing::debug!("gesture adapter disposed");
        }
    }
}
