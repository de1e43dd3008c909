//! Perception adapters
//!
//! Wrap gesture and object recognizers behind one lifecycle:
//! `initialize` (model load, possibly slow), `detect_once` per frame, and
//! `dispose`. Adapters that are still loading or failed to load report
//! nothing, so a scene needing them simply cannot complete through them.
//! Speech recognition lives in [`crate::speech`].

pub mod gesture;
pub mod object;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use gesture::{GestureAdapter, GestureModel, HandResult, category_for, map_category};
pub use object::{ObjectAdapter, ObjectDetection, ObjectModel};

/// Which perception pipeline produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionKind {
    /// Hand gesture classifier
    Gesture,
    /// Object classifier
    Object,
    /// Speech recognizer (final transcripts)
    Speech,
}

impl std::fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gesture => write!(f, "gesture"),
            Self::Object => write!(f, "object"),
            Self::Speech => write!(f, "speech"),
        }
    }
}

/// A single perception result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    /// Producing pipeline
    pub kind: DetectionKind,

    /// Semantic label (gesture name, object label, or transcript)
    pub label: String,

    /// Score in `0.0..=1.0`
    pub confidence: f32,

    /// When the event was produced
    pub timestamp: DateTime<Utc>,
}

impl DetectionEvent {
    /// Gesture event
    #[must_use]
    pub fn gesture(label: impl Into<String>, confidence: f32) -> Self {
        Self::new(DetectionKind::Gesture, label.into(), confidence)
    }

    /// Object event
    #[must_use]
    pub fn object(label: impl Into<String>, confidence: f32) -> Self {
        Self::new(DetectionKind::Object, label.into(), confidence)
    }

    /// Final transcript event
    #[must_use]
    pub fn speech(transcript: impl Into<String>) -> Self {
        Self::new(DetectionKind::Speech, transcript.into(), 1.0)
    }

    fn new(kind: DetectionKind, label: String, confidence: f32) -> Self {
        Self {
            kind,
            label,
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// One video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels; zero until the camera has produced real video
    pub width: u32,

    /// Height in pixels; zero until the camera has produced real video
    pub height: u32,

    /// Raw pixel data (RGBA)
    pub data: Arc<[u8]>,
}

impl Frame {
    /// Frame with the given dimensions and pixels
    #[must_use]
    pub fn new(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    /// Whether the camera has reported usable dimensions
    #[must_use]
    pub const fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Normalized point on a detected hand
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    /// Horizontal position, `0.0..=1.0`
    pub x: f32,
    /// Vertical position, `0.0..=1.0`
    pub y: f32,
    /// Relative depth
    pub z: f32,
}

/// Pixel-space rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

/// Diagnostic drawing for user feedback
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    /// Hand skeleton
    Hand {
        /// Landmark points
        landmarks: Vec<Landmark>,
        /// Provider category shown next to the hand
        category: String,
    },
    /// Object outline
    Object {
        /// Detected label
        label: String,
        /// Score
        confidence: f32,
        /// Outline
        bounds: BoundingBox,
    },
    /// Nothing detected in the frame
    Clear(DetectionKind),
}

/// Receives overlays; drawing happens outside the detection path
pub trait OverlaySink: Send + Sync {
    /// Render one overlay
    fn render(&self, overlay: &Overlay);
}

/// Logs overlays at trace level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOverlay;

impl OverlaySink for TracingOverlay {
    fn render(&self, overlay: &Overlay) {
        match overlay {
            Overlay::Hand { landmarks, category } => {
                tracing::trace!(category, points = landmarks.len(), "hand overlay");
            }
            Overlay::Object {
                label, confidence, ..
            } => {
                tracing::trace!(label, confidence, "object overlay");
            }
            Overlay::Clear(kind) => tracing::trace!(%kind, "clear overlay"),
        }
    }
}

/// Load state of a perception adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalityStatus {
    /// Not yet asked to load
    Idle,
    /// Model loading
    Loading,
    /// Ready for frames
    Ready,
    /// Model failed to load; modality unavailable
    Failed(String),
    /// Disposed; must not be used again
    Disposed,
}

/// Proof of a successful initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    /// Which adapter became ready
    pub modality: DetectionKind,

    /// How long the load took (zero if already loaded)
    pub load_time: Duration,
}

/// Gesture adapter shared between its loader task and the detection loop
pub type SharedGesture = Arc<tokio::sync::Mutex<GestureAdapter>>;

/// Object adapter shared between its loader task and the detection loop
pub type SharedObject = Arc<tokio::sync::Mutex<ObjectAdapter>>;
