//! Camera detection loop
//!
//! While a scene waits for a gesture or object, a ticker pulls the latest
//! camera frame, runs the relevant adapters, gates results on confidence,
//! and forwards them tagged with the detection window they belong to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::Result;
use crate::config::DetectionConfig;
use crate::perception::{DetectionEvent, DetectionKind, Frame, SharedGesture, SharedObject};
use crate::story::{Requirement, WindowId};

/// Minimum scores for camera events
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Gesture events must score strictly above this
    pub gesture: f32,
    /// Object events must score strictly above this
    pub object: f32,
}

impl Thresholds {
    /// Whether an event clears its threshold
    ///
    /// Speech transcripts carry no meaningful score and always pass.
    #[must_use]
    pub fn accepts(&self, event: &DetectionEvent) -> bool {
        match event.kind {
            DetectionKind::Gesture => event.confidence > self.gesture,
            DetectionKind::Object => event.confidence > self.object,
            DetectionKind::Speech => true,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for Thresholds {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            gesture: config.gesture_threshold,
            object: config.object_threshold,
        }
    }
}

/// Camera modalities to run for a requirement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modalities {
    /// Run the gesture adapter
    pub gesture: bool,
    /// Run the object adapter
    pub object: bool,
}

impl Modalities {
    /// Modalities a requirement can be satisfied through
    #[must_use]
    pub const fn for_requirement(requirement: &Requirement) -> Self {
        match requirement {
            Requirement::Gesture(_) => Self {
                gesture: true,
                object: false,
            },
            Requirement::Object(_) => Self {
                gesture: false,
                object: true,
            },
            Requirement::Both(_, _) => Self {
                gesture: true,
                object: true,
            },
            Requirement::None | Requirement::Speech { .. } => Self {
                gesture: false,
                object: false,
            },
        }
    }

    /// Whether any camera modality is needed
    #[must_use]
    pub const fn any(&self) -> bool {
        self.gesture || self.object
    }
}

/// Source of camera streams
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Open the camera
    ///
    /// # Errors
    ///
    /// Returns error if permission is denied or no device is available
    async fn acquire(&self) -> Result<Box<dyn VideoStream>>;
}

/// An open camera stream
pub trait VideoStream: Send {
    /// Most recent frame, if any has arrived
    fn latest_frame(&mut self) -> Option<Frame>;

    /// Release the device
    ///
    /// # Errors
    ///
    /// Returns error if the device could not be released cleanly
    fn stop(&mut self) -> Result<()>;
}

/// A detection event tagged with the window it was produced for
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedEvent {
    /// Detection window
    pub window: WindowId,

    /// Accepted event
    pub event: DetectionEvent,
}

struct Running {
    window: WindowId,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Releases the camera however the ticker exits, including abort
struct StreamGuard(Box<dyn VideoStream>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.stop() {
            tracing::debug!(error = %e, "camera release failed");
        }
    }
}

/// Ticker-driven frame loop over the perception adapters
pub struct DetectionLoop {
    camera: Arc<dyn CameraSource>,
    gesture: Option<SharedGesture>,
    object: Option<SharedObject>,
    thresholds: Thresholds,
    frame_interval: Duration,
    running: Option<Running>,
}

impl DetectionLoop {
    /// Create a stopped loop
    #[must_use]
    pub fn new(
        camera: Arc<dyn CameraSource>,
        gesture: Option<SharedGesture>,
        object: Option<SharedObject>,
        thresholds: Thresholds,
        frame_interval: Duration,
    ) -> Self {
        Self {
            camera,
            gesture,
            object,
            thresholds,
            frame_interval,
            running: None,
        }
    }

    /// Whether the ticker is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Window the active ticker is serving
    #[must_use]
    pub fn window(&self) -> Option<WindowId> {
        self.running.as_ref().map(|running| running.window)
    }

    /// Start forwarding accepted events for `window`
    ///
    /// Starting again for the window already being served is a no-op; a
    /// different window stops the previous ticker first.
    ///
    /// # Errors
    ///
    /// Returns error if the camera cannot be acquired. The loop stays stopped.
    pub async fn start(
        &mut self,
        window: WindowId,
        modalities: Modalities,
        events: mpsc::Sender<ScopedEvent>,
    ) -> Result<()> {
        if self.is_running() && self.window() == Some(window) {
            tracing::debug!(window, "detection already running");
            return Ok(());
        }

        self.stop().await;

        if !modalities.any() {
            return Ok(());
        }

        let stream = StreamGuard(self.camera.acquire().await?);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let ticker = Ticker {
            window,
            thresholds: self.thresholds,
            gesture: self.gesture.clone().filter(|_| modalities.gesture),
            object: self.object.clone().filter(|_| modalities.object),
            events,
        };

        let task = tokio::spawn(ticker.run(stream, self.frame_interval, shutdown_rx));

        tracing::info!(
            window,
            gesture = modalities.gesture,
            object = modalities.object,
            "detection started"
        );

        self.running = Some(Running {
            window,
            shutdown,
            task,
        });

        Ok(())
    }

    /// Stop the ticker and release the camera
    ///
    /// Safe to call repeatedly and before any start.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(true);

        if let Err(e) = running.task.await {
            tracing::debug!(error = %e, "detection task ended abnormally");
        }

        tracing::info!(window = running.window, "detection stopped");
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        // Aborting drops the ticker's stream guard, which releases the camera
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

struct Ticker {
    window: WindowId,
    thresholds: Thresholds,
    gesture: Option<SharedGesture>,
    object: Option<SharedObject>,
    events: mpsc::Sender<ScopedEvent>,
}

impl Ticker {
    async fn run(
        self,
        mut stream: StreamGuard,
        frame_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(frame_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = interval.tick() => {
                    let Some(frame) = stream.0.latest_frame() else {
                        continue;
                    };
                    if !frame.has_dimensions() {
                        continue;
                    }
                    let detected = self.detect(frame).await;
                    if !self.forward(detected) {
                        break;
                    }
                }
            }
        }
    }

    /// Run the adapters on the blocking pool; model inference can take a
    /// whole frame
    async fn detect(&self, frame: Frame) -> Vec<DetectionEvent> {
        let gesture = self.gesture.clone();
        let object = self.object.clone();

        let inference = tokio::task::spawn_blocking(move || {
            let mut detected = Vec::new();

            // A locked adapter is still loading its model
            if let Some(gesture) = gesture {
                if let Ok(mut adapter) = gesture.try_lock() {
                    detected.extend(adapter.detect_once(&frame));
                }
            }

            if let Some(object) = object {
                if let Ok(mut adapter) = object.try_lock() {
                    detected.extend(adapter.detect_once(&frame));
                }
            }

            detected
        });

        match inference.await {
            Ok(detected) => detected,
            Err(e) => {
                tracing::debug!(error = %e, "frame inference failed");
                Vec::new()
            }
        }
    }

    /// Returns false once the receiver is gone
    fn forward(&self, detected: Vec<DetectionEvent>) -> bool {
        for event in detected {
            if !self.thresholds.accepts(&event) {
                tracing::trace!(kind = %event.kind, label = %event.label, confidence = event.confidence, "below threshold");
                continue;
            }

            match self.events.try_send(ScopedEvent {
                window: self.window,
                event,
            }) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!(window = self.window, "detection channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }

        true
    }
}
