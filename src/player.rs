//! Story player
//!
//! Drives a [`StoryMachine`] against real resources: narration audio, the
//! camera detection loop, and the speech session. Effects from the machine
//! are executed here and their results fed back as inputs, so every
//! ordering rule lives in the machine and every side effect lives here.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::detection::{CameraSource, DetectionLoop, Modalities, ScopedEvent, Thresholds};
use crate::evaluator::SceneEvaluator;
use crate::narration::NarrationHandle;
use crate::perception::{DetectionEvent, DetectionKind, SharedGesture, SharedObject};
use crate::speech::{Recognizer, SpeechControl, SpeechEvent, SpeechSession};
use crate::story::{Cue, Effect, Input, Outcome, PlaybackState, Speaker, Story, StoryMachine, WindowId};

/// Buffered detection events between the frame loop and the player
const DETECTION_BUFFER: usize = 64;

type PendingCue = Pin<Box<dyn Future<Output = Cue> + Send>>;

/// Perception resources handed to the player
pub struct Perception {
    /// Camera used while a gesture or object is awaited
    pub camera: Arc<dyn CameraSource>,

    /// Gesture adapter, if available
    pub gesture: Option<SharedGesture>,

    /// Object adapter, if available
    pub object: Option<SharedObject>,

    /// Speech recognizer, if available
    pub recognizer: Option<Box<dyn Recognizer>>,
}

/// Progress reported to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Scene state changed
    State {
        /// Scene index
        scene: usize,
        /// New state
        state: PlaybackState,
    },
    /// A line is about to be spoken
    Narrating {
        /// Speaker
        speaker: Speaker,
        /// Line text
        text: String,
    },
    /// Recognizer heard something
    Heard {
        /// Transcript
        transcript: String,
        /// Whether it was final
        is_final: bool,
    },
    /// A modality is unavailable; scenes needing it cannot complete through it
    Degraded {
        /// Affected modality
        modality: DetectionKind,
        /// Why
        reason: String,
    },
    /// Terminal problem the user must act on
    Error(String),
    /// Story over
    Finished(Outcome),
}

enum Step {
    Cancel,
    Cue(Cue),
    Detection(ScopedEvent),
    Speech(Option<SpeechEvent>),
}

/// Plays one story session
pub struct StoryPlayer {
    session: Uuid,
    machine: StoryMachine,
    evaluator: SceneEvaluator,
    detection: DetectionLoop,
    detections_tx: mpsc::Sender<ScopedEvent>,
    detections_rx: mpsc::Receiver<ScopedEvent>,
    speech: Option<(SpeechSession, mpsc::UnboundedReceiver<SpeechEvent>)>,
    listening: Option<WindowId>,
    narration: NarrationHandle,
    gesture: Option<SharedGesture>,
    object: Option<SharedObject>,
    loaders: Vec<JoinHandle<()>>,
    pending: Option<PendingCue>,
    notices: mpsc::UnboundedSender<Notice>,
    released: bool,
}

impl StoryPlayer {
    /// Prepare a player for `story`
    ///
    /// The speech session is spawned immediately but stays stopped until a
    /// scene asks for speech.
    #[must_use]
    pub fn new(
        story: &Story,
        perception: Perception,
        narration: NarrationHandle,
        config: &Config,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let (detections_tx, detections_rx) = mpsc::channel(DETECTION_BUFFER);

        let detection = DetectionLoop::new(
            perception.camera,
            perception.gesture.clone(),
            perception.object.clone(),
            Thresholds::from(&config.detection),
            config.detection.frame_interval(),
        );

        let speech = perception
            .recognizer
            .map(|recognizer| SpeechSession::spawn(recognizer, &config.speech));

        let player = Self {
            session: Uuid::new_v4(),
            machine: StoryMachine::new(story.to_scenes(), config.playback.clone()),
            evaluator: SceneEvaluator::new(),
            detection,
            detections_tx,
            detections_rx,
            speech,
            listening: None,
            narration,
            gesture: perception.gesture,
            object: perception.object,
            loaders: Vec::new(),
            pending: None,
            notices,
            released: false,
        };

        (player, notices_rx)
    }

    /// Identifier attached to this session's log lines
    #[must_use]
    pub const fn session(&self) -> Uuid {
        self.session
    }

    /// Handle for pausing speech while the host is hidden
    #[must_use]
    pub fn speech_control(&self) -> Option<SpeechControl> {
        self.speech.as_ref().map(|(session, _)| session.control())
    }

    /// Play until the story completes or `cancel` resolves
    ///
    /// Every resource is released before this returns. Dropping the future
    /// instead (or aborting its task) still releases the camera and
    /// microphone.
    pub async fn run(self, cancel: impl Future<Output = ()> + Send) -> Outcome {
        let span = tracing::info_span!("story", session = %self.session.as_simple());
        self.play(cancel).instrument(span).await
    }

    async fn play(mut self, cancel: impl Future<Output = ()> + Send) -> Outcome {
        self.warm_up();

        let mut inputs = VecDeque::from([Input::Begin]);
        tokio::pin!(cancel);

        loop {
            while let Some(input) = inputs.pop_front() {
                for effect in self.machine.transition(input) {
                    if let Some(next) = self.execute(effect).await {
                        inputs.push_back(next);
                    }
                }
            }

            if let Some(outcome) = self.machine.outcome() {
                self.teardown().await;
                tracing::info!(?outcome, "story finished");
                self.notify(Notice::Finished(outcome));
                return outcome;
            }

            let pending = &mut self.pending;
            let detections = &mut self.detections_rx;
            let speech = &mut self.speech;

            let step = tokio::select! {
                () = &mut cancel => Step::Cancel,
                cue = next_cue(pending) => Step::Cue(cue),
                Some(scoped) = detections.recv() => Step::Detection(scoped),
                event = next_speech(speech) => Step::Speech(event),
            };

            match step {
                Step::Cancel => {
                    tracing::info!("story cancelled");
                    inputs.push_back(Input::Cancel);
                }
                Step::Cue(cue) => {
                    self.pending = None;
                    inputs.push_back(Input::CueDone(cue));
                }
                Step::Detection(scoped) => {
                    inputs.extend(self.on_detection(scoped.window, &scoped.event));
                }
                Step::Speech(Some(event)) => inputs.extend(self.on_speech(event)),
                Step::Speech(None) => {
                    tracing::warn!("speech session ended unexpectedly");
                    self.speech = None;
                }
            }
        }
    }

    fn warm_up(&mut self) {
        if let Some(gesture) = self.gesture.clone() {
            let notices = self.notices.clone();
            self.loaders.push(tokio::spawn(async move {
                if let Err(e) = gesture.lock().await.initialize().await {
                    let _ = notices.send(Notice::Degraded {
                        modality: DetectionKind::Gesture,
                        reason: e.to_string(),
                    });
                }
            }));
        }

        if let Some(object) = self.object.clone() {
            let notices = self.notices.clone();
            self.loaders.push(tokio::spawn(async move {
                if let Err(e) = object.lock().await.initialize().await {
                    let _ = notices.send(Notice::Degraded {
                        modality: DetectionKind::Object,
                        reason: e.to_string(),
                    });
                }
            }));
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::Enter { scene, state } => {
                self.notify(Notice::State { scene, state });
            }
            Effect::Speak { cue, line, delay } => {
                self.notify(Notice::Narrating {
                    speaker: line.speaker,
                    text: line.text.clone(),
                });

                let narration = self.narration.clone();
                self.pending = Some(Box::pin(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if let Err(e) = narration.speak(line).await {
                        tracing::warn!(error = %e, ?cue, "skipping narration line");
                    }
                    cue
                }));
            }
            Effect::Wait { cue, duration } => {
                self.pending = Some(Box::pin(async move {
                    tokio::time::sleep(duration).await;
                    cue
                }));
            }
            Effect::OpenWindow {
                scene,
                window,
                requirement,
            } => {
                if self.evaluator.open(requirement.clone()) {
                    return Some(Input::RequirementMet { scene, window });
                }

                let modalities = Modalities::for_requirement(&requirement);
                if modalities.any() {
                    if let Err(e) = self
                        .detection
                        .start(window, modalities, self.detections_tx.clone())
                        .await
                    {
                        tracing::warn!(error = %e, "camera unavailable");
                        let affected = [
                            (modalities.gesture, DetectionKind::Gesture),
                            (modalities.object, DetectionKind::Object),
                        ];
                        for (_, modality) in affected.into_iter().filter(|(on, _)| *on) {
                            self.notify(Notice::Degraded {
                                modality,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
            Effect::Listen { window } => match &self.speech {
                Some((session, _)) => {
                    self.listening = Some(window);
                    session.control().start();
                }
                None => self.notify(Notice::Degraded {
                    modality: DetectionKind::Speech,
                    reason: "no speech recognizer available".to_string(),
                }),
            },
            Effect::CloseWindow { window } => {
                tracing::debug!(window, "closing detection window");
                self.evaluator.reset();
                self.detection.stop().await;
                self.stop_listening();
            }
            Effect::CancelCue => {
                self.pending = None;
                self.narration.cancel();
            }
            Effect::Finish(_) => {}
        }

        None
    }

    fn on_detection(&mut self, window: WindowId, event: &DetectionEvent) -> Option<Input> {
        if !self.machine.accepts(window) {
            tracing::trace!(window, label = %event.label, "detection outside open window");
            return None;
        }

        self.evaluator
            .observe(event)
            .then(|| Input::RequirementMet {
                scene: self.machine.scene_index(),
                window,
            })
    }

    fn on_speech(&mut self, event: SpeechEvent) -> Option<Input> {
        match event {
            SpeechEvent::FinalTranscript(transcript) => {
                self.notify(Notice::Heard {
                    transcript: transcript.clone(),
                    is_final: true,
                });

                let window = self.listening?;
                self.on_detection(window, &DetectionEvent::speech(transcript))
            }
            SpeechEvent::InterimTranscript(transcript) => {
                self.notify(Notice::Heard {
                    transcript,
                    is_final: false,
                });
                None
            }
            SpeechEvent::PermissionDenied => {
                self.notify(Notice::Error(
                    "microphone permission denied; enable it to answer out loud".to_string(),
                ));
                None
            }
            SpeechEvent::Started | SpeechEvent::Stopped => {
                tracing::trace!(?event, "speech session event");
                None
            }
        }
    }

    fn stop_listening(&mut self) {
        if self.listening.take().is_some() {
            if let Some((session, _)) = &self.speech {
                session.control().stop();
            }
        }
    }

    async fn teardown(&mut self) {
        self.pending = None;
        self.narration.cancel();
        self.evaluator.reset();
        self.detection.stop().await;
        self.stop_listening();

        if let Some((mut session, _)) = self.speech.take() {
            session.shutdown().await;
        }

        for loader in self.loaders.drain(..) {
            loader.abort();
            let _ = loader.await;
        }

        if let Some(gesture) = &self.gesture {
            gesture.lock().await.dispose();
        }
        if let Some(object) = &self.object {
            object.lock().await.dispose();
        }

        self.released = true;
        tracing::debug!("story resources released");
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}

impl Drop for StoryPlayer {
    fn drop(&mut self) {
        // Dropped without teardown when the run future is dropped or aborted.
        // The detection loop and speech session release their devices in
        // their own drops.
        if self.released {
            return;
        }

        for loader in self.loaders.drain(..) {
            loader.abort();
        }
        self.narration.cancel();

        if let Some(gesture) = self.gesture.take() {
            dispose_later(async move { gesture.lock().await.dispose() });
        }
        if let Some(object) = self.object.take() {
            dispose_later(async move { object.lock().await.dispose() });
        }
    }
}

/// Adapters may be mid-inference, so disposal waits for their lock
fn dispose_later(dispose: impl Future<Output = ()> + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(dispose);
        }
        Err(_) => tracing::debug!("no runtime, adapter left undisposed"),
    }
}

async fn next_cue(pending: &mut Option<PendingCue>) -> Cue {
    match pending {
        Some(cue) => cue.await,
        None => std::future::pending().await,
    }
}

async fn next_speech(
    speech: &mut Option<(SpeechSession, mpsc::UnboundedReceiver<SpeechEvent>)>,
) -> Option<SpeechEvent> {
    match speech {
        Some((_, events)) => events.recv().await,
        None => std::future::pending().await,
    }
}
