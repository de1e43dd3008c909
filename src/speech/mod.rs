//! Continuous speech recognition
//!
//! [`SpeechSession`] owns a [`Recognizer`] on its own task and drives it
//! through [`SessionCore`]. Callers steer it with a cloneable
//! [`SpeechControl`] and consume [`SpeechEvent`]s from a channel.

mod backoff;
mod session;

pub use backoff::Backoff;
pub use session::{
    ErrorClass, ProviderEvent, RecognizerError, SessionAction, SessionCore, SessionState,
    SpeechEvent,
};

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SpeechConfig;

/// A speech recognition provider
///
/// Implementations report progress through the [`ProviderSink`] given to
/// [`Recognizer::start`], typically from their own task or callback thread.
#[async_trait]
pub trait Recognizer: Send {
    /// Begin recognition
    ///
    /// # Errors
    ///
    /// Returns error if the microphone or service cannot be opened
    async fn start(&mut self, sink: ProviderSink) -> Result<(), RecognizerError>;

    /// Stop recognition; the provider should report `ended` afterwards
    fn stop(&mut self);
}

/// Callback handle for one recognizer run
///
/// Events from an earlier run are discarded by the session.
#[derive(Debug, Clone)]
pub struct ProviderSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, ProviderEvent)>,
}

impl ProviderSink {
    /// Recognizer is live
    pub fn started(&self) {
        self.send(ProviderEvent::Started);
    }

    /// Transcript hypothesis
    pub fn result(&self, transcript: impl Into<String>, is_final: bool) {
        self.send(ProviderEvent::Result {
            transcript: transcript.into(),
            is_final,
        });
    }

    /// Recognizer error
    pub fn error(&self, error: RecognizerError) {
        self.send(ProviderEvent::Error(error));
    }

    /// Recognizer stopped
    pub fn ended(&self) {
        self.send(ProviderEvent::Ended);
    }

    fn send(&self, event: ProviderEvent) {
        let _ = self.tx.send((self.generation, event));
    }
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Visible(bool),
    Shutdown,
}

/// Cloneable handle steering a [`SpeechSession`]
#[derive(Debug, Clone)]
pub struct SpeechControl {
    tx: mpsc::UnboundedSender<Command>,
}

impl SpeechControl {
    /// Ask the session to listen (and keep listening)
    pub fn start(&self) {
        let _ = self.tx.send(Command::Start);
    }

    /// Stop listening until the next [`Self::start`]
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Report host visibility
    pub fn set_visible(&self, visible: bool) {
        let _ = self.tx.send(Command::Visible(visible));
    }
}

/// A running speech session
pub struct SpeechSession {
    control: SpeechControl,
    state: watch::Receiver<SessionState>,
    task: Option<JoinHandle<()>>,
}

impl SpeechSession {
    /// Spawn the session task; it stays stopped until started
    #[must_use]
    pub fn spawn(
        recognizer: Box<dyn Recognizer>,
        config: &SpeechConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SpeechEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Stopped);

        let driver = Driver {
            core: SessionCore::new(config),
            recognizer,
            events: event_tx,
            state: state_tx,
            generation: 0,
            deadline: None,
        };

        let task = tokio::spawn(driver.run(command_rx));

        let session = Self {
            control: SpeechControl { tx: command_tx },
            state: state_rx,
            task: Some(task),
        };

        (session, event_rx)
    }

    /// Handle for steering the session
    #[must_use]
    pub fn control(&self) -> SpeechControl {
        self.control.clone()
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Stop the recognizer and end the task
    pub async fn shutdown(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let _ = self.control.tx.send(Command::Shutdown);
        if let Err(e) = task.await {
            tracing::debug!(error = %e, "speech task ended abnormally");
        }
    }
}

impl Drop for SpeechSession {
    fn drop(&mut self) {
        // Aborting drops the driver, which stops the recognizer
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Driver {
    core: SessionCore,
    recognizer: Box<dyn Recognizer>,
    events: mpsc::UnboundedSender<SpeechEvent>,
    state: watch::Sender<SessionState>,
    generation: u64,
    deadline: Option<Instant>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (provider_tx, mut provider_rx) = mpsc::unbounded_channel();

        loop {
            let deadline = self.deadline;
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            let actions = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start) => self.core.request_start(Instant::now()),
                    Some(Command::Stop) => self.core.request_stop(),
                    Some(Command::Visible(visible)) => self.core.set_visible(visible),
                    Some(Command::Shutdown) | None => break,
                },

                Some((generation, event)) = provider_rx.recv() => {
                    if generation != self.generation {
                        tracing::trace!(generation, "stale recognizer event");
                        continue;
                    }
                    self.core.on_provider(event)
                }

                () = timer => {
                    self.deadline = None;
                    self.core.on_timer(Instant::now())
                }
            };

            self.apply(actions, &provider_tx).await;
        }

        self.release();
        self.state.send_replace(SessionState::Stopped);
        tracing::debug!("speech session shut down");
    }

    /// Stop a live or starting recognizer; no-op once stopped
    fn release(&mut self) {
        if self
            .core
            .request_stop()
            .contains(&SessionAction::StopProvider)
        {
            self.recognizer.stop();
        }
    }

    async fn apply(
        &mut self,
        actions: Vec<SessionAction>,
        provider_tx: &mpsc::UnboundedSender<(u64, ProviderEvent)>,
    ) {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::StartProvider => {
                    self.generation += 1;
                    let sink = ProviderSink {
                        generation: self.generation,
                        tx: provider_tx.clone(),
                    };
                    tracing::debug!(generation = self.generation, "starting recognizer");

                    if let Err(e) = self.recognizer.start(sink).await {
                        queue.extend(self.core.on_start_failed(&e));
                    }
                }
                SessionAction::StopProvider => self.recognizer.stop(),
                SessionAction::Schedule(delay) => {
                    let at = Instant::now() + delay;
                    self.deadline = Some(self.deadline.map_or(at, |current| current.min(at)));
                }
                SessionAction::Emit(event) => {
                    let _ = self.events.send(event);
                }
            }
        }

        self.state.send_replace(self.core.state());
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.release();
    }
}
