//! Continuous recognition session state
//!
//! Recognizers stop on their own (silence, network hiccups, the OS taking
//! the microphone away). The session keeps one listening for as long as the
//! caller wants it, restarting with backoff, while never fighting a manual
//! stop, a hidden host, or a denied permission.

use std::time::Duration;

use tokio::time::Instant;

use super::backoff::Backoff;
use crate::config::SpeechConfig;

/// Recognizer lifecycle as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No recognizer running
    Stopped,
    /// Start requested, waiting for the recognizer to report it is live
    Starting,
    /// Recognizer live
    Listening,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Listening => write!(f, "listening"),
        }
    }
}

/// Error reported by a recognizer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognizerError {
    /// Microphone permission denied by the user
    #[error("microphone permission denied")]
    NotAllowed,

    /// Recognition service refused by policy
    #[error("speech service not allowed")]
    ServiceNotAllowed,

    /// Recognition aborted, usually by our own stop
    #[error("recognition aborted")]
    Aborted,

    /// Nothing was said
    #[error("no speech detected")]
    NoSpeech,

    /// Service unreachable
    #[error("network error")]
    Network,

    /// Audio capture failed
    #[error("audio capture failed")]
    AudioCapture,

    /// Anything else
    #[error("recognizer error: {0}")]
    Other(String),
}

/// How the session reacts to a recognizer error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stop for good and tell the user
    Terminal,
    /// Ignore silently
    Swallowed,
    /// Expected; the end that follows restarts normally
    Benign,
    /// Grow the backoff; the end that follows restarts
    Retryable,
}

impl RecognizerError {
    /// Parse a provider error code (`not-allowed`, `no-speech`, ...)
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "aborted" => Self::Aborted,
            "no-speech" => Self::NoSpeech,
            "network" => Self::Network,
            "audio-capture" => Self::AudioCapture,
            other => Self::Other(other.to_string()),
        }
    }

    /// Reaction class
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NotAllowed | Self::ServiceNotAllowed => ErrorClass::Terminal,
            Self::Aborted => ErrorClass::Swallowed,
            Self::NoSpeech => ErrorClass::Benign,
            Self::Network | Self::AudioCapture | Self::Other(_) => ErrorClass::Retryable,
        }
    }
}

/// Something the recognizer reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Recognizer is live
    Started,
    /// Transcript hypothesis
    Result {
        /// Recognized text
        transcript: String,
        /// Whether the hypothesis is final
        is_final: bool,
    },
    /// Recognizer error
    Error(RecognizerError),
    /// Recognizer stopped
    Ended,
}

/// Events published to session subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Recognizer is listening
    Started,
    /// Partial hypothesis (display only)
    InterimTranscript(String),
    /// Final transcript
    FinalTranscript(String),
    /// Session stopped on request
    Stopped,
    /// Microphone permission permanently denied
    PermissionDenied,
}

/// Work the session driver must perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Start the recognizer
    StartProvider,
    /// Stop the recognizer
    StopProvider,
    /// Call [`SessionCore::on_timer`] after the delay
    Schedule(Duration),
    /// Publish an event
    Emit(SpeechEvent),
}

/// Session state machine
#[derive(Debug)]
pub struct SessionCore {
    state: SessionState,
    backoff: Backoff,
    cooldown: Duration,
    resume_delay: Duration,
    manually_stopped: bool,
    hidden: bool,
    permission_denied: bool,
    last_attempt: Option<Instant>,
}

impl SessionCore {
    /// Create a stopped session
    #[must_use]
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            state: SessionState::Stopped,
            backoff: Backoff::from(config),
            cooldown: Duration::from_millis(config.start_cooldown_ms),
            resume_delay: Duration::from_millis(config.resume_delay_ms),
            manually_stopped: true,
            hidden: false,
            permission_denied: false,
            last_attempt: None,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Delay the next unplanned restart would use
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        self.backoff.current()
    }

    /// Whether the microphone was permanently refused
    #[must_use]
    pub const fn permission_denied(&self) -> bool {
        self.permission_denied
    }

    /// Caller wants the session listening
    pub fn request_start(&mut self, now: Instant) -> Vec<SessionAction> {
        self.manually_stopped = false;

        if self.permission_denied {
            tracing::debug!("speech start ignored, permission denied");
            return Vec::new();
        }

        self.try_start(now)
    }

    /// Caller wants the session stopped; disables automatic restarts
    pub fn request_stop(&mut self) -> Vec<SessionAction> {
        self.manually_stopped = true;

        if self.state == SessionState::Stopped {
            return Vec::new();
        }

        self.state = SessionState::Stopped;
        vec![
            SessionAction::StopProvider,
            SessionAction::Emit(SpeechEvent::Stopped),
        ]
    }

    /// Host visibility changed
    ///
    /// Hiding pauses the recognizer without counting as a manual stop;
    /// becoming visible resumes after a short settle delay.
    pub fn set_visible(&mut self, visible: bool) -> Vec<SessionAction> {
        if visible {
            if !self.hidden {
                return Vec::new();
            }
            self.hidden = false;

            if self.manually_stopped || self.permission_denied {
                return Vec::new();
            }

            tracing::debug!(delay_ms = self.resume_delay.as_millis(), "speech resuming");
            return vec![SessionAction::Schedule(self.resume_delay)];
        }

        self.hidden = true;

        if self.state == SessionState::Stopped {
            return Vec::new();
        }

        tracing::debug!("speech paused while hidden");
        self.state = SessionState::Stopped;
        vec![SessionAction::StopProvider]
    }

    /// A scheduled delay elapsed
    pub fn on_timer(&mut self, now: Instant) -> Vec<SessionAction> {
        self.try_start(now)
    }

    /// Recognizer reported an event
    pub fn on_provider(&mut self, event: ProviderEvent) -> Vec<SessionAction> {
        match event {
            ProviderEvent::Started => self.on_started(),
            ProviderEvent::Result {
                transcript,
                is_final,
            } => self.on_result(transcript, is_final),
            ProviderEvent::Error(error) => self.on_error(&error),
            ProviderEvent::Ended => self.on_ended(),
        }
    }

    /// Recognizer refused to start
    pub fn on_start_failed(&mut self, error: &RecognizerError) -> Vec<SessionAction> {
        self.state = SessionState::Stopped;

        if error.class() == ErrorClass::Terminal {
            return self.deny(error);
        }

        tracing::debug!(error = %error, "speech start failed");
        self.schedule_restart()
    }

    fn try_start(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.manually_stopped || self.hidden || self.permission_denied {
            return Vec::new();
        }

        if self.state != SessionState::Stopped {
            tracing::trace!(state = %self.state, "speech start deduplicated");
            return Vec::new();
        }

        if let Some(last) = self.last_attempt {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.cooldown {
                return vec![SessionAction::Schedule(self.cooldown - elapsed)];
            }
        }

        self.last_attempt = Some(now);
        self.state = SessionState::Starting;
        vec![SessionAction::StartProvider]
    }

    fn on_started(&mut self) -> Vec<SessionAction> {
        if self.manually_stopped || self.hidden || self.permission_denied {
            self.state = SessionState::Stopped;
            return vec![SessionAction::StopProvider];
        }

        self.backoff.reset();
        self.state = SessionState::Listening;
        tracing::debug!("speech listening");
        vec![SessionAction::Emit(SpeechEvent::Started)]
    }

    fn on_result(&mut self, transcript: String, is_final: bool) -> Vec<SessionAction> {
        if self.state == SessionState::Stopped {
            return Vec::new();
        }

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Vec::new();
        }

        let event = if is_final {
            tracing::debug!(transcript = %transcript, "final transcript");
            SpeechEvent::FinalTranscript(transcript)
        } else {
            SpeechEvent::InterimTranscript(transcript)
        };

        vec![SessionAction::Emit(event)]
    }

    fn on_error(&mut self, error: &RecognizerError) -> Vec<SessionAction> {
        match error.class() {
            ErrorClass::Terminal => self.deny(error),
            ErrorClass::Swallowed | ErrorClass::Benign => Vec::new(),
            ErrorClass::Retryable => {
                tracing::debug!(error = %error, "speech recognizer error");
                self.backoff.grow();
                Vec::new()
            }
        }
    }

    fn on_ended(&mut self) -> Vec<SessionAction> {
        self.state = SessionState::Stopped;

        if self.manually_stopped || self.hidden || self.permission_denied {
            return Vec::new();
        }

        self.schedule_restart()
    }

    fn schedule_restart(&mut self) -> Vec<SessionAction> {
        let delay = self.backoff.current();
        self.backoff.grow();
        tracing::debug!(delay_ms = delay.as_millis(), "speech restart scheduled");
        vec![SessionAction::Schedule(delay)]
    }

    fn deny(&mut self, error: &RecognizerError) -> Vec<SessionAction> {
        tracing::warn!(error = %error, "speech permission denied");
        self.permission_denied = true;
        self.state = SessionState::Stopped;
        vec![
            SessionAction::StopProvider,
            SessionAction::Emit(SpeechEvent::PermissionDenied),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> SessionCore {
        SessionCore::new(&SpeechConfig::default())
    }

    fn listening(core: &mut SessionCore, now: Instant) {
        assert_eq!(core.request_start(now), vec![SessionAction::StartProvider]);
        core.on_provider(ProviderEvent::Started);
        assert_eq!(core.state(), SessionState::Listening);
    }

    #[test]
    fn classifies_errors() {
        assert_eq!(RecognizerError::from_code("not-allowed").class(), ErrorClass::Terminal);
        assert_eq!(
            RecognizerError::from_code("service-not-allowed").class(),
            ErrorClass::Terminal
        );
        assert_eq!(RecognizerError::from_code("aborted").class(), ErrorClass::Swallowed);
        assert_eq!(RecognizerError::from_code("no-speech").class(), ErrorClass::Benign);
        assert_eq!(RecognizerError::from_code("network").class(), ErrorClass::Retryable);
        assert_eq!(
            RecognizerError::from_code("bad-grammar"),
            RecognizerError::Other("bad-grammar".to_string())
        );
    }

    #[test]
    fn starts_only_when_requested() {
        let mut core = core();
        assert!(core.on_timer(Instant::now()).is_empty());
        assert_eq!(core.state(), SessionState::Stopped);
    }

    #[test]
    fn deduplicates_start_while_active() {
        let mut core = core();
        let now = Instant::now();
        assert_eq!(core.request_start(now), vec![SessionAction::StartProvider]);
        assert!(core.request_start(now + Duration::from_secs(1)).is_empty());

        core.on_provider(ProviderEvent::Started);
        assert!(core.request_start(now + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn respects_start_cooldown() {
        let mut core = core();
        let now = Instant::now();
        listening(&mut core, now);

        core.request_stop();
        let actions = core.request_start(now + Duration::from_millis(100));
        assert_eq!(actions, vec![SessionAction::Schedule(Duration::from_millis(200))]);

        let actions = core.on_timer(now + Duration::from_millis(300));
        assert_eq!(actions, vec![SessionAction::StartProvider]);
    }

    #[test]
    fn backoff_after_three_unplanned_ends() {
        let mut core = core();
        let mut now = Instant::now();
        listening(&mut core, now);

        let mut delays = Vec::new();
        for _ in 0..3 {
            let actions = core.on_provider(ProviderEvent::Ended);
            let [SessionAction::Schedule(delay)] = actions.as_slice() else {
                panic!("expected a restart, got {actions:?}");
            };
            delays.push(*delay);
            now += *delay;
            assert_eq!(core.on_timer(now), vec![SessionAction::StartProvider]);
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(750),
                Duration::from_millis(1125)
            ]
        );
        assert_eq!(core.backoff(), Duration::from_micros(1_687_500));

        core.on_provider(ProviderEvent::Started);
        assert_eq!(core.backoff(), Duration::from_millis(500));
    }

    #[test]
    fn manual_stop_prevents_restart() {
        let mut core = core();
        listening(&mut core, Instant::now());

        assert_eq!(
            core.request_stop(),
            vec![
                SessionAction::StopProvider,
                SessionAction::Emit(SpeechEvent::Stopped)
            ]
        );
        assert!(core.on_provider(ProviderEvent::Error(RecognizerError::Aborted)).is_empty());
        assert!(core.on_provider(ProviderEvent::Ended).is_empty());
        assert!(core.request_stop().is_empty());
    }

    #[test]
    fn permission_denied_is_terminal() {
        let mut core = core();
        let now = Instant::now();
        listening(&mut core, now);

        let actions = core.on_provider(ProviderEvent::Error(RecognizerError::NotAllowed));
        assert!(actions.contains(&SessionAction::Emit(SpeechEvent::PermissionDenied)));
        assert!(core.on_provider(ProviderEvent::Ended).is_empty());
        assert!(core.request_start(now + Duration::from_secs(5)).is_empty());
        assert!(core.permission_denied());
    }

    #[test]
    fn hidden_pauses_and_visible_resumes() {
        let mut core = core();
        let now = Instant::now();
        listening(&mut core, now);

        assert_eq!(core.set_visible(false), vec![SessionAction::StopProvider]);
        assert!(core.on_provider(ProviderEvent::Ended).is_empty());
        assert!(core.on_timer(now + Duration::from_secs(1)).is_empty());

        assert_eq!(
            core.set_visible(true),
            vec![SessionAction::Schedule(Duration::from_millis(300))]
        );
        assert_eq!(
            core.on_timer(now + Duration::from_secs(2)),
            vec![SessionAction::StartProvider]
        );
    }

    #[test]
    fn visible_does_not_resume_after_manual_stop() {
        let mut core = core();
        listening(&mut core, Instant::now());
        core.request_stop();
        core.set_visible(false);
        assert!(core.set_visible(true).is_empty());
    }

    #[test]
    fn only_non_empty_transcripts_are_emitted() {
        let mut core = core();
        listening(&mut core, Instant::now());

        assert_eq!(
            core.on_provider(ProviderEvent::Result {
                transcript: " hello ".to_string(),
                is_final: true
            }),
            vec![SessionAction::Emit(SpeechEvent::FinalTranscript("hello".to_string()))]
        );
        assert_eq!(
            core.on_provider(ProviderEvent::Result {
                transcript: "hel".to_string(),
                is_final: false
            }),
            vec![SessionAction::Emit(SpeechEvent::InterimTranscript("hel".to_string()))]
        );
        assert!(
            core.on_provider(ProviderEvent::Result {
                transcript: "  ".to_string(),
                is_final: true
            })
            .is_empty()
        );
    }
}
