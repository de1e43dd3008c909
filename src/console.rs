//! Terminal perception
//!
//! Stands in for camera and microphone when playing in a terminal. Typed
//! commands put a gesture or object "in view" for a short hold, or speak a
//! transcript into the active recognizer run.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::detection::{CameraSource, VideoStream};
use crate::perception::{BoundingBox, Frame, GestureModel, HandResult, ObjectDetection, ObjectModel, category_for};
use crate::speech::{ProviderSink, Recognizer, RecognizerError};
use crate::{Error, Result};

/// How long a typed gesture or object stays in view
pub const HOLD: Duration = Duration::from_millis(1500);

/// Confidence used when a command gives none
const DEFAULT_CONFIDENCE: f32 = 0.9;

/// Frame size reported by the console camera
const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;

/// A line typed at the console
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// `gesture <name> [confidence]`
    Gesture {
        /// Story gesture name (e.g. "wave")
        name: String,
        /// Score
        confidence: f32,
    },
    /// `object <label...> [confidence]`
    Object {
        /// Object label, may contain spaces
        label: String,
        /// Score
        confidence: f32,
    },
    /// `say <text...>`
    Say(String),
    /// `hide`: host went to background
    Hide,
    /// `show`: host back in foreground
    Show,
    /// `quit`: leave the story
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Err(Error::Perception("empty command".to_string()));
        }
        let verb = words.remove(0).to_lowercase();

        match verb.as_str() {
            "gesture" | "g" => {
                let (subject, confidence) = split_confidence(&words)?;
                Ok(Self::Gesture {
                    name: subject.to_lowercase(),
                    confidence,
                })
            }
            "object" | "o" => {
                let (subject, confidence) = split_confidence(&words)?;
                Ok(Self::Object {
                    label: subject,
                    confidence,
                })
            }
            "say" | "s" if !words.is_empty() => Ok(Self::Say(words.join(" "))),
            "hide" => Ok(Self::Hide),
            "show" => Ok(Self::Show),
            "quit" | "q" | "exit" => Ok(Self::Quit),
            _ => Err(Error::Perception(format!(
                "unknown command: {line} (try: gesture wave 0.9, object blue cup 0.8, say hello, hide, show, quit)"
            ))),
        }
    }
}

/// Trailing number is the confidence; the rest is the subject
fn split_confidence(words: &[&str]) -> Result<(String, f32)> {
    let (subject, confidence) = match words.split_last() {
        Some((last, rest)) if !rest.is_empty() => match last.parse::<f32>() {
            Ok(score) => (rest.join(" "), score),
            Err(_) => (words.join(" "), DEFAULT_CONFIDENCE),
        },
        Some(_) => (words.join(" "), DEFAULT_CONFIDENCE),
        None => return Err(Error::Perception("missing name".to_string())),
    };

    if !(0.0..=1.0).contains(&confidence) {
        return Err(Error::Perception(format!(
            "confidence must be within 0..1, got {confidence}"
        )));
    }

    Ok((subject, confidence))
}

#[derive(Debug, Default)]
struct Board {
    gesture: Option<(String, f32, Instant)>,
    object: Option<(String, f32, Instant)>,
    speech: Option<ProviderSink>,
}

/// Shared state behind the console camera, models, and recognizer
#[derive(Debug, Clone, Default)]
pub struct Console {
    board: Arc<Mutex<Board>>,
}

impl Console {
    /// Create an empty console
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn board(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a perception command
    ///
    /// Returns false for `say` when nobody is listening. Session commands
    /// (`hide`, `show`, `quit`) are the host's business and ignored here.
    pub fn apply(&self, command: &ConsoleCommand) -> bool {
        let now = Instant::now();
        let mut board = self.board();

        match command {
            ConsoleCommand::Gesture { name, confidence } => {
                board.gesture = Some((name.clone(), *confidence, now));
            }
            ConsoleCommand::Object { label, confidence } => {
                board.object = Some((label.clone(), *confidence, now));
            }
            ConsoleCommand::Say(text) => match &board.speech {
                Some(sink) => sink.result(text.clone(), true),
                None => return false,
            },
            ConsoleCommand::Hide | ConsoleCommand::Show | ConsoleCommand::Quit => {}
        }

        true
    }

    /// Camera yielding blank frames
    #[must_use]
    pub fn camera(&self) -> Arc<dyn CameraSource> {
        Arc::new(ConsoleCamera)
    }

    /// Gesture model reporting typed gestures
    #[must_use]
    pub fn gesture_model(&self) -> Box<dyn GestureModel> {
        Box::new(ConsoleGestureModel(self.clone()))
    }

    /// Object model reporting typed objects
    #[must_use]
    pub fn object_model(&self) -> Box<dyn ObjectModel> {
        Box::new(ConsoleObjectModel(self.clone()))
    }

    /// Recognizer reporting typed speech
    #[must_use]
    pub fn recognizer(&self) -> Box<dyn Recognizer> {
        Box::new(ConsoleRecognizer(self.clone()))
    }
}

fn in_view(entry: Option<&(String, f32, Instant)>) -> Option<(String, f32)> {
    entry
        .filter(|(_, _, at)| at.elapsed() <= HOLD)
        .map(|(name, score, _)| (name.clone(), *score))
}

struct ConsoleCamera;

#[async_trait]
impl CameraSource for ConsoleCamera {
    async fn acquire(&self) -> Result<Box<dyn VideoStream>> {
        Ok(Box::new(ConsoleStream {
            frame: Frame::new(FRAME_WIDTH, FRAME_HEIGHT, Vec::<u8>::new()),
        }))
    }
}

struct ConsoleStream {
    frame: Frame,
}

impl VideoStream for ConsoleStream {
    fn latest_frame(&mut self) -> Option<Frame> {
        Some(self.frame.clone())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

struct ConsoleGestureModel(Console);

#[async_trait]
impl GestureModel for ConsoleGestureModel {
    async fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn recognize(&mut self, _frame: &Frame) -> Result<Option<HandResult>> {
        let board = self.0.board();
        Ok(in_view(board.gesture.as_ref()).map(|(name, score)| HandResult {
            // Unknown names pass through and stay unmapped
            category: category_for(&name).map_or(name, ToString::to_string),
            score,
            landmarks: Vec::new(),
        }))
    }
}

struct ConsoleObjectModel(Console);

#[async_trait]
impl ObjectModel for ConsoleObjectModel {
    async fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObjectDetection>> {
        let board = self.0.board();
        Ok(in_view(board.object.as_ref())
            .map(|(label, score)| ObjectDetection {
                label,
                score,
                bounds: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: FRAME_WIDTH as f32,
                    height: FRAME_HEIGHT as f32,
                },
            })
            .into_iter()
            .collect())
    }
}

struct ConsoleRecognizer(Console);

#[async_trait]
impl Recognizer for ConsoleRecognizer {
    async fn start(&mut self, sink: ProviderSink) -> std::result::Result<(), RecognizerError> {
        sink.started();
        self.0.board().speech = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.0.board().speech.take() {
            sink.ended();
        }
    }
}
