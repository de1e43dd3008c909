//! Storyplay - Interactive storytelling for children
//!
//! Plays generated stories scene by scene. Each scene narrates a few lines,
//! then waits for the child to join in with a gesture, an object held up to
//! the camera, or a spoken answer before celebrating and moving on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Hosts                           │
//! │        CLI console  │  tests  │  embedding apps      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Story Player                        │
//! │   StoryMachine  │  Evaluator  │  Narration bridge   │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼───────────────┐ ┌───────────▼────────────┐
//! │ Detection loop           │ │ Speech session         │
//! │ gesture │ object adapters│ │ restart │ backoff      │
//! └──────────────────────────┘ └────────────────────────┘
//! ```

pub mod config;
pub mod console;
pub mod detection;
pub mod error;
pub mod evaluator;
pub mod narration;
pub mod perception;
pub mod player;
pub mod settings;
pub mod speech;
pub mod story;

pub use config::Config;
pub use detection::{CameraSource, DetectionLoop, Modalities, ScopedEvent, Thresholds, VideoStream};
pub use error::{Error, Result};
pub use evaluator::SceneEvaluator;
pub use narration::{
    AudioSink, HttpNarrationBackend, MuteBackend, NarrationBackend, NarrationHandle, Narrator,
    SilentSink,
};
pub use perception::{DetectionEvent, DetectionKind, Frame, GestureAdapter, ObjectAdapter};
pub use player::{Notice, Perception, StoryPlayer};
pub use settings::{Settings, SettingsStore};
pub use speech::{Recognizer, SpeechControl, SpeechEvent, SpeechSession};
pub use story::{
    DialogueLine, GeneratedStory, Outcome, PlaybackState, Requirement, Scene, Speaker, Story,
    StoryGenerator, StoryMachine, StoryRequest, StorySource,
};
