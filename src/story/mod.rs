//! Story content model
//!
//! `Story` mirrors the story service's JSON wire format. `Scene` is the
//! runtime unit the player walks through, with the participation block
//! reduced to a single [`Requirement`].

mod fallback;
pub mod generation;
pub mod machine;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use fallback::fallback_story;
pub use generation::{GeneratedStory, HttpStoryBackend, StoryBackend, StoryGenerator, StoryRequest, StorySource};
pub use machine::{Cue, Effect, Input, Outcome, PlaybackState, StoryMachine, WindowId};

/// A character voice in the story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum Speaker {
    /// Warm parent voice
    Mom,
    /// Excited parent voice
    Dad,
    /// Storyteller voice
    Narrator,
    /// Playful companion voice
    Friend,
}

impl From<&str> for Speaker {
    fn from(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "mom" | "mother" | "parent" => Self::Mom,
            "dad" | "father" => Self::Dad,
            "friend" => Self::Friend,
            _ => Self::Narrator,
        }
    }
}

impl From<String> for Speaker {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mom => "Mom",
            Self::Dad => "Dad",
            Self::Narrator => "Narrator",
            Self::Friend => "Friend",
        };
        f.write_str(name)
    }
}

/// One spoken line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLine {
    /// Who speaks the line
    pub speaker: Speaker,

    /// What is said
    pub text: String,

    /// Delivery hint for the voice backend (e.g. "warm", "excited")
    #[serde(default = "default_emotion")]
    pub emotion: String,
}

fn default_emotion() -> String {
    "neutral".to_string()
}

impl DialogueLine {
    /// Create a line with the given emotion
    #[must_use]
    pub fn new(speaker: Speaker, text: impl Into<String>, emotion: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            emotion: emotion.into(),
        }
    }
}

/// How the child joins in on a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationKind {
    /// Pick between options out loud
    Choice,
    /// Repeat a target word out loud
    Word,
    /// Say anything
    Speech,
    /// Perform a hand gesture
    Gesture,
    /// Show an object to the camera
    Object,
    /// Perform a gesture and show an object
    Both,
    /// No participation
    #[serde(other)]
    None,
}

/// The participation block of a scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    /// Participation type
    #[serde(rename = "type")]
    pub kind: ParticipationKind,

    /// Who asks
    pub speaker: Speaker,

    /// What they ask
    pub prompt: String,

    /// The vocabulary word this scene teaches
    #[serde(default)]
    pub target_word: String,

    /// Accepted answers (gesture name, object label, spoken options)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_responses: Vec<String>,
}

/// A scene as produced by the story service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryScene {
    /// 1-based scene number as written by the service
    pub scene_number: u32,

    /// Narration played before participation
    pub narration: Vec<DialogueLine>,

    /// Participation moment, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participation: Option<Participation>,

    /// Ambient sound cue (presentation only)
    #[serde(default)]
    pub ambiance: String,

    /// Music cue (presentation only)
    #[serde(default)]
    pub music: String,
}

/// A complete story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    /// Story title
    pub title: String,

    /// Scenes in declared order
    pub scenes: Vec<StoryScene>,
}

impl Story {
    /// Reduce the wire scenes to runtime scenes, indexed from 0
    #[must_use]
    pub fn to_scenes(&self) -> Vec<Scene> {
        self.scenes
            .iter()
            .enumerate()
            .map(|(index, scene)| Scene {
                index,
                narration_lines: scene.narration.clone(),
                prompt: scene.participation.as_ref().map(|p| DialogueLine {
                    speaker: p.speaker,
                    text: p.prompt.clone(),
                    emotion: "encouraging".to_string(),
                }),
                requirement: Requirement::from_participation(scene.participation.as_ref()),
            })
            .collect()
    }
}

/// The condition that completes a scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Auto-advance after narration
    None,
    /// Expected gesture name (e.g. "wave")
    Gesture(String),
    /// Expected object label fragment (e.g. "book")
    Object(String),
    /// Expected gesture and object label fragment, in any order
    Both(String, String),
    /// Any final transcript
    Speech {
        /// Accept any transcript without checking content
        accept_any: bool,
    },
}

impl Requirement {
    /// Derive the requirement from a participation block
    ///
    /// Gestures and objects use the first expected response and fall back to
    /// the target word. `Both` takes the gesture first and the object second.
    #[must_use]
    pub fn from_participation(participation: Option<&Participation>) -> Self {
        let Some(p) = participation else {
            return Self::None;
        };

        let first = p
            .expected_responses
            .first()
            .map_or_else(|| p.target_word.as_str(), String::as_str)
            .trim()
            .to_lowercase();

        match p.kind {
            ParticipationKind::None => Self::None,
            ParticipationKind::Choice | ParticipationKind::Word | ParticipationKind::Speech => {
                Self::Speech { accept_any: true }
            }
            ParticipationKind::Gesture if !first.is_empty() => Self::Gesture(first),
            ParticipationKind::Object if !first.is_empty() => Self::Object(first),
            ParticipationKind::Both => match p.expected_responses.as_slice() {
                [gesture, object, ..] => {
                    Self::Both(gesture.trim().to_lowercase(), object.trim().to_lowercase())
                }
                [gesture] => Self::Gesture(gesture.trim().to_lowercase()),
                [] if !p.target_word.trim().is_empty() => {
                    Self::Object(p.target_word.trim().to_lowercase())
                }
                [] => Self::None,
            },
            ParticipationKind::Gesture | ParticipationKind::Object => Self::None,
        }
    }

    /// Whether the camera is needed
    #[must_use]
    pub const fn needs_camera(&self) -> bool {
        matches!(self, Self::Gesture(_) | Self::Object(_) | Self::Both(_, _))
    }

    /// Whether the microphone is needed
    #[must_use]
    pub const fn needs_speech(&self) -> bool {
        matches!(self, Self::Speech { .. })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Gesture(g) => write!(f, "gesture:{g}"),
            Self::Object(o) => write!(f, "object:{o}"),
            Self::Both(g, o) => write!(f, "gesture:{g}+object:{o}"),
            Self::Speech { .. } => f.write_str("speech"),
        }
    }
}

/// A runtime scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scene {
    /// Position in the story, 0-based
    pub index: usize,

    /// Lines played in order before the scene opens for participation
    pub narration_lines: Vec<DialogueLine>,

    /// Participation prompt spoken when the detection window opens
    pub prompt: Option<DialogueLine>,

    /// Completion condition
    pub requirement: Requirement,
}
