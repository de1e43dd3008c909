//! Scene progression state machine
//!
//! Pure and synchronous: every [`Input`] yields the [`Effect`]s the driver must
//! perform. Long-running effects (speaking, waiting) carry a [`Cue`] that the
//! driver feeds back as [`Input::CueDone`] once they finish. Inputs that do
//! not match the current scene, state, or detection window are ignored.

use std::time::Duration;

use super::{DialogueLine, Requirement, Scene, Speaker};
use crate::config::PlaybackConfig;

/// Identifies one opening of the detection window
pub type WindowId = u64;

/// Per-scene playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Narration playing or about to play
    Passive,
    /// Detection window open, waiting for the requirement
    Action,
    /// Requirement met, celebrating before moving on
    Success,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passive => write!(f, "passive"),
            Self::Action => write!(f, "action"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// A long-running effect whose completion advances the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// A narration line of a scene
    Narration {
        /// Scene index
        scene: usize,
        /// Line index within the scene
        line: usize,
    },
    /// The participation prompt
    Prompt {
        /// Scene index
        scene: usize,
    },
    /// The celebration line after success
    Celebration {
        /// Scene index
        scene: usize,
    },
    /// The hold on the success state
    Settle {
        /// Scene index
        scene: usize,
    },
}

/// Something that happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Start at the first scene
    Begin,
    /// A cue finished (spoken, skipped, or elapsed)
    CueDone(Cue),
    /// The evaluator reports the requirement satisfied
    RequirementMet {
        /// Scene the evaluator was opened for
        scene: usize,
        /// Window the evaluator was opened for
        window: WindowId,
    },
    /// The caller is leaving the story
    Cancel,
}

/// How a story run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Last scene completed
    Completed,
    /// Caller navigated away
    Cancelled,
}

/// Work the driver must perform
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// State changed (for display)
    Enter {
        /// Scene index
        scene: usize,
        /// New state
        state: PlaybackState,
    },
    /// Speak a line after `delay`, then report `cue`
    Speak {
        /// Completion cue
        cue: Cue,
        /// Line to speak
        line: DialogueLine,
        /// Silence before the line
        delay: Duration,
    },
    /// Wait for `duration`, then report `cue`
    Wait {
        /// Completion cue
        cue: Cue,
        /// How long to wait
        duration: Duration,
    },
    /// Reset the evaluator and start camera detection for the requirement
    OpenWindow {
        /// Scene index
        scene: usize,
        /// Window identifier
        window: WindowId,
        /// Requirement to evaluate
        requirement: Requirement,
    },
    /// Start the speech session for the open window
    Listen {
        /// Window identifier
        window: WindowId,
    },
    /// Stop detection and speech, clear evaluator latches
    CloseWindow {
        /// Window identifier
        window: WindowId,
    },
    /// Abandon the in-flight cue (stop audio, drop timer)
    CancelCue,
    /// Story is over
    Finish(Outcome),
}

/// Story playback state machine
#[derive(Debug)]
pub struct StoryMachine {
    scenes: Vec<Scene>,
    pacing: PlaybackConfig,
    scene: usize,
    state: PlaybackState,
    next_line: usize,
    window: WindowId,
    window_open: bool,
    started: bool,
    outcome: Option<Outcome>,
}

impl StoryMachine {
    /// Create a machine over the given scenes
    #[must_use]
    pub fn new(scenes: Vec<Scene>, pacing: PlaybackConfig) -> Self {
        Self {
            scenes,
            pacing,
            scene: 0,
            state: PlaybackState::Passive,
            next_line: 0,
            window: 0,
            window_open: false,
            started: false,
            outcome: None,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    /// Current scene index
    #[must_use]
    pub const fn scene_index(&self) -> usize {
        self.scene
    }

    /// Current scene
    #[must_use]
    pub fn current_scene(&self) -> Option<&Scene> {
        self.scenes.get(self.scene)
    }

    /// Number of scenes
    #[must_use]
    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    /// Identifier of the latest detection window
    #[must_use]
    pub const fn window(&self) -> WindowId {
        self.window
    }

    /// Whether detection should currently be accepted for `window`
    #[must_use]
    pub fn accepts(&self, window: WindowId) -> bool {
        self.state == PlaybackState::Action && self.window_open && self.window == window
    }

    /// How the story ended, if it has
    #[must_use]
    pub const fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Apply an input and return the effects to perform, in order
    pub fn transition(&mut self, input: Input) -> Vec<Effect> {
        if self.outcome.is_some() {
            tracing::trace!(?input, "story finished, ignoring input");
            return Vec::new();
        }

        match input {
            Input::Begin if !self.started => {
                self.started = true;
                if self.scenes.is_empty() {
                    tracing::warn!("story has no scenes");
                    self.finish(Outcome::Completed)
                } else {
                    self.enter_scene(0)
                }
            }
            Input::Begin => Vec::new(),
            Input::Cancel => {
                let mut effects = Vec::new();
                if self.window_open {
                    self.window_open = false;
                    effects.push(Effect::CloseWindow { window: self.window });
                }
                effects.push(Effect::CancelCue);
                effects.extend(self.finish(Outcome::Cancelled));
                effects
            }
            _ if !self.started => Vec::new(),
            Input::CueDone(cue) => self.on_cue(cue),
            Input::RequirementMet { scene, window } => self.on_requirement_met(scene, window),
        }
    }

    fn on_cue(&mut self, cue: Cue) -> Vec<Effect> {
        match cue {
            Cue::Narration { scene, line }
                if scene == self.scene
                    && self.state == PlaybackState::Passive
                    && line == self.next_line =>
            {
                self.next_line += 1;
                let lines = &self.scenes[scene].narration_lines;
                match lines.get(self.next_line) {
                    Some(next) => vec![Effect::Speak {
                        cue: Cue::Narration {
                            scene,
                            line: self.next_line,
                        },
                        line: next.clone(),
                        delay: self.pacing.line_pause(),
                    }],
                    None => self.narration_done(),
                }
            }
            // Detection already runs while the prompt plays
            Cue::Prompt { scene }
                if scene == self.scene && self.state == PlaybackState::Action && self.window_open =>
            {
                Vec::new()
            }
            Cue::Celebration { scene }
                if scene == self.scene && self.state == PlaybackState::Success =>
            {
                vec![Effect::Wait {
                    cue: Cue::Settle { scene },
                    duration: self.pacing.settle(),
                }]
            }
            Cue::Settle { scene } if scene == self.scene && self.state == PlaybackState::Success => {
                self.advance()
            }
            stale => {
                tracing::debug!(
                    cue = ?stale,
                    scene = self.scene,
                    state = %self.state,
                    "ignoring stale cue"
                );
                Vec::new()
            }
        }
    }

    fn on_requirement_met(&mut self, scene: usize, window: WindowId) -> Vec<Effect> {
        if !(self.accepts(window) && scene == self.scene) {
            tracing::debug!(scene, window, "ignoring completion for closed window");
            return Vec::new();
        }

        tracing::info!(scene, window, "requirement met");
        self.window_open = false;
        let mut effects = vec![Effect::CloseWindow { window }, Effect::CancelCue];
        effects.extend(self.enter_success(true));
        effects
    }

    fn enter_scene(&mut self, index: usize) -> Vec<Effect> {
        self.scene = index;
        self.state = PlaybackState::Passive;
        self.next_line = 0;

        tracing::info!(scene = index, total = self.scenes.len(), "entering scene");

        let mut effects = vec![Effect::Enter {
            scene: index,
            state: PlaybackState::Passive,
        }];

        match self.scenes[index].narration_lines.first() {
            Some(line) => effects.push(Effect::Speak {
                cue: Cue::Narration {
                    scene: index,
                    line: 0,
                },
                line: line.clone(),
                delay: Duration::ZERO,
            }),
            None => effects.extend(self.narration_done()),
        }

        effects
    }

    fn narration_done(&mut self) -> Vec<Effect> {
        let scene = &self.scenes[self.scene];
        let requirement = scene.requirement.clone();

        if requirement == Requirement::None {
            return self.enter_success(false);
        }

        let prompt = scene.prompt.clone();
        self.state = PlaybackState::Action;
        self.window += 1;
        self.window_open = true;

        tracing::info!(
            scene = self.scene,
            window = self.window,
            requirement = %requirement,
            "opening detection window"
        );

        let needs_speech = requirement.needs_speech();
        let mut effects = vec![
            Effect::Enter {
                scene: self.scene,
                state: PlaybackState::Action,
            },
            Effect::OpenWindow {
                scene: self.scene,
                window: self.window,
                requirement,
            },
        ];

        if needs_speech {
            effects.push(Effect::Listen {
                window: self.window,
            });
        }

        if let Some(line) = prompt {
            effects.push(Effect::Speak {
                cue: Cue::Prompt { scene: self.scene },
                line,
                delay: self.pacing.line_pause(),
            });
        }

        effects
    }

    fn enter_success(&mut self, celebrate: bool) -> Vec<Effect> {
        self.state = PlaybackState::Success;
        let scene = self.scene;
        let mut effects = vec![Effect::Enter {
            scene,
            state: PlaybackState::Success,
        }];

        if celebrate {
            let speaker = self.scenes[scene]
                .prompt
                .as_ref()
                .map_or(Speaker::Narrator, |p| p.speaker);
            effects.push(Effect::Speak {
                cue: Cue::Celebration { scene },
                line: DialogueLine::new(speaker, self.pacing.celebration.clone(), "excited"),
                delay: Duration::ZERO,
            });
        } else {
            effects.push(Effect::Wait {
                cue: Cue::Settle { scene },
                duration: self.pacing.settle(),
            });
        }

        effects
    }

    fn advance(&mut self) -> Vec<Effect> {
        let next = self.scene + 1;
        if next < self.scenes.len() {
            self.enter_scene(next)
        } else {
            tracing::info!(scenes = self.scenes.len(), "story complete");
            self.finish(Outcome::Completed)
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Vec<Effect> {
        self.outcome = Some(outcome);
        vec![Effect::Finish(outcome)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> DialogueLine {
        DialogueLine::new(Speaker::Mom, text, "warm")
    }

    fn scene(index: usize, lines: usize, requirement: Requirement) -> Scene {
        Scene {
            index,
            narration_lines: (0..lines).map(|i| line(&format!("line {i}"))).collect(),
            prompt: Some(DialogueLine::new(Speaker::Dad, "Your turn!", "encouraging")),
            requirement,
        }
    }

    fn machine(scenes: Vec<Scene>) -> StoryMachine {
        StoryMachine::new(scenes, PlaybackConfig::default())
    }

    fn has_open_window(effects: &[Effect]) -> bool {
        effects.iter().any(|e| matches!(e, Effect::OpenWindow { .. }))
    }

    #[test]
    fn narration_lines_play_in_order_with_pause() {
        let mut m = machine(vec![scene(0, 2, Requirement::Gesture("wave".to_string()))]);

        let effects = m.transition(Input::Begin);
        assert_eq!(
            effects[1],
            Effect::Speak {
                cue: Cue::Narration { scene: 0, line: 0 },
                line: line("line 0"),
                delay: Duration::ZERO,
            }
        );

        let effects = m.transition(Input::CueDone(Cue::Narration { scene: 0, line: 0 }));
        assert_eq!(
            effects,
            vec![Effect::Speak {
                cue: Cue::Narration { scene: 0, line: 1 },
                line: line("line 1"),
                delay: Duration::from_millis(500),
            }]
        );
        assert_eq!(m.state(), PlaybackState::Passive);
    }

    #[test]
    fn gesture_scene_runs_to_next_scene() {
        let mut m = machine(vec![
            scene(0, 2, Requirement::Gesture("wave".to_string())),
            scene(1, 1, Requirement::None),
        ]);

        m.transition(Input::Begin);
        m.transition(Input::CueDone(Cue::Narration { scene: 0, line: 0 }));
        let effects = m.transition(Input::CueDone(Cue::Narration { scene: 0, line: 1 }));
        assert_eq!(m.state(), PlaybackState::Action);
        assert!(has_open_window(&effects));
        assert!(m.accepts(1));

        let effects = m.transition(Input::RequirementMet { scene: 0, window: 1 });
        assert_eq!(m.state(), PlaybackState::Success);
        assert_eq!(effects[0], Effect::CloseWindow { window: 1 });
        assert!(!m.accepts(1));
        assert!(matches!(
            effects.last(),
            Some(Effect::Speak { cue: Cue::Celebration { scene: 0 }, .. })
        ));

        let effects = m.transition(Input::CueDone(Cue::Celebration { scene: 0 }));
        assert_eq!(
            effects,
            vec![Effect::Wait {
                cue: Cue::Settle { scene: 0 },
                duration: Duration::from_secs(2),
            }]
        );

        m.transition(Input::CueDone(Cue::Settle { scene: 0 }));
        assert_eq!(m.scene_index(), 1);
        assert_eq!(m.state(), PlaybackState::Passive);
    }

    #[test]
    fn none_requirement_skips_action() {
        let mut m = machine(vec![scene(0, 1, Requirement::None)]);
        m.transition(Input::Begin);
        let effects = m.transition(Input::CueDone(Cue::Narration { scene: 0, line: 0 }));

        assert_eq!(m.state(), PlaybackState::Success);
        assert!(!has_open_window(&effects));
        assert!(matches!(effects.last(), Some(Effect::Wait { .. })));

        let effects = m.transition(Input::CueDone(Cue::Settle { scene: 0 }));
        assert_eq!(effects, vec![Effect::Finish(Outcome::Completed)]);
        assert_eq!(m.outcome(), Some(Outcome::Completed));
    }

    #[test]
    fn duplicate_cue_does_not_reopen_window() {
        let mut m = machine(vec![scene(0, 1, Requirement::Object("book".to_string()))]);
        m.transition(Input::Begin);

        let first = m.transition(Input::CueDone(Cue::Narration { scene: 0, line: 0 }));
        let again = m.transition(Input::CueDone(Cue::Narration { scene: 0, line: 0 }));

        assert!(has_open_window(&first));
        assert!(again.is_empty());
        assert_eq!(m.window(), 1);
    }

    #[test]
    fn completion_for_old_window_is_ignored() {
        let mut m = machine(vec![scene(0, 1, Requirement::Gesture("wave".to_string()))]);
        m.transition(Input::Begin);
        m.transition(Input::CueDone(Cue::Narration { scene: 0, line: 0 }));

        assert!(m.transition(Input::RequirementMet { scene: 0, window: 7 }).is_empty());
        assert_eq!(m.state(), PlaybackState::Action);

        assert!(!m.transition(Input::RequirementMet { scene: 0, window: 1 }).is_empty());
        assert!(m.transition(Input::RequirementMet { scene: 0, window: 1 }).is_empty());
    }

    #[test]
    fn speech_listens_as_window_opens() {
        let mut m = machine(vec![scene(0, 1, Requirement::Speech { accept_any: true })]);
        m.transition(Input::Begin);
        let effects = m.transition(Input::CueDone(Cue::Narration { scene: 0, line: 0 }));

        let listen = effects
            .iter()
            .position(|e| matches!(e, Effect::Listen { window: 1 }))
            .unwrap();
        let prompt = effects
            .iter()
            .position(|e| matches!(e, Effect::Speak { cue: Cue::Prompt { .. }, .. }))
            .unwrap();
        assert!(has_open_window(&effects[..listen]));
        assert!(listen < prompt);

        assert!(m.transition(Input::CueDone(Cue::Prompt { scene: 0 })).is_empty());
    }

    #[test]
    fn cancel_closes_open_window() {
        let mut m = machine(vec![scene(0, 1, Requirement::Gesture("wave".to_string()))]);
        m.transition(Input::Begin);
        m.transition(Input::CueDone(Cue::Narration { scene: 0, line: 0 }));

        let effects = m.transition(Input::Cancel);
        assert_eq!(
            effects,
            vec![
                Effect::CloseWindow { window: 1 },
                Effect::CancelCue,
                Effect::Finish(Outcome::Cancelled),
            ]
        );
        assert!(m.transition(Input::Cancel).is_empty());
    }

    #[test]
    fn empty_story_completes_immediately() {
        let mut m = machine(Vec::new());
        assert_eq!(
            m.transition(Input::Begin),
            vec![Effect::Finish(Outcome::Completed)]
        );
    }

    #[test]
    fn scene_without_narration_opens_window_on_entry() {
        let mut m = machine(vec![scene(0, 0, Requirement::Gesture("point".to_string()))]);
        let effects = m.transition(Input::Begin);
        assert!(has_open_window(&effects));
        assert_eq!(m.state(), PlaybackState::Action);
    }
}
