//! Scene completion evaluator
//!
//! Latches accepted detection events against the open scene's requirement
//! and reports completion exactly once per window.

use crate::perception::object::label_matches;
use crate::perception::{DetectionEvent, DetectionKind};
use crate::story::Requirement;

/// Per-window requirement latch
#[derive(Debug, Default)]
pub struct SceneEvaluator {
    requirement: Option<Requirement>,
    gesture_seen: bool,
    object_seen: bool,
    complete: bool,
}

impl SceneEvaluator {
    /// Create a closed evaluator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a window for `requirement`, clearing previous latches
    ///
    /// Returns true if the requirement is already satisfied (`None`).
    pub fn open(&mut self, requirement: Requirement) -> bool {
        self.reset();
        let immediate = requirement == Requirement::None;
        self.complete = immediate;
        self.requirement = Some(requirement);
        immediate
    }

    /// Feed an accepted event
    ///
    /// Returns true exactly once, on the event that completes the window.
    pub fn observe(&mut self, event: &DetectionEvent) -> bool {
        if self.complete {
            return false;
        }

        let Some(requirement) = &self.requirement else {
            return false;
        };

        let done = match requirement {
            Requirement::None => true,
            Requirement::Gesture(expected) => gesture_matches(event, expected),
            Requirement::Object(expected) => object_matches(event, expected),
            Requirement::Both(gesture, object) => {
                self.gesture_seen |= gesture_matches(event, gesture);
                self.object_seen |= object_matches(event, object);
                self.gesture_seen && self.object_seen
            }
            Requirement::Speech { .. } => event.kind == DetectionKind::Speech,
        };

        if done {
            tracing::debug!(label = %event.label, kind = %event.kind, "requirement met");
            self.complete = true;
        }

        done
    }

    /// Close the window and clear all latches
    pub fn reset(&mut self) {
        self.requirement = None;
        self.gesture_seen = false;
        self.object_seen = false;
        self.complete = false;
    }

    /// Whether the open window has completed
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Requirement of the open window
    #[must_use]
    pub const fn requirement(&self) -> Option<&Requirement> {
        self.requirement.as_ref()
    }
}

fn gesture_matches(event: &DetectionEvent, expected: &str) -> bool {
    event.kind == DetectionKind::Gesture && event.label.eq_ignore_ascii_case(expected.trim())
}

fn object_matches(event: &DetectionEvent, expected: &str) -> bool {
    event.kind == DetectionKind::Object && label_matches(&event.label, expected)
}
