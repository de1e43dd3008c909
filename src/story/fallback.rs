//! Built-in story used for demo mode and whenever generation fails

use super::{DialogueLine, Participation, ParticipationKind, Speaker, Story, StoryScene};

/// The Magic Cloud Adventure
///
/// Every participation uses a gesture or object the bundled recognizers can
/// actually report, so the story is completable end to end.
#[must_use]
pub fn fallback_story() -> Story {
    Story {
        title: "The Magic Cloud Adventure".to_string(),
        scenes: vec![
            StoryScene {
                scene_number: 1,
                narration: vec![
                    DialogueLine::new(
                        Speaker::Mom,
                        "Once upon a time, a friendly CLOUD floated in the sky.",
                        "warm",
                    ),
                    DialogueLine::new(
                        Speaker::Dad,
                        "Look! The cloud sees you and wants to say hello!",
                        "excited",
                    ),
                ],
                participation: Some(Participation {
                    kind: ParticipationKind::Gesture,
                    speaker: Speaker::Mom,
                    prompt: "Can you WAVE hello to the cloud?".to_string(),
                    target_word: "cloud".to_string(),
                    expected_responses: vec!["wave".to_string()],
                }),
                ambiance: "sky_sounds".to_string(),
                music: "gentle_clouds".to_string(),
            },
            StoryScene {
                scene_number: 2,
                narration: vec![
                    DialogueLine::new(
                        Speaker::Mom,
                        "The cloud waved back! It's so happy to meet you!",
                        "joyful",
                    ),
                    DialogueLine::new(
                        Speaker::Dad,
                        "Now it wants to see your favourite TREASURE. Maybe a storybook?",
                        "mysterious",
                    ),
                ],
                participation: Some(Participation {
                    kind: ParticipationKind::Object,
                    speaker: Speaker::Mom,
                    prompt: "Can you find a BOOK and show it to us?".to_string(),
                    target_word: "treasure".to_string(),
                    expected_responses: vec!["book".to_string()],
                }),
                ambiance: "magic_sparkles".to_string(),
                music: "discovery_theme".to_string(),
            },
            StoryScene {
                scene_number: 3,
                narration: vec![
                    DialogueLine::new(Speaker::Dad, "Amazing! You found the treasure!", "proud"),
                    DialogueLine::new(
                        Speaker::Mom,
                        "The treasure opens to reveal a magical RAINBOW!",
                        "wonder",
                    ),
                ],
                participation: Some(Participation {
                    kind: ParticipationKind::Gesture,
                    speaker: Speaker::Dad,
                    prompt: "Can you give the rainbow a big THUMBS UP?".to_string(),
                    target_word: "rainbow".to_string(),
                    expected_responses: vec!["thumbsup".to_string()],
                }),
                ambiance: "rainbow_magic".to_string(),
                music: "celebration".to_string(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::gesture::GESTURE_CATEGORIES;
    use crate::story::Requirement;

    #[test]
    fn fallback_has_three_interactive_scenes() {
        let scenes = fallback_story().to_scenes();
        assert_eq!(scenes.len(), 3);
        assert_eq!(scenes[0].requirement, Requirement::Gesture("wave".to_string()));
        assert_eq!(scenes[1].requirement, Requirement::Object("book".to_string()));
        assert!(scenes.iter().all(|s| s.narration_lines.len() == 2));
    }

    #[test]
    fn fallback_gestures_are_recognizable() {
        for scene in fallback_story().to_scenes() {
            if let Requirement::Gesture(name) = scene.requirement {
                assert!(
                    GESTURE_CATEGORIES.iter().any(|(_, semantic)| *semantic == name),
                    "{name} cannot be produced by the gesture adapter"
                );
            }
        }
    }
}
