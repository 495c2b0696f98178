//! Speaker-role assignment for transcripts.
//!
//! Single-channel diarization mislabels speakers often enough that labels are
//! validated against the lines the scripted caller was told to speak. When
//! validation fails, or labels are missing, roles alternate starting with the
//! agent (the agent answers the call).

use wiremap_graph::{normalize, score};
use wiremap_schema::{Speaker, TranscriptTurn};

/// Assign a trusted role to every turn.
pub fn assign_roles(
    turns: Vec<TranscriptTurn>,
    scripted_lines: &[String],
    similarity_threshold: f64,
) -> Vec<TranscriptTurn> {
    if turns.iter().all(|t| t.speaker.is_some())
        && labels_match_script(&turns, scripted_lines, similarity_threshold)
    {
        return turns;
    }
    alternate_roles(turns)
}

/// Diarized labels are trusted when the turns labeled `user` look like the
/// scripted lines. With an empty script (cold call) any labeling passes.
fn labels_match_script(
    turns: &[TranscriptTurn],
    scripted_lines: &[String],
    threshold: f64,
) -> bool {
    if scripted_lines.is_empty() {
        return true;
    }
    let normalized_script: Vec<String> = scripted_lines.iter().map(|l| normalize(l)).collect();
    let user_turns: Vec<&TranscriptTurn> = turns
        .iter()
        .filter(|t| t.speaker == Some(Speaker::User))
        .collect();
    if user_turns.is_empty() {
        return false;
    }

    let validated = user_turns
        .iter()
        .filter(|t| {
            let text = normalize(&t.text);
            normalized_script.iter().any(|s| score(s, &text) >= threshold)
        })
        .count();
    validated * 2 >= user_turns.len()
}

fn alternate_roles(turns: Vec<TranscriptTurn>) -> Vec<TranscriptTurn> {
    turns
        .into_iter()
        .enumerate()
        .map(|(i, mut turn)| {
            turn.speaker = Some(if i % 2 == 0 {
                Speaker::Agent
            } else {
                Speaker::User
            });
            turn
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: Option<Speaker>, text: &str, at: f64) -> TranscriptTurn {
        TranscriptTurn::new(speaker, text, at, at + 1.0)
    }

    #[test]
    fn trusted_labels_pass_through() {
        let turns = vec![
            turn(Some(Speaker::Agent), "Sales or support?", 0.0),
            turn(Some(Speaker::User), "sales please", 2.0),
            turn(Some(Speaker::Agent), "Connecting you now.", 4.0),
        ];
        let script = vec!["sales please".to_string()];
        let out = assign_roles(turns, &script, 0.85);
        assert_eq!(out[0].speaker, Some(Speaker::Agent));
        assert_eq!(out[1].speaker, Some(Speaker::User));
    }

    #[test]
    fn unlabeled_turns_alternate_starting_with_agent() {
        let turns = vec![
            turn(None, "Welcome.", 0.0),
            turn(None, "hi", 1.0),
            turn(None, "How can I help?", 2.0),
        ];
        let out = assign_roles(turns, &[], 0.85);
        assert_eq!(out[0].speaker, Some(Speaker::Agent));
        assert_eq!(out[1].speaker, Some(Speaker::User));
        assert_eq!(out[2].speaker, Some(Speaker::Agent));
    }

    #[test]
    fn mislabeled_turns_fall_back_to_alternation() {
        // Diarizer swapped the channels: "user" turns carry agent speech.
        let turns = vec![
            turn(Some(Speaker::User), "Welcome to Acme, sales or support?", 0.0),
            turn(Some(Speaker::Agent), "sales please", 2.0),
        ];
        let script = vec!["sales please".to_string()];
        let out = assign_roles(turns, &script, 0.85);
        assert_eq!(out[0].speaker, Some(Speaker::Agent));
        assert_eq!(out[1].speaker, Some(Speaker::User));
    }

    #[test]
    fn cold_call_trusts_any_labeling() {
        let turns = vec![turn(Some(Speaker::Agent), "Welcome to Acme.", 0.0)];
        let out = assign_roles(turns, &[], 0.85);
        assert_eq!(out[0].speaker, Some(Speaker::Agent));
    }
}
