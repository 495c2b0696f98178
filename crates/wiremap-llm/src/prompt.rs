//! Prompt construction for path expansion. Prompts are deterministic given
//! the scenario and path, so replays with fixed seeds stay reproducible.

use wiremap_schema::PathStep;

/// System role shared by every request.
pub const EXPLORER_ROLE: &str = "You are mapping the decision tree of an automated \
phone agent by playing a realistic caller. You speak naturally, stay in character \
for the given scenario, and systematically try conversation paths that have not \
been tried yet.";

pub struct PromptContextualizer {
    scenario: String,
}

impl PromptContextualizer {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// Ordered user lines spoken on a call: the replayed path plus the new
    /// response under test. The seed task passes an empty final response and
    /// gets an empty script (cold call that only listens to the greeting).
    pub fn caller_script(&self, path: &[PathStep], final_response: &str) -> Vec<String> {
        let mut script: Vec<String> = path.iter().map(|s| s.user_response.clone()).collect();
        if !final_response.is_empty() {
            script.push(final_response.to_string());
        }
        script
    }

    /// Prompt asking for the next user utterances at `current_agent_utterance`
    /// and a judgment on whether that turn ends the conversation.
    pub fn expansion_prompt(
        &self,
        path: &[PathStep],
        current_agent_utterance: &str,
        explored_responses: &[String],
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str("Scenario for this test call:\n<scenario>\n");
        prompt.push_str(&self.scenario);
        prompt.push_str("\n</scenario>\n\n");

        prompt.push_str("Dialogue so far, replayed verbatim:\n<dialogue>\n");
        for step in path {
            prompt.push_str("agent: ");
            prompt.push_str(&step.agent_utterance);
            prompt.push('\n');
            prompt.push_str("caller: ");
            prompt.push_str(&step.user_response);
            prompt.push('\n');
        }
        prompt.push_str("agent: ");
        prompt.push_str(current_agent_utterance);
        prompt.push_str("\n</dialogue>\n\n");

        if !explored_responses.is_empty() {
            prompt.push_str("Caller responses already tried at this point:\n<explored>\n");
            for r in explored_responses {
                prompt.push_str("- ");
                prompt.push_str(r);
                prompt.push('\n');
            }
            prompt.push_str("</explored>\n\n");
        }

        prompt.push_str(
            "Propose the distinct caller responses most likely to reveal new agent \
behavior, avoiding anything similar to the explored list. Also judge whether the \
last agent turn ends the conversation (goodbye, voicemail, transfer to a human).\n\n\
Reply with a fenced JSON block:\n\
```json\n\
{\"candidates\": [\"...\"], \"is_terminal\": false, \"terminal_kind\": null, \"confidence\": 0.0}\n\
```\n\
`terminal_kind` is one of \"success\", \"transfer\", \"fallback\" when \
`is_terminal` is true, otherwise null. `confidence` is your confidence in the \
terminal judgment, between 0 and 1. When the turn is terminal, `candidates` \
must be empty.",
        );
        prompt
    }

    /// Retry prompt after a parse failure: same content, stricter output rules.
    pub fn strict_reprompt(
        &self,
        path: &[PathStep],
        current_agent_utterance: &str,
        explored_responses: &[String],
    ) -> String {
        let mut prompt = self.expansion_prompt(path, current_agent_utterance, explored_responses);
        prompt.push_str(
            "\n\nYour previous reply could not be parsed. Output ONLY the JSON object, \
with the exact keys \"candidates\", \"is_terminal\", \"terminal_kind\", \
\"confidence\", and no surrounding prose.",
        );
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> Vec<PathStep> {
        vec![PathStep {
            agent_utterance: "Sales or support?".into(),
            user_response: "sales".into(),
        }]
    }

    #[test]
    fn script_is_path_plus_final_response() {
        let ctx = PromptContextualizer::new("calling a plumber");
        let script = ctx.caller_script(&path(), "tomorrow morning");
        assert_eq!(script, vec!["sales".to_string(), "tomorrow morning".to_string()]);
    }

    #[test]
    fn seed_script_is_empty() {
        let ctx = PromptContextualizer::new("calling a plumber");
        assert!(ctx.caller_script(&[], "").is_empty());
    }

    #[test]
    fn expansion_prompt_replays_dialogue_and_is_deterministic() {
        let ctx = PromptContextualizer::new("booking an AC repair");
        let explored = vec!["press one".to_string()];
        let a = ctx.expansion_prompt(&path(), "What time works for you?", &explored);
        let b = ctx.expansion_prompt(&path(), "What time works for you?", &explored);
        assert_eq!(a, b);
        assert!(a.contains("agent: Sales or support?"));
        assert!(a.contains("caller: sales"));
        assert!(a.contains("agent: What time works for you?"));
        assert!(a.contains("- press one"));
    }

    #[test]
    fn strict_reprompt_demands_bare_json() {
        let ctx = PromptContextualizer::new("booking an AC repair");
        let p = ctx.strict_reprompt(&[], "Hello?", &[]);
        assert!(p.contains("ONLY the JSON object"));
    }
}
