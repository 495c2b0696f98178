//! Parsing of model output into expansion candidates.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use wiremap_schema::TerminalKind;

/// Parsed expansion result for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub candidates: Vec<String>,
    pub is_terminal: bool,
    pub terminal_kind: Option<TerminalKind>,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RawExpansion {
    candidates: Vec<String>,
    is_terminal: bool,
    #[serde(default)]
    terminal_kind: Option<TerminalKind>,
    confidence: f64,
}

/// Parse model output into an [`Expansion`]. Tolerates wrapping prose by
/// preferring a fenced block and falling back to the outermost braces.
///
/// Errors signal the caller to retry with a stricter reprompt; the caller
/// decides how many retries to spend.
pub fn parse_expansion(raw: &str) -> Result<Expansion> {
    let json_str = extract_json(raw).ok_or_else(|| anyhow!("no JSON object in model output"))?;
    let parsed: RawExpansion =
        serde_json::from_str(json_str).context("model output is not valid expansion JSON")?;

    if !(0.0..=1.0).contains(&parsed.confidence) {
        bail!("confidence {} outside [0, 1]", parsed.confidence);
    }

    let candidates: Vec<String> = parsed
        .candidates
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    if parsed.is_terminal && !candidates.is_empty() {
        bail!("terminal judgment with non-empty candidate list");
    }

    Ok(Expansion {
        candidates,
        is_terminal: parsed.is_terminal,
        terminal_kind: if parsed.is_terminal {
            parsed.terminal_kind
        } else {
            None
        },
        confidence: parsed.confidence,
    })
}

/// Prefer a ```json fenced block; otherwise take the outermost brace span.
fn extract_json(raw: &str) -> Option<&str> {
    if let Some(start) = raw.find("```") {
        let after = &raw[start + 3..];
        let body = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = body.find("```") {
            let fenced = body[..end].trim();
            if !fenced.is_empty() {
                return Some(fenced);
            }
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_block_with_prose() {
        let raw = "Sure, here are some options:\n```json\n{\"candidates\": [\"1\", \"2\"], \
\"is_terminal\": false, \"terminal_kind\": null, \"confidence\": 0.9}\n```\nHope that helps!";
        let parsed = parse_expansion(raw).unwrap();
        assert_eq!(parsed.candidates, vec!["1", "2"]);
        assert!(!parsed.is_terminal);
        assert_eq!(parsed.confidence, 0.9);
    }

    #[test]
    fn parses_bare_braces() {
        let raw = "{\"candidates\": [], \"is_terminal\": true, \"terminal_kind\": \"success\", \
\"confidence\": 0.8}";
        let parsed = parse_expansion(raw).unwrap();
        assert!(parsed.is_terminal);
        assert_eq!(parsed.terminal_kind, Some(TerminalKind::Success));
        assert!(parsed.candidates.is_empty());
    }

    #[test]
    fn rejects_plain_prose() {
        assert!(parse_expansion("I think the caller should say hello.").is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let raw = "{\"candidates\": [], \"is_terminal\": false, \"confidence\": 1.5}";
        assert!(parse_expansion(raw).is_err());
    }

    #[test]
    fn rejects_terminal_with_candidates() {
        let raw = "{\"candidates\": [\"more\"], \"is_terminal\": true, \"confidence\": 0.9}";
        assert!(parse_expansion(raw).is_err());
    }

    #[test]
    fn drops_blank_candidates() {
        let raw = "{\"candidates\": [\" 1 \", \"\", \"  \"], \"is_terminal\": false, \
\"confidence\": 0.5}";
        let parsed = parse_expansion(raw).unwrap();
        assert_eq!(parsed.candidates, vec!["1"]);
    }

    #[test]
    fn terminal_kind_ignored_when_not_terminal() {
        let raw = "{\"candidates\": [\"ok\"], \"is_terminal\": false, \
\"terminal_kind\": \"transfer\", \"confidence\": 0.4}";
        let parsed = parse_expansion(raw).unwrap();
        assert_eq!(parsed.terminal_kind, None);
    }
}
