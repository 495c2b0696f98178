//! Canonicalization of transcript text for identity comparisons.

/// Hesitation tokens dropped during normalization.
const FILLER_TOKENS: &[&str] = &["um", "uh", "er"];

const DIGIT_WORDS: [&str; 10] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

/// Canonicalize `text` for comparison: lowercase, strip punctuation, drop
/// filler tokens, spell out digits, collapse whitespace.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    let mut tokens = Vec::new();
    for token in cleaned.split_whitespace() {
        if FILLER_TOKENS.contains(&token) {
            continue;
        }
        if token.chars().all(|c| c.is_ascii_digit()) {
            for c in token.chars() {
                tokens.push(DIGIT_WORDS[(c as u8 - b'0') as usize]);
            }
        } else {
            tokens.push(token);
        }
    }
    tokens.join(" ")
}
