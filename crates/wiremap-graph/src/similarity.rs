//! Fuzzy similarity between normalized utterances.

use std::collections::BTreeSet;

/// Score similarity of two normalized utterances in `[0, 1]`.
///
/// Combines a token-set ratio with a character-level edit ratio and keeps the
/// larger of the two, so both word reordering and small in-word transcription
/// noise score high. Symmetric and reflexive; empty input scores 0.
pub fn score(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    token_set_ratio(a, b).max(edit_ratio(a, b))
}

fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let common = set_a.intersection(&set_b).count();
    (2.0 * common as f64) / (set_a.len() + set_b.len()) as f64
}

fn edit_ratio(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let max_len = len_a.max(len_b);
    if max_len == 0 {
        return 0.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Cheap upper bound on [`score`] from token and character counts alone.
/// Used to prefilter candidates before the full comparison.
pub fn score_upper_bound(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    let (tokens_a, tokens_b) = (tokens_a.len(), tokens_b.len());
    let token_bound = if tokens_a == 0 || tokens_b == 0 {
        0.0
    } else {
        (2.0 * tokens_a.min(tokens_b) as f64) / (tokens_a + tokens_b) as f64
    };

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let edit_bound = if len_a.max(len_b) == 0 {
        0.0
    } else {
        // Edit distance is at least the length difference.
        1.0 - len_a.abs_diff(len_b) as f64 / len_a.max(len_b) as f64
    };

    token_bound.max(edit_bound)
}
