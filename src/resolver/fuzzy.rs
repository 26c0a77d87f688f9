//! Fuzzy text scoring for element matching.
//!
//! Scores how well a spoken target phrase matches an element attribute,
//! scaled 0-100. The score is the better of two views:
//!
//! - whole-string: equality, containment, or Levenshtein ratio over the
//!   normalized, space-squashed forms;
//! - token-level: the best-matching (target token, attribute token) pair,
//!   with a fixed penalty per target token that found no counterpart.
//!
//! The token view is what lets "gmail link" land on an element labeled
//! "Google Mail": "gmail" nearly contains "mail", while the dangling
//! "link" token only costs a small penalty.

/// A target token with no attribute counterpart scoring at least this
/// much is counted as unmatched.
const TOKEN_MATCH_FLOOR: u8 = 50;

/// Penalty per unmatched target token in the token-level view.
const UNMATCHED_TOKEN_PENALTY: u8 = 10;

/// Score `attribute` against `target`, scaled 0-100.
pub fn score(target: &str, attribute: &str) -> u8 {
    let target_tokens = tokenize(target);
    let attr_tokens = tokenize(attribute);
    if target_tokens.is_empty() || attr_tokens.is_empty() {
        return 0;
    }

    let whole = similarity(&target_tokens.concat(), &attr_tokens.concat());

    let mut best_matched: u8 = 0;
    let mut unmatched: u32 = 0;
    for token in &target_tokens {
        let best = attr_tokens
            .iter()
            .map(|a| similarity(token, a))
            .max()
            .unwrap_or(0);
        if best >= TOKEN_MATCH_FLOOR {
            best_matched = best_matched.max(best);
        } else {
            unmatched += 1;
        }
    }
    let token_view = if best_matched > 0 {
        let penalty = (unmatched * UNMATCHED_TOKEN_PENALTY as u32).min(100) as u8;
        best_matched.saturating_sub(penalty)
    } else {
        0
    };

    whole.max(token_view)
}

/// Similarity of two normalized, non-tokenized strings, scaled 0-100.
///
/// Exact match beats containment beats edit distance; containment is
/// discounted by how much of the longer string is unexplained.
fn similarity(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    if a == b {
        return 100;
    }

    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if long.contains(short) {
        let surplus = (long.len() - short.len()) as u32;
        return (100 - (15 * surplus / long.len() as u32).min(100)) as u8;
    }

    let dist = levenshtein(a, b) as u32;
    let max_len = a.chars().count().max(b.chars().count()) as u32;
    (max_len.saturating_sub(dist) * 100 / max_len) as u8
}

/// Lowercased alphanumeric runs of the input.
fn tokenize(input: &str) -> Vec<String> {
    input
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Classic two-row Levenshtein distance over chars.
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
    let mut cur = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            cur[j + 1] = substitution.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_scores_100() {
        assert_eq!(score("save", "Save"), 100);
        assert_eq!(score("gmail link", "Gmail Link"), 100);
    }

    #[test]
    fn punctuation_and_case_are_ignored() {
        assert_eq!(score("sign in", "Sign-In"), 100);
        assert_eq!(score("ok", "  OK!  "), 100);
    }

    #[test]
    fn containment_scores_high() {
        // "submit" inside "submitform": 100 - 15*4/10 = 94 via the whole
        // view, 100 via the exact token pair.
        assert_eq!(score("submit", "Submit Form"), 100);
    }

    #[test]
    fn gmail_link_vs_google_mail_scores_87() {
        // Token view: "gmail" ~ "mail" (containment, 97) minus one
        // unmatched token ("link") = 87. Whole view stays far below.
        assert_eq!(score("gmail link", "Google Mail"), 87);
    }

    #[test]
    fn unrelated_text_stays_below_threshold() {
        assert!(score("save document", "Print Preview") < 85);
        assert!(score("close window", "Bookmarks Toolbar") < 85);
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(score("", "Save"), 0);
        assert_eq!(score("save", ""), 0);
        assert_eq!(score("!!!", "Save"), 0);
    }

    #[test]
    fn scoring_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(score("gmail link", "Google Mail"), 87);
        }
    }

    #[test]
    fn ranking_is_consistent_around_the_threshold() {
        // If the lower-ranked candidate clears the threshold, the
        // higher-ranked one must as well.
        let a = score("gmail link", "Gmail Link");
        let b = score("gmail link", "Google Mail");
        assert!(a > b);
        assert!(b >= 85);
        assert!(a >= 85);
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("gmail", "google"), 4);
        assert_eq!(levenshtein("link", "mail"), 4);
    }
}
