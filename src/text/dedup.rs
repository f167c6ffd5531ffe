//! Overlap deduplication between the live transcript and a new chunk.
//!
//! Successive ASR windows share acoustic left-context, so a new chunk
//! frequently restates the last few words already on screen. This
//! module finds the longest prefix of the new chunk that duplicates a
//! suffix (or near-suffix) of the existing text and drops it.

/// Longest tail/head overlap considered, in tokens.
const MAX_TAIL_OVERLAP: usize = 20;

/// Floating-match prefix bounds, in tokens.
const FLOATING_MIN: usize = 4;
const FLOATING_MAX: usize = 16;
const FLOATING_EXISTING_MAX: usize = 28;

/// How far before the existing tail a floating match may start.
const FLOATING_LOOKBACK: usize = 6;

/// Token form used for comparisons: lowercase, with leading and
/// trailing characters outside alphanumerics-and-apostrophe stripped.
/// "World," and "world" compare equal; "don't" keeps its apostrophe.
fn normalize_token(token: &str) -> String {
    token
        .to_lowercase()
        .trim_matches(|c: char| !(c.is_alphanumeric() || c == '\''))
        .to_string()
}

/// Removes the prefix of `chunk` that duplicates the tail of `existing`.
///
/// Returns the chunk unchanged when either side is empty or contains a
/// newline (explicit paragraph breaks are never deduplicated across).
/// When the whole chunk duplicates, returns the empty string. A chunk
/// that ended in whitespace keeps a single trailing space.
pub fn dedup_overlap(existing: &str, chunk: &str) -> String {
    if existing.trim().is_empty() || chunk.trim().is_empty() {
        return chunk.to_string();
    }
    if existing.contains('\n') || chunk.contains('\n') {
        return chunk.to_string();
    }

    let existing_tokens: Vec<String> = existing.split_whitespace().map(normalize_token).collect();
    let chunk_tokens: Vec<String> = chunk.split_whitespace().map(normalize_token).collect();

    let mut overlap = 0usize;

    // Tail-head match: the last `size` existing tokens restated at the
    // front of the chunk. Largest match wins.
    let max_tail = existing_tokens
        .len()
        .min(chunk_tokens.len())
        .min(MAX_TAIL_OVERLAP);
    for size in (1..=max_tail).rev() {
        if existing_tokens[existing_tokens.len() - size..] == chunk_tokens[..size] {
            overlap = size;
            break;
        }
    }

    // Floating match: the chunk prefix appears near (not at) the tail.
    // Recovers the case where the previous window ended with a partial
    // or garbled word that the new window re-describes cleanly.
    if overlap == 0 && chunk_tokens.len() >= FLOATING_MIN {
        let max_float = chunk_tokens
            .len()
            .min(FLOATING_MAX)
            .min(existing_tokens.len())
            .min(FLOATING_EXISTING_MAX);
        'search: for size in (FLOATING_MIN..=max_float).rev() {
            let earliest = existing_tokens.len().saturating_sub(size + FLOATING_LOOKBACK);
            for start in earliest..=existing_tokens.len() - size {
                if existing_tokens[start..start + size] == chunk_tokens[..size] {
                    overlap = size;
                    break 'search;
                }
            }
        }
    }

    if overlap == 0 {
        return chunk.to_string();
    }

    let words: Vec<&str> = chunk.split_whitespace().collect();
    if overlap >= words.len() {
        return String::new();
    }

    let mut out = words[overlap..].join(" ");
    if chunk.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sides_pass_through() {
        assert_eq!(dedup_overlap("", "hello there"), "hello there");
        assert_eq!(dedup_overlap("   ", "hello there"), "hello there");
        assert_eq!(dedup_overlap("hello there", ""), "");
        assert_eq!(dedup_overlap("hello there", "  "), "  ");
    }

    #[test]
    fn test_newline_on_either_side_disables_dedup() {
        assert_eq!(
            dedup_overlap("first line\nsecond", "second again"),
            "second again"
        );
        assert_eq!(
            dedup_overlap("plain text", "text\nwith break"),
            "text\nwith break"
        );
    }

    #[test]
    fn test_single_word_tail_overlap() {
        assert_eq!(dedup_overlap("hello world", "world today"), "today");
    }

    #[test]
    fn test_multi_word_tail_overlap_prefers_largest() {
        assert_eq!(
            dedup_overlap("we went to the park", "to the park and back"),
            "and back"
        );
    }

    #[test]
    fn test_no_overlap_passes_through() {
        assert_eq!(
            dedup_overlap("completely different", "no shared words"),
            "no shared words"
        );
    }

    #[test]
    fn test_comparison_is_case_insensitive() {
        assert_eq!(dedup_overlap("say Hello", "hello again"), "again");
    }

    #[test]
    fn test_comparison_strips_edge_punctuation() {
        assert_eq!(dedup_overlap("the end.", "end of story"), "of story");
        // Apostrophes are part of the token.
        assert_eq!(dedup_overlap("i don't", "don't know"), "know");
        assert_eq!(dedup_overlap("i dont", "don't know"), "don't know");
    }

    #[test]
    fn test_whole_chunk_duplicate_yields_empty() {
        assert_eq!(dedup_overlap("one two three", "two three"), "");
    }

    #[test]
    fn test_trailing_whitespace_preserved() {
        assert_eq!(dedup_overlap("hello world", "world today "), "today ");
        assert_eq!(dedup_overlap("hello world", "world today"), "today");
    }

    #[test]
    fn test_shared_context_restated() {
        // Injected so far ends "the quick brown fox"; next window
        // restates that context before continuing.
        assert_eq!(
            dedup_overlap("the quick brown fox", "quick brown fox jumps over"),
            "jumps over"
        );
    }

    #[test]
    fn test_floating_match_skips_garbled_tail() {
        // Previous window ended in junk after the shared context; the
        // chunk prefix matches a few words before the tail.
        assert_eq!(
            dedup_overlap(
                "i saw the quick brown fox and um",
                "the quick brown fox jumped over"
            ),
            "jumped over"
        );
    }

    #[test]
    fn test_floating_match_needs_four_tokens() {
        // Three matching tokens away from the tail: below the floating
        // minimum, so nothing is dropped.
        assert_eq!(
            dedup_overlap("the big dog barked loudly yes", "big dog barked again"),
            "big dog barked again"
        );
    }

    #[test]
    fn test_floating_match_respects_lookback_limit() {
        // The chunk prefix occurs in the existing text, but far before
        // the tail: outside the lookback window, so no dedup.
        let existing = "alpha beta gamma delta one two three four five six seven eight nine ten";
        assert_eq!(
            dedup_overlap(existing, "alpha beta gamma delta again"),
            "alpha beta gamma delta again"
        );
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let cases = [
            ("hello world", "world today "),
            ("the quick brown fox", "quick brown fox jumps over"),
            (
                "i saw the quick brown fox and um",
                "the quick brown fox jumped over",
            ),
            ("one two three", "two three"),
            ("completely different", "no shared words"),
        ];
        for (existing, chunk) in cases {
            let once = dedup_overlap(existing, chunk);
            let twice = dedup_overlap(existing, &once);
            assert_eq!(once, twice, "dedup must be idempotent for {:?}", (existing, chunk));
        }
    }

    #[test]
    fn test_tail_overlap_capped_at_twenty_tokens() {
        let words: Vec<String> = (0..30).map(|i| format!("w{}", i)).collect();
        let existing = words.join(" ");
        // Chunk restates the last 20 words: exactly the tail-head cap.
        let chunk = words[10..].join(" ");
        assert_eq!(dedup_overlap(&existing, &chunk), "");
    }
}
