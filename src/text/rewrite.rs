//! Spoken-punctuation rewriting.
//!
//! Turns verbalised punctuation ("comma", "full stop", "new line") into
//! the characters they name and then normalises whitespace around the
//! result. The rewriter has no understanding of the surrounding
//! language: matching is whole-word and case-insensitive, nothing more.

/// Replacement rules, applied in this order. Each rule acts on the
/// running output of the previous ones. Order matters: "semicolon"
/// must run before "colon" so its tail is never matched on its own.
const RULES: &[(&str, &str)] = &[
    ("new paragraph", "\n\n"),
    ("new line", "\n"),
    ("full stop", "."),
    ("period", "."),
    ("question mark", "?"),
    ("exclamation mark", "!"),
    ("open parenthesis", "("),
    ("close parenthesis", ")"),
    ("open bracket", "["),
    ("close bracket", "]"),
    ("open quote", "\""),
    ("close quote", "\""),
    ("semicolon", ";"),
    ("colon", ":"),
    ("comma", ","),
];

/// Rewrites spoken punctuation and normalises whitespace.
///
/// Returns the rewritten text and the number of rule applications
/// (surfaced for telemetry). Empty or whitespace-only input yields
/// `("", 0)`.
pub fn rewrite_spoken_punctuation(input: &str) -> (String, u32) {
    if input.trim().is_empty() {
        return (String::new(), 0);
    }

    let mut text = input.to_string();
    let mut applied = 0u32;
    for (phrase, replacement) in RULES {
        text = replace_word_phrase(&text, phrase, replacement, &mut applied);
    }

    (normalize_whitespace(&text), applied)
}

/// Replaces whole-word occurrences of `phrase`, case-insensitively.
///
/// A boundary is anything that is not an ASCII alphanumeric, so
/// "becomma" survives while "say comma now" rewrites. Phrases are
/// ASCII, which keeps every splice on a UTF-8 character boundary.
fn replace_word_phrase(text: &str, phrase: &str, replacement: &str, applied: &mut u32) -> String {
    let bytes = text.as_bytes();
    let needle = phrase.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < bytes.len() {
        let end = i + needle.len();
        let bounded_before = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        let bounded_after = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();

        if end <= bytes.len()
            && bounded_before
            && bounded_after
            && bytes[i..end].eq_ignore_ascii_case(needle)
        {
            out.push_str(replacement);
            *applied += 1;
            i = end;
        } else if let Some(ch) = text[i..].chars().next() {
            out.push(ch);
            i += ch.len_utf8();
        } else {
            break;
        }
    }

    out
}

fn is_horizontal(ch: char) -> bool {
    ch == ' ' || ch == '\t'
}

/// Whitespace normalisation, applied once after rule substitution.
fn normalize_whitespace(text: &str) -> String {
    // Collapse horizontal runs to one space, trimming around newlines.
    let mut collapsed = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        match ch {
            c if is_horizontal(c) => pending_space = true,
            '\n' => {
                pending_space = false;
                collapsed.push('\n');
            }
            _ => {
                if pending_space {
                    if !collapsed.is_empty() && !collapsed.ends_with('\n') {
                        collapsed.push(' ');
                    }
                    pending_space = false;
                }
                collapsed.push(ch);
            }
        }
    }

    // Drop the single space before closing punctuation.
    const CLOSERS: [char; 9] = [',', '.', ';', ':', '!', '?', ')', '}', ']'];
    let mut no_space_before = String::with_capacity(collapsed.len());
    let mut iter = collapsed.chars().peekable();
    while let Some(ch) = iter.next() {
        if ch == ' ' && iter.peek().is_some_and(|next| CLOSERS.contains(next)) {
            continue;
        }
        no_space_before.push(ch);
    }

    // Drop whitespace after openers. Quotes pair up by alternation:
    // first/third/... quotes open, second/fourth/... close.
    let chars: Vec<char> = no_space_before.chars().collect();
    let mut after_openers = String::with_capacity(chars.len());
    let mut inside_quotes = false;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        after_openers.push(ch);
        let mut opener = matches!(ch, '(' | '{' | '[');
        if ch == '"' {
            opener = !inside_quotes;
            inside_quotes = !inside_quotes;
        }
        if opener {
            while i + 1 < chars.len() && is_horizontal(chars[i + 1]) {
                i += 1;
            }
        }
        i += 1;
    }

    // Pull closing quotes against the word or punctuation before them.
    let chars: Vec<char> = after_openers.chars().collect();
    let mut quote_tight: Vec<char> = Vec::with_capacity(chars.len());
    let mut inside_quotes = false;
    for i in 0..chars.len() {
        let ch = chars[i];
        if ch == '"' {
            inside_quotes = !inside_quotes;
        }
        if is_horizontal(ch)
            && inside_quotes
            && chars.get(i + 1) == Some(&'"')
            && quote_tight
                .last()
                .is_some_and(|prev| prev.is_alphanumeric() || prev.is_ascii_punctuation())
        {
            continue;
        }
        quote_tight.push(ch);
    }

    // Insert breathing room after sentence punctuation.
    const NO_SPACE_NEXT: [char; 10] = [',', '.', ';', ':', '!', '?', ')', '}', ']', '"'];
    let mut spaced = String::with_capacity(quote_tight.len());
    for i in 0..quote_tight.len() {
        let ch = quote_tight[i];
        spaced.push(ch);
        if matches!(ch, ',' | '.' | ';' | ':' | '!' | '?')
            && quote_tight
                .get(i + 1)
                .is_some_and(|next| !next.is_whitespace() && !NO_SPACE_NEXT.contains(next))
        {
            spaced.push(' ');
        }
    }

    // Cap blank runs at one empty line.
    let mut result = spaced;
    while result.contains("\n\n\n") {
        result = result.replace("\n\n\n", "\n\n");
    }

    result.trim_matches(is_horizontal).to_string()
}
