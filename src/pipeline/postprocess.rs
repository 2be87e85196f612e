//! Post-processing: deterministic cleanup of model-generated JSON.
//!
//! Even with a response schema attached, models occasionally wrap the object
//! in ` ```json ` fences, prefix it with a sentence, or leave a byte-order
//! mark in front. These rules strip that packaging without touching the
//! object itself. Validation happens afterwards, in [`crate::schema`].
//!
//! ## Rule Order
//!
//! Invisible characters go first so fence detection sees a clean first line;
//! the object is cut out after fences are gone; trailing commas are removed
//! last, inside the extracted object only.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a raw model reply.
///
/// Rules (applied in order):
/// 1. Strip invisible Unicode (BOM, zero-width spaces, soft hyphens)
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip outer code fences (` ```json ` or bare ` ``` `)
/// 4. Cut out the outermost `{ ... }` object, dropping surrounding prose
/// 5. Remove trailing commas before `}` or `]`
///
/// The result is not guaranteed to be valid JSON; it is only the best
/// candidate to hand to the parser.
pub fn clean_json_response(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = normalise_line_endings(&s);
    let s = strip_code_fences(&s);
    let s = extract_outer_object(&s);
    remove_trailing_commas(&s)
}

// ── Rule 1: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip outer code fences ─────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

// ── Rule 4: Extract the outermost object ────────────────────────────────────
//
// Scans from the first `{` and tracks depth outside string literals, so a
// brace inside `"notes": "see {attached}"` does not end the object early.
// Unbalanced input is returned from the first `{` to the end, which lets the
// parser report a precise error.

fn extract_outer_object(input: &str) -> String {
    let Some(start) = input.find('{') else {
        return input.to_string();
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in input[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return input[start..=start + offset].to_string();
                }
            }
            _ => {}
        }
    }
    input[start..].to_string()
}

// ── Rule 5: Remove trailing commas ──────────────────────────────────────────

fn remove_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────
