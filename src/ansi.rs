//! Terminal control-sequence stripping for captured child-process output (§4.3, §8.9).
//!
//! Real-world child processes emit escape sequences in more forms than a single regex
//! catches cleanly: true ESC bytes, JSON-escaped `\u001b` sequences that survive a
//! process that logs through something like a JSON encoder, and bare `[digits;m`
//! residue left behind by a lossy terminal emulator upstream. We run each form through
//! in turn rather than trying to build one pattern that covers all of them.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// JSON-escaped escape sequences, e.g. `\u001b[31m` appearing literally in text.
    static ref JSON_ESCAPED_CSI: Regex =
        Regex::new(r"\\u001[bB]\[[0-9;]*[A-Za-z]").expect("valid regex");
    /// Bare `[digits;m`-style residue with no leading ESC byte at all.
    static ref BARE_CSI_RESIDUE: Regex =
        Regex::new(r"\[[0-9]+(;[0-9]+)*[A-Za-z]").expect("valid regex");
    static ref WHITESPACE_RUN: Regex = Regex::new(r"[ \t]+").expect("valid regex");
}

/// Strips ANSI/CSI control sequences from a single line of captured output and
/// collapses runs of whitespace. Returns `None` if the stripped result is empty,
/// signalling the line should be discarded rather than forwarded.
pub fn clean_line(raw: &str) -> Option<String> {
    let without_literal_esc = strip_literal_escape_bytes(raw);
    let stripped = strip_ansi_escapes::strip(without_literal_esc.as_bytes());
    let as_text = String::from_utf8_lossy(&stripped).into_owned();
    let without_json_escaped = JSON_ESCAPED_CSI.replace_all(&as_text, "");
    let without_bare_residue = BARE_CSI_RESIDUE.replace_all(&without_json_escaped, "");
    let collapsed = WHITESPACE_RUN.replace_all(&without_bare_residue, " ");
    let trimmed = collapsed.trim();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Replaces the octal (`\033`) and literal-backslash (`\x1b`) escape prefixes some
/// upstream loggers write out as text rather than as a real ESC byte, normalizing
/// them to the real byte so [`strip_ansi_escapes::strip`] can find them.
fn strip_literal_escape_bytes(raw: &str) -> String {
    raw.replace("\\033", "\u{1b}")
        .replace("\\x1b", "\u{1b}")
        .replace("\\x1B", "\u{1b}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_true_csi_sequence() {
        assert_eq!(clean_line("\u{1b}[31mBAD\u{1b}[0m"), Some("BAD".to_string()));
    }

    #[test]
    fn strips_octal_escaped_form() {
        assert_eq!(clean_line("\\033[31mBAD\\033[0m"), Some("BAD".to_string()));
    }

    #[test]
    fn strips_json_escaped_form() {
        assert_eq!(clean_line("\\u001b[31mBAD\\u001b[0m"), Some("BAD".to_string()));
    }

    #[test]
    fn strips_bare_residue_with_no_escape_byte() {
        assert_eq!(clean_line("[31;1mBAD[0m"), Some("BAD".to_string()));
    }

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(clean_line("hi   there"), Some("hi there".to_string()));
    }

    #[test]
    fn all_whitespace_after_stripping_is_discarded() {
        assert_eq!(clean_line("\u{1b}[31m   \u{1b}[0m"), None);
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        assert_eq!(clean_line("hi"), Some("hi".to_string()));
    }
}
