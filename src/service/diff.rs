//! Textual diffing between two versions of a site's filtered content.

use dissimilar::Chunk;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Strip every Unicode whitespace code point from the given string.
fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Compare two versions of a site's content.
///
/// Whitespace-only changes yield an empty diff: rendered pages frequently
/// jitter in their whitespace between fetches, and treating that as a change
/// would produce perpetual spurious updates. Otherwise the result is a
/// character-level semantic-cleanup diff with inserts in green and deletes
/// in red ANSI colors; equal runs pass through unadorned.
pub fn diff_text(old: &str, new: &str) -> String {
    if strip_whitespace(old) == strip_whitespace(new) {
        return String::new();
    }

    let mut out = String::new();
    for chunk in dissimilar::diff(old, new) {
        match chunk {
            Chunk::Equal(text) => out.push_str(text),
            Chunk::Insert(text) => {
                out.push_str(GREEN);
                out.push_str(text);
                out.push_str(RESET);
            }
            Chunk::Delete(text) => {
                out.push_str(RED);
                out.push_str(text);
                out.push_str(RESET);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_has_no_diff() {
        assert_eq!(diff_text("hello", "hello"), "");
        assert_eq!(diff_text("", ""), "");
    }

    #[test]
    fn whitespace_only_changes_are_empty() {
        assert_eq!(diff_text("hello", "he llo"), "");
        assert_eq!(diff_text("a b\tc", "abc"), "");
        assert_eq!(diff_text("hello\n", "\thello "), "");
        // Unicode whitespace counts too
        assert_eq!(diff_text("a\u{00a0}b", "ab"), "");
    }

    #[test]
    fn insert_is_marked_green() {
        let diff = diff_text("hello", "hello world");
        assert!(!diff.is_empty());
        assert!(diff.contains("\x1b[32m"));
        assert!(diff.contains("world"));
        assert!(!diff.contains("\x1b[31m"));
    }

    #[test]
    fn delete_is_marked_red() {
        let diff = diff_text("hello world", "hello");
        assert!(diff.contains("\x1b[31m"));
    }

    #[test]
    fn diff_is_deterministic() {
        let a = "the quick brown fox";
        let b = "the slow brown dog";
        assert_eq!(diff_text(a, b), diff_text(a, b));
    }
}
