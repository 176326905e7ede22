//! Field sanitization for untrusted notification strings.

pub const MAX_DOCUMENT_TYPE_LEN: usize = 50;
pub const MAX_DOCUMENT_ID_LEN: usize = 100;
pub const MAX_REVISION_LEN: usize = 100;
pub const MAX_SLUG_LEN: usize = 200;
pub const MAX_CATEGORY_LEN: usize = 100;
pub const MAX_PROJECT_ID_LEN: usize = 50;
pub const MAX_DATASET_LEN: usize = 50;

fn is_stripped(c: char) -> bool {
    matches!(c, '<' | '>' | '"' | '\'' | '&') || c.is_control()
}

/// Strip `<>"'&` and control characters, trim, then cap at `max_chars`.
///
/// `sanitize(sanitize(x, n), n) == sanitize(x, n)` for every input.
pub fn sanitize(value: &str, max_chars: usize) -> String {
    let stripped: String = value.chars().filter(|c| !is_stripped(*c)).collect();
    let capped: String = stripped.trim().chars().take(max_chars).collect();
    capped.trim().to_string()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn strips_markup_and_controls() {
        assert_eq!(
            sanitize("  <script>alert('x')</script>\u{0007} ", 100),
            "scriptalert(x)/script"
        );
        assert_eq!(sanitize("Tom & \"Jerry\"", 100), "Tom  Jerry");
        assert_eq!(sanitize("line\nbreak\ttab", 100), "linebreaktab");
    }

    #[test]
    fn caps_by_characters_not_bytes() {
        assert_eq!(sanitize("ééééé", 3), "ééé");
        assert_eq!(sanitize("abcdef", 0), "");
    }

    #[test]
    fn trims_after_truncation() {
        assert_eq!(sanitize("abc   def", 5), "abc");
    }

    proptest! {
        #[test]
        fn idempotent(input in any::<String>(), max in 0usize..64) {
            let once = sanitize(&input, max);
            prop_assert_eq!(sanitize(&once, max), once.clone());
            prop_assert!(once.chars().count() <= max);
        }
    }
}
