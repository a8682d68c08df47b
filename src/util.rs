/// Truncate a string to `max` characters, appending "…" if truncated.
/// Counts chars, not bytes, so multi-byte text never splits mid-character.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}…")
    }
}

/// First 8 characters of an id, for log lines.
pub fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncate() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate_chars("hello world", 5), "hello…");
    }

    #[test]
    fn empty_string() {
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn short_id_of_uuid() {
        assert_eq!(short_id("0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9"), "0a1b2c3d");
        assert_eq!(short_id("abc"), "abc");
    }
}
