//! Reversible escaping for test names stored as record keys.
//!
//! Record stores treat `.` as a path separator inside documents, so every
//! `.` in a test name is written as [`DOT_ESCAPE`]. A literal `&` is written
//! as `&amp;` first, which keeps names that already contain `&dot;` intact
//! through a round trip.

/// Replacement written in place of `.` inside stored test names.
pub const DOT_ESCAPE: &str = "&dot;";

const AMP_ESCAPE: &str = "&amp;";

/// Escape a test name for storage.
pub fn escape_test_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '&' => escaped.push_str(AMP_ESCAPE),
            '.' => escaped.push_str(DOT_ESCAPE),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Reverse [`escape_test_name`].
///
/// Unknown `&` sequences are copied through unchanged, so names written by
/// older accumulators that only escaped dots still decode correctly.
pub fn unescape_test_name(stored: &str) -> String {
    let mut name = String::with_capacity(stored.len());
    let mut rest = stored;
    while let Some(pos) = rest.find('&') {
        name.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix(DOT_ESCAPE) {
            name.push('.');
            rest = after;
        } else if let Some(after) = tail.strip_prefix(AMP_ESCAPE) {
            name.push('&');
            rest = after;
        } else {
            name.push('&');
            rest = &tail[1..];
        }
    }
    name.push_str(rest);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_replaces_dots() {
        assert_eq!(
            escape_test_name("browser/base/browser_tabs.js"),
            "browser/base/browser_tabs&dot;js"
        );
    }

    #[test]
    fn test_escape_without_dots_is_identity() {
        assert_eq!(escape_test_name("plain-name"), "plain-name");
    }

    #[test]
    fn test_unescape_legacy_dot_only_encoding() {
        assert_eq!(unescape_test_name("a&dot;b&dot;html"), "a.b.html");
    }

    #[test]
    fn test_round_trip_name_containing_escape_sequence() {
        let name = "weird&dot;name.js";
        let escaped = escape_test_name(name);
        assert!(!escaped.contains('.'));
        assert_eq!(unescape_test_name(&escaped), name);
    }

    #[test]
    fn test_unescape_passes_through_unknown_entities() {
        assert_eq!(unescape_test_name("a&b&lt;c&"), "a&b&lt;c&");
    }

    proptest! {
        #[test]
        fn prop_escape_round_trips(name in ".*") {
            prop_assert_eq!(unescape_test_name(&escape_test_name(&name)), name);
        }

        #[test]
        fn prop_escaped_names_contain_no_dots(name in ".*") {
            prop_assert!(!escape_test_name(&name).contains('.'));
        }
    }
}
