use once_cell::sync::Lazy;
use regex::Regex;

/// Discord rejects content above 4000 characters; truncation keeps three
/// characters of headroom for the marker.
pub const MAX_CONTENT_CHARS: usize = 4000;

const TRUNCATION_MARKER: &str = "...";

static HASHTAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#[\w-]+").expect("valid hashtag regex"));
static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Case-insensitive matcher for the configured trigger tag.
///
/// The right side requires a non-word, non-hyphen character (or end of
/// input) so `#discord-like` does not satisfy a `#discord` trigger.
pub struct TagMatcher {
    tag: String,
    match_pattern: Regex,
    strip_pattern: Regex,
}

impl TagMatcher {
    pub fn new(tag: &str) -> Self {
        let escaped = regex::escape(tag);
        let match_pattern = Regex::new(&format!(r"(?i){escaped}(?:[^\w-]|$)"))
            .expect("escaped tag pattern is valid");
        let strip_pattern = Regex::new(&format!(r"(?i){escaped}([^\w-]|$)"))
            .expect("escaped tag pattern is valid");
        Self {
            tag: tag.to_string(),
            match_pattern,
            strip_pattern,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn matches(&self, message: &str) -> bool {
        self.match_pattern.is_match(message)
    }

    /// Remove occurrences of the trigger tag, keeping the boundary
    /// character that delimited it.
    pub fn strip(&self, message: &str) -> String {
        self.strip_pattern.replace_all(message, "$1").into_owned()
    }
}

/// Shape a post body for Discord: drop the trigger tag, drop the remaining
/// hashtags, collapse whitespace runs, trim, and truncate.
pub fn sanitize_message(message: &str, matcher: &TagMatcher) -> String {
    let without_trigger = matcher.strip(message);
    let without_tags = HASHTAG_REGEX.replace_all(&without_trigger, "");
    let collapsed = WHITESPACE_REGEX.replace_all(&without_tags, " ");
    truncate(collapsed.trim())
}

fn truncate(message: &str) -> String {
    let chars: Vec<char> = message.chars().collect();
    if chars.len() <= MAX_CONTENT_CHARS {
        return message.to_string();
    }
    let keep: String = chars[..MAX_CONTENT_CHARS - TRUNCATION_MARKER.len()]
        .iter()
        .collect();
    format!("{keep}{TRUNCATION_MARKER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> TagMatcher {
        TagMatcher::new("#discord")
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(matcher().matches("Buy AAPL #discord"));
        assert!(matcher().matches("Buy AAPL #Discord"));
        assert!(matcher().matches("Buy AAPL #DISCORD now"));
    }

    #[test]
    fn similar_tags_do_not_match() {
        assert!(!matcher().matches("join us on #discord-like platforms"));
        assert!(!matcher().matches("#discordserver is cool"));
        assert!(!matcher().matches("no tags at all"));
    }

    #[test]
    fn punctuation_and_end_of_input_are_boundaries() {
        assert!(matcher().matches("#discord"));
        assert!(matcher().matches("#discord!"));
        assert!(matcher().matches("(#discord)"));
    }

    #[test]
    fn sanitize_strips_trigger_and_other_tags() {
        let out = sanitize_message("Buy AAPL #discord #stocks now", &matcher());
        assert_eq!(out, "Buy AAPL now");
    }

    #[test]
    fn stripped_message_no_longer_matches() {
        let m = matcher();
        for message in [
            "Buy AAPL #discord",
            "#discord at the start",
            "middle #Discord middle",
        ] {
            let stripped = sanitize_message(message, &m);
            assert!(!m.matches(&stripped), "still matches after strip: {stripped:?}");
        }
    }

    #[test]
    fn sanitize_collapses_whitespace_and_trims() {
        let out = sanitize_message("  spaced \n\n out   #discord  ", &matcher());
        assert_eq!(out, "spaced out");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let m = matcher();
        for message in [
            "Buy AAPL #discord #stocks now",
            "  spaced \n out ",
            "plain message",
            &"long ".repeat(2000),
        ] {
            let once = sanitize_message(message, &m);
            let twice = sanitize_message(&once, &m);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn truncation_keeps_total_length_within_the_limit() {
        let long = "a".repeat(MAX_CONTENT_CHARS + 100);
        let out = truncate(&long);
        assert_eq!(out.chars().count(), MAX_CONTENT_CHARS);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn short_messages_are_not_truncated() {
        let exact = "a".repeat(MAX_CONTENT_CHARS);
        assert_eq!(truncate(&exact), exact);
        assert!(!truncate("short").ends_with("..."));
    }
}
