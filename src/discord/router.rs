use std::collections::HashMap;

/// Priority-ordered hashtag → webhook-URL routing table.
///
/// A flat list scanned in order: the first tag found in the lowercased
/// message wins. Tags named in the priority list come first, in that order;
/// any remaining routed tags follow alphabetically so their order is stable.
pub struct ChannelRouter {
    routes: Vec<(String, String)>,
}

impl ChannelRouter {
    pub fn new(routes: &HashMap<String, String>, priority: &[String]) -> Self {
        let mut ordered = Vec::with_capacity(routes.len());

        for tag in priority {
            if let Some(url) = routes.get(tag) {
                ordered.push((tag.clone(), url.clone()));
            }
        }

        let mut rest: Vec<_> = routes
            .iter()
            .filter(|(tag, _)| !priority.contains(tag))
            .map(|(tag, url)| (tag.clone(), url.clone()))
            .collect();
        rest.sort();
        ordered.extend(rest);

        Self { routes: ordered }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Webhook URL of the highest-priority tag present in the message, if
    /// any. Matching is a case-insensitive substring check.
    pub fn route(&self, message: &str) -> Option<&str> {
        let lowered = message.to_lowercase();
        self.routes
            .iter()
            .find(|(tag, _)| lowered.contains(tag.as_str()))
            .map(|(_, url)| url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> HashMap<String, String> {
        HashMap::from([
            ("#stocks".to_string(), "https://hook.example/stocks".to_string()),
            ("#crypto".to_string(), "https://hook.example/crypto".to_string()),
            ("#fx".to_string(), "https://hook.example/fx".to_string()),
        ])
    }

    #[test]
    fn highest_priority_tag_wins() {
        let router = ChannelRouter::new(&routes(), &["#crypto".to_string(), "#stocks".to_string()]);
        assert_eq!(
            router.route("watching #stocks and #crypto today"),
            Some("https://hook.example/crypto")
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        let router = ChannelRouter::new(&routes(), &["#stocks".to_string()]);
        assert_eq!(
            router.route("Big #STOCKS move"),
            Some("https://hook.example/stocks")
        );
    }

    #[test]
    fn unrouted_messages_fall_through() {
        let router = ChannelRouter::new(&routes(), &["#stocks".to_string()]);
        assert_eq!(router.route("nothing interesting"), None);
    }

    #[test]
    fn tags_outside_the_priority_list_still_route() {
        let router = ChannelRouter::new(&routes(), &["#stocks".to_string()]);
        assert_eq!(
            router.route("only #fx here"),
            Some("https://hook.example/fx")
        );
    }

    #[test]
    fn empty_table_routes_nothing() {
        let router = ChannelRouter::new(&HashMap::new(), &[]);
        assert!(router.is_empty());
        assert_eq!(router.route("#stocks"), None);
    }
}
