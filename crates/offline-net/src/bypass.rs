//! Cache bypass rules for live-data endpoints.

use tracing::trace;
use url::Url;

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    /// Pattern type.
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Exact URL match.
    Exact,
    /// Prefix match.
    Prefix,
    /// Host ends with the pattern (e.g., a domain).
    HostSuffix,
    /// Contains substring anywhere in the URL.
    Contains,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self {
            pattern_type: PatternType::Exact,
            pattern: url.to_string(),
        }
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            pattern_type: PatternType::Prefix,
            pattern: prefix.to_string(),
        }
    }

    /// Create a host suffix pattern.
    pub fn host_suffix(suffix: &str) -> Self {
        Self {
            pattern_type: PatternType::HostSuffix,
            pattern: suffix.to_string(),
        }
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self {
            pattern_type: PatternType::Contains,
            pattern: substring.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self.pattern_type {
            PatternType::Exact => url_str == self.pattern,
            PatternType::Prefix => url_str.starts_with(&self.pattern),
            PatternType::HostSuffix => url
                .host_str()
                .is_some_and(|host| host.ends_with(&self.pattern)),
            PatternType::Contains => url_str.contains(&self.pattern),
        }
    }
}

/// Requests matching any of these patterns go straight to the network.
#[derive(Debug, Clone, Default)]
pub struct BypassList {
    patterns: Vec<UrlPattern>,
}

impl BypassList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list of substring patterns.
    pub fn from_substrings<I, S>(substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: substrings
                .into_iter()
                .map(|s| UrlPattern::contains(s.as_ref()))
                .collect(),
        }
    }

    /// Add a pattern.
    pub fn push(&mut self, pattern: UrlPattern) {
        self.patterns.push(pattern);
    }

    /// First pattern matching the URL.
    pub fn matching(&self, url: &Url) -> Option<&UrlPattern> {
        let hit = self.patterns.iter().find(|p| p.matches(url));
        if let Some(pattern) = hit {
            trace!(url = %url, pattern = %pattern.pattern, "Bypass pattern matched");
        }
        hit
    }

    /// Whether the URL bypasses the cache.
    pub fn is_bypassed(&self, url: &Url) -> bool {
        self.matching(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_pattern_exact() {
        let pattern = UrlPattern::exact("https://example.com/");
        assert!(pattern.matches(&url("https://example.com/")));
        assert!(!pattern.matches(&url("https://example.com/page")));
    }

    #[test]
    fn test_pattern_prefix() {
        let pattern = UrlPattern::prefix("https://example.com/api/");
        assert!(pattern.matches(&url("https://example.com/api/users")));
        assert!(!pattern.matches(&url("https://example.com/other")));
    }

    #[test]
    fn test_pattern_host_suffix() {
        let pattern = UrlPattern::host_suffix("firebaseio.com");
        assert!(pattern.matches(&url("https://ssi-default-rtdb.firebaseio.com/.json")));
        assert!(!pattern.matches(&url("https://example.com/?next=firebaseio.com")));
    }

    #[test]
    fn test_default_substrings() {
        let list = BypassList::from_substrings(["firebaseio.com", "googleapis.com"]);
        assert_eq!(list.len(), 2);

        assert!(list.is_bypassed(&url("https://proj.firebaseio.com/sessions.json")));
        assert!(list.is_bypassed(&url(
            "https://firestore.googleapis.com/v1/projects/p/databases"
        )));
        assert!(!list.is_bypassed(&url("https://unpkg.com/firebase@10.7.1/firebase-app-compat.js")));
        assert!(!list.is_bypassed(&url("https://app.example/index.html")));
    }

    #[test]
    fn test_list_is_extensible() {
        let mut list = BypassList::new();
        assert!(list.is_empty());

        list.push(UrlPattern::prefix("https://app.example/live/"));
        assert!(list.is_bypassed(&url("https://app.example/live/feed")));
        assert_eq!(
            list.matching(&url("https://app.example/live/feed"))
                .map(|p| p.pattern_type),
            Some(PatternType::Prefix)
        );
    }
}
