use std::collections::BTreeSet;

use g3studio_contracts::TransportCategory;

use super::sender::SendFailure;

/// Decides whether a transport failure looks like the network dropping out from
/// under a backgrounded host, as opposed to a failure a retry would not fix.
pub trait FailureClassifier: Send + Sync {
    fn is_network_related(&self, failure: &SendFailure) -> bool;
}

/// Allow-list classifier: a failure matches on its category or on a
/// case-insensitive substring of its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFailureClassifier {
    categories: BTreeSet<&'static str>,
    patterns: Vec<String>,
}

pub const DEFAULT_NETWORK_PATTERNS: &[&str] = &["network", "load failed", "connection reset"];

impl Default for NetworkFailureClassifier {
    fn default() -> Self {
        Self::new(
            &[
                TransportCategory::Connect,
                TransportCategory::Request,
                TransportCategory::Body,
            ],
            DEFAULT_NETWORK_PATTERNS,
        )
    }
}

impl NetworkFailureClassifier {
    pub fn new(categories: &[TransportCategory], patterns: &[&str]) -> Self {
        Self {
            categories: categories.iter().map(TransportCategory::as_str).collect(),
            patterns: patterns
                .iter()
                .map(|pattern| pattern.trim().to_ascii_lowercase())
                .filter(|pattern| !pattern.is_empty())
                .collect(),
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        if !pattern.is_empty() && !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
        self
    }
}

impl FailureClassifier for NetworkFailureClassifier {
    fn is_network_related(&self, failure: &SendFailure) -> bool {
        if self.categories.contains(failure.category.as_str()) {
            return true;
        }
        let message = failure.message.to_ascii_lowercase();
        self.patterns
            .iter()
            .any(|pattern| message.contains(pattern.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_generic_client_failures() {
        let classifier = NetworkFailureClassifier::default();
        assert!(classifier.is_network_related(&SendFailure::new(TransportCategory::Connect, "dns")));
        assert!(classifier.is_network_related(&SendFailure::new(TransportCategory::Body, "eof")));
        assert!(!classifier.is_network_related(&SendFailure::new(
            TransportCategory::Timeout,
            "operation timed out"
        )));
        assert!(!classifier.is_network_related(&SendFailure::new(
            TransportCategory::Decode,
            "invalid gzip header"
        )));
    }

    #[test]
    fn message_patterns_ignore_case() {
        let classifier = NetworkFailureClassifier::default();
        assert!(classifier.is_network_related(&SendFailure::new(
            TransportCategory::Other,
            "Load failed"
        )));
        assert!(classifier.is_network_related(&SendFailure::new(
            TransportCategory::Other,
            "The NETWORK connection was lost."
        )));
    }

    #[test]
    fn allow_list_is_configurable() {
        let classifier = NetworkFailureClassifier::new(&[], &[]).with_pattern("Broken Pipe");
        assert!(!classifier.is_network_related(&SendFailure::new(TransportCategory::Connect, "x")));
        assert!(classifier.is_network_related(&SendFailure::new(
            TransportCategory::Other,
            "write: broken pipe"
        )));
    }
}
