//! Equality-based label selectors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Matches objects carrying every listed label with the listed value.
/// An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_requires_every_label() {
        let selector = LabelSelector::everything()
            .with_label("team", "data")
            .with_label("tier", "prod");
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "data".to_string());
        assert!(!selector.matches(&labels));
        labels.insert("tier".to_string(), "prod".to_string());
        assert!(selector.matches(&labels));
        assert!(LabelSelector::everything().matches(&BTreeMap::new()));
    }
}
