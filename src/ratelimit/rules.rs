//! Per-key sliding window rules loaded from configuration.
//!
//! A rule file lists the window and limit for each key:
//!
//! ```yaml
//! rules:
//!   - key: "userid:alice/getBlogs"
//!     window_seconds: 60
//!     limit: 5
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use super::sliding_window::WindowConfig;
use crate::error::{Result, WardenError};

/// A set of sliding window rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<KeyRule>,
}

/// Window and limit for a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRule {
    /// The key this rule applies to (client identity, route, ...)
    pub key: String,
    /// Length of the sliding window in seconds
    pub window_seconds: u32,
    /// Maximum admitted requests within the window
    pub limit: u32,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading sliding window rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WardenError::Config(format!("Failed to parse rule file: {}", e)))
    }

    /// Find the rule for `key`. When a key is listed more than once the last entry wins.
    pub fn find(&self, key: &str) -> Option<&KeyRule> {
        self.rules.iter().rev().find(|rule| rule.key == key)
    }

    /// Validate every rule and convert it into a window configuration.
    pub fn window_configs(&self) -> Result<Vec<(String, WindowConfig)>> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .map(|rule| {
                if !seen.insert(rule.key.as_str()) {
                    warn!(key = %rule.key, "Duplicate rule for key, last entry wins");
                }
                let config =
                    WindowConfig::new(rule.window_seconds, rule.limit).map_err(|e| match e {
                        WardenError::InvalidConfig(msg) => WardenError::InvalidConfig(format!(
                            "rule for key '{}': {}",
                            rule.key, msg
                        )),
                        other => other,
                    })?;
                Ok((rule.key.clone(), config))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules() {
        let yaml = r#"
rules:
  - key: "userid:alice/getBlogs"
    window_seconds: 60
    limit: 5
  - key: route:/login
    window_seconds: 1
    limit: 10
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.rules.len(), 2);

        let rule = rules.find("route:/login").unwrap();
        assert_eq!(rule.window_seconds, 1);
        assert_eq!(rule.limit, 10);
    }

    #[test]
    fn test_parse_empty_document() {
        let rules = RuleSet::from_yaml("{}").unwrap();
        assert!(rules.rules.is_empty());
    }

    #[test]
    fn test_parse_negative_values_fails() {
        let yaml = r#"
rules:
  - key: a
    window_seconds: -60
    limit: 5
"#;
        assert!(matches!(
            RuleSet::from_yaml(yaml),
            Err(WardenError::Config(_))
        ));
    }

    #[test]
    fn test_find_last_entry_wins() {
        let yaml = r#"
rules:
  - key: a
    window_seconds: 60
    limit: 5
  - key: a
    window_seconds: 60
    limit: 50
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.find("a").unwrap().limit, 50);
        assert!(rules.find("b").is_none());
    }

    #[test]
    fn test_window_configs_rejects_zero_limit() {
        let yaml = r#"
rules:
  - key: a
    window_seconds: 60
    limit: 0
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        let err = rules.window_configs().unwrap_err();
        assert!(matches!(err, WardenError::InvalidConfig(ref msg) if msg.contains("'a'")));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(
            &path,
            "rules:\n  - key: a\n    window_seconds: 10\n    limit: 2\n",
        )
        .unwrap();

        let rules = RuleSet::from_file(&path).unwrap();
        assert_eq!(rules.find("a").unwrap().window_seconds, 10);
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            RuleSet::from_file("/nonexistent/rules.yaml"),
            Err(WardenError::Io(_))
        ));
    }
}
