//! Context-wide settings read by the interceptor, parser and serializer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What overwrite-mode parsing does when the text disagrees with the shape of
/// the existing value (record vs. sequence vs. scalar).
///
/// The parsed value always wins; the policy only decides whether that is
/// reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    #[default]
    Replace,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Drop `/* ... */` metadata when parsing and never write it back.
    pub ignore_metadata: bool,
    /// Overwrite-mode sequences must carry `index:` prefixes on every element.
    pub strict_indices: bool,
    pub mismatch_policy: MismatchPolicy,
    /// Debounce window of the `-change` channel, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_metadata: false,
            strict_indices: false,
            mismatch_policy: MismatchPolicy::Replace,
            debounce_ms: 0,
        }
    }
}

impl Config {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"strict_indices":true,"mismatch_policy":"warn"}"#).unwrap();
        assert!(config.strict_indices);
        assert!(!config.ignore_metadata);
        assert_eq!(config.mismatch_policy, MismatchPolicy::Warn);
        assert_eq!(config.debounce(), Duration::ZERO);
    }
}
