use crate::diagnostics::DEFAULT_JOURNAL_CAPACITY;
use serde::{Deserialize, Serialize};

/// What a tracked allocator does when its backing allocator fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OomPolicy {
    /// Return [`AllocError::OutOfMemory`](super::AllocError::OutOfMemory) to the caller.
    #[default]
    ReturnError,
    /// Call [`std::alloc::handle_alloc_error`], which aborts the process.
    Abort,
}

/// Tracked allocator settings.
///
/// Missing fields take their defaults when deserialized, so a partial JSON
/// document such as `{"oom-policy": "abort"}` is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AllocatorConfig {
    /// Behaviour on backing-allocator failure.
    pub oom_policy: OomPolicy,
    /// Keep a chronological log of every operation. Defaults to the
    /// `operation-log` cargo feature.
    pub record_operations: bool,
    /// How many recent anomalies the ledger's journal retains.
    pub journal_capacity: usize,
}

impl AllocatorConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    /// Returns the parser error if `json` is malformed or has unknown variants.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Sets the OOM policy.
    #[must_use]
    pub fn with_oom_policy(mut self, policy: OomPolicy) -> Self {
        self.oom_policy = policy;
        self
    }

    /// Enables or disables the operation log.
    #[must_use]
    pub fn with_operation_log(mut self, enabled: bool) -> Self {
        self.record_operations = enabled;
        self
    }

    /// Sets the anomaly history length.
    #[must_use]
    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            oom_policy: OomPolicy::ReturnError,
            record_operations: cfg!(feature = "operation-log"),
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AllocatorConfig::from_json(r#"{"oom-policy": "abort"}"#).unwrap();
        assert_eq!(config.oom_policy, OomPolicy::Abort);
        assert_eq!(config.journal_capacity, DEFAULT_JOURNAL_CAPACITY);
        assert_eq!(config.record_operations, cfg!(feature = "operation-log"));
    }

    #[test]
    fn unknown_policy_is_an_error() {
        assert!(AllocatorConfig::from_json(r#"{"oom-policy": "retry"}"#).is_err());
    }

    #[test]
    fn builders_chain() {
        let config = AllocatorConfig::default()
            .with_operation_log(true)
            .with_journal_capacity(4);
        assert!(config.record_operations);
        assert_eq!(config.journal_capacity, 4);
    }
}
