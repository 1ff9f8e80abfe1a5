use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Runtime limits for one sync session. Validated once at session
/// construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound for outbound chat text, in characters.
    pub max_message_len: usize,
    /// Upper bound for queued offline commands per user.
    pub max_offline_entries: usize,
    /// Upper bound for the unread queue; overflow merges the hangout but
    /// skips the badge.
    pub max_unread_entries: usize,
    /// How long the host should wait for an acknowledgement before marking a
    /// pending command failed. The core keeps no timer itself; the host
    /// drives [`crate::sync::SyncClient::fail_pending`].
    pub ack_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_message_len: 4096,
            max_offline_entries: 256,
            max_unread_entries: 256,
            ack_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_len == 0 {
            return Err(ConfigError::Invalid("max_message_len must be non-zero"));
        }
        if self.max_offline_entries == 0 {
            return Err(ConfigError::Invalid("max_offline_entries must be non-zero"));
        }
        if self.max_unread_entries == 0 {
            return Err(ConfigError::Invalid("max_unread_entries must be non-zero"));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ack_timeout_ms must be non-zero"));
        }
        Ok(())
    }
}
