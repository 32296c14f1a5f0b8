use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{RetryConfig, ValidationError};

/// Default timeout applied to each bootstrap call.
pub const DEFAULT_BOOTSTRAP_TIMEOUT_MS: u64 = 2_000;

/// Default capacity of the downstream event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16_384;

/// Where the relay takes its initial partition positions from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Ignore any stored checkpoint and start every partition from the beginning.
    Fresh,
    /// Load the stored checkpoint and reconcile it against the failover logs.
    #[default]
    LoadAndResume,
    /// Use the state handed to the driver by the caller, skipping the checkpoint store.
    CallerState,
}

/// What the publisher does when the downstream queue is full.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum PublishPolicy {
    /// Drop the event and count it.
    #[default]
    DropWhenFull,
    /// Wait up to `timeout_ms` for free capacity, then drop the event and count it.
    BlockWithTimeout { timeout_ms: u64 },
}

/// How a failed stream-open request for a partition is handled.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum StreamOpenPolicy {
    /// The first failure stops the run.
    #[default]
    Fatal,
    /// The open request is retried with backoff before the run is stopped.
    Retry { retry: RetryConfig },
}

/// How a mid-stream transport failure is handled.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum TransportFailurePolicy {
    /// The failure stops the run and is returned to the caller.
    #[default]
    Surface,
    /// All partition streams are reopened from the in-memory state.
    Reconnect { retry: RetryConfig },
}

/// Configuration for a relay run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Name sent to the cluster with every stream-open request.
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Source of the initial partition positions.
    #[serde(default)]
    pub mode: RunMode,
    /// Timeout, in milliseconds, applied to each bootstrap call.
    #[serde(default = "default_bootstrap_timeout_ms")]
    pub bootstrap_timeout_ms: u64,
    /// Capacity of the bounded queue shared with the downstream consumer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Partition count used when the cluster does not report one.
    #[serde(default)]
    pub partition_count: Option<u16>,
    #[serde(default)]
    pub publish: PublishPolicy,
    #[serde(default)]
    pub stream_open: StreamOpenPolicy,
    #[serde(default)]
    pub transport_failure: TransportFailurePolicy,
}

impl RelayConfig {
    /// Validates relay configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.queue_capacity == 0 {
            return Err(ValidationError::QueueCapacityZero);
        }

        if self.partition_count == Some(0) {
            return Err(ValidationError::PartitionCountZero);
        }

        if self.bootstrap_timeout_ms == 0 {
            return Err(ValidationError::BootstrapTimeoutZero);
        }

        if let StreamOpenPolicy::Retry { retry } = &self.stream_open
            && retry.max_attempts == 0
        {
            return Err(ValidationError::RetryAttemptsZero("stream_open"));
        }

        if let TransportFailurePolicy::Reconnect { retry } = &self.transport_failure
            && retry.max_attempts == 0
        {
            return Err(ValidationError::RetryAttemptsZero("transport_failure"));
        }

        Ok(())
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stream_name: default_stream_name(),
            mode: RunMode::default(),
            bootstrap_timeout_ms: default_bootstrap_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            partition_count: None,
            publish: PublishPolicy::default(),
            stream_open: StreamOpenPolicy::default(),
            transport_failure: TransportFailurePolicy::default(),
        }
    }
}

impl Config for RelayConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

fn default_stream_name() -> String {
    format!("cdc-relay({})", std::process::id())
}

fn default_bootstrap_timeout_ms() -> u64 {
    DEFAULT_BOOTSTRAP_TIMEOUT_MS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RelayConfig::default();

        assert_eq!(config.mode, RunMode::LoadAndResume);
        assert_eq!(config.bootstrap_timeout(), Duration::from_secs(2));
        assert_eq!(config.publish, PublishPolicy::DropWhenFull);
        assert_eq!(config.stream_open, StreamOpenPolicy::Fatal);
        assert_eq!(config.transport_failure, TransportFailurePolicy::Surface);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_zero_values() {
        let config = RelayConfig {
            queue_capacity: 0,
            ..RelayConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::QueueCapacityZero));

        let config = RelayConfig {
            partition_count: Some(0),
            ..RelayConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::PartitionCountZero));

        let config = RelayConfig {
            bootstrap_timeout_ms: 0,
            ..RelayConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::BootstrapTimeoutZero));

        let config = RelayConfig {
            transport_failure: TransportFailurePolicy::Reconnect {
                retry: RetryConfig {
                    max_attempts: 0,
                    ..RetryConfig::default()
                },
            },
            ..RelayConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::RetryAttemptsZero("transport_failure"))
        );
    }
}
