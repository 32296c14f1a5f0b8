use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The downstream queue must be able to hold at least one event.
    #[error("`queue_capacity` cannot be zero")]
    QueueCapacityZero,
    /// A relay cannot run against a bucket without partitions.
    #[error("`partition_count` cannot be zero")]
    PartitionCountZero,
    /// Bootstrap calls need a non-zero deadline.
    #[error("`bootstrap_timeout_ms` cannot be zero")]
    BootstrapTimeoutZero,
    /// A retry policy must allow at least one attempt.
    #[error("`max_attempts` of the `{0}` retry policy cannot be zero")]
    RetryAttemptsZero(&'static str),
}
