//! Error types for stream-binder.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors raised while resolving a logical channel name.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Unrecognized channel name {name:?}: {reason}, should be [<binder>:]<name>")]
    InvalidChannelName { name: String, reason: String },

    #[error("No binder is configured")]
    NoBinderAvailable,

    #[error(
        "Several binders are configured ({}) and no default binder is set",
        available.join(", ")
    )]
    AmbiguousBinderSelection { available: Vec<String> },

    #[error("No binder registered under {selector:?}")]
    UnknownBinder { selector: String },

    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Errors returned by a binder while binding a channel.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("Invalid partition configuration: {0}")]
    Partition(#[from] PartitionError),

    #[error("Binder {binder} rejected destination {destination}: {reason}")]
    Rejected {
        binder: String,
        destination: String,
        reason: String,
    },

    #[error("Channel {channel} is already bound as a producer")]
    AlreadyBound { channel: String },
}

/// Partition configuration and routing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("Only one of partition key expression and partition key extractor may be set")]
    ConflictingKeyStrategies,

    #[error("Partition count is {0} but no partition key expression or extractor is set")]
    MissingKeyStrategy(i32),

    #[error("Partition count must be positive, got {0}")]
    NonPositivePartitionCount(i32),

    #[error("Instance index {index} is out of range for instance count {count}")]
    InvalidInstanceIndex { index: i32, count: i32 },

    #[error("Instance count {instances} exceeds partition count {partitions}")]
    InstanceCountExceedsPartitions { instances: i32, partitions: i32 },

    #[error("Invalid partition key expression {expression:?}: {reason}")]
    InvalidKeyExpression { expression: String, reason: String },

    #[error("No partition key extractor registered under {0:?}")]
    UnknownKeyExtractor(String),

    #[error("No partition selector registered under {0:?}")]
    UnknownSelector(String),

    #[error("Partition key resolved to null")]
    NullKey,
}

/// Errors raised while sending through a channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {channel} has no subscribers")]
    NoSubscribers { channel: String },

    #[error("Message rejected on channel {channel}: {reason}")]
    Rejected { channel: String, reason: String },

    #[error("Delivery failed on channel {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Partition routing failed: {0}")]
    Partition(#[from] PartitionError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
