//! Error types for setup, transport, publishing and executor dispatch.

use crate::topic_name::TopicNameError;

/// Failures during the one-time setup phase. These are fatal: the node
/// never reaches the steady-state loop.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to open transport session: {0}")]
    Session(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid name '{name}': {source}")]
    InvalidName {
        name: String,
        #[source]
        source: TopicNameError,
    },

    #[error("failed to declare {kind} on '{channel}': {reason}")]
    Endpoint {
        kind: &'static str,
        channel: String,
        reason: String,
    },

    #[error(transparent)]
    Capacity(#[from] CapacityExceeded),
}

/// Recoverable transport-level failures. The steady-state loop logs these and
/// retries on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel '{0}' is not available")]
    ChannelUnavailable(String),

    #[error("failed to serialize message: {0}")]
    Serialize(String),

    #[error("failed to deserialize message: {0}")]
    Deserialize(String),

    #[error("malformed frame label '{0}'")]
    Decode(String),

    #[error("failed to send on '{channel}': {reason}")]
    Send { channel: String, reason: String },
}

/// The formatted frame label does not fit the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame label needs {required} bytes but buffer capacity is {capacity}")]
pub struct BufferOverflow {
    pub required: usize,
    pub capacity: usize,
}

/// The executor already holds its maximum number of registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("executor capacity of {capacity} registrations exceeded")]
pub struct CapacityExceeded {
    pub capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("channel '{0}' is not available")]
    ChannelUnavailable(String),

    #[error(transparent)]
    BufferOverflow(#[from] BufferOverflow),

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for PublishError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::ChannelUnavailable(channel) => Self::ChannelUnavailable(channel),
            other => Self::Transport(other),
        }
    }
}

/// Returned by executor callbacks.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// Logged and skipped; the executor keeps spinning.
    #[error("{0}")]
    Recoverable(String),

    /// Halts the executor.
    #[error("{0}")]
    Fatal(String),
}

impl From<PublishError> for CallbackError {
    fn from(value: PublishError) -> Self {
        Self::Recoverable(value.to_string())
    }
}

impl From<TransportError> for CallbackError {
    fn from(value: TransportError) -> Self {
        Self::Recoverable(value.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    CapacityExceeded(#[from] CapacityExceeded),

    #[error("callback '{source_name}' failed: {reason}")]
    CallbackFailure { source_name: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid override '{0}': expected 'key=value'")]
    Override(String),

    #[error("invalid value for '{key}': {reason}")]
    Value { key: String, reason: String },
}
