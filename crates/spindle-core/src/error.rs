use thiserror::Error;

use crate::domain::TaskId;

/// A backing-store primitive failed.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached or the connection dropped.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The store answered but rejected the command.
    #[error("store command failed: {0}")]
    Command(String),
}

/// A queue operation failed.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode task {id}: {source}")]
    Encode {
        id: TaskId,
        #[source]
        source: serde_json::Error,
    },

    /// A claimed id whose record cannot be decoded. The id stays in
    /// processing until the next recovery pass.
    #[error("failed to decode task {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// A claimed id with no stored record.
    #[error("no record stored for task {0}")]
    MissingRecord(String),

    #[error("queue '{0}' is not registered")]
    UnknownQueue(String),

    #[error("queue '{name}' does not carry jobs of type {expected}")]
    QueueTypeMismatch { name: String, expected: &'static str },
}

impl QueueError {
    /// Store-consistency faults (as opposed to transient connectivity).
    pub fn is_consistency_fault(&self) -> bool {
        matches!(self, QueueError::Decode { .. } | QueueError::MissingRecord(_))
    }
}

/// Fatal wiring errors, raised while registering queues.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a queue named '{0}' is already registered")]
    DuplicateQueue(String),

    #[error("queue name must not be empty")]
    EmptyName,
}

/// A middleware hook failed. Logged, never propagated.
#[derive(Debug, Error)]
#[error("middleware '{hook}' failed: {message}")]
pub struct MiddlewareError {
    pub hook: &'static str,
    pub message: String,
}

impl MiddlewareError {
    pub fn new(hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            hook,
            message: message.into(),
        }
    }
}
