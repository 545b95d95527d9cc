use std::time::Duration;

use thiserror::Error;

/// Error returned by a listener body.
///
/// Listeners report failure through this type instead of panicking. How the
/// failure travels depends on the dispatch mode: immediate dispatch hands it
/// back to the emitter's caller, the pooled and cooperative modes log it.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Listener execution failed with a message.
    #[error("Listener execution failed: {0}")]
    Execution(String),

    /// Generic error with source.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ListenerError {
    /// Create an execution error from a string.
    pub fn execution(msg: impl Into<String>) -> Self {
        ListenerError::Execution(msg.into())
    }
}

/// Result type returned by listener bodies.
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// Errors produced by emitters, the worker pool, the task tracker and the
/// instance cache.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Listener '{listener}' failed while handling '{event}': {source}")]
    Dispatch {
        event: String,
        listener: String,
        #[source]
        source: ListenerError,
    },

    #[error("No cooperative scheduler is running")]
    NoScheduler,

    #[error("Timed out after {}ms with {pending} task(s) still pending", .waited.as_millis())]
    Timeout { pending: usize, waited: Duration },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmitterError {
    /// Create a new EventNotFound error
    pub fn event_not_found(event: impl Into<String>) -> Self {
        Self::EventNotFound(event.into())
    }

    /// Create a new Dispatch error
    pub fn dispatch(
        event: impl Into<String>,
        listener: impl Into<String>,
        source: ListenerError,
    ) -> Self {
        Self::Dispatch {
            event: event.into(),
            listener: listener.into(),
            source,
        }
    }

    /// Create a new WorkerPool error
    pub fn worker_pool(message: impl Into<String>) -> Self {
        Self::WorkerPool(message.into())
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error was raised by a listener body
    pub fn is_listener_failure(&self) -> bool {
        matches!(self, Self::Dispatch { .. })
    }
}

/// Convenience result type for emitter operations
pub type Result<T> = std::result::Result<T, EmitterError>;
