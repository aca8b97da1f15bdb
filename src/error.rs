//! Error types for the serial link engine

use thiserror::Error;

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Error types surfaced by the link engine and facade
#[derive(Error, Debug)]
pub enum LinkError {
    /// I/O related errors from the hardware port
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port failed its readiness check at initialization
    #[error("serial port is not ready")]
    PortNotReady,

    /// The host-ready line never asserted within the configured bound
    #[error("host ready signal not observed within {waited_ms}ms")]
    HostWait { waited_ms: u64 },

    /// The buffer pool had no free chunk
    #[error("buffer pool exhausted acquiring {what}")]
    Exhausted { what: &'static str },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The engine task has stopped; no further chunks will be delivered
    #[error("link engine stopped")]
    Closed,

    /// Internal errors that shouldn't normally occur
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LinkError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        LinkError::Config {
            message: message.into(),
        }
    }

    /// Create an exhaustion error
    pub fn exhausted(what: &'static str) -> Self {
        LinkError::Exhausted { what }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        LinkError::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a pool-exhaustion error
    pub fn is_exhausted(&self) -> bool {
        matches!(self, LinkError::Exhausted { .. })
    }

    /// Check if this is a recoverable error
    ///
    /// Exhaustion clears as soon as a chunk returns to the pool; transient
    /// I/O conditions clear on retry. Everything else is fatal for the
    /// session.
    pub fn is_recoverable(&self) -> bool {
        match self {
            LinkError::Exhausted { .. } => true,
            LinkError::Io(e) => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                )
            }
            _ => false,
        }
    }
}
