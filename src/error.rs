use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the bridge.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the bridge.
///
/// Only [`Error::Setup`] and [`Error::InvalidInput`] stop a call before it reaches the engine.
/// Every other variant is reported after the engine has been called and leaves the engine in a
/// consistent state.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The engine library or module could not be loaded on this host. Not retried.
    #[error("failed to load engine: {0}")]
    Setup(String),

    /// Engine response bytes did not match the expected schema.
    #[error("failed to parse engine response: {reason}")]
    Parse {
        /// What was wrong with the payload.
        reason: String,
        /// Raw bytes copied out of the engine, kept for diagnostics.
        payload: Arc<[u8]>,
    },

    /// Toggle name or context could not be turned into a request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The engine evaluated the call and reported an error status.
    #[error("engine reported an error: {0}")]
    Engine(String),

    /// The sandboxed module trapped while executing a call.
    #[cfg(feature = "wasm")]
    #[error("engine module trapped")]
    Trap(#[source] Arc<wasmtime::Error>),
}

impl Error {
    pub(crate) fn parse(reason: impl Into<String>, payload: &[u8]) -> Error {
        Error::Parse {
            reason: reason.into(),
            payload: Arc::from(payload),
        }
    }

    /// Raw payload attached to a parse error, if any.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Error::Parse { payload, .. } => Some(&payload[..]),
            _ => None,
        }
    }
}

#[cfg(feature = "wasm")]
impl From<wasmtime::Error> for Error {
    fn from(value: wasmtime::Error) -> Self {
        Error::Trap(Arc::new(value))
    }
}
