//! Error taxonomy shared across the bridge, the transport and the client.

use std::io;

use thiserror::Error;

/// Errors surfaced by bridge components.
///
/// `Timeout` is deliberately distinct from `Pipe` so callers can map a
/// bounded wait that merely expired to a retry or a dedicated exit code.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A bounded pipe wait expired before the operation could complete.
    #[error("the pipe operation timed out")]
    Timeout,

    /// An OS-level pipe failure. `context` names the failed pipe action.
    #[error("pipe action \"{context}\" failed: {source}")]
    Pipe {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// A message did not meet the structural or authorization requirements.
    #[error("{0}")]
    InvalidMessage(String),

    /// A scripted operation could not run to completion.
    #[error("{0}")]
    Operation(String),

    /// A blocking pipe read was cancelled cooperatively.
    #[error("the pipe operation was interrupted")]
    Interrupted,
}

impl BridgeError {
    pub(crate) fn pipe(context: &'static str, source: io::Error) -> Self {
        Self::Pipe { context, source }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMessage(reason.into())
    }

    pub(crate) fn operation(reason: impl Into<String>) -> Self {
        Self::Operation(reason.into())
    }

    /// OS error code carried by a `Pipe` error, if the OS reported one.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Pipe { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
