// Relay error kinds. None of these are fatal to the process.
use thiserror::Error;

use super::session_registry::SessionId;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed message from session {session}: {source}")]
    MalformedMessage {
        session: SessionId,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not deliver to session {session}: {reason}")]
    TransportFailure { session: SessionId, reason: &'static str },

    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unsupported frame: {0}")]
    UnsupportedFrame(&'static str),
}
