use std::net::SocketAddr;
use std::time::Duration;

use uuid::Uuid;

/// All error types that can occur when talking to DoHome devices.
///
/// Nothing here is fatal: every network-derived variant means "the device
/// (or group) is unavailable for this call", see [`Error::is_unavailable`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to serialize a command payload to JSON.
    #[error("failed to dump json: {0:?}")]
    JsonDump(serde_json::Error),

    /// A network socket operation failed.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// No usable reply arrived within the allotted window.
    #[error("no reply from {address} within {waited:?}")]
    Timeout { address: SocketAddr, waited: Duration },

    /// A datagram arrived but could not be decoded.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// A decodable reply echoed a different command code (cross-talk).
    #[error("reply echoed command {received}, expected {expected}")]
    CodeMismatch { expected: u16, received: u16 },

    /// A group command collected fewer matching replies than its quorum.
    #[error("only {received} of {quorum} required responses arrived")]
    NotEnoughResponses { received: usize, quorum: usize },

    /// Identifier resolution is already in flight for this device.
    #[error("device at {0} is still resolving its identifier")]
    Resolving(SocketAddr),

    /// The group quorum is zero or larger than the group.
    #[error("quorum {quorum} is invalid for a group of {members}")]
    InvalidQuorum { quorum: usize, members: usize },

    /// Attempted to create a group without identifiers.
    #[error("group has no identifiers")]
    EmptyGroup,

    /// The specified group is not registered with the gateway.
    #[error("group not found {0}")]
    GroupNotFound(Uuid),

    /// A device identifier contains characters the frame grammar reserves.
    #[error("invalid device identifier {0:?}")]
    InvalidIdentifier(String),

    /// Failed to parse a [`crate::Color`] from a string.
    #[error("invalid color string: {0}")]
    InvalidColorString(String),
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }

    /// Create a new timeout error
    pub fn timeout(address: SocketAddr, waited: Duration) -> Self {
        Error::Timeout { address, waited }
    }

    /// Create a new malformed reply error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedReply(reason.into())
    }

    /// Whether this error should mark the device or group unavailable.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Socket { .. }
                | Error::Timeout { .. }
                | Error::MalformedReply(_)
                | Error::CodeMismatch { .. }
                | Error::NotEnoughResponses { .. }
                | Error::Resolving(_)
        )
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
