//! Socket subsystem error types and result definitions

use core::fmt;

/// Socket operation result type
pub type Result<T> = core::result::Result<T, SockError>;

/// Error kinds surfaced by the local-domain socket layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockError {
    /// Missing endpoint, empty path, re-bind, re-attach
    InvalidArgument,
    /// A rendezvous node already exists at the bind path
    AddressInUse,
    /// Access check failed during bind or connect lookup
    PermissionDenied,
    /// Connect resolved to a node that is not socket-typed
    NotSocket,
    /// Connect to an unbound or non-listening node
    ConnectionRefused,
    /// Endpoint kinds differ at connect
    ProtocolMismatch,
    /// Addressed send on an already-connected datagram endpoint
    AlreadyConnected,
    /// Operation requires a connection that does not exist
    NotConnected,
    /// Send on a shut-down stream
    BrokenPipe,
    /// Datagram receive buffer cannot take the message
    NoBufferSpace,
    /// Receiver handle table cannot accept all transferred rights
    MessageTooBig,
    /// Rights payload names an unknown handle index
    BadHandle,
    /// Rights payload names a handle whose type cannot be passed
    Unsupported,
    /// Peer endpoint was torn down while this one was connected
    ConnectionReset,
    /// Endpoint was aborted; surfaced on the next operation
    ConnectionAborted,
}

impl SockError {
    /// Get a static string description of the error
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "Invalid argument",
            Self::AddressInUse => "Address already in use",
            Self::PermissionDenied => "Permission denied",
            Self::NotSocket => "Not a socket",
            Self::ConnectionRefused => "Connection refused",
            Self::ProtocolMismatch => "Protocol kind mismatch",
            Self::AlreadyConnected => "Endpoint is already connected",
            Self::NotConnected => "Endpoint is not connected",
            Self::BrokenPipe => "Broken pipe",
            Self::NoBufferSpace => "No buffer space available",
            Self::MessageTooBig => "Message too big",
            Self::BadHandle => "Bad handle index",
            Self::Unsupported => "Handle type cannot be transferred",
            Self::ConnectionReset => "Connection reset by peer",
            Self::ConnectionAborted => "Connection aborted",
        }
    }

    /// Convert error to a numeric code for system calls
    pub fn to_errno(self) -> i32 {
        match self {
            Self::InvalidArgument => -1,
            Self::AddressInUse => -2,
            Self::PermissionDenied => -3,
            Self::NotSocket => -4,
            Self::ConnectionRefused => -5,
            Self::ProtocolMismatch => -6,
            Self::AlreadyConnected => -7,
            Self::NotConnected => -8,
            Self::BrokenPipe => -9,
            Self::NoBufferSpace => -10,
            Self::MessageTooBig => -11,
            Self::BadHandle => -12,
            Self::Unsupported => -13,
            Self::ConnectionReset => -14,
            Self::ConnectionAborted => -15,
        }
    }
}

impl fmt::Display for SockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(SockError::BrokenPipe.as_str(), "Broken pipe");
        assert_eq!(SockError::AddressInUse.to_errno(), -2);
    }

    #[test]
    fn test_errno_codes_distinct() {
        let all = [
            SockError::InvalidArgument,
            SockError::AddressInUse,
            SockError::PermissionDenied,
            SockError::NotSocket,
            SockError::ConnectionRefused,
            SockError::ProtocolMismatch,
            SockError::AlreadyConnected,
            SockError::NotConnected,
            SockError::BrokenPipe,
            SockError::NoBufferSpace,
            SockError::MessageTooBig,
            SockError::BadHandle,
            SockError::Unsupported,
            SockError::ConnectionReset,
            SockError::ConnectionAborted,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.to_errno(), b.to_errno());
            }
        }
    }
}
