//! Error types for the relay endpoint.
//!
//! Every failure is local to one connection. Errors carry a category so they
//! can be logged and counted uniformly.

use std::fmt;
use std::io;
use thiserror::Error;

/// Error categories for the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Handshake parsing errors.
    Protocol,
    /// Credential mismatch.
    Authentication,
    /// Outbound connection errors.
    Upstream,
    /// I/O errors after the tunnel is established.
    Relay,
    /// Timeout errors.
    Timeout,
}

impl ErrorCategory {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Relay => "relay",
            ErrorCategory::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One direction of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// WebSocket peer to outbound TCP.
    InboundToOutbound,
    /// Outbound TCP to WebSocket peer.
    OutboundToInbound,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::InboundToOutbound => write!(f, "inbound-to-outbound"),
            Leg::OutboundToInbound => write!(f, "outbound-to-inbound"),
        }
    }
}

/// Per-connection relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("client credential rejected")]
    CredentialRejected,

    #[error("unsupported address type {0}")]
    UnsupportedAddressType(u8),

    #[error("failed to connect to {target}: {source}")]
    UpstreamConnectFailed {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("{leg} leg failed: {source}")]
    RelayLeg {
        leg: Leg,
        #[source]
        source: io::Error,
    },

    #[error("connection closed before handshake")]
    ClosedBeforeHandshake,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl RelayError {
    /// Create a malformed header error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedHeader(message.into())
    }

    /// Create a relay leg error.
    pub fn leg(leg: Leg, source: io::Error) -> Self {
        Self::RelayLeg { leg, source }
    }

    /// Get the category for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::MalformedHeader(_)
            | RelayError::UnsupportedAddressType(_)
            | RelayError::ClosedBeforeHandshake => ErrorCategory::Protocol,
            RelayError::CredentialRejected => ErrorCategory::Authentication,
            RelayError::UpstreamConnectFailed { .. } => ErrorCategory::Upstream,
            RelayError::RelayLeg { .. } => ErrorCategory::Relay,
            RelayError::Timeout(_) => ErrorCategory::Timeout,
        }
    }

    /// Short reason label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::MalformedHeader(_) => "malformed_header",
            RelayError::CredentialRejected => "credential_rejected",
            RelayError::UnsupportedAddressType(_) => "unsupported_address_type",
            RelayError::UpstreamConnectFailed { .. } => "upstream_connect_failed",
            RelayError::RelayLeg { .. } => "relay_leg",
            RelayError::ClosedBeforeHandshake => "closed_before_handshake",
            RelayError::Timeout(_) => "timeout",
        }
    }
}

/// Result type using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::leg(
            Leg::OutboundToInbound,
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"),
        );
        let display = err.to_string();
        assert!(display.contains("outbound-to-inbound"));
        assert!(display.contains("pipe closed"));

        assert_eq!(
            RelayError::malformed("too short").to_string(),
            "malformed header: too short"
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            RelayError::CredentialRejected.category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            RelayError::UnsupportedAddressType(4).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            RelayError::Timeout("handshake").category().to_string(),
            "timeout"
        );
    }

    #[test]
    fn test_leg_labels() {
        assert_eq!(Leg::InboundToOutbound.to_string(), "inbound-to-outbound");
        assert_eq!(Leg::OutboundToInbound.to_string(), "outbound-to-inbound");
    }
}
