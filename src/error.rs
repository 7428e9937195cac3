//! Error types for OCSP staple validation.
//!
//! [`ErrorKind`] is the rejection taxonomy of the validator: every variant is
//! terminal for the handshake it was raised in. [`CheckError`] covers the
//! surrounding client plumbing (resolution, connection, handshake) used by the
//! command-line tool.

use chrono::{DateTime, Utc};
use std::fmt;
use std::io;

/// Reason a stapled OCSP response was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The handshake exposed no verified certificate chain
    MissingChain,

    /// The verified chain is too short to contain a leaf and its issuer
    IncompleteChain {
        /// Number of certificates present
        got: usize,
        /// Number of certificates required
        want: usize,
    },

    /// The staple is empty or could not be decoded
    ParseFailure {
        /// What the decoder rejected
        detail: String,
    },

    /// The staple does not describe the leaf/issuer pair of this connection
    BindingMismatch {
        /// Which identifying field disagreed
        detail: String,
    },

    /// The response signature does not verify against the issuer
    BadSignature {
        /// Why verification failed
        detail: String,
    },

    /// The responder reports the leaf certificate as revoked
    Revoked {
        /// When the certificate was revoked
        revoked_at: DateTime<Utc>,
    },

    /// The responder does not know the leaf certificate
    UnknownStatus,

    /// The responder answered with a non-successful response status
    InvalidStapleStatus {
        /// Responder status name, e.g. `tryLater`
        status: String,
    },

    /// The response is outside its validity window (freshness checking only)
    Stale {
        /// Which time bound was violated
        detail: String,
    },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingChain => write!(f, "missing TLS verified chains"),
            Self::IncompleteChain { got, want } => write!(
                f,
                "incomplete cert chain, got {}, want at least {}",
                got, want
            ),
            Self::ParseFailure { detail } => {
                write!(f, "failed to parse OCSP response: {}", detail)
            }
            Self::BindingMismatch { detail } => {
                write!(f, "OCSP response does not match certificate: {}", detail)
            }
            Self::BadSignature { detail } => write!(f, "bad OCSP signature: {}", detail),
            Self::Revoked { revoked_at } => {
                write!(f, "certificate revoked at {}", revoked_at.to_rfc3339())
            }
            Self::UnknownStatus => write!(f, "certificate status unknown to responder"),
            Self::InvalidStapleStatus { status } => {
                write!(f, "invalid staple status: {}", status)
            }
            Self::Stale { detail } => write!(f, "stale OCSP response: {}", detail),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// Error type for the client side of a staple check.
///
/// Returned when a target cannot be reached or the handshake does not
/// complete, before any staple is available to validate.
#[derive(Debug)]
pub enum CheckError {
    /// DNS resolution failed for the given hostname
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TCP connection failed to the target address
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TLS handshake failed
    HandshakeFailed {
        /// Details about why the handshake failed
        details: String,
    },

    /// The server did not speak the expected pre-TLS protocol
    ProtocolError {
        /// What was received instead
        details: String,
    },

    /// Invalid input provided to the API
    InvalidInput {
        /// Which field/parameter was invalid
        field: String,
        /// Why it was invalid
        reason: String,
    },

    /// OpenSSL error occurred
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },

    /// Generic I/O error
    IoError {
        /// The underlying I/O error
        source: io::Error,
    },
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, .. } => {
                write!(
                    f,
                    "Failed to resolve hostname: {}. Check that the hostname is spelled correctly and your DNS configuration is working.",
                    hostname
                )
            }
            Self::ConnectionFailed { address, .. } => {
                write!(
                    f,
                    "Connection failed to: {}. Verify the host is running a TLS service and is reachable.",
                    address
                )
            }
            Self::HandshakeFailed { details } => {
                write!(f, "TLS handshake failed: {}", details)
            }
            Self::ProtocolError { details } => {
                write!(f, "Unexpected server greeting: {}", details)
            }
            Self::InvalidInput { field, reason } => {
                write!(f, "Invalid input for '{}': {}", field, reason)
            }
            Self::OpenSSLError { details } => {
                write!(f, "OpenSSL error: {}", details)
            }
            Self::IoError { source } => {
                write!(f, "I/O error: {}", source)
            }
        }
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::IoError { source } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for CheckError {
    fn from(e: io::Error) -> Self {
        Self::IoError { source: e }
    }
}

impl From<openssl::error::ErrorStack> for CheckError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

impl<S: fmt::Debug> From<openssl::ssl::HandshakeError<S>> for CheckError {
    fn from(e: openssl::ssl::HandshakeError<S>) -> Self {
        Self::HandshakeFailed {
            details: format!("{}", e),
        }
    }
}
