//! Client credential handling.
//!
//! The credential is a 16-byte identifier derived once from configuration
//! and compared byte-for-byte against the handshake.

use std::fmt;
use thiserror::Error;

/// Length of a client identifier in bytes.
pub const CREDENTIAL_LEN: usize = 16;

/// Credential configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("identifier is not valid hex")]
    InvalidHex,
    #[error("identifier decodes to {0} bytes, expected 16")]
    InvalidLength(usize),
}

/// The fixed client identifier accepted by this endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredential([u8; CREDENTIAL_LEN]);

impl ClientCredential {
    /// Create a credential from raw bytes.
    pub fn new(bytes: [u8; CREDENTIAL_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the credential from an identifier string such as
    /// `b28f60af-d0b9-4ddf-baaa-7e49c93c380b`. Dashes are removed before
    /// hex decoding.
    pub fn from_identifier(identifier: &str) -> Result<Self, CredentialError> {
        let stripped: String = identifier.chars().filter(|c| *c != '-').collect();
        let bytes = hex::decode(stripped).map_err(|_| CredentialError::InvalidHex)?;
        let bytes: [u8; CREDENTIAL_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CredentialError::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// Check a candidate identifier.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        self.0[..] == *candidate
    }

    pub fn as_bytes(&self) -> &[u8; CREDENTIAL_LEN] {
        &self.0
    }
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix, so logs never carry the whole identifier.
        write!(f, "ClientCredential({}..)", hex::encode(&self.0[..2]))
    }
}
