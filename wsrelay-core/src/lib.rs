//! Core types for the wsrelay tunnel endpoint.
//!
//! This crate provides the handshake wire format, destination address
//! decoding, the client credential and the shared error taxonomy.

pub mod address;
pub mod auth;
pub mod error;
pub mod protocol;

pub use address::{Address, AddressType};
pub use auth::{ClientCredential, CredentialError};
pub use error::{ErrorCategory, Leg, RelayError, RelayResult};
pub use protocol::{encode_handshake, response_frame, Destination, ParsedRequest};
