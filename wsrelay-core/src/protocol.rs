//! Handshake wire format.
//!
//! The first inbound message of a tunnel has the layout:
//!
//! ```text
//! +---------+-------------+-----+---------+---------+------+------+---------+---------+
//! | version | identifier  |  L  | options | command | port | atyp | address | payload |
//! |   1     |     16      |  1  |    L    |    1    |  2   |  1   |   var   |   var   |
//! +---------+-------------+-----+---------+---------+------+------+---------+---------+
//! ```
//!
//! The port is big-endian. Options and command are skipped; everything after
//! the address is application payload and is forwarded verbatim.

use crate::address::{Address, AddressType};
use crate::auth::{ClientCredential, CREDENTIAL_LEN};
use crate::error::{RelayError, RelayResult};
use bytes::BufMut;
use std::fmt;

/// Shortest message that can carry version, identifier and options length.
pub const MIN_HEADER_LEN: usize = 1 + CREDENTIAL_LEN + 1;

/// Command byte written by [`encode_handshake`].
pub const COMMAND_TCP: u8 = 1;

/// Status byte of a successful response frame.
pub const STATUS_OK: u8 = 0;

/// Cursor over a handshake message with bounds-checked reads.
#[derive(Debug)]
pub struct HeaderReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> HeaderReader<'a> {
    /// Start reading at offset zero.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the message.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current offset.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> RelayResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a big-endian u16.
    pub fn read_u16(&mut self) -> RelayResult<u16> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_be_bytes(bytes))
    }

    /// Read exactly `N` bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> RelayResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Borrow the next `n` bytes. A short read leaves the offset unchanged.
    pub fn read_bytes(&mut self, n: usize) -> RelayResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(RelayError::malformed(format!(
                "truncated at offset {}: need {} bytes, have {}",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Advance past `n` bytes without looking at them.
    pub fn skip(&mut self, n: usize) -> RelayResult<()> {
        self.read_bytes(n).map(|_| ())
    }
}

/// Destination host and port requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: Address,
    pub port: u16,
}

impl Destination {
    pub fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    pub fn host(&self) -> String {
        self.address.host()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Address::Ipv6(_) => write!(f, "[{}]:{}", self.address, self.port),
            _ => write!(f, "{}:{}", self.address, self.port),
        }
    }
}

/// The fixed-size front of a handshake, before the identifier is checked.
#[derive(Debug)]
pub struct HandshakePrefix<'a> {
    pub version: u8,
    identifier: &'a [u8],
    reader: HeaderReader<'a>,
}

impl<'a> HandshakePrefix<'a> {
    /// Read version and identifier. Fails on anything shorter than
    /// [`MIN_HEADER_LEN`] before looking at a single field.
    pub fn parse(message: &'a [u8]) -> RelayResult<Self> {
        if message.len() < MIN_HEADER_LEN {
            return Err(RelayError::malformed("too short"));
        }
        let mut reader = HeaderReader::new(message);
        let version = reader.read_u8()?;
        let identifier = reader.read_bytes(CREDENTIAL_LEN)?;
        Ok(Self {
            version,
            identifier,
            reader,
        })
    }

    pub fn authenticate(self, credential: &ClientCredential) -> RelayResult<Authenticated<'a>> {
        if !credential.matches(self.identifier) {
            return Err(RelayError::CredentialRejected);
        }
        Ok(Authenticated {
            version: self.version,
            reader: self.reader,
        })
    }
}

/// A handshake whose identifier matched; the destination is still unread.
#[derive(Debug)]
pub struct Authenticated<'a> {
    pub version: u8,
    reader: HeaderReader<'a>,
}

impl Authenticated<'_> {
    /// Skip the options block and command byte, then read port and address.
    pub fn resolve(mut self) -> RelayResult<ParsedRequest> {
        let options_len = self.reader.read_u8()? as usize;
        self.reader.skip(options_len)?;
        let command = self.reader.read_u8()?;
        let port = self.reader.read_u16()?;
        let address_type = AddressType::try_from(self.reader.read_u8()?)?;
        let address = Address::read(address_type, &mut self.reader)?;

        Ok(ParsedRequest {
            version: self.version,
            command,
            destination: Destination::new(address, port),
            payload_offset: self.reader.position(),
        })
    }
}

/// A fully decoded handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub version: u8,
    /// Recorded but not interpreted.
    pub command: u8,
    pub destination: Destination,
    /// Offset of the first payload byte in the handshake message.
    pub payload_offset: usize,
}

impl ParsedRequest {
    /// Decode and authenticate a handshake message in one step.
    pub fn decode(message: &[u8], credential: &ClientCredential) -> RelayResult<Self> {
        HandshakePrefix::parse(message)?
            .authenticate(credential)?
            .resolve()
    }

    pub fn address_type(&self) -> AddressType {
        self.destination.address.address_type()
    }

    pub fn host(&self) -> String {
        self.destination.host()
    }

    pub fn port(&self) -> u16 {
        self.destination.port
    }

    /// Bytes of `message` that follow the header.
    pub fn payload<'m>(&self, message: &'m [u8]) -> &'m [u8] {
        message.get(self.payload_offset..).unwrap_or_default()
    }
}

/// Build a handshake message with an empty options block.
pub fn encode_handshake(
    version: u8,
    credential: &ClientCredential,
    destination: &Destination,
    payload: &[u8],
) -> RelayResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(MIN_HEADER_LEN + 4 + 17 + payload.len());
    buf.put_u8(version);
    buf.put_slice(credential.as_bytes());
    buf.put_u8(0);
    buf.put_u8(COMMAND_TCP);
    buf.put_u16(destination.port);
    destination.address.write(&mut buf)?;
    buf.put_slice(payload);
    Ok(buf)
}

/// The acknowledgement sent after the outbound connection is up.
pub fn response_frame(version: u8) -> [u8; 2] {
    [version, STATUS_OK]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> ClientCredential {
        ClientCredential::from_identifier("b28f60af-d0b9-4ddf-baaa-7e49c93c380b").unwrap()
    }

    /// Version 0, no options, TCP command, port 80, IPv4 93.184.216.34.
    fn scenario_a(credential: &ClientCredential) -> Vec<u8> {
        let mut msg = vec![0x00];
        msg.extend_from_slice(credential.as_bytes());
        msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x50, 0x01, 93, 184, 216, 34]);
        msg
    }

    #[test]
    fn test_decode_ipv4_request() {
        let credential = credential();
        let msg = scenario_a(&credential);
        let request = ParsedRequest::decode(&msg, &credential).unwrap();

        assert_eq!(request.version, 0);
        assert_eq!(request.command, COMMAND_TCP);
        assert_eq!(request.address_type(), AddressType::Ipv4);
        assert_eq!(request.host(), "93.184.216.34");
        assert_eq!(request.port(), 80);
        assert_eq!(request.payload_offset, msg.len());
        assert!(request.payload(&msg).is_empty());
        assert_eq!(request.destination.to_string(), "93.184.216.34:80");
    }

    #[test]
    fn test_short_messages_are_malformed() {
        let credential = credential();
        let full = scenario_a(&credential);
        for len in 0..MIN_HEADER_LEN {
            let result = ParsedRequest::decode(&full[..len], &credential);
            match result {
                Err(RelayError::MalformedHeader(m)) => assert_eq!(m, "too short"),
                other => panic!("expected MalformedHeader for len {}, got {:?}", len, other),
            }
        }
    }

    #[test]
    fn test_wrong_credential_rejected() {
        let credential = credential();
        let mut msg = scenario_a(&credential);
        msg[16] ^= 0x01;
        assert!(matches!(
            ParsedRequest::decode(&msg, &credential),
            Err(RelayError::CredentialRejected)
        ));

        // Every single-byte change in the identifier is rejected.
        for i in 1..=16 {
            let mut msg = scenario_a(&credential);
            msg[i] = msg[i].wrapping_add(1);
            assert!(matches!(
                ParsedRequest::decode(&msg, &credential),
                Err(RelayError::CredentialRejected)
            ));
        }
    }

    #[test]
    fn test_unsupported_address_type() {
        let credential = credential();
        let mut msg = scenario_a(&credential);
        msg[21] = 4;
        assert!(matches!(
            ParsedRequest::decode(&msg, &credential),
            Err(RelayError::UnsupportedAddressType(4))
        ));
    }

    #[test]
    fn test_options_block_is_skipped() {
        let credential = credential();
        let mut msg = vec![0x00];
        msg.extend_from_slice(credential.as_bytes());
        msg.push(3);
        msg.extend_from_slice(&[0xaa, 0xbb, 0xcc]);
        msg.push(COMMAND_TCP);
        msg.extend_from_slice(&443u16.to_be_bytes());
        msg.push(2);
        msg.push(11);
        msg.extend_from_slice(b"example.com");
        msg.extend_from_slice(b"hi");

        let request = ParsedRequest::decode(&msg, &credential).unwrap();
        assert_eq!(request.host(), "example.com");
        assert_eq!(request.port(), 443);
        assert_eq!(request.payload(&msg), b"hi");
    }

    #[test]
    fn test_truncated_after_prefix() {
        let credential = credential();
        let full = scenario_a(&credential);
        for len in MIN_HEADER_LEN..full.len() {
            assert!(matches!(
                ParsedRequest::decode(&full[..len], &credential),
                Err(RelayError::MalformedHeader(_))
            ));
        }
    }

    #[test]
    fn test_trailing_payload() {
        let credential = credential();
        let mut msg = scenario_a(&credential);
        let header_len = msg.len();
        msg.extend_from_slice(&[0xde, 0xad]);

        let request = ParsedRequest::decode(&msg, &credential).unwrap();
        assert_eq!(request.payload_offset, header_len);
        assert_eq!(request.payload(&msg), &[0xde, 0xad]);
    }

    #[test]
    fn test_encode_decode_preserves_destination() {
        let credential = credential();
        let destinations = [
            Destination::new(Address::Ipv4([127, 0, 0, 1]), 8080),
            Destination::new(Address::Domain("relay.example.org".to_string()), 443),
            Destination::new(
                Address::Ipv6([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 7]),
                22,
            ),
        ];

        for destination in destinations {
            let msg = encode_handshake(0, &credential, &destination, b"payload").unwrap();
            let request = ParsedRequest::decode(&msg, &credential).unwrap();
            assert_eq!(request.address_type(), destination.address.address_type());
            assert_eq!(request.host(), destination.host());
            assert_eq!(request.port(), destination.port);
            assert_eq!(request.payload(&msg), b"payload");
        }
    }

    #[test]
    fn test_two_phase_decode() {
        let credential = credential();
        let msg = scenario_a(&credential);

        let prefix = HandshakePrefix::parse(&msg).unwrap();
        assert_eq!(prefix.version, 0);
        let authenticated = prefix.authenticate(&credential).unwrap();
        let request = authenticated.resolve().unwrap();
        assert_eq!(request, ParsedRequest::decode(&msg, &credential).unwrap());
    }

    #[test]
    fn test_reader_offsets() {
        let mut reader = HeaderReader::new(&[0x01, 0x00, 0x50, 0xff]);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16().unwrap(), 80);
        assert_eq!(reader.position(), 3);
        assert_eq!(reader.remaining(), 1);
        assert!(reader.read_u16().is_err());
        assert_eq!(reader.position(), 3);
    }

    #[test]
    fn test_response_frame() {
        assert_eq!(response_frame(0), [0, 0]);
        assert_eq!(response_frame(7), [7, STATUS_OK]);
    }
}
