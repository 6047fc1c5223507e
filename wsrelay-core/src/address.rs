//! Destination address decoding.

use crate::error::{RelayError, RelayResult};
use crate::protocol::HeaderReader;
use bytes::BufMut;
use std::fmt;

/// Address type tag carried in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// Four-byte IPv4 address
    Ipv4,
    /// Length-prefixed domain name
    Domain,
    /// Sixteen-byte IPv6 address
    Ipv6,
}

impl TryFrom<u8> for AddressType {
    type Error = RelayError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(AddressType::Ipv4),
            2 => Ok(AddressType::Domain),
            3 => Ok(AddressType::Ipv6),
            other => Err(RelayError::UnsupportedAddressType(other)),
        }
    }
}

impl From<AddressType> for u8 {
    fn from(address_type: AddressType) -> Self {
        match address_type {
            AddressType::Ipv4 => 1,
            AddressType::Domain => 2,
            AddressType::Ipv6 => 3,
        }
    }
}

/// A destination address as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4([u8; 4]),
    Domain(String),
    Ipv6([u8; 16]),
}

impl Address {
    /// Read the address bytes selected by `address_type`.
    pub fn read(address_type: AddressType, reader: &mut HeaderReader<'_>) -> RelayResult<Self> {
        match address_type {
            AddressType::Ipv4 => {
                let octets = reader.read_array::<4>()?;
                Ok(Address::Ipv4(octets))
            }
            AddressType::Domain => {
                let len = reader.read_u8()? as usize;
                let raw = reader.read_bytes(len)?;
                let domain = std::str::from_utf8(raw)
                    .map_err(|_| RelayError::malformed("domain is not valid UTF-8"))?;
                Ok(Address::Domain(domain.to_string()))
            }
            AddressType::Ipv6 => {
                let octets = reader.read_array::<16>()?;
                Ok(Address::Ipv6(octets))
            }
        }
    }

    pub fn address_type(&self) -> AddressType {
        match self {
            Address::Ipv4(_) => AddressType::Ipv4,
            Address::Domain(_) => AddressType::Domain,
            Address::Ipv6(_) => AddressType::Ipv6,
        }
    }

    /// Render the connectable host string.
    ///
    /// IPv6 groups are lowercase hex without zero-compression, e.g.
    /// `2001:db8:0:0:0:0:0:1`.
    pub fn host(&self) -> String {
        match self {
            Address::Ipv4([a, b, c, d]) => format!("{}.{}.{}.{}", a, b, c, d),
            Address::Domain(domain) => domain.clone(),
            Address::Ipv6(octets) => octets
                .chunks_exact(2)
                .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
                .collect::<Vec<_>>()
                .join(":"),
        }
    }

    /// Write the type tag followed by the address bytes.
    pub fn write<B: BufMut>(&self, buf: &mut B) -> RelayResult<()> {
        buf.put_u8(self.address_type().into());
        match self {
            Address::Ipv4(octets) => buf.put_slice(octets),
            Address::Domain(domain) => {
                let len = u8::try_from(domain.len())
                    .map_err(|_| RelayError::malformed("domain longer than 255 bytes"))?;
                buf.put_u8(len);
                buf.put_slice(domain.as_bytes());
            }
            Address::Ipv6(octets) => buf.put_slice(octets),
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host())
    }
}
