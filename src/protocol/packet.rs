//! Common control-packet framing - RFC 1661 section 5
//!
//! LCP, IPCP, CHAP and PAP all share the same 4-byte header:
//! Code, Identifier and a big-endian Length that covers the header itself.
//! Configure-* packets carry a list of configuration items (CIs), each
//! encoded as type, length (including the 2-byte CI header) and value.

use super::codec::Reader;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Control packet header size (code + identifier + length)
pub const HEADER_SIZE: usize = 4;

/// Size of a CI header (type + length)
pub const CI_HEADER_SIZE: usize = 2;

/// Largest data field the 16-bit length can describe
pub const MAX_DATA_LEN: usize = u16::MAX as usize - HEADER_SIZE;

/// Packet codes shared by every FSM-driven control protocol
pub mod codes {
    /// Configure-Request
    pub const CONFIGURE_REQUEST: u8 = 1;
    /// Configure-Ack
    pub const CONFIGURE_ACK: u8 = 2;
    /// Configure-Nak
    pub const CONFIGURE_NAK: u8 = 3;
    /// Configure-Reject
    pub const CONFIGURE_REJECT: u8 = 4;
    /// Terminate-Request
    pub const TERMINATE_REQUEST: u8 = 5;
    /// Terminate-Ack
    pub const TERMINATE_ACK: u8 = 6;
    /// Code-Reject
    pub const CODE_REJECT: u8 = 7;
}

/// Human readable name of a shared packet code
pub fn code_name(code: u8) -> &'static str {
    match code {
        codes::CONFIGURE_REQUEST => "ConfReq",
        codes::CONFIGURE_ACK => "ConfAck",
        codes::CONFIGURE_NAK => "ConfNak",
        codes::CONFIGURE_REJECT => "ConfRej",
        codes::TERMINATE_REQUEST => "TermReq",
        codes::TERMINATE_ACK => "TermAck",
        codes::CODE_REJECT => "CodeRej",
        _ => "unknown",
    }
}

/// Parsed control packet (zero-copy reference)
#[derive(Debug)]
pub struct ControlPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> ControlPacket<'a> {
    /// Parse a control packet from buffer.
    ///
    /// Bytes beyond the declared length are treated as link padding and
    /// ignored.
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::TruncatedPacket {
                needed: HEADER_SIZE,
                available: buffer.len(),
            });
        }

        let packet = Self { buffer };

        let length = packet.length() as usize;
        if length < HEADER_SIZE || length > buffer.len() {
            return Err(Error::LengthMismatch {
                declared: length,
                actual: buffer.len(),
            });
        }

        Ok(packet)
    }

    /// Code field
    pub fn code(&self) -> u8 {
        self.buffer[0]
    }

    /// Identifier field (for matching requests and responses)
    pub fn identifier(&self) -> u8 {
        self.buffer[1]
    }

    /// Length field (total packet length including header)
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Data following the header, up to the declared length
    pub fn data(&self) -> &'a [u8] {
        let len = self.length() as usize;
        &self.buffer[HEADER_SIZE..len]
    }

    /// The packet bytes up to the declared length
    pub fn as_bytes(&self) -> &'a [u8] {
        let len = self.length() as usize;
        &self.buffer[..len]
    }
}

/// Builder for control packets
#[derive(Debug, Default)]
pub struct ControlBuilder {
    code: u8,
    identifier: u8,
    data: Vec<u8>,
}

impl ControlBuilder {
    /// Create a new control packet builder
    pub fn new(code: u8, identifier: u8) -> Self {
        Self {
            code,
            identifier,
            data: Vec::new(),
        }
    }

    /// Append a list of configuration items
    pub fn cis(mut self, cis: &[Ci]) -> Self {
        for ci in cis {
            ci.encode_into(&mut self.data);
        }
        self
    }

    /// Append raw data
    pub fn raw_data(mut self, data: &[u8]) -> Self {
        self.data.extend_from_slice(data);
        self
    }

    /// Append a single byte
    pub fn byte(mut self, value: u8) -> Self {
        self.data.push(value);
        self
    }

    /// Append a one-byte length prefix followed by `value`.
    ///
    /// Values longer than 255 bytes are cut to fit the prefix.
    pub fn counted(mut self, value: &[u8]) -> Self {
        let len = value.len().min(u8::MAX as usize);
        self.data.push(len as u8);
        self.data.extend_from_slice(&value[..len]);
        self
    }

    /// Build the packet.
    ///
    /// Data beyond [`MAX_DATA_LEN`] is dropped so the length field stays
    /// exact.
    pub fn build(mut self) -> Vec<u8> {
        self.data.truncate(MAX_DATA_LEN);
        let length = HEADER_SIZE + self.data.len();
        let mut packet = Vec::with_capacity(length);

        packet.push(self.code);
        packet.push(self.identifier);
        packet.extend_from_slice(&(length as u16).to_be_bytes());
        packet.extend_from_slice(&self.data);

        packet
    }
}

/// A single configuration item, owned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ci {
    /// Option type
    pub kind: u8,
    /// Option value (excluding type and length bytes)
    pub data: Vec<u8>,
}

impl Ci {
    pub fn new(kind: u8, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Option with no value (e.g. protocol-field-compression)
    pub fn void(kind: u8) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn byte(kind: u8, value: u8) -> Self {
        Self::new(kind, vec![value])
    }

    pub fn short(kind: u8, value: u16) -> Self {
        Self::new(kind, value.to_be_bytes().to_vec())
    }

    pub fn long(kind: u8, value: u32) -> Self {
        Self::new(kind, value.to_be_bytes().to_vec())
    }

    pub fn addr(kind: u8, addr: Ipv4Addr) -> Self {
        Self::new(kind, addr.octets().to_vec())
    }

    /// Encoded length including the CI header
    pub fn len(&self) -> usize {
        CI_HEADER_SIZE + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Value as a cursor
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.data)
    }

    /// Value as a u16, if it is exactly two bytes
    pub fn as_short(&self) -> Option<u16> {
        match self.data.as_slice() {
            [a, b] => Some(u16::from_be_bytes([*a, *b])),
            _ => None,
        }
    }

    /// Value as a u32, if it is exactly four bytes
    pub fn as_long(&self) -> Option<u32> {
        match self.data.as_slice() {
            [a, b, c, d] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => None,
        }
    }

    /// Value as an IPv4 address, if it is exactly four bytes
    pub fn as_addr(&self) -> Option<Ipv4Addr> {
        self.as_long().map(Ipv4Addr::from)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.kind);
        out.push(self.len() as u8);
        out.extend_from_slice(&self.data);
    }
}

/// Parse the CI list of a Configure-* packet.
///
/// Fails if any CI declares a length below the CI header size or runs past
/// the end of the data.
pub fn parse_cis(data: &[u8]) -> Result<Vec<Ci>> {
    let mut reader = Reader::new(data);
    let mut cis = Vec::new();

    while !reader.is_empty() {
        let kind = reader.u8()?;
        let len = reader.u8()? as usize;
        if len < CI_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "CI type {} has length {}",
                kind, len
            )));
        }
        let value = reader.bytes(len - CI_HEADER_SIZE)?;
        cis.push(Ci::new(kind, value.to_vec()));
    }

    Ok(cis)
}

/// Serialize a CI list
pub fn encode_cis(cis: &[Ci]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cis.iter().map(Ci::len).sum());
    for ci in cis {
        ci.encode_into(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_configure_request() {
        // Configure-Request with MRU=1492 and Magic-Number
        let data = [
            0x01, // Code: Configure-Request
            0x01, // Identifier
            0x00, 0x0e, // Length=14 (4 header + 4 MRU + 6 Magic)
            0x01, 0x04, 0x05, 0xd4, // MRU=1492
            0x05, 0x06, 0x12, 0x34, 0x56, 0x78, // Magic
        ];

        let packet = ControlPacket::parse(&data).unwrap();
        assert_eq!(packet.code(), codes::CONFIGURE_REQUEST);
        assert_eq!(packet.identifier(), 1);
        assert_eq!(packet.length(), 14);

        let cis = parse_cis(packet.data()).unwrap();
        assert_eq!(cis.len(), 2);
        assert_eq!(cis[0].as_short(), Some(1492));
        assert_eq!(cis[1].as_long(), Some(0x12345678));
    }

    #[test]
    fn test_parse_short_header() {
        let data = [0x01, 0x01, 0x00];
        assert!(matches!(
            ControlPacket::parse(&data),
            Err(Error::TruncatedPacket { needed: 4, available: 3 })
        ));
    }

    #[test]
    fn test_parse_length_mismatch() {
        // Declared length longer than the buffer
        let data = [0x01, 0x01, 0x00, 0x10, 0x01, 0x04];
        assert!(matches!(
            ControlPacket::parse(&data),
            Err(Error::LengthMismatch { declared: 16, actual: 6 })
        ));

        // Declared length shorter than the header
        let data = [0x01, 0x01, 0x00, 0x02];
        assert!(matches!(
            ControlPacket::parse(&data),
            Err(Error::LengthMismatch { declared: 2, .. })
        ));
    }

    #[test]
    fn test_parse_ignores_padding() {
        let data = [0x05, 0x02, 0x00, 0x04, 0x00, 0x00];
        let packet = ControlPacket::parse(&data).unwrap();
        assert!(packet.data().is_empty());
        assert_eq!(packet.as_bytes().len(), 4);
    }

    #[test]
    fn test_parse_cis_rejects_bad_length() {
        // Length 1 is below the CI header size
        assert!(parse_cis(&[0x07, 0x01]).is_err());
        // Length runs past the end
        assert!(parse_cis(&[0x01, 0x04, 0x05]).is_err());
        // Lone type byte
        assert!(parse_cis(&[0x01]).is_err());
    }

    #[test]
    fn test_build_configure_ack() {
        let cis = vec![Ci::short(1, 1500), Ci::void(7)];
        let packet = ControlBuilder::new(codes::CONFIGURE_ACK, 9).cis(&cis).build();
        assert_eq!(
            packet,
            vec![0x02, 0x09, 0x00, 0x0a, 0x01, 0x04, 0x05, 0xdc, 0x07, 0x02]
        );
        assert_eq!(encode_cis(&cis), packet[HEADER_SIZE..].to_vec());
    }

    #[test]
    fn test_counted_field() {
        let packet = ControlBuilder::new(2, 1).counted(b"abc").raw_data(b"xy").build();
        assert_eq!(&packet[HEADER_SIZE..], &[3, b'a', b'b', b'c', b'x', b'y']);
    }

    #[test]
    fn test_build_caps_oversized_data() {
        let packet = ControlBuilder::new(codes::CODE_REJECT, 1)
            .raw_data(&vec![0xaa; u16::MAX as usize])
            .build();
        assert_eq!(packet.len(), u16::MAX as usize);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), u16::MAX);
        assert!(ControlPacket::parse(&packet).is_ok());
    }
}
