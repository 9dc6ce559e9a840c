//! PAP protocol - RFC 1334
//!
//! Password Authentication Protocol packet parsing and building.

use super::codec::Reader;
use super::packet::{ControlBuilder, ControlPacket};
use crate::Result;

/// PAP packet codes
pub mod codes {
    /// Authenticate-Request
    pub const AUTHENTICATE_REQUEST: u8 = 1;
    /// Authenticate-Ack (success)
    pub const AUTHENTICATE_ACK: u8 = 2;
    /// Authenticate-Nak (failure)
    pub const AUTHENTICATE_NAK: u8 = 3;
}

/// A decoded PAP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PapMessage<'a> {
    Request { id: u8, peer_id: &'a [u8], password: &'a [u8] },
    Ack { id: u8, message: &'a [u8] },
    Nak { id: u8, message: &'a [u8] },
    Unknown { code: u8, id: u8 },
}

impl<'a> PapMessage<'a> {
    /// Decode a PAP packet
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let packet = ControlPacket::parse(buffer)?;
        let id = packet.identifier();
        let mut reader = Reader::new(packet.data());

        let message = match packet.code() {
            codes::AUTHENTICATE_REQUEST => {
                let peer_id = reader.counted()?;
                let password = reader.counted()?;
                Self::Request { id, peer_id, password }
            }
            codes::AUTHENTICATE_ACK => Self::Ack { id, message: reply_message(&mut reader)? },
            codes::AUTHENTICATE_NAK => Self::Nak { id, message: reply_message(&mut reader)? },
            code => Self::Unknown { code, id },
        };
        Ok(message)
    }
}

/// Ack/Nak carry an optional counted message; a missing length byte is
/// tolerated, a message running past the end is not.
fn reply_message<'a>(reader: &mut Reader<'a>) -> Result<&'a [u8]> {
    if reader.is_empty() {
        return Ok(&[]);
    }
    reader.counted()
}

/// Build an Authenticate-Request
pub fn authenticate_request(id: u8, peer_id: &[u8], password: &[u8]) -> Vec<u8> {
    ControlBuilder::new(codes::AUTHENTICATE_REQUEST, id)
        .counted(peer_id)
        .counted(password)
        .build()
}

/// Build an Authenticate-Ack or Authenticate-Nak
pub fn authenticate_reply(code: u8, id: u8, message: &str) -> Vec<u8> {
    ControlBuilder::new(code, id).counted(message.as_bytes()).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authenticate_request() {
        // PAP Authenticate-Request: user="test", password="pass"
        let data = [
            0x01, // Code: Authenticate-Request
            0x01, // Identifier
            0x00, 0x0e, // Length=14
            0x04, // Peer-ID length=4
            b't', b'e', b's', b't', // Peer-ID
            0x04, // Password length=4
            b'p', b'a', b's', b's', // Password
        ];

        assert_eq!(
            PapMessage::parse(&data).unwrap(),
            PapMessage::Request { id: 1, peer_id: b"test", password: b"pass" }
        );
    }

    #[test]
    fn test_parse_request_password_overrun() {
        let data = [0x01, 0x01, 0x00, 0x0a, 0x02, b'a', b'b', 0x09, b'x', b'y'];
        assert!(PapMessage::parse(&data).is_err());
    }

    #[test]
    fn test_parse_ack_without_message() {
        let data = [0x02, 0x05, 0x00, 0x04];
        assert_eq!(
            PapMessage::parse(&data).unwrap(),
            PapMessage::Ack { id: 5, message: &[] }
        );
    }

    #[test]
    fn test_build_nak() {
        let packet = authenticate_reply(codes::AUTHENTICATE_NAK, 3, "Login incorrect");
        assert_eq!(
            PapMessage::parse(&packet).unwrap(),
            PapMessage::Nak { id: 3, message: b"Login incorrect" }
        );
    }

    #[test]
    fn test_build_request() {
        let packet = authenticate_request(2, b"user", b"secret");
        assert_eq!(packet.len(), 4 + 1 + 4 + 1 + 6);
        assert_eq!(
            PapMessage::parse(&packet).unwrap(),
            PapMessage::Request { id: 2, peer_id: b"user", password: b"secret" }
        );
    }
}
