//! CHAP protocol - RFC 1994
//!
//! Challenge Handshake Authentication Protocol packet parsing and building.

use super::codec::Reader;
use super::packet::{ControlBuilder, ControlPacket};
use crate::Result;

/// CHAP packet codes
pub mod codes {
    /// Challenge from authenticator
    pub const CHALLENGE: u8 = 1;
    /// Response from peer
    pub const RESPONSE: u8 = 2;
    /// Authentication success
    pub const SUCCESS: u8 = 3;
    /// Authentication failure
    pub const FAILURE: u8 = 4;
}

/// CHAP digest algorithms carried in the LCP Authentication-Protocol option
pub mod algorithms {
    /// MD5 (RFC 1994)
    pub const MD5: u8 = 5;
    /// Microsoft CHAP
    pub const MSCHAP: u8 = 0x80;
    /// Microsoft CHAP version 2
    pub const MSCHAP_V2: u8 = 0x81;
}

/// Length of an MD5 digest
pub const MD5_DIGEST_SIZE: usize = 16;

/// A decoded CHAP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapMessage<'a> {
    /// Challenge or Response: value plus sender name
    Challenge { id: u8, value: &'a [u8], name: &'a [u8] },
    Response { id: u8, value: &'a [u8], name: &'a [u8] },
    /// Success or Failure with an optional text message
    Success { id: u8, message: &'a [u8] },
    Failure { id: u8, message: &'a [u8] },
    /// Code we do not know
    Unknown { code: u8, id: u8 },
}

impl<'a> ChapMessage<'a> {
    /// Decode a CHAP packet.
    ///
    /// Header errors and a value field running past the end of the packet
    /// are reported as errors.
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let packet = ControlPacket::parse(buffer)?;
        let id = packet.identifier();
        let mut reader = Reader::new(packet.data());

        let message = match packet.code() {
            codes::CHALLENGE => {
                let value = reader.counted()?;
                Self::Challenge { id, value, name: reader.rest() }
            }
            codes::RESPONSE => {
                let value = reader.counted()?;
                Self::Response { id, value, name: reader.rest() }
            }
            codes::SUCCESS => Self::Success { id, message: reader.rest() },
            codes::FAILURE => Self::Failure { id, message: reader.rest() },
            code => Self::Unknown { code, id },
        };
        Ok(message)
    }
}

/// Build a Challenge
pub fn challenge(id: u8, value: &[u8], name: &str) -> Vec<u8> {
    ControlBuilder::new(codes::CHALLENGE, id)
        .counted(value)
        .raw_data(name.as_bytes())
        .build()
}

/// Build a Response
pub fn response(id: u8, value: &[u8], name: &str) -> Vec<u8> {
    ControlBuilder::new(codes::RESPONSE, id)
        .counted(value)
        .raw_data(name.as_bytes())
        .build()
}

/// Build a Success or Failure status
pub fn status(code: u8, id: u8, message: &str) -> Vec<u8> {
    ControlBuilder::new(code, id).raw_data(message.as_bytes()).build()
}

/// MD5 CHAP digest: MD5(identifier || secret || challenge)
pub fn md5_digest(id: u8, secret: &[u8], challenge: &[u8]) -> [u8; MD5_DIGEST_SIZE] {
    let mut context = md5::Context::new();
    context.consume([id]);
    context.consume(secret);
    context.consume(challenge);
    context.compute().0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_parse_challenge() {
        // CHAP Challenge: value=[0x01,0x02,0x03,0x04], name="server"
        let data = [
            0x01, // Code: Challenge
            0x01, // Identifier
            0x00, 0x0f, // Length=15
            0x04, // Value size=4
            0x01, 0x02, 0x03, 0x04, // Challenge value
            b's', b'e', b'r', b'v', b'e', b'r', // Name
        ];

        let message = ChapMessage::parse(&data).unwrap();
        assert_eq!(
            message,
            ChapMessage::Challenge {
                id: 1,
                value: &[0x01, 0x02, 0x03, 0x04],
                name: b"server",
            }
        );
    }

    #[test]
    fn test_parse_value_overrun() {
        // Value size says 8 but only 2 bytes follow
        let data = [0x02, 0x01, 0x00, 0x07, 0x08, 0xaa, 0xbb];
        assert!(matches!(
            ChapMessage::parse(&data),
            Err(Error::TruncatedPacket { .. })
        ));
    }

    #[test]
    fn test_parse_empty_challenge_body() {
        let data = [0x01, 0x01, 0x00, 0x04];
        assert!(ChapMessage::parse(&data).is_err());
    }

    #[test]
    fn test_parse_success() {
        let packet = status(codes::SUCCESS, 7, "Welcome!");
        assert_eq!(
            ChapMessage::parse(&packet).unwrap(),
            ChapMessage::Success { id: 7, message: b"Welcome!" }
        );
    }

    #[test]
    fn test_build_response() {
        let response_hash = [0xaa; 16];
        let packet = response(1, &response_hash, "myuser");

        match ChapMessage::parse(&packet).unwrap() {
            ChapMessage::Response { id, value, name } => {
                assert_eq!(id, 1);
                assert_eq!(value, response_hash.as_slice());
                assert_eq!(name, b"myuser");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_md5_digest() {
        // RFC 1321 test vector: MD5("abc") with id='a', secret="b", challenge="c"
        let digest = md5_digest(b'a', b"b", b"c");
        assert_eq!(
            digest,
            [
                0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0, 0xd6, 0x96, 0x3f, 0x7d, 0x28,
                0xe1, 0x7f, 0x72
            ]
        );
    }
}
