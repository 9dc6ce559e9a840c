//! PPP protocol - RFC 1661
//!
//! Protocol numbers and frame demultiplexing. A frame here is the protocol field
//! followed by the information field; HDLC-like framing and FCS are the
//! transport's concern.

use crate::{Error, Result};

/// PPP header size (protocol field only)
pub const PPP_HEADER_SIZE: usize = 2;

/// PPP protocol numbers
pub mod protocols {
    /// Internet Protocol version 4
    pub const IP: u16 = 0x0021;
    /// Van Jacobson compressed TCP/IP
    pub const VJC_COMP: u16 = 0x002d;
    /// Van Jacobson uncompressed TCP/IP
    pub const VJC_UNCOMP: u16 = 0x002f;
    /// Internet Protocol Control Protocol
    pub const IPCP: u16 = 0x8021;
    /// Link Control Protocol
    pub const LCP: u16 = 0xc021;
    /// Password Authentication Protocol
    pub const PAP: u16 = 0xc023;
    /// Link Quality Report
    pub const LQR: u16 = 0xc025;
    /// Challenge Handshake Authentication Protocol
    pub const CHAP: u16 = 0xc223;
    /// Callback Control Protocol
    pub const CBCP: u16 = 0xc029;
}

/// Short name of a protocol number, for logging
pub fn protocol_name(protocol: u16) -> &'static str {
    match protocol {
        protocols::IP => "IP",
        protocols::IPCP => "IPCP",
        protocols::LCP => "LCP",
        protocols::PAP => "PAP",
        protocols::LQR => "LQR",
        protocols::CHAP => "CHAP",
        protocols::CBCP => "CBCP",
        _ => "unknown",
    }
}

/// Network-layer control protocols live in 0x8000-0xbfff
pub fn is_network_control(protocol: u16) -> bool {
    (0x8000..0xc000).contains(&protocol)
}

/// Received PPP frame, borrowed from the receive buffer
#[derive(Debug)]
pub struct PppFrame<'a> {
    buffer: &'a [u8],
}

impl<'a> PppFrame<'a> {
    /// Parse PPP frame from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < PPP_HEADER_SIZE {
            return Err(Error::Parse("PPP frame too short".into()));
        }
        Ok(Self { buffer })
    }

    /// Protocol field
    pub fn protocol(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    /// Payload (protocol-specific data)
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[PPP_HEADER_SIZE..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lcp() {
        let data = [
            0xc0, 0x21, // Protocol: LCP
            0x01, 0x01, 0x00, 0x04, // LCP payload
        ];

        let frame = PppFrame::parse(&data).unwrap();
        assert_eq!(frame.protocol(), protocols::LCP);
        assert_eq!(protocol_name(frame.protocol()), "LCP");
        assert_eq!(frame.payload(), &[0x01, 0x01, 0x00, 0x04]);
    }

    #[test]
    fn test_parse_too_short() {
        assert!(matches!(PppFrame::parse(&[0xc0]), Err(Error::Parse(_))));
    }

    #[test]
    fn test_empty_information_field() {
        let frame = PppFrame::parse(&[0x80, 0x21]).unwrap();
        assert_eq!(frame.protocol(), protocols::IPCP);
        assert!(frame.payload().is_empty());
        assert_eq!(protocol_name(0x8057), "unknown");
    }

    #[test]
    fn test_network_control_range() {
        assert!(is_network_control(protocols::IPCP));
        assert!(!is_network_control(protocols::LCP));
        assert!(!is_network_control(protocols::CHAP));
        assert!(!is_network_control(protocols::IP));
    }
}
