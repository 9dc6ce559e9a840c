//! LCP protocol - RFC 1661
//!
//! Link Control Protocol wire constants and configuration-item helpers.
//! LCP uses the shared control header from [`super::packet`] and adds
//! the link-maintenance codes below.

use super::packet::Ci;

/// LCP packet codes beyond the shared Configure/Terminate/Code-Reject set
pub mod codes {
    pub use crate::protocol::packet::codes::*;

    /// Protocol-Reject
    pub const PROTOCOL_REJECT: u8 = 8;
    /// Echo-Request
    pub const ECHO_REQUEST: u8 = 9;
    /// Echo-Reply
    pub const ECHO_REPLY: u8 = 10;
    /// Discard-Request
    pub const DISCARD_REQUEST: u8 = 11;
}

/// LCP option types
pub mod options {
    /// Maximum-Receive-Unit
    pub const MRU: u8 = 1;
    /// Async-Control-Character-Map
    pub const ASYNCMAP: u8 = 2;
    /// Authentication-Protocol
    pub const AUTH_PROTOCOL: u8 = 3;
    /// Quality-Protocol
    pub const QUALITY_PROTOCOL: u8 = 4;
    /// Magic-Number
    pub const MAGIC_NUMBER: u8 = 5;
    /// Protocol-Field-Compression
    pub const PFC: u8 = 7;
    /// Address-and-Control-Field-Compression
    pub const ACFC: u8 = 8;
    /// Callback
    pub const CALLBACK: u8 = 13;
}

/// CI lengths including the 2-byte CI header
pub mod lengths {
    pub const VOID: usize = 2;
    pub const CHAR: usize = 3;
    pub const SHORT: usize = 4;
    pub const CHAP: usize = 5;
    pub const LONG: usize = 6;
    pub const LQR: usize = 8;
}

/// Callback operation meaning "negotiate with CBCP"
pub const CBCP_OPT: u8 = 6;

/// Default MRU
pub const DEFAULT_MRU: u16 = 1500;

/// Smallest MRU we accept from the peer
pub const MIN_MRU: u16 = 128;

/// Largest MRU we will configure
pub const MAX_MRU: u16 = 16384;

/// Default async map (escape everything)
pub const DEFAULT_ASYNCMAP: u32 = 0xffff_ffff;

/// Human readable option name, for logging
pub fn option_name(kind: u8) -> &'static str {
    match kind {
        options::MRU => "mru",
        options::ASYNCMAP => "asyncmap",
        options::AUTH_PROTOCOL => "auth",
        options::QUALITY_PROTOCOL => "quality",
        options::MAGIC_NUMBER => "magic",
        options::PFC => "pcomp",
        options::ACFC => "accomp",
        options::CALLBACK => "callback",
        _ => "unknown",
    }
}

pub fn mru(value: u16) -> Ci {
    Ci::short(options::MRU, value)
}

pub fn asyncmap(value: u32) -> Ci {
    Ci::long(options::ASYNCMAP, value)
}

pub fn magic_number(value: u32) -> Ci {
    Ci::long(options::MAGIC_NUMBER, value)
}

/// Authentication-Protocol naming PAP
pub fn auth_pap() -> Ci {
    Ci::short(options::AUTH_PROTOCOL, super::ppp::protocols::PAP)
}

/// Authentication-Protocol naming CHAP with the given digest
pub fn auth_chap(digest: u8) -> Ci {
    let mut data = super::ppp::protocols::CHAP.to_be_bytes().to_vec();
    data.push(digest);
    Ci::new(options::AUTH_PROTOCOL, data)
}

/// Quality-Protocol naming LQR with a reporting period
pub fn quality_lqr(period: u32) -> Ci {
    let mut data = super::ppp::protocols::LQR.to_be_bytes().to_vec();
    data.extend_from_slice(&period.to_be_bytes());
    Ci::new(options::QUALITY_PROTOCOL, data)
}

pub fn callback_cbcp() -> Ci {
    Ci::byte(options::CALLBACK, CBCP_OPT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::encode_cis;

    #[test]
    fn test_build_auth_chap() {
        let ci = auth_chap(5);
        assert_eq!(ci.len(), lengths::CHAP);
        assert_eq!(encode_cis(&[ci]), vec![0x03, 0x05, 0xc2, 0x23, 0x05]);
    }

    #[test]
    fn test_build_quality() {
        let ci = quality_lqr(500);
        assert_eq!(ci.len(), lengths::LQR);
        assert_eq!(
            encode_cis(&[ci]),
            vec![0x04, 0x08, 0xc0, 0x25, 0x00, 0x00, 0x01, 0xf4]
        );
    }

    #[test]
    fn test_build_mru_and_magic() {
        let bytes = encode_cis(&[mru(1492), magic_number(0x12345678)]);
        assert_eq!(
            bytes,
            vec![0x01, 0x04, 0x05, 0xd4, 0x05, 0x06, 0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(option_name(options::MAGIC_NUMBER), "magic");
    }
}
