//! IPCP protocol - RFC 1332, RFC 1877
//!
//! Internet Protocol Control Protocol option constants and CI helpers.

use super::packet::Ci;
use std::net::Ipv4Addr;

/// IPCP option types
pub mod options {
    /// IP-Addresses (deprecated, RFC 1172)
    pub const IP_ADDRESSES: u8 = 1;
    /// IP-Compression-Protocol
    pub const IP_COMPRESSION: u8 = 2;
    /// IP-Address
    pub const IP_ADDRESS: u8 = 3;
    /// Primary DNS Server Address (Microsoft extension)
    pub const PRIMARY_DNS: u8 = 129;
    /// Primary NBNS Server Address (Microsoft extension)
    pub const PRIMARY_NBNS: u8 = 130;
    /// Secondary DNS Server Address (Microsoft extension)
    pub const SECONDARY_DNS: u8 = 131;
    /// Secondary NBNS Server Address (Microsoft extension)
    pub const SECONDARY_NBNS: u8 = 132;
}

/// CI lengths including the 2-byte CI header
pub mod lengths {
    pub const VOID: usize = 2;
    /// Legacy compression option: protocol only
    pub const COMPRESS: usize = 4;
    /// VJ option: protocol, max-slot-id, comp-slot-id
    pub const VJ: usize = 6;
    pub const ADDR: usize = 6;
    pub const ADDRS: usize = 10;
}

/// Van Jacobson compression protocol
pub const VJ_COMP: u16 = 0x002d;

/// Pre-RFC1332 VJ protocol number
pub const VJ_COMP_OLD: u16 = 0x0037;

/// Number of VJ slots
pub const MAX_STATES: u8 = 16;

pub fn option_name(kind: u8) -> &'static str {
    match kind {
        options::IP_ADDRESSES => "addrs",
        options::IP_COMPRESSION => "compress",
        options::IP_ADDRESS => "addr",
        options::PRIMARY_DNS => "ms-dns1",
        options::PRIMARY_NBNS => "ms-wins1",
        options::SECONDARY_DNS => "ms-dns2",
        options::SECONDARY_NBNS => "ms-wins2",
        _ => "unknown",
    }
}

/// Legacy IP-Addresses option: (source, destination)
pub fn addresses(ours: Ipv4Addr, his: Ipv4Addr) -> Ci {
    let mut data = ours.octets().to_vec();
    data.extend_from_slice(&his.octets());
    Ci::new(options::IP_ADDRESSES, data)
}

pub fn address(addr: Ipv4Addr) -> Ci {
    Ci::addr(options::IP_ADDRESS, addr)
}

/// IP-Compression-Protocol, either the legacy short form or the
/// RFC1332 form with slot parameters
pub fn vj(protocol: u16, old: bool, max_slot_index: u8, cflag: bool) -> Ci {
    let mut data = protocol.to_be_bytes().to_vec();
    if !old {
        data.push(max_slot_index);
        data.push(cflag as u8);
    }
    Ci::new(options::IP_COMPRESSION, data)
}

/// Read both addresses from a legacy IP-Addresses CI
pub fn parse_addresses(ci: &Ci) -> Option<(Ipv4Addr, Ipv4Addr)> {
    if ci.len() != lengths::ADDRS {
        return None;
    }
    let mut reader = ci.reader();
    let first = reader.ipv4().ok()?;
    let second = reader.ipv4().ok()?;
    Some((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::encode_cis;

    #[test]
    fn test_build_address() {
        let bytes = encode_cis(&[address(Ipv4Addr::new(10, 0, 0, 1))]);
        assert_eq!(bytes, vec![0x03, 0x06, 10, 0, 0, 1]);
    }

    #[test]
    fn test_build_vj_forms() {
        let new = vj(VJ_COMP, false, 15, true);
        assert_eq!(new.len(), lengths::VJ);
        assert_eq!(encode_cis(&[new]), vec![0x02, 0x06, 0x00, 0x2d, 0x0f, 0x01]);

        let old = vj(VJ_COMP_OLD, true, 15, true);
        assert_eq!(old.len(), lengths::COMPRESS);
    }

    #[test]
    fn test_parse_addresses() {
        let ci = addresses(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(
            parse_addresses(&ci),
            Some((Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)))
        );
        assert_eq!(parse_addresses(&address(Ipv4Addr::LOCALHOST)), None);
    }
}
