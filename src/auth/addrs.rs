//! Peer address authorization
//!
//! The address words of a secrets entry become an ordered list of
//! (permit, base, mask) rules terminated by an implicit deny-all. The first
//! rule whose subnet contains the address decides.

use std::net::Ipv4Addr;
use tracing::warn;

/// One address rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRule {
    pub permit: bool,
    pub base: u32,
    pub mask: u32,
}

impl AddrRule {
    fn matches(&self, addr: u32) -> bool {
        addr & self.mask == self.base
    }
}

/// Addresses the authenticated peer may use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedAddrs {
    rules: Vec<AddrRule>,
    suggested: Option<Ipv4Addr>,
}

impl AllowedAddrs {
    /// Build the rule list from secrets-file address words.
    ///
    /// `-` ends the list, `*` permits everything, a leading `!` turns a rule
    /// into a deny. `addr/bits` names a subnet; with a trailing `+` the peer
    /// gets host number `unit + 1` within it. Unparseable words are skipped
    /// with a warning. Returns `None` when no words were given, which leaves
    /// authorization to the no-list policy.
    pub fn parse<S: AsRef<str>>(words: &[S], unit: u32) -> Option<Self> {
        if words.is_empty() {
            return None;
        }

        let mut rules = Vec::with_capacity(words.len() + 1);
        let mut suggested = None;

        for word in words {
            let word = word.as_ref();
            if word == "-" {
                break;
            }

            let (permit, word) = match word.strip_prefix('!') {
                Some(rest) => (false, rest),
                None => (true, word),
            };

            if word == "*" {
                rules.push(AddrRule { permit, base: 0, mask: 0 });
                continue;
            }

            let (host, mask, offset) = match word.split_once('/') {
                Some((host, bits)) => {
                    let (bits, plus) = match bits.strip_suffix('+') {
                        Some(bits) => (bits, true),
                        None => (bits, false),
                    };
                    let bits = match bits.parse::<u32>() {
                        Ok(bits) if (1..=32).contains(&bits) => bits,
                        _ => {
                            warn!(word, "invalid address length in auth. address list");
                            continue;
                        }
                    };
                    let mask = u32::MAX << (32 - bits);
                    (host, mask, if plus { unit.saturating_add(1) } else { 0 })
                }
                None => (word, u32::MAX, 0),
            };

            let addr: Ipv4Addr = match host.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    warn!(word, "unknown host in auth. address list");
                    continue;
                }
            };

            if offset != 0 && offset >= !mask {
                warn!(unit, word, "interface unit too large for subnet");
                continue;
            }

            let (base, mask) = if offset != 0 {
                ((u32::from(addr) & mask) + offset, u32::MAX)
            } else {
                (u32::from(addr) & mask, mask)
            };
            rules.push(AddrRule { permit, base, mask });

            if permit && mask == u32::MAX && suggested.is_none() {
                suggested = Some(Ipv4Addr::from(base));
            }
        }

        if rules.is_empty() {
            return None;
        }

        rules.push(AddrRule { permit: false, base: 0, mask: 0 });
        Some(Self { rules, suggested })
    }

    /// A single permitted host, usable as the peer's address
    pub fn suggested(&self) -> Option<Ipv4Addr> {
        self.suggested
    }

    /// More than one rule was given, so the suggestion is negotiable
    pub fn has_alternatives(&self) -> bool {
        self.rules.len() > 2
    }

    pub fn rules(&self) -> &[AddrRule] {
        &self.rules
    }

    /// First matching rule decides; the trailing deny-all always matches
    pub fn check(&self, addr: Ipv4Addr) -> bool {
        let addr = u32::from(addr);
        self.rules
            .iter()
            .find(|rule| rule.matches(addr))
            .is_some_and(|rule| rule.permit)
    }
}

/// Loopback, multicast and class E addresses are never assignable
pub fn bad_ip_addr(addr: Ipv4Addr) -> bool {
    addr.is_loopback() || addr.is_multicast() || addr.octets()[0] >= 240
}

/// Policy inputs for [`auth_ip_addr`] when the peer has no address list
#[derive(Debug, Clone, Copy, Default)]
pub struct AddrPolicy {
    pub auth_required: bool,
    pub allow_any_ip: bool,
}

/// May the peer use `addr`?
///
/// Bad addresses are refused outright. A list from the secrets entry is
/// consulted if present. Without one, peers we required to authenticate
/// are refused; otherwise any address is allowed unless it would hijack an
/// existing route.
pub fn auth_ip_addr(
    allowed: Option<&AllowedAddrs>,
    addr: Ipv4Addr,
    policy: AddrPolicy,
    have_route_to: impl FnOnce(Ipv4Addr) -> bool,
) -> bool {
    if bad_ip_addr(addr) {
        return false;
    }
    if let Some(allowed) = allowed {
        return allowed.check(addr);
    }
    if policy.auth_required {
        return false;
    }
    policy.allow_any_ip || !have_route_to(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_list_is_none() {
        let words: [&str; 0] = [];
        assert!(AllowedAddrs::parse(&words, 0).is_none());
        assert!(AllowedAddrs::parse(&["bogus"], 0).is_none());
    }

    #[test]
    fn test_host_and_subnet() {
        let allowed = AllowedAddrs::parse(&["10.0.0.5", "192.168.1.0/24"], 0).unwrap();
        assert!(allowed.check(ip("10.0.0.5")));
        assert!(!allowed.check(ip("10.0.0.6")));
        assert!(allowed.check(ip("192.168.1.77")));
        assert!(!allowed.check(ip("192.168.2.1")));
        assert_eq!(allowed.suggested(), Some(ip("10.0.0.5")));
        assert!(allowed.has_alternatives());
    }

    #[test]
    fn test_negation_first_match_wins() {
        let allowed = AllowedAddrs::parse(&["!10.1.1.1", "10.1.1.0/24"], 0).unwrap();
        assert!(!allowed.check(ip("10.1.1.1")));
        assert!(allowed.check(ip("10.1.1.2")));
        assert_eq!(allowed.suggested(), None);
    }

    #[test]
    fn test_wildcard_and_stop() {
        let allowed = AllowedAddrs::parse(&["*"], 0).unwrap();
        assert!(allowed.check(ip("203.0.113.9")));

        let allowed = AllowedAddrs::parse(&["10.0.0.1", "-", "*"], 0).unwrap();
        assert!(!allowed.check(ip("203.0.113.9")));
        assert!(!allowed.has_alternatives());
    }

    #[test]
    fn test_unit_offset() {
        let allowed = AllowedAddrs::parse(&["10.9.0.0/24+"], 4).unwrap();
        assert_eq!(allowed.suggested(), Some(ip("10.9.0.5")));
        assert!(allowed.check(ip("10.9.0.5")));
        assert!(!allowed.check(ip("10.9.0.6")));

        // /31 has a single host bit, unit 4 doesn't fit
        assert!(AllowedAddrs::parse(&["10.9.0.0/31+"], 4).is_none());
    }

    #[test]
    fn test_invalid_prefix_length_skipped() {
        let allowed = AllowedAddrs::parse(&["10.0.0.0/0", "10.0.0.0/33", "10.2.0.1"], 0).unwrap();
        assert_eq!(allowed.rules().len(), 2);
    }

    #[test]
    fn test_bad_addresses() {
        assert!(bad_ip_addr(ip("127.0.0.1")));
        assert!(bad_ip_addr(ip("224.0.0.1")));
        assert!(bad_ip_addr(ip("240.0.0.1")));
        assert!(bad_ip_addr(ip("255.255.255.255")));
        assert!(!bad_ip_addr(ip("10.0.0.1")));
    }

    #[test]
    fn test_auth_ip_addr_policy() {
        let policy = AddrPolicy::default();
        let no_route = |_| false;
        let routed = |_| true;

        assert!(!auth_ip_addr(None, ip("127.0.0.2"), policy, no_route));
        assert!(auth_ip_addr(None, ip("10.0.0.1"), policy, no_route));
        assert!(!auth_ip_addr(None, ip("10.0.0.1"), policy, routed));

        let any = AddrPolicy { allow_any_ip: true, ..policy };
        assert!(auth_ip_addr(None, ip("10.0.0.1"), any, routed));

        let required = AddrPolicy { auth_required: true, ..policy };
        assert!(!auth_ip_addr(None, ip("10.0.0.1"), required, no_route));

        let allowed = AllowedAddrs::parse(&["*"], 0).unwrap();
        assert!(auth_ip_addr(Some(&allowed), ip("10.0.0.1"), required, routed));
        assert!(!auth_ip_addr(Some(&allowed), ip("127.0.0.1"), required, routed));
    }
}
