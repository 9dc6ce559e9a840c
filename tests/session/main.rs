//! Session tests: two sessions talking to each other over recording links
//!
//! Run with: cargo test --test session

mod pair;

mod auth;
mod negotiation;
mod timers;

use pppcp::auth::InlineSecrets;
use pppcp::session::SessionSettings;
use std::net::Ipv4Addr;

pub const SERVER_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const CLIENT_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

/// Dial-in client: no addresses of its own, authenticates as "client"
pub fn client() -> SessionSettings {
    let mut settings = SessionSettings::default();
    settings.auth.our_name = "client".into();
    settings
}

/// Access server "gateway" at 10.0.0.1 handing out 10.0.0.2
pub fn server() -> SessionSettings {
    let mut settings = SessionSettings::default();
    settings.auth.our_name = "gateway".into();
    settings.ipcp_wanted.ouraddr = SERVER_ADDR;
    settings.ipcp_wanted.hisaddr = CLIENT_ADDR;
    settings
}

/// Both ends without secrets, nobody authenticates
pub fn open_pair() -> pair::Pair {
    let mut pair = pair::Pair::new(
        client(),
        InlineSecrets::default(),
        server(),
        InlineSecrets::default(),
    );
    pair.open_both();
    pair
}
