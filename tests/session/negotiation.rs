//! LCP and IPCP between two sessions

use super::pair::Pair;
use super::{open_pair, CLIENT_ADDR, SERVER_ADDR};
use pppcp::auth::{InlineSecrets, Phase};
use pppcp::control::State;
use pppcp::effects::ExitStatus;
use pppcp::protocol::lcp::codes;
use pppcp::protocol::ppp::protocols;
use pppcp::session::{Context, ManualTimers, RecordingLink, Session, SessionSettings};
use std::net::Ipv4Addr;

fn running(pair: &Pair) -> bool {
    pair.a().phase() == Phase::Running && pair.b().phase() == Phase::Running
}

fn dead(pair: &Pair) -> bool {
    pair.a().phase() == Phase::Dead && pair.b().phase() == Phase::Dead
}

#[test]
fn test_links_open_without_authentication() {
    let mut pair = open_pair();
    pair.run_until(10, running);

    let (a, b) = (pair.a(), pair.b());
    assert_eq!(a.lcp().state(), State::Opened);
    assert_eq!(b.lcp().state(), State::Opened);
    assert_eq!(a.ipcp().state(), State::Opened);
    assert_eq!(a.status(), ExitStatus::Ok);
    assert_eq!(b.status(), ExitStatus::Ok);

    // The client learned its address from the server's Nak
    let ip = a.ip_config().expect("client has an IP configuration");
    assert_eq!(ip.local, CLIENT_ADDR);
    assert_eq!(ip.remote, SERVER_ADDR);
    assert!(b.stats().naks_sent.get() >= 1);

    let installed = b.link().ip.as_ref().expect("server interface is up");
    assert_eq!(installed.local, SERVER_ADDR);
    assert_eq!(installed.remote, CLIENT_ADDR);
    assert!(b.link().vj.is_some());
    assert!(b.link().framing.is_some());
    assert_eq!(a.link().phases.last(), Some(&Phase::Running));
    assert!(a.link().phases.contains(&Phase::Network));
}

#[test]
fn test_close_terminates_both_sides() {
    let mut pair = open_pair();
    pair.run_until(10, running);

    let a = pair.a;
    pair.with(a, |session, ctx| session.close("User request", ctx));
    pair.run_until(10, dead);

    assert_eq!(pair.a().status(), ExitStatus::UserRequest);
    assert_eq!(pair.a().lcp().state(), State::Closed);
    assert_eq!(pair.b().lcp().state(), State::Stopped);
    assert!(pair.a().link().ip.is_none());
    assert!(pair.b().link().ip.is_none());
    assert_eq!(pair.a().timers().armed_count(), 0);
    assert_eq!(pair.b().timers().armed_count(), 0);
}

#[test]
fn test_lower_down_records_hangup() {
    let mut pair = open_pair();
    pair.run_until(10, running);

    let a = pair.a;
    pair.with(a, |session, ctx| session.lower_down(ctx));

    let session = pair.a();
    assert_eq!(session.status(), ExitStatus::Hangup);
    assert_eq!(session.phase(), Phase::Dead);
    assert_eq!(session.lcp().state(), State::Starting);
    assert!(session.link().ip.is_none());
    assert_eq!(session.timers().armed_count(), 0);
}

#[test]
fn test_unknown_protocol_rejected() {
    let mut pair = open_pair();
    pair.run_until(10, running);

    let a = pair.a;
    // IPv6CP Configure-Request
    pair.with(a, |session, ctx| session.input(0x8057, &[1, 1, 0, 4], ctx));

    let session = pair.a();
    assert_eq!(session.stats().rx_unknown_protocol.get(), 1);
    let (protocol, packet) = session.link().sent.last().expect("Protocol-Reject sent");
    assert_eq!(*protocol, protocols::LCP);
    assert_eq!(packet[0], codes::PROTOCOL_REJECT);
    assert_eq!(&packet[4..6], &[0x80, 0x57]);

    pair.pump();
    assert!(running(&pair));
}

#[test]
fn test_looped_back_line_detected() {
    let mut settings = SessionSettings::default();
    settings.lcp.loopback_fail = 3;

    let secrets = InlineSecrets::default();
    let mut timers = ManualTimers::new();
    let mut registry = pppcp::session::SessionRegistry::new(1);
    let id = registry
        .insert(|id| Session::new(id, RecordingLink::new(), settings))
        .expect("registry has room");
    let session = registry.get_mut(id).expect("session exists");
    let mut ctx = Context::new(&mut timers, &secrets);

    session.open(&mut ctx);
    session.lower_up(&mut ctx);
    for _ in 0..50 {
        let sent = session.link_mut().take_sent();
        if sent.is_empty() {
            break;
        }
        for (protocol, packet) in sent {
            session.input(protocol, &packet, &mut ctx);
        }
    }

    assert_eq!(session.status(), ExitStatus::Loopback);
    assert_eq!(session.lcp().state(), State::Closed);
    assert_eq!(session.phase(), Phase::Dead);
}

#[test]
fn test_interface_failure_closes_link() {
    let mut pair = Pair::new(
        super::client(),
        InlineSecrets::default(),
        super::server(),
        InlineSecrets::default(),
    );
    let b = pair.b;
    pair.with(b, |session, _| session.link_mut().fail_if_up = true);
    pair.open_both();
    pair.run_until(10, |p| p.b().phase() == Phase::Dead);

    let session = pair.b();
    assert_eq!(session.status(), ExitStatus::NegotiationFailed);
    assert!(session.link().ip.is_none());
    assert!(session.ip_config().is_none());
    assert!(!session.link().phases.contains(&Phase::Running));
}

#[test]
fn test_routed_peer_address_refused() {
    let mut a = super::client();
    a.ipcp_wanted.ouraddr = Ipv4Addr::new(10, 0, 0, 9);
    let mut b = super::server();
    b.ipcp_wanted.hisaddr = Ipv4Addr::UNSPECIFIED;

    let mut pair = Pair::new(a, InlineSecrets::default(), b, InlineSecrets::default());
    let b = pair.b;
    pair.with(b, |session, _| {
        session.link_mut().routed.push(Ipv4Addr::new(10, 0, 0, 9));
    });
    pair.open_both();
    pair.run_until(10, |p| p.b().phase() == Phase::Dead);

    let session = pair.b();
    assert!(!session.auth_ip_addr(Ipv4Addr::new(10, 0, 0, 9)));
    assert_eq!(session.status(), ExitStatus::NegotiationFailed);
    assert!(session.link().ip.is_none());
}

#[test]
fn test_closing_last_network_protocol_closes_link() {
    let mut pair = open_pair();
    pair.run_until(10, running);

    let b = pair.b;
    pair.with(b, |session, ctx| session.ipcp_close("IPCP disabled", ctx));
    pair.run_until(10, dead);

    assert_eq!(pair.b().status(), ExitStatus::NegotiationFailed);
    assert_eq!(pair.b().orchestrator().network_protocols_up(), 0);
    assert!(pair.b().link().ip.is_none());
}
