//! CHAP and PAP between two sessions

use super::pair::Pair;
use super::{client, server, SERVER_ADDR};
use pppcp::auth::pap::MAX_LOGIN_ATTEMPTS;
use pppcp::auth::{chap, pap, InlineSecrets, Phase};
use pppcp::effects::ExitStatus;
use std::net::Ipv4Addr;
use zeroize::Zeroizing;

const ASSIGNED: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);

fn running(pair: &Pair) -> bool {
    pair.a().phase() == Phase::Running && pair.b().phase() == Phase::Running
}

fn dead(pair: &Pair) -> bool {
    pair.a().phase() == Phase::Dead && pair.b().phase() == Phase::Dead
}

/// Server that requires authentication and has no address for the
/// client until a secrets entry supplies one
fn strict_server() -> pppcp::session::SessionSettings {
    let mut settings = server();
    settings.auth.auth_required = true;
    settings.ipcp_wanted.hisaddr = Ipv4Addr::UNSPECIFIED;
    settings
}

fn chap_pair(client_secrets: &str) -> Pair {
    let mut pair = Pair::new(
        client(),
        InlineSecrets::new("", client_secrets),
        strict_server(),
        InlineSecrets::new("", "client gateway s3cr3t 10.0.0.7\n"),
    );
    pair.open_both();
    pair
}

#[test]
fn test_chap_authenticates_and_assigns_address() {
    let mut pair = chap_pair("client gateway s3cr3t\n");
    pair.run_until(10, running);

    let (a, b) = (pair.a(), pair.b());
    assert_eq!(b.peer_name(), Some("client"));
    assert_eq!(b.chap().server_state(), chap::ServerState::Open);
    assert_eq!(a.chap().client_state(), chap::ClientState::Open);
    assert!(a.link().phases.contains(&Phase::Authenticate));

    // Address from the secrets entry reaches the client through a Nak
    let ip = a.ip_config().expect("client has an IP configuration");
    assert_eq!(ip.local, ASSIGNED);
    assert_eq!(ip.remote, SERVER_ADDR);
    assert_eq!(b.ip_config().map(|ip| ip.remote), Some(ASSIGNED));

    assert!(b.auth_ip_addr(ASSIGNED));
    assert!(!b.auth_ip_addr(Ipv4Addr::new(10, 0, 0, 8)));
}

#[test]
fn test_chap_wrong_secret_closes_both_sides() {
    let mut pair = chap_pair("client gateway guessed\n");
    pair.run_until(10, dead);

    assert_eq!(pair.b().status(), ExitStatus::PeerAuthFailed);
    assert_eq!(pair.a().status(), ExitStatus::AuthToPeerFailed);
    assert_eq!(pair.b().stats().auth_failures.get(), 1);
    assert!(pair.a().ip_config().is_none());
    assert!(pair.b().peer_name().is_none());
}

#[test]
fn test_client_without_secret_refuses_chap() {
    // The client cannot answer a challenge, so it rejects CHAP and the
    // server has nothing else to offer
    let mut pair = chap_pair("");
    pair.run_until(10, dead);

    assert_eq!(pair.b().status(), ExitStatus::PeerAuthFailed);
    assert_eq!(pair.b().stats().auth_failures.get(), 0);
    assert!(!pair.b().link().phases.contains(&Phase::Authenticate));
}

fn pap_pair(password: &str) -> Pair {
    let mut a = client();
    a.auth.password = Zeroizing::new(password.as_bytes().to_vec());
    let mut b = strict_server();
    b.auth.auth_required = false;
    b.auth.require_pap = true;

    let mut pair = Pair::new(
        a,
        InlineSecrets::default(),
        b,
        InlineSecrets::new("client gateway letmein 10.0.0.7\n", ""),
    );
    pair.open_both();
    pair
}

#[test]
fn test_pap_authenticates() {
    let mut pair = pap_pair("letmein");
    pair.run_until(10, running);

    let (a, b) = (pair.a(), pair.b());
    assert_eq!(b.peer_name(), Some("client"));
    assert_eq!(b.pap().server_state(), pap::ServerState::Open);
    assert_eq!(a.pap().client_state(), pap::ClientState::Open);
    assert_eq!(b.pap().attempts(), 0);
    assert_eq!(a.ip_config().map(|ip| ip.local), Some(ASSIGNED));
}

#[test]
fn test_pap_wrong_password_closes_both_sides() {
    let mut pair = pap_pair("password");
    pair.run_until(10, dead);

    assert_eq!(pair.b().status(), ExitStatus::PeerAuthFailed);
    assert_eq!(pair.a().status(), ExitStatus::AuthToPeerFailed);
    assert_eq!(pair.b().pap().attempts(), 1);
}

#[test]
fn test_repeated_pap_failures_close_with_login_failed() {
    let mut pair = pap_pair("password");
    pair.run_until(10, dead);
    assert_eq!(pair.b().lcp().term_reason(), Some("Authentication failed"));

    for _ in 1..MAX_LOGIN_ATTEMPTS {
        for id in [pair.a, pair.b] {
            pair.with(id, |session, ctx| session.lower_down(ctx));
        }
        pair.open_both();
        pair.run_until(10, dead);
    }

    let session = pair.b();
    assert_eq!(session.pap().attempts(), MAX_LOGIN_ATTEMPTS);
    assert_eq!(session.status(), ExitStatus::PeerAuthFailed);
    assert_eq!(session.lcp().term_reason(), Some("login failed"));
}
