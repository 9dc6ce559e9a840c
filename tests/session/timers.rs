//! Keep-alive, idle and connect-time limits

use super::pair::Pair;
use super::{client, server};
use pppcp::auth::{InlineSecrets, Phase};
use pppcp::control::State;
use pppcp::effects::ExitStatus;
use pppcp::session::{SessionSettings, TimerPurpose};
use std::time::Duration;

fn running(pair: &Pair) -> bool {
    pair.a().phase() == Phase::Running && pair.b().phase() == Phase::Running
}

fn running_pair(a: SessionSettings, b: SessionSettings) -> Pair {
    let mut pair = Pair::new(a, InlineSecrets::default(), b, InlineSecrets::default());
    pair.open_both();
    pair.run_until(10, running);
    pair
}

#[test]
fn test_silent_peer_declared_dead() {
    let mut a = client();
    a.lcp.echo_interval = Duration::from_secs(10);
    a.lcp.echo_failure = 2;
    let mut pair = running_pair(a, server());
    assert!(pair.timers.is_pending(pair.a, TimerPurpose::Echo));

    pair.cut_b_to_a = true;
    pair.run_until(20, |p| p.a().phase() == Phase::Dead);

    let session = pair.a();
    assert_eq!(session.status(), ExitStatus::PeerDead);
    assert_eq!(session.lcp().state(), State::Closed);
    assert!(!pair.timers.is_pending(pair.a, TimerPurpose::Echo));
}

#[test]
fn test_answered_echoes_keep_link_up() {
    let mut a = client();
    a.lcp.echo_interval = Duration::from_secs(10);
    a.lcp.echo_failure = 2;
    let mut pair = running_pair(a, server());

    for _ in 0..5 {
        assert!(pair.fire(TimerPurpose::Echo));
        pair.pump();
    }
    assert!(running(&pair));
    assert_eq!(pair.a().lcp().proto().echos_pending(), 0);
}

#[test]
fn test_idle_link_closed() {
    let mut b = server();
    b.auth.idle_limit = Some(Duration::from_secs(60));
    let mut pair = running_pair(client(), b);
    let b = pair.b;
    assert_eq!(
        pair.timers.remaining(b, TimerPurpose::Idle),
        Some(Duration::from_secs(60))
    );

    // Traffic 20s ago: check again when the limit would be reached
    pair.with(b, |session, _| session.link_mut().idle = Duration::from_secs(20));
    assert!(pair.fire(TimerPurpose::Idle));
    assert_eq!(
        pair.timers.remaining(b, TimerPurpose::Idle),
        Some(Duration::from_secs(40))
    );
    assert!(running(&pair));

    pair.with(b, |session, _| session.link_mut().idle = Duration::from_secs(60));
    assert!(pair.fire(TimerPurpose::Idle));
    pair.run_until(10, |p| p.b().phase() == Phase::Dead);

    assert_eq!(pair.b().status(), ExitStatus::IdleTimeout);
    assert!(!pair.timers.is_pending(b, TimerPurpose::Idle));
}

#[test]
fn test_connect_time_limit() {
    let mut b = server();
    b.auth.max_connect = Some(Duration::from_secs(120));
    let mut pair = running_pair(client(), b);
    let b = pair.b;
    assert!(pair.timers.is_pending(b, TimerPurpose::SessionLimit));

    assert!(pair.fire(TimerPurpose::SessionLimit));
    pair.run_until(10, |p| p.b().phase() == Phase::Dead);

    assert_eq!(pair.b().status(), ExitStatus::ConnectTime);
    assert_eq!(pair.b().timers().armed_count(), 0);
}

#[test]
fn test_limits_cancelled_when_closed() {
    let mut b = server();
    b.auth.idle_limit = Some(Duration::from_secs(60));
    b.auth.max_connect = Some(Duration::from_secs(120));
    let mut pair = running_pair(client(), b);

    let a = pair.a;
    pair.with(a, |session, ctx| session.close("User request", ctx));
    pair.pump();

    let b = pair.b;
    assert!(!pair.timers.is_pending(b, TimerPurpose::Idle));
    assert!(!pair.timers.is_pending(b, TimerPurpose::SessionLimit));
}
