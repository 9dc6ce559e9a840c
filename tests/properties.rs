//! Property tests for negotiation and secrets lookups

use pppcp::auth::secrets::scan_secrets;
use pppcp::auth::InlineSecrets;
use pppcp::control::State;
use pppcp::protocol::lcp::{self as wire, codes, options};
use pppcp::protocol::ppp::protocols;
use pppcp::protocol::{Ci, ControlBuilder};
use pppcp::session::{Context, ManualTimers, RecordingLink, Session, SessionId, SessionSettings};
use proptest::prelude::*;

/// A session that has sent its first LCP Configure-Request
fn negotiating(timers: &mut ManualTimers, secrets: &InlineSecrets) -> Session<RecordingLink> {
    let mut session = Session::new(
        SessionId::new(0, 1),
        RecordingLink::new(),
        SessionSettings::default(),
    );
    let mut ctx = Context::new(timers, secrets);
    session.open(&mut ctx);
    session.lower_up(&mut ctx);
    session.link_mut().take_sent();
    session
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// An acceptable Configure-Request is acknowledged with its own bytes
    #[test]
    fn prop_acceptable_request_acked_verbatim(
        mru in wire::MIN_MRU..=wire::DEFAULT_MRU,
        magic in any::<u32>(),
        pcomp in any::<bool>(),
        accomp in any::<bool>(),
        id in any::<u8>(),
    ) {
        let secrets = InlineSecrets::default();
        let mut timers = ManualTimers::new();
        let mut session = negotiating(&mut timers, &secrets);
        prop_assume!(magic != session.lcp().proto().our_magic());

        let mut cis = vec![wire::mru(mru), wire::magic_number(magic)];
        if pcomp {
            cis.push(Ci::void(options::PFC));
        }
        if accomp {
            cis.push(Ci::void(options::ACFC));
        }
        let request = ControlBuilder::new(codes::CONFIGURE_REQUEST, id).cis(&cis).build();

        let mut ctx = Context::new(&mut timers, &secrets);
        session.input(protocols::LCP, &request, &mut ctx);

        let sent = session.link_mut().take_sent();
        let (protocol, ack) = sent.last().expect("reply sent");
        prop_assert_eq!(*protocol, protocols::LCP);
        prop_assert_eq!(ack[0], codes::CONFIGURE_ACK);
        prop_assert_eq!(ack[1], id);
        prop_assert_eq!(&ack[4..], &request[4..]);
        prop_assert_eq!(session.lcp().state(), State::AckSent);
    }

    /// Arbitrary LCP input never brings the link up or takes it down
    #[test]
    fn prop_garbage_input_is_contained(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let secrets = InlineSecrets::default();
        let mut timers = ManualTimers::new();
        let mut session = negotiating(&mut timers, &secrets);

        let mut ctx = Context::new(&mut timers, &secrets);
        session.input(protocols::LCP, &bytes, &mut ctx);

        prop_assert_eq!(session.stats().rx_packets.get(), 1);
        prop_assert!(!session.lcp().is_opened());
        prop_assert!(session.lcp().state().is_negotiating());
    }

    /// An entry naming the client beats a wildcard, wherever it appears
    #[test]
    fn prop_exact_client_beats_wildcard(
        client in "[a-z][a-z0-9]{0,15}",
        exact_first in any::<bool>(),
    ) {
        let exact = format!("{} gateway exact\n", client);
        let wild = "* gateway wild\n";
        let text = if exact_first {
            format!("{}{}", exact, wild)
        } else {
            format!("{}{}", wild, exact)
        };

        let entry = scan_secrets(text.as_bytes(), Some(&client), Some("gateway"), None)
            .expect("scan succeeds")
            .expect("an entry matches");
        prop_assert_eq!(entry.secret.as_slice(), b"exact".as_slice());
        prop_assert_eq!(entry.client, client);
    }
}
