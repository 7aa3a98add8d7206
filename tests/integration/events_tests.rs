//! Integration tests for publish, subscribe, inbound events and time sync.

use cloudlink::error::{CodecError, ProtocolError};
use cloudlink::protocol::coap::code;
use cloudlink::protocol::{EventType, SubscriptionScope};

use super::mock_cloud::*;

#[test]
fn publish_sends_non_post_with_name_and_data() {
    let (mut dev, mut peer, _clock) = connected();
    assert_eq!(dev.publish("temp", b"21", 60, EventType::Public), Ok(true));

    let out = peer.receive(&mut dev);
    assert_eq!(
        out,
        vec![vec![0x50, 0x02, 0x10, 0x02, 0xB1, b'e', 0x04, b't', b'e', b'm', b'p', 0xFF, b'2', b'1']]
    );
}

#[test]
fn private_publish_with_custom_ttl() {
    let (mut dev, mut peer, _clock) = connected();
    assert_eq!(dev.publish("t", b"", 120, EventType::Private), Ok(true));

    let out = peer.receive(&mut dev);
    assert_eq!(&out[0][4..], &[0xB1, b'E', 0x01, b't', 0x33, 0x00, 0x00, 0x78]);
}

#[test]
fn six_publishes_100ms_apart() {
    let (mut dev, mut peer, clock) = connected();
    let start = clock.now();
    let mut results = Vec::new();
    for i in 0..6 {
        clock.set(start + i * 100);
        results.push(dev.publish("burst", b"", 60, EventType::Private).unwrap());
    }
    assert_eq!(results, vec![true, true, true, true, false, false]);
    assert_eq!(peer.receive(&mut dev).len(), 4);

    // Refused attempts count too: still limited a window after the first.
    clock.set(start + 1_000);
    assert_eq!(dev.publish("burst", b"", 60, EventType::Private), Ok(false));

    clock.set(start + 2_500);
    assert_eq!(dev.publish("burst", b"", 60, EventType::Private), Ok(true));
    assert_eq!(peer.receive(&mut dev).len(), 1);
}

#[test]
fn publish_without_session_fails() {
    let clock = MockClock::new(0);
    let mut dev = device(&clock);
    assert_eq!(
        dev.publish("x", b"", 60, EventType::Public),
        Err(ProtocolError::NoSession)
    );
}

#[test]
fn subscribe_sends_request_when_connected() {
    let (mut dev, mut peer, _clock) = connected();
    assert_eq!(dev.subscribe("door", SubscriptionScope::MyDevices), Ok(true));

    let out = peer.receive(&mut dev);
    assert_eq!(
        out,
        vec![vec![0x40, 0x01, 0x10, 0x02, 0xB1, b'e', 0x04, b'd', b'o', b'o', b'r', 0x41, b'u']]
    );
}

#[test]
fn firehose_without_name_is_rejected_but_session_survives() {
    let (mut dev, mut peer, _clock) = connected();
    assert_eq!(
        dev.subscribe("", SubscriptionScope::Firehose),
        Err(ProtocolError::Codec(CodecError::FirehoseRequiresName))
    );
    assert!(dev.is_connected());
    assert!(dev.subscriptions().is_empty());
    assert!(peer.receive(&mut dev).is_empty());
}

#[test]
fn subscriptions_registered_offline_are_sent_after_handshake() {
    let clock = MockClock::new(0);
    let mut dev = device(&clock);
    assert_eq!(dev.subscribe("a", SubscriptionScope::Firehose), Ok(true));
    assert_eq!(dev.subscribe("b", SubscriptionScope::Device(*b"other-device")), Ok(true));
    assert!(dev.transport().outbound.is_empty());

    let creds = credentials();
    script_handshake(&mut dev, &creds);
    dev.handshake().unwrap();
    let out = std::mem::take(&mut dev.transport_mut().outbound);
    let mut peer = CloudPeer::new(&creds);
    peer.open(&out[256..]);

    dev.send_subscriptions().unwrap();
    let out = peer.receive(&mut dev);
    assert_eq!(out.len(), 2);
    assert_eq!(&out[0][4..], &[0xB1, b'e', 0x01, b'a']);
    assert_eq!(&out[1][4..8], &[0xB1, b'e', 0x01, b'b']);
    assert_eq!(&out[1][8..], b"\xFFother-device");
}

#[test]
fn subscription_table_fills_up() {
    let (mut dev, _peer, _clock) = connected();
    for name in ["a", "b", "c", "d"] {
        assert_eq!(dev.subscribe(name, SubscriptionScope::MyDevices), Ok(true));
    }
    assert_eq!(dev.subscribe("e", SubscriptionScope::MyDevices), Ok(false));
    dev.remove_subscriptions();
    assert!(dev.subscriptions().is_empty());
}

#[test]
fn inbound_events_are_routed_by_prefix() {
    let (mut dev, mut peer, _clock) = connected();
    dev.subscribe("temp", SubscriptionScope::MyDevices).unwrap();
    peer.receive(&mut dev);

    let matching = [
        0x50, 0x02, 0x00, 0x09, 0xB1, b'e', 0x04, b't', b'e', b'm', b'p', 0x07, b'k', b'i', b't', b'c',
        b'h', b'e', b'n', 0xFF, b'2', b'1',
    ];
    let other = [0x50, 0x02, 0x00, 0x0A, 0xB1, b'e', 0x04, b'd', b'o', b'o', b'r', 0xFF, b'1'];
    peer.send(&mut dev, &matching);
    peer.send(&mut dev, &other);

    assert_eq!(dev.event_loop(), Ok(true));
    assert_eq!(dev.event_loop(), Ok(true));
    assert!(peer.receive(&mut dev).is_empty(), "events are not acknowledged");
    assert_eq!(
        dev.descriptor().events,
        vec![("temp/kitchen".to_owned(), b"21".to_vec())]
    );
}

#[test]
fn time_request_and_response_set_clock() {
    let (mut dev, mut peer, clock) = connected();
    assert_eq!(dev.send_time_request(), Ok(true));

    let out = peer.receive(&mut dev);
    let req = &out[0];
    assert_eq!(msg_type(req), CON);
    assert_eq!(msg_code(req), code::GET);
    assert_eq!(token(req), Some(0x21));
    assert_eq!(&req[5..], &[0xB1, b't']);

    clock.advance(4_000);
    let t: u32 = 1_700_000_000;
    let mut resp = vec![0x61, code::CONTENT, 0x10, 0x02, 0x21, 0xFF];
    resp.extend_from_slice(&t.to_be_bytes());
    peer.send(&mut dev, &resp);

    assert_eq!(dev.event_loop(), Ok(true));
    // Half the ~4 s round trip, in whole seconds.
    assert_eq!(dev.firmware().last_time(), Some(t - 2));
}

#[test]
fn unsolicited_time_is_taken_as_is() {
    let (mut dev, mut peer, _clock) = connected();
    let t: u32 = 1_600_000_000;
    let mut resp = vec![0x61, code::CONTENT, 0x00, 0x01, 0x05, 0xFF];
    resp.extend_from_slice(&t.to_be_bytes());
    peer.send(&mut dev, &resp);

    assert_eq!(dev.event_loop(), Ok(true));
    assert_eq!(dev.firmware().last_time(), Some(t));
}
