//! Integration tests for ping / dead-session detection.

use cloudlink::error::ProtocolError;

use super::mock_cloud::*;

#[test]
fn quiet_link_stays_idle_before_ping_interval() {
    let (mut dev, mut peer, clock) = connected();
    clock.advance(14_000);
    assert_eq!(dev.event_loop(), Ok(false));
    assert!(peer.receive(&mut dev).is_empty());
    assert!(!dev.expecting_ping_ack());
}

#[test]
fn ping_sent_after_interval_and_ack_clears_it() {
    let (mut dev, mut peer, clock) = connected();
    clock.advance(15_500);
    assert_eq!(dev.event_loop(), Ok(false));

    let out = peer.receive(&mut dev);
    assert_eq!(out, vec![vec![0x40, 0x00, 0x10, 0x02]]);
    assert!(dev.expecting_ping_ack());

    peer.send(&mut dev, &[0x60, 0x00, 0x10, 0x02]);
    assert_eq!(dev.event_loop(), Ok(true));
    assert!(!dev.expecting_ping_ack());

    clock.advance(12_000);
    assert_eq!(dev.event_loop(), Ok(false));
    assert!(dev.is_connected());
}

#[test]
fn unanswered_ping_ends_session() {
    let (mut dev, mut peer, clock) = connected();
    clock.advance(15_500);
    assert_eq!(dev.event_loop(), Ok(false));
    peer.receive(&mut dev);

    clock.advance(9_000);
    assert_eq!(dev.event_loop(), Ok(false));
    assert!(dev.is_connected());

    clock.advance(1_500);
    assert_eq!(dev.event_loop(), Err(ProtocolError::PingTimeout));
    assert!(!dev.is_connected());
    assert!(!dev.expecting_ping_ack());
}

#[test]
fn any_traffic_postpones_ping() {
    let (mut dev, mut peer, clock) = connected();
    clock.advance(10_000);
    peer.send(&mut dev, &[0x40, 0x00, 0x00, 0x01]);
    assert_eq!(dev.event_loop(), Ok(true));
    peer.receive(&mut dev);

    clock.advance(10_000);
    assert_eq!(dev.event_loop(), Ok(false));
    assert!(peer.receive(&mut dev).is_empty());
}

#[test]
fn ping_timing_survives_clock_wrap() {
    let clock = MockClock::new(u32::MAX - 5_000);
    let mut dev = device(&clock);
    let creds = credentials();
    script_handshake(&mut dev, &creds);
    dev.handshake().unwrap();
    let mut peer = CloudPeer::new(&creds);
    let out = std::mem::take(&mut dev.transport_mut().outbound);
    peer.open(&out[256..]);

    clock.advance(12_000);
    assert_eq!(dev.event_loop(), Ok(false));
    assert!(peer.receive(&mut dev).is_empty());

    clock.advance(4_000);
    assert_eq!(dev.event_loop(), Ok(false));
    assert_eq!(peer.receive(&mut dev).len(), 1);
}
