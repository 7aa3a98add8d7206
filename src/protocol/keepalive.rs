//! Session liveness.
//!
//! ```text
//!            traffic
//!   ┌──────────────────────────┐
//!   ▼                          │
//! Idle ──(> ping interval)──▶ AwaitingAck ──(> ack timeout)──▶ dead
//! ```
//!
//! Only consulted on idle ticks outside an OTA transfer; any received
//! frame counts as traffic.

use log::{debug, warn};

/// What the engine must do after a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    Nothing,
    SendPing,
    /// The ping went unanswered; tear the session down.
    Dead,
}

#[derive(Debug, Default)]
pub struct Keepalive {
    last_message_millis: u32,
    expecting_ping_ack: bool,
}

impl Keepalive {
    pub const fn new(now: u32) -> Self {
        Self {
            last_message_millis: now,
            expecting_ping_ack: false,
        }
    }

    pub fn expecting_ping_ack(&self) -> bool {
        self.expecting_ping_ack
    }

    /// A frame arrived.
    pub fn on_traffic(&mut self, now: u32) {
        self.last_message_millis = now;
        self.expecting_ping_ack = false;
    }

    pub fn poll(&mut self, now: u32, ping_interval_ms: u32, ack_timeout_ms: u32) -> KeepaliveAction {
        let idle = now.wrapping_sub(self.last_message_millis);
        if self.expecting_ping_ack {
            if idle > ack_timeout_ms {
                warn!("keepalive: ping ACK not received after {} ms", idle);
                self.expecting_ping_ack = false;
                self.last_message_millis = now;
                return KeepaliveAction::Dead;
            }
        } else if idle > ping_interval_ms {
            debug!("keepalive: idle {} ms, pinging", idle);
            self.expecting_ping_ack = true;
            self.last_message_millis = now;
            return KeepaliveAction::SendPing;
        }
        KeepaliveAction::Nothing
    }
}
