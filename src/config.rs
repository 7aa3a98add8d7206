//! Protocol configuration parameters
//!
//! All tunable timing and identity values for the cloud session.
//! Buffer sizes are const generics on [`crate::protocol::Protocol`] and
//! are not configured here.

use serde::{Deserialize, Serialize};

/// Largest TTL the Max-Age option can carry (3 bytes).
pub const MAX_EVENT_TTL_SECS: u32 = 0x00FF_FFFF;

/// Core protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    // --- Identity ---
    /// Product id reported in the hello frame
    pub product_id: u16,
    /// Product firmware version reported in the hello frame
    pub product_firmware_version: u16,

    // --- Transport ---
    /// Timeout for each blocking transfer during the handshake (ms)
    pub blocking_timeout_ms: u32,

    // --- Keepalive ---
    /// Idle time before the device pings the cloud (ms)
    pub ping_interval_ms: u32,
    /// Time allowed for a ping ACK before the session is declared dead (ms)
    pub ping_ack_timeout_ms: u32,

    // --- OTA ---
    /// Silence during an update before the expected chunk is re-requested (ms)
    pub chunk_retry_ms: u32,

    // --- Events ---
    /// Sliding window for the publish rate limit (ms)
    pub publish_window_ms: u32,
    /// TTL assumed by the cloud when no Max-Age option is sent (seconds)
    pub default_event_ttl_secs: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            // Identity
            product_id: 0xFFFF,
            product_firmware_version: 0xFFFF,

            // Transport
            blocking_timeout_ms: 20_000,

            // Keepalive
            ping_interval_ms: 15_000,
            ping_ack_timeout_ms: 10_000,

            // OTA
            chunk_retry_ms: 3_000,

            // Events
            publish_window_ms: 1_000, // 5 events per window
            default_event_ttl_secs: 60,
        }
    }
}

impl ProtocolConfig {
    /// Check that the timing values can drive a working session.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.blocking_timeout_ms == 0 {
            return Err("blocking_timeout_ms must be non-zero");
        }
        if self.ping_interval_ms == 0 || self.ping_ack_timeout_ms == 0 {
            return Err("keepalive intervals must be non-zero");
        }
        if self.chunk_retry_ms == 0 {
            return Err("chunk_retry_ms must be non-zero");
        }
        if self.publish_window_ms == 0 {
            return Err("publish_window_ms must be non-zero");
        }
        if self.default_event_ttl_secs > MAX_EVENT_TTL_SECS {
            return Err("default_event_ttl_secs exceeds 24 bits");
        }
        if self.ping_ack_timeout_ms >= self.blocking_timeout_ms {
            return Err("ping_ack_timeout_ms must be shorter than blocking_timeout_ms");
        }
        Ok(())
    }
}
