//! Host clock adapter.
//!
//! Millisecond uptime from `std::time::Instant`, truncated to `u32` so it
//! wraps every ~49.7 days exactly like a device tick counter.

use std::time::Instant;

use crate::ports::Clock;

/// Monotonic millisecond clock for host builds.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Milliseconds since construction (not truncated).
    pub fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Clock for SystemClock {
    fn millis(&self) -> u32 {
        self.uptime_ms() as u32
    }
}
