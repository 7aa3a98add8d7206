//! OTA chunk transfer over the cloud session.
//!
//! Flow: UPDATE_BEGIN → N × CHUNK → UPDATE_DONE
//!
//! Each chunk carries a CRC-32 of its payload as the first option after
//! the `c` path. The firmware port stores verified chunks and reports
//! which index it needs next; a non-advancing index is answered with a
//! `chunk_missed` request naming that index. While updating, silence
//! longer than the retry interval re-requests the current index.

use super::coap::{CoapOption, Options};
use crate::error::CodecError;
use crate::ports::FirmwarePort;
use log::{debug, info, warn};

// ── Outcome ───────────────────────────────────────────────────

/// What the dispatcher should answer for one CHUNK frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// No transfer is running; the frame is acknowledged and dropped.
    NotUpdating,
    /// CRC matched and the index advanced to `next`.
    Accepted { next: u16 },
    /// CRC matched but the index did not advance; request `index`.
    Missed { index: u16 },
    /// CRC mismatch or malformed frame; the cloud should resend.
    Bad,
}

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ChunkTransfer {
    updating: bool,
    chunk_index: u16,
    last_chunk_millis: u32,
}

impl ChunkTransfer {
    pub const fn new() -> Self {
        Self {
            updating: false,
            chunk_index: 0,
            last_chunk_millis: 0,
        }
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    pub fn chunk_index(&self) -> u16 {
        self.chunk_index
    }

    pub fn last_chunk_millis(&self) -> u32 {
        self.last_chunk_millis
    }

    /// Start a transfer at chunk 0.
    pub fn begin(&mut self, now: u32) {
        info!("ota: update started");
        self.updating = true;
        self.chunk_index = 0;
        self.last_chunk_millis = now;
    }

    /// Leave update mode after UPDATE_DONE.
    pub fn finish(&mut self) {
        info!("ota: update finished at chunk {}", self.chunk_index);
        self.updating = false;
    }

    /// Drop a transfer interrupted by a dead session.
    pub fn abort(&mut self) {
        if self.updating {
            warn!("ota: transfer aborted at chunk {}", self.chunk_index);
        }
        *self = Self::new();
    }

    /// Verify and store one chunk. `frame` is the unpadded plaintext and
    /// `options_offset` points at the `c` path option.
    pub fn on_chunk<F: FirmwarePort + ?Sized>(
        &mut self,
        firmware: &mut F,
        frame: &[u8],
        options_offset: usize,
        now: u32,
    ) -> ChunkOutcome {
        self.last_chunk_millis = now;
        if !self.updating {
            warn!("ota: chunk received while not updating");
            return ChunkOutcome::NotUpdating;
        }

        let (given_crc, payload) = match parse_chunk(frame, options_offset) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("ota: malformed chunk: {}", e);
                return ChunkOutcome::Bad;
            }
        };

        let crc = firmware.calculate_crc(payload);
        if crc != given_crc {
            warn!("ota: chunk {} CRC mismatch", self.chunk_index);
            return ChunkOutcome::Bad;
        }

        let next = firmware.save_firmware_chunk(payload);
        if next > self.chunk_index {
            debug!("ota: chunk {} stored, next {}", self.chunk_index, next);
            self.chunk_index = next;
            ChunkOutcome::Accepted { next }
        } else {
            warn!("ota: chunk did not advance (at {}, store wants {})", self.chunk_index, next);
            ChunkOutcome::Missed { index: next }
        }
    }

    /// Index to re-request when the transfer has stalled, restarting the
    /// retry timer.
    pub fn retry_due(&mut self, now: u32, retry_ms: u32) -> Option<u16> {
        if !self.updating || now.wrapping_sub(self.last_chunk_millis) <= retry_ms {
            return None;
        }
        self.last_chunk_millis = now;
        Some(self.chunk_index)
    }
}

/// Split a chunk frame into its CRC and payload.
///
/// The first option after the path is the CRC (big-endian, up to 4
/// bytes); any further options are skipped.
pub fn parse_chunk(frame: &[u8], options_offset: usize) -> Result<(u32, &[u8]), CodecError> {
    let mut options = Options::new(frame, options_offset);
    let _path = options.next().ok_or(CodecError::Truncated)?;
    let crc = match options.next() {
        Some(CoapOption { value, .. }) if value.len() <= 4 => {
            value.iter().fold(0u32, |acc, &b| acc << 8 | u32::from(b))
        }
        Some(_) => return Err(CodecError::InvalidOption),
        None => return Err(CodecError::Truncated),
    };
    for _ in options.by_ref() {}
    if options.failed() {
        return Err(CodecError::InvalidOption);
    }
    Ok((crc, options.payload()))
}
