//! Event publish/subscribe encoding.
//!
//! Publish:
//! ```text
//! NON POST │ 0xB1 'e'|'E' │ name (Uri-Path) │ [0x33 ttl(3)] │ [0xFF data]
//! ```
//! Subscribe:
//! ```text
//! CON GET  │ 0xB1 'e' │ [name] │ [0x41 'u']       (my devices)
//!                               │ [0xFF id(12)]    (one device)
//! ```
//!
//! Names shorter than 13 bytes use the inline length nibble; longer
//! names use the extended length byte (`0x0D`, `len - 13`).

use super::coap::{
    FrameWriter, MessageType, OPTION_MAX_AGE, OPTION_URI_PATH, OPTION_URI_QUERY, Options, code,
    decode_header,
};
use super::handshake::DEVICE_ID_SIZE;
use crate::error::CodecError;
use heapless::{String, Vec};
use log::debug;

pub const MAX_EVENT_NAME_LENGTH: usize = 63;
pub const MAX_EVENT_DATA_LENGTH: usize = 63;
/// Number of subscription filters the device can hold.
pub const MAX_SUBSCRIPTIONS: usize = 4;
/// Slots in the publish rate ring; one fewer publish passes per window.
pub const PUBLISH_BURST: usize = 5;

pub type EventName = String<{ MAX_EVENT_NAME_LENGTH + 1 }>;

/// Visibility of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Public,
    Private,
}

impl EventType {
    const fn path(self) -> u8 {
        match self {
            Self::Public => b'e',
            Self::Private => b'E',
        }
    }
}

/// Which publishers a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Every public event with the name prefix.
    Firehose,
    /// Events from devices owned by the same account.
    MyDevices,
    /// Events from one device.
    Device([u8; DEVICE_ID_SIZE]),
}

fn clip(bytes: &[u8], max: usize) -> &[u8] {
    &bytes[..bytes.len().min(max)]
}

// ── Encoders ──────────────────────────────────────────────────

/// Build a publish frame. Name and data are truncated to 63 bytes; a
/// Max-Age option is added only when `ttl_secs` differs from
/// `default_ttl_secs`.
pub fn encode_event(
    out: &mut [u8],
    message_id: u16,
    name: &str,
    data: &[u8],
    ttl_secs: u32,
    event_type: EventType,
    default_ttl_secs: u32,
) -> Result<usize, CodecError> {
    let mut w = FrameWriter::new(out);
    w.header(MessageType::NonConfirmable, code::POST, message_id, None)?
        .path(event_type.path())?
        .option(OPTION_URI_PATH, clip(name.as_bytes(), MAX_EVENT_NAME_LENGTH))?;
    if ttl_secs != default_ttl_secs {
        let [_, a, b, c] = ttl_secs.min(0x00FF_FFFF).to_be_bytes();
        w.option(OPTION_MAX_AGE, &[a, b, c])?;
    }
    w.payload(clip(data, MAX_EVENT_DATA_LENGTH))?;
    w.finish()
}

/// Build a subscription request.
pub fn encode_subscription(
    out: &mut [u8],
    message_id: u16,
    name: &str,
    scope: SubscriptionScope,
) -> Result<usize, CodecError> {
    if name.is_empty() && scope == SubscriptionScope::Firehose {
        return Err(CodecError::FirehoseRequiresName);
    }
    let mut w = FrameWriter::new(out);
    w.header(MessageType::Confirmable, code::GET, message_id, None)?
        .path(b'e')?;
    if !name.is_empty() {
        w.option(OPTION_URI_PATH, clip(name.as_bytes(), MAX_EVENT_NAME_LENGTH))?;
    }
    match scope {
        SubscriptionScope::Firehose => {}
        SubscriptionScope::MyDevices => {
            w.option(OPTION_URI_QUERY, b"u")?;
        }
        SubscriptionScope::Device(id) => {
            w.payload(&id)?;
        }
    }
    w.finish()
}

// ── Decoders ──────────────────────────────────────────────────

/// Event carried by an inbound `POST e|E`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent<'a> {
    pub name: EventName,
    pub data: &'a [u8],
}

/// Decode an unpadded event frame. Uri-Path segments after the `e`
/// selector are joined with `/`; Max-Age and other options are skipped.
pub fn decode_event(frame: &[u8]) -> Result<InboundEvent<'_>, CodecError> {
    let header = decode_header(frame)?;
    let mut options = Options::new(frame, header.options_offset());
    match options.next() {
        Some(o) if o.number == OPTION_URI_PATH && matches!(o.value, b"e" | b"E") => {}
        _ => return Err(CodecError::InvalidOption),
    }

    let mut name = EventName::new();
    let mut segments = 0;
    for option in options.by_ref() {
        if option.number != OPTION_URI_PATH {
            continue;
        }
        if segments > 0 {
            name.push('/').map_err(|()| CodecError::InvalidOption)?;
        }
        let segment = core::str::from_utf8(option.value).map_err(|_| CodecError::InvalidOption)?;
        name.push_str(segment).map_err(|()| CodecError::InvalidOption)?;
        segments += 1;
    }
    if options.failed() {
        return Err(CodecError::InvalidOption);
    }
    Ok(InboundEvent {
        name,
        data: options.payload(),
    })
}

/// Inverse of the name encoding in [`encode_event`].
pub fn decode_event_name(frame: &[u8]) -> Result<EventName, CodecError> {
    decode_event(frame).map(|e| e.name)
}

// ── Rate limiter ──────────────────────────────────────────────

/// Ring of the last five publish attempts, refused ones included.
///
/// Each attempt overwrites the current slot, then is compared against the
/// slot four attempts back. An empty slot counts as a window old, so at
/// most four publishes pass per window and a sustained burst keeps being
/// refused until it pauses.
#[derive(Debug, Default)]
pub struct RateLimiter {
    attempts: [Option<u32>; PUBLISH_BURST],
    next: usize,
}

impl RateLimiter {
    pub const fn new() -> Self {
        Self {
            attempts: [None; PUBLISH_BURST],
            next: 0,
        }
    }

    /// Record an attempt at `now` and report whether the window allows it.
    pub fn try_acquire(&mut self, now: u32, window_ms: u32) -> bool {
        self.attempts[self.next] = Some(now);
        self.next = (self.next + 1) % PUBLISH_BURST;
        match self.attempts[self.next] {
            Some(oldest) if now.wrapping_sub(oldest) < window_ms => {
                debug!("event: publish rate limited");
                false
            }
            _ => true,
        }
    }
}

// ── Subscriptions ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: EventName,
    pub scope: SubscriptionScope,
}

/// Fixed table of subscription filters.
#[derive(Debug, Default)]
pub struct Subscriptions {
    entries: Vec<Subscription, MAX_SUBSCRIPTIONS>,
}

impl Subscriptions {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add a filter. Duplicates are accepted without a new slot; returns
    /// false when the table is full.
    pub fn add(&mut self, filter: &str, scope: SubscriptionScope) -> bool {
        let mut name = EventName::new();
        for ch in filter.chars() {
            if name.push(ch).is_err() {
                break;
            }
        }
        let entry = Subscription { filter: name, scope };
        if self.entries.contains(&entry) {
            return true;
        }
        self.entries.push(entry).is_ok()
    }

    /// Whether any filter is a prefix of `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.entries.iter().any(|s| name.starts_with(s.filter.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
