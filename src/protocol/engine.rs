//! Protocol engine: owns the collaborators and dispatches cloud messages.
//!
//! The caller runs [`Protocol::handshake`] once per connection and then
//! polls [`Protocol::event_loop`]. Every tick either consumes one frame
//! or runs the liveness checks:
//!
//! ```text
//! transport ─▶ ByteQueue ─▶ [len(2) | AES frame] ─▶ decrypt ─▶ unpad
//!                                                                │
//!            transport ◀─ encrypt ◀─ builder ◀─ handler ◀─ classify
//! ```
//!
//! Inbound and outbound frames use separate owned buffers of `N` bytes,
//! so a handler can build its response while still reading the request.
//! Any fatal error tears the session down; the caller reconnects and
//! calls `handshake()` again.

use heapless::{String, Vec};
use log::{debug, info, warn};

use super::coap::{Header, Options, code, decode_header, pkcs7_unpad};
use super::crypto::Crypto;
use super::events::{
    self, EventType, Subscription, SubscriptionScope, Subscriptions, RateLimiter, MAX_SUBSCRIPTIONS,
};
use super::handshake::{self, DEVICE_ID_SIZE, HandshakeContext};
use super::keepalive::{Keepalive, KeepaliveAction};
use super::message::{self, MAX_FUNCTION_ARG_LENGTH, MAX_KEY_LENGTH, MessageKind};
use super::ota::{ChunkOutcome, ChunkTransfer};
use super::session::Session;
use super::transport::{Transport, blocking_receive, blocking_send, receive_error};
use crate::config::ProtocolConfig;
use crate::error::{CodecError, ProtocolError};
use crate::ports::{Clock, DescriptorPort, FirmwarePort};
use crate::queue::ByteQueue;

/// Default size of each frame buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 640;

/// Staging queue between the transport and the frame reader.
const RX_QUEUE_SIZE: usize = 128;

/// Bytes pulled from the transport per idle poll.
const RX_CHUNK: usize = 64;

/// The collaborators a [`Protocol`] is built from.
pub struct Ports<T, C, K, F, D> {
    pub transport: T,
    pub crypto: C,
    pub clock: K,
    pub firmware: F,
    pub descriptor: D,
}

/// Device side of the cloud protocol.
pub struct Protocol<T, C, K, F, D, const N: usize = DEFAULT_BUFFER_SIZE> {
    transport: T,
    crypto: C,
    clock: K,
    firmware: F,
    descriptor: D,
    config: ProtocolConfig,
    device_id: [u8; DEVICE_ID_SIZE],

    session: Option<Session>,
    rx: ByteQueue<RX_QUEUE_SIZE>,
    frame: [u8; N],
    /// Outbound frame; bytes 0..2 hold the length prefix.
    tx: [u8; N],

    ota: ChunkTransfer,
    keepalive: Keepalive,
    rate: RateLimiter,
    subscriptions: Subscriptions,
    time_request_millis: Option<u32>,
}

impl<T, C, K, F, D, const N: usize> Protocol<T, C, K, F, D, N>
where
    T: Transport,
    C: Crypto,
    K: Clock,
    F: FirmwarePort,
    D: DescriptorPort,
{
    const BUFFER_CHECK: () = assert!(N >= 64 && N <= u16::MAX as usize, "frame buffer size out of range");

    pub fn new(ports: Ports<T, C, K, F, D>, device_id: [u8; DEVICE_ID_SIZE], config: ProtocolConfig) -> Self {
        let () = Self::BUFFER_CHECK;
        let now = ports.clock.millis();
        Self {
            transport: ports.transport,
            crypto: ports.crypto,
            clock: ports.clock,
            firmware: ports.firmware,
            descriptor: ports.descriptor,
            config,
            device_id,
            session: None,
            rx: ByteQueue::new(),
            frame: [0; N],
            tx: [0; N],
            ota: ChunkTransfer::new(),
            keepalive: Keepalive::new(now),
            rate: RateLimiter::new(),
            subscriptions: Subscriptions::new(),
            time_request_millis: None,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_updating(&self) -> bool {
        self.ota.is_updating()
    }

    pub fn chunk_index(&self) -> u16 {
        self.ota.chunk_index()
    }

    pub fn expecting_ping_ack(&self) -> bool {
        self.keepalive.expecting_ping_ack()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn firmware(&self) -> &F {
        &self.firmware
    }

    pub fn firmware_mut(&mut self) -> &mut F {
        &mut self.firmware
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub fn descriptor_mut(&mut self) -> &mut D {
        &mut self.descriptor
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    // ── Session lifecycle ─────────────────────────────────────

    /// Establish a new session over the (freshly connected) transport.
    /// Any previous session is torn down first.
    pub fn handshake(&mut self) -> Result<(), ProtocolError> {
        self.teardown();
        let newly_upgraded = self.firmware.was_ota_upgrade_successful();
        let session = handshake::handshake(
            HandshakeContext {
                transport: &mut self.transport,
                crypto: &mut self.crypto,
                clock: &self.clock,
                config: &self.config,
                device_id: &self.device_id,
                scratch: &mut self.tx,
            },
            newly_upgraded,
        )?;
        self.session = Some(session);
        self.keepalive = Keepalive::new(self.clock.millis());
        Ok(())
    }

    /// Drop the session. An interrupted OTA transfer is aborted.
    pub fn teardown(&mut self) {
        if self.ota.is_updating() {
            self.firmware.abort_firmware_update();
        }
        self.ota.abort();
        if self.session.take().is_some() {
            info!("protocol: session closed");
        }
        self.rx.clear();
        self.time_request_millis = None;
    }

    fn guard<R>(&mut self, result: Result<R, ProtocolError>) -> Result<R, ProtocolError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!("protocol: fatal error: {}", e);
                self.teardown();
            }
        }
        result
    }

    // ── Event loop ────────────────────────────────────────────

    /// Process at most one inbound frame, or run the liveness checks
    /// when none is pending.
    ///
    /// Returns `Ok(true)` when a frame was consumed and `Ok(false)` on an
    /// idle tick. Errors are fatal: the session has been torn down.
    pub fn event_loop(&mut self) -> Result<bool, ProtocolError> {
        if self.session.is_none() {
            return Err(ProtocolError::NoSession);
        }
        let result = self.tick();
        self.guard(result)
    }

    fn tick(&mut self) -> Result<bool, ProtocolError> {
        self.fill_rx()?;
        if self.rx.available() < 2 {
            self.idle()?;
            return Ok(false);
        }
        let mut prefix = [0u8; 2];
        self.rx.pop(&mut prefix);
        let len = usize::from(u16::from_be_bytes(prefix));
        self.keepalive.on_traffic(self.clock.millis());

        match self.receive_frame(len) {
            Ok(Some(plain_len)) => self.dispatch(plain_len)?,
            Ok(None) => {}
            Err(ProtocolError::Codec(e)) => warn!("protocol: dropped frame: {}", e),
            Err(e) => return Err(e),
        }
        Ok(true)
    }

    fn fill_rx(&mut self) -> Result<(), ProtocolError> {
        let mut chunk = [0u8; RX_CHUNK];
        let want = chunk.len().min(self.rx.free());
        if want == 0 {
            return Ok(());
        }
        let n = self
            .transport
            .receive(&mut chunk[..want])
            .map_err(|e| receive_error::<T>(&e))?;
        self.rx.push(&chunk[..n.min(want)]);
        Ok(())
    }

    /// Read and decrypt a frame of `len` bytes. Returns the unpadded
    /// length, or `None` if the frame was drained unread.
    fn receive_frame(&mut self, len: usize) -> Result<Option<usize>, ProtocolError> {
        let timeout = self.config.blocking_timeout_ms;
        if len > N {
            warn!("protocol: declared length {} exceeds buffer, draining", len);
            let mut remaining = len - self.rx.discard(len);
            while remaining > 0 {
                let n = remaining.min(N);
                blocking_receive(&mut self.transport, &self.clock, &mut self.frame[..n], timeout)?;
                remaining -= n;
            }
            return Ok(None);
        }

        let buffered = self.rx.pop(&mut self.frame[..len]);
        blocking_receive(&mut self.transport, &self.clock, &mut self.frame[buffered..len], timeout)?;

        if len == 0 || len % 16 != 0 {
            warn!("protocol: frame length {} is not block aligned", len);
            return Ok(None);
        }
        let session = self.session.as_mut().ok_or(ProtocolError::NoSession)?;
        session.decrypt(&mut self.crypto, &mut self.frame[..len])?;
        let plain_len = pkcs7_unpad(&self.frame[..len])?;
        Ok(Some(plain_len))
    }

    fn idle(&mut self) -> Result<(), ProtocolError> {
        let now = self.clock.millis();
        if self.ota.is_updating() {
            if let Some(index) = self.ota.retry_due(now, self.config.chunk_retry_ms) {
                info!("ota: no chunk for {} ms, re-requesting {}", self.config.chunk_retry_ms, index);
                let id = self.next_message_id()?;
                let n = message::chunk_missed(self.body(), id, index)?;
                self.send_frame(n)?;
            }
            return Ok(());
        }
        match self
            .keepalive
            .poll(now, self.config.ping_interval_ms, self.config.ping_ack_timeout_ms)
        {
            KeepaliveAction::Nothing => Ok(()),
            KeepaliveAction::SendPing => {
                let id = self.next_message_id()?;
                let n = message::ping(self.body(), id)?;
                self.send_frame(n)
            }
            KeepaliveAction::Dead => Err(ProtocolError::PingTimeout),
        }
    }

    // ── Dispatch ──────────────────────────────────────────────

    fn dispatch(&mut self, plain_len: usize) -> Result<(), ProtocolError> {
        let kind = message::classify(&self.frame[..plain_len]);
        let header = match decode_header(&self.frame[..plain_len]) {
            Ok(h) => h,
            Err(_) => {
                debug!("protocol: unparseable frame dropped");
                return Ok(());
            }
        };
        debug!("protocol: {:?} id={}", kind, header.message_id);

        let result = match kind {
            MessageKind::Describe => self.handle_describe(&header),
            MessageKind::FunctionCall => self.handle_function_call(&header, plain_len),
            MessageKind::VariableRequest => self.handle_variable_request(&header, plain_len),
            MessageKind::UpdateBegin => self.handle_update_begin(&header),
            MessageKind::Chunk => self.handle_chunk(&header, plain_len),
            MessageKind::UpdateDone => self.handle_update_done(&header),
            MessageKind::SignalStart | MessageKind::SignalStop => {
                self.handle_signal(&header, kind == MessageKind::SignalStart)
            }
            MessageKind::Ping => {
                let n = message::empty_ack(self.body(), header.message_id)?;
                self.send_frame(n)
            }
            MessageKind::Hello => {
                self.firmware.ota_upgrade_status_sent();
                Ok(())
            }
            MessageKind::Event => {
                self.handle_event(plain_len);
                Ok(())
            }
            MessageKind::Time => {
                self.handle_time(&header, plain_len);
                Ok(())
            }
            MessageKind::KeyChange => {
                debug!("protocol: key change ignored");
                Ok(())
            }
            MessageKind::EmptyAck | MessageKind::Error => Ok(()),
        };
        match result {
            Err(ProtocolError::Codec(e)) => {
                warn!("protocol: {:?} not answered: {}", kind, e);
                Ok(())
            }
            other => other,
        }
    }

    fn handle_describe(&mut self, header: &Header) -> Result<(), ProtocolError> {
        let n = message::describe(&mut self.tx[2..], header.token, header.message_id, &self.descriptor)?;
        self.send_frame(n)
    }

    fn handle_function_call(&mut self, header: &Header, plain_len: usize) -> Result<(), ProtocolError> {
        let request = parse_function_call(&self.frame[..plain_len], header.options_offset());
        let Some((key, arg)) = request else {
            warn!("protocol: rejected function call");
            let n = message::coded_ack(self.body(), None, code::BAD_REQUEST, header.message_id)?;
            return self.send_frame(n);
        };

        let n = message::empty_ack(self.body(), header.message_id)?;
        self.send_frame(n)?;

        let result = self.descriptor.call_function(&key, &arg);
        debug!("protocol: function {} returned {}", key, result);
        let id = self.next_message_id()?;
        let n = message::function_return(self.body(), header.token, id, result)?;
        self.send_frame(n)
    }

    fn handle_variable_request(&mut self, header: &Header, plain_len: usize) -> Result<(), ProtocolError> {
        let key = message::request_key(&self.frame[..plain_len], header.options_offset())
            .and_then(|k| copy_str::<MAX_KEY_LENGTH>(k));
        let value = key.as_ref().and_then(|k| {
            self.descriptor.variable_type(k)?;
            self.descriptor.get_variable(k)
        });
        let n = match value {
            Some(v) => message::variable_value(&mut self.tx[2..], header.token, header.message_id, &v)?,
            None => {
                warn!("protocol: unknown variable requested");
                message::coded_ack(&mut self.tx[2..], header.token, code::NOT_FOUND, header.message_id)?
            }
        };
        self.send_frame(n)
    }

    fn handle_update_begin(&mut self, header: &Header) -> Result<(), ProtocolError> {
        let n = message::empty_ack(self.body(), header.message_id)?;
        self.send_frame(n)?;

        self.firmware.prepare_for_firmware_update();
        self.ota.begin(self.clock.millis());

        let id = self.next_message_id()?;
        let n = message::separate_response(self.body(), header.token, code::CHANGED, id)?;
        self.send_frame(n)
    }

    fn handle_chunk(&mut self, header: &Header, plain_len: usize) -> Result<(), ProtocolError> {
        let n = message::empty_ack(self.body(), header.message_id)?;
        self.send_frame(n)?;

        let now = self.clock.millis();
        let outcome = self
            .ota
            .on_chunk(&mut self.firmware, &self.frame[..plain_len], header.options_offset(), now);
        if outcome == ChunkOutcome::NotUpdating {
            return Ok(());
        }
        let id = self.next_message_id()?;
        let n = match outcome {
            ChunkOutcome::Missed { index } => message::chunk_missed(self.body(), id, index)?,
            ChunkOutcome::Bad => message::separate_response(self.body(), header.token, CHUNK_BAD, id)?,
            _ => message::separate_response(self.body(), header.token, CHUNK_OK, id)?,
        };
        self.send_frame(n)
    }

    fn handle_update_done(&mut self, header: &Header) -> Result<(), ProtocolError> {
        let n = message::coded_ack(self.body(), header.token, code::CHANGED, header.message_id)?;
        self.send_frame(n)?;
        self.ota.finish();
        self.firmware.finish_firmware_update();
        Ok(())
    }

    fn handle_signal(&mut self, header: &Header, on: bool) -> Result<(), ProtocolError> {
        let n = message::coded_ack(self.body(), header.token, code::CHANGED, header.message_id)?;
        self.send_frame(n)?;
        self.firmware.signal(on);
        Ok(())
    }

    fn handle_event(&mut self, plain_len: usize) {
        match events::decode_event(&self.frame[..plain_len]) {
            Ok(event) => {
                if self.subscriptions.matches(&event.name) {
                    debug!("event: delivering {}", event.name);
                    self.descriptor.on_event(&event.name, event.data);
                } else {
                    debug!("event: no subscription for {}", event.name);
                }
            }
            Err(e) => warn!("event: malformed inbound event: {}", e),
        }
    }

    fn handle_time(&mut self, header: &Header, plain_len: usize) {
        let mut options = Options::new(&self.frame[..plain_len], header.options_offset());
        for _ in options.by_ref() {}
        let Some(&[a, b, c, d]) = options.payload().get(..4) else {
            warn!("protocol: time response without payload");
            return;
        };
        let unix = u32::from_be_bytes([a, b, c, d]);
        let now = self.clock.millis();
        let latency = self
            .time_request_millis
            .take()
            .map_or(0, |sent| now.wrapping_sub(sent) / 2000);
        self.firmware.set_time(unix.wrapping_sub(latency));
    }

    // ── Device-initiated messages ─────────────────────────────

    /// Publish an event.
    ///
    /// Returns `Ok(false)` when the rate limit or a running OTA update
    /// refuses the publish; nothing is sent in that case.
    pub fn publish(
        &mut self,
        name: &str,
        data: &[u8],
        ttl_secs: u32,
        event_type: EventType,
    ) -> Result<bool, ProtocolError> {
        if self.session.is_none() {
            return Err(ProtocolError::NoSession);
        }
        if self.ota.is_updating() {
            debug!("event: publish refused during update");
            return Ok(false);
        }
        if !self.rate.try_acquire(self.clock.millis(), self.config.publish_window_ms) {
            return Ok(false);
        }
        let result = self.send_event(name, data, ttl_secs, event_type);
        self.guard(result).map(|()| true)
    }

    fn send_event(&mut self, name: &str, data: &[u8], ttl_secs: u32, event_type: EventType) -> Result<(), ProtocolError> {
        let id = self.next_message_id()?;
        let default_ttl = self.config.default_event_ttl_secs;
        let n = events::encode_event(self.body(), id, name, data, ttl_secs, event_type, default_ttl)?;
        debug!("event: publishing {}", name);
        self.send_frame(n)
    }

    /// Register an event filter and, when connected, send the request.
    ///
    /// Returns `Ok(false)` when the subscription table is full.
    pub fn subscribe(&mut self, filter: &str, scope: SubscriptionScope) -> Result<bool, ProtocolError> {
        if filter.is_empty() && scope == SubscriptionScope::Firehose {
            return Err(CodecError::FirehoseRequiresName.into());
        }
        if !self.subscriptions.add(filter, scope) {
            warn!("event: subscription table full");
            return Ok(false);
        }
        if self.session.is_some() {
            let result = self.send_subscription(filter, scope);
            self.guard(result)?;
        }
        Ok(true)
    }

    /// Re-send every registered subscription, e.g. after a reconnect.
    pub fn send_subscriptions(&mut self) -> Result<(), ProtocolError> {
        if self.session.is_none() {
            return Err(ProtocolError::NoSession);
        }
        let entries: Vec<Subscription, MAX_SUBSCRIPTIONS> = self.subscriptions.iter().cloned().collect();
        for entry in &entries {
            let result = self.send_subscription(&entry.filter, entry.scope);
            self.guard(result)?;
        }
        Ok(())
    }

    pub fn remove_subscriptions(&mut self) {
        self.subscriptions.clear();
    }

    fn send_subscription(&mut self, filter: &str, scope: SubscriptionScope) -> Result<(), ProtocolError> {
        let id = self.next_message_id()?;
        let n = events::encode_subscription(self.body(), id, filter, scope)?;
        debug!("event: subscribing to {}", filter);
        self.send_frame(n)
    }

    /// Ask the cloud for the current time; the answer reaches
    /// [`FirmwarePort::set_time`]. Refused during an OTA update.
    pub fn send_time_request(&mut self) -> Result<bool, ProtocolError> {
        if self.ota.is_updating() {
            return Ok(false);
        }
        let result = self.request_time();
        self.guard(result).map(|()| true)
    }

    fn request_time(&mut self) -> Result<(), ProtocolError> {
        let session = self.session.as_mut().ok_or(ProtocolError::NoSession)?;
        let id = session.next_message_id();
        let token = session.next_token();
        let n = message::time_request(self.body(), id, token)?;
        self.time_request_millis = Some(self.clock.millis());
        self.send_frame(n)
    }

    // ── Framing helpers ───────────────────────────────────────

    fn next_message_id(&mut self) -> Result<u16, ProtocolError> {
        self.session
            .as_mut()
            .map(Session::next_message_id)
            .ok_or(ProtocolError::NoSession)
    }

    /// Outbound frame body, after the length prefix.
    fn body(&mut self) -> &mut [u8] {
        &mut self.tx[2..]
    }

    /// Encrypt `tx[2..2 + len]`, prefix it and send it.
    fn send_frame(&mut self, len: usize) -> Result<(), ProtocolError> {
        let session = self.session.as_mut().ok_or(ProtocolError::NoSession)?;
        session.encrypt(&mut self.crypto, &mut self.tx[2..2 + len])?;
        self.tx[..2].copy_from_slice(&(len as u16).to_be_bytes());
        blocking_send(
            &mut self.transport,
            &self.clock,
            &self.tx[..2 + len],
            self.config.blocking_timeout_ms,
        )?;
        Ok(())
    }
}

/// Separate-response codes for a received chunk.
const CHUNK_OK: u8 = code::CHANGED;
const CHUNK_BAD: u8 = code::BAD_REQUEST;

/// Copy a key or argument out of the frame, rejecting oversize or
/// non-UTF-8 values.
fn copy_str<const M: usize>(bytes: &[u8]) -> Option<String<M>> {
    let s = core::str::from_utf8(bytes).ok()?;
    let mut out = String::new();
    out.push_str(s).ok()?;
    Some(out)
}

/// Key and argument of a function call: the option after the `f` path is
/// the key, the one after that (if any) is the argument.
fn parse_function_call(
    frame: &[u8],
    options_offset: usize,
) -> Option<(String<MAX_KEY_LENGTH>, String<MAX_FUNCTION_ARG_LENGTH>)> {
    let mut options = Options::new(frame, options_offset);
    let _path = options.next()?;
    let key = copy_str(options.next()?.value)?;
    let arg = match options.next() {
        Some(o) => copy_str(o.value)?,
        None => String::new(),
    };
    if options.failed() {
        return None;
    }
    Some((key, arg))
}
