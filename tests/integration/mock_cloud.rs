//! Mock cloud peer and device ports for integration tests.
//!
//! The peer holds the mirror image of the device session: it encrypts
//! with the device's receive IV (chained on the first ciphertext block)
//! and decrypts with the device's send IV (chained on the last block).
//! Ports record every call so tests can assert on the full history.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use cloudlink::config::ProtocolConfig;
use cloudlink::error::CryptoError;
use cloudlink::ports::{Clock, DescriptorPort, FirmwarePort, VariableType, VariableValue};
use cloudlink::protocol::coap::{pkcs7_pad, pkcs7_unpad};
use cloudlink::protocol::crypto::{aes_cbc_decrypt, aes_cbc_encrypt, credential_hmac};
use cloudlink::protocol::handshake::{CREDENTIALS_BLOB_SIZE, CREDENTIALS_CIPHERTEXT_SIZE, NONCE_SIZE};
use cloudlink::protocol::session::CREDENTIALS_SIZE;
use cloudlink::protocol::{Crypto, Ports, Protocol, Transport};

pub const DEVICE_ID: [u8; 12] = *b"device-0001!";

/// Key, IV seed and salt the mock cloud hands out. Salt seeds message id
/// 0x1000 and token 0x20.
pub fn credentials() -> [u8; CREDENTIALS_SIZE] {
    let mut c = [0u8; CREDENTIALS_SIZE];
    for (i, b) in c[..32].iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(7).wrapping_add(3);
    }
    c[32..40].copy_from_slice(&[0x10, 0x00, 0x20, 0, 0, 0, 0, 0]);
    c
}

// ── Transport ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MockTransport {
    pub inbound: VecDeque<u8>,
    pub outbound: Vec<u8>,
    /// Largest read served per call; 0 means unlimited.
    pub max_read: usize,
    pub fail_send: bool,
    /// Report the peer gone once `inbound` is drained.
    pub hung_up: bool,
}

impl Transport for MockTransport {
    type Error = &'static str;

    fn send(&mut self, data: &[u8]) -> Result<usize, &'static str> {
        if self.fail_send {
            return Err("send failed");
        }
        self.outbound.extend_from_slice(data);
        Ok(data.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, &'static str> {
        if self.hung_up && self.inbound.is_empty() {
            return Err("hung up");
        }
        let mut n = buf.len().min(self.inbound.len());
        if self.max_read > 0 {
            n = n.min(self.max_read);
        }
        for slot in &mut buf[..n] {
            *slot = self.inbound.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn is_closed(error: &&'static str) -> bool {
        *error == "hung up"
    }
}

// ── Clock ─────────────────────────────────────────────────────

/// Shared clock that advances by `step` on every read so busy-wait
/// loops always terminate.
#[derive(Clone)]
pub struct MockClock {
    now: Rc<Cell<u32>>,
    step: u32,
}

#[allow(dead_code)]
impl MockClock {
    pub fn new(start: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
            step: 1,
        }
    }

    pub fn now(&self) -> u32 {
        self.now.get()
    }

    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for MockClock {
    fn millis(&self) -> u32 {
        let t = self.now.get();
        self.now.set(t.wrapping_add(self.step));
        t
    }
}

// ── Crypto ────────────────────────────────────────────────────

/// RSA stand-in: "encrypt" copies the input into a 256-byte block,
/// "decrypt" returns the first 40 bytes, "verify" compares the signature
/// prefix with the digest. AES uses the real software default.
#[derive(Default)]
pub struct MockCrypto {
    pub fail_decrypt: bool,
}

impl Crypto for MockCrypto {
    fn rsa_encrypt(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, CryptoError> {
        if output.len() < 256 || input.len() > 256 {
            return Err(CryptoError::InvalidLength);
        }
        output[..256].fill(0);
        output[..input.len()].copy_from_slice(input);
        Ok(256)
    }

    fn rsa_decrypt(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, CryptoError> {
        if self.fail_decrypt {
            return Err(CryptoError::Backend);
        }
        output[..CREDENTIALS_SIZE].copy_from_slice(&input[..CREDENTIALS_SIZE]);
        Ok(CREDENTIALS_SIZE)
    }

    fn rsa_verify(&mut self, signature: &[u8], digest: &[u8]) -> Result<(), CryptoError> {
        if signature.get(..digest.len()) == Some(digest) {
            Ok(())
        } else {
            Err(CryptoError::Backend)
        }
    }
}

// ── Firmware port ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareCall {
    Prepare,
    Finish,
    Abort,
    Save(Vec<u8>),
    Signal(bool),
    StatusSent,
    SetTime(u32),
}

/// CRC is the byte sum. Saved chunks return the scripted next index, or
/// one past the number of saves once the script runs out.
#[derive(Default)]
pub struct MockFirmware {
    pub calls: Vec<FirmwareCall>,
    pub next_indices: VecDeque<u16>,
    pub newly_upgraded: bool,
    saves: u16,
}

#[allow(dead_code)]
impl MockFirmware {
    pub fn saved_chunks(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, FirmwareCall::Save(_))).count()
    }

    pub fn last_time(&self) -> Option<u32> {
        self.calls.iter().rev().find_map(|c| match c {
            FirmwareCall::SetTime(t) => Some(*t),
            _ => None,
        })
    }
}

pub fn byte_sum(data: &[u8]) -> u32 {
    data.iter().map(|&b| u32::from(b)).sum()
}

impl FirmwarePort for MockFirmware {
    fn prepare_for_firmware_update(&mut self) {
        self.saves = 0;
        self.calls.push(FirmwareCall::Prepare);
    }

    fn finish_firmware_update(&mut self) {
        self.calls.push(FirmwareCall::Finish);
    }

    fn abort_firmware_update(&mut self) {
        self.calls.push(FirmwareCall::Abort);
    }

    fn calculate_crc(&mut self, data: &[u8]) -> u32 {
        byte_sum(data)
    }

    fn save_firmware_chunk(&mut self, data: &[u8]) -> u16 {
        self.calls.push(FirmwareCall::Save(data.to_vec()));
        self.saves += 1;
        self.next_indices.pop_front().unwrap_or(self.saves)
    }

    fn signal(&mut self, on: bool) {
        self.calls.push(FirmwareCall::Signal(on));
    }

    fn was_ota_upgrade_successful(&self) -> bool {
        self.newly_upgraded
    }

    fn ota_upgrade_status_sent(&mut self) {
        self.calls.push(FirmwareCall::StatusSent);
    }

    fn set_time(&mut self, unix_secs: u32) {
        self.calls.push(FirmwareCall::SetTime(unix_secs));
    }
}

// ── Descriptor port ───────────────────────────────────────────

pub enum Slot {
    Bool(bool),
    Int(i32),
    Str(String),
    Double(f64),
}

#[derive(Default)]
pub struct MockDescriptor {
    /// Function name and the value it returns.
    pub functions: Vec<(String, i32)>,
    pub variables: Vec<(String, Slot)>,
    pub calls: Vec<(String, String)>,
    pub events: Vec<(String, Vec<u8>)>,
}

impl MockDescriptor {
    pub fn sample() -> Self {
        Self {
            functions: vec![("brew".into(), 42), ("reset".into(), -1)],
            variables: vec![
                ("temp".into(), Slot::Int(21)),
                ("on".into(), Slot::Bool(true)),
                ("name".into(), Slot::Str("kettle".into())),
                ("ratio".into(), Slot::Double(0.5)),
            ],
            ..Self::default()
        }
    }

    fn slot(&self, key: &str) -> Option<&Slot> {
        self.variables.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }
}

impl DescriptorPort for MockDescriptor {
    fn num_functions(&self) -> usize {
        self.functions.len()
    }

    fn function_key(&self, index: usize) -> Option<&str> {
        self.functions.get(index).map(|(k, _)| k.as_str())
    }

    fn call_function(&mut self, key: &str, arg: &str) -> i32 {
        self.calls.push((key.to_owned(), arg.to_owned()));
        self.functions
            .iter()
            .find(|(k, _)| k == key)
            .map_or(-1, |(_, r)| *r)
    }

    fn num_variables(&self) -> usize {
        self.variables.len()
    }

    fn variable_key(&self, index: usize) -> Option<&str> {
        self.variables.get(index).map(|(k, _)| k.as_str())
    }

    fn variable_type(&self, key: &str) -> Option<VariableType> {
        self.get_variable(key).map(|v| v.var_type())
    }

    fn get_variable(&self, key: &str) -> Option<VariableValue<'_>> {
        Some(match self.slot(key)? {
            Slot::Bool(b) => VariableValue::Boolean(*b),
            Slot::Int(i) => VariableValue::Int(*i),
            Slot::Str(s) => VariableValue::String(s.as_str()),
            Slot::Double(d) => VariableValue::Double(*d),
        })
    }

    fn on_event(&mut self, name: &str, data: &[u8]) {
        self.events.push((name.to_owned(), data.to_vec()));
    }
}

// ── Cloud peer ────────────────────────────────────────────────

pub type Device = Protocol<MockTransport, MockCrypto, MockClock, MockFirmware, MockDescriptor>;

/// Server side of an established session.
pub struct CloudPeer {
    key: [u8; 16],
    /// Mirrors the device's `iv_receive`.
    iv_to_device: [u8; 16],
    /// Mirrors the device's `iv_send`.
    iv_from_device: [u8; 16],
}

#[allow(dead_code)]
impl CloudPeer {
    pub fn new(creds: &[u8; CREDENTIALS_SIZE]) -> Self {
        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&creds[..16]);
        iv.copy_from_slice(&creds[16..32]);
        Self {
            key,
            iv_to_device: iv,
            iv_from_device: iv,
        }
    }

    /// Signed credential blob as the server would send it.
    pub fn credentials_blob(creds: &[u8; CREDENTIALS_SIZE]) -> [u8; CREDENTIALS_BLOB_SIZE] {
        let mut blob = [0u8; CREDENTIALS_BLOB_SIZE];
        blob[..CREDENTIALS_SIZE].copy_from_slice(creds);
        let digest = credential_hmac(creds, &blob[..CREDENTIALS_CIPHERTEXT_SIZE]).unwrap();
        blob[CREDENTIALS_CIPHERTEXT_SIZE..CREDENTIALS_CIPHERTEXT_SIZE + digest.len()].copy_from_slice(&digest);
        blob
    }

    /// Pad, encrypt and length-prefix one plaintext frame.
    pub fn seal(&mut self, plain: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; plain.len() + 16];
        buf[..plain.len()].copy_from_slice(plain);
        let n = pkcs7_pad(&mut buf, plain.len()).unwrap();
        buf.truncate(n);
        aes_cbc_encrypt(&self.key, &self.iv_to_device, &mut buf).unwrap();
        self.iv_to_device.copy_from_slice(&buf[..16]);
        let mut wire = (n as u16).to_be_bytes().to_vec();
        wire.extend_from_slice(&buf);
        wire
    }

    /// Queue a plaintext frame for the device.
    pub fn send(&mut self, device: &mut Device, plain: &[u8]) {
        let wire = self.seal(plain);
        device.transport_mut().inbound.extend(wire);
    }

    /// Decrypt every frame the device has written since the last call.
    pub fn receive(&mut self, device: &mut Device) -> Vec<Vec<u8>> {
        let wire = std::mem::take(&mut device.transport_mut().outbound);
        self.open(&wire)
    }

    pub fn open(&mut self, mut wire: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while wire.len() >= 2 {
            let len = usize::from(u16::from_be_bytes([wire[0], wire[1]]));
            let mut buf = wire[2..2 + len].to_vec();
            let mut next_iv = [0u8; 16];
            next_iv.copy_from_slice(&buf[len - 16..]);
            aes_cbc_decrypt(&self.key, &self.iv_from_device, &mut buf).unwrap();
            self.iv_from_device = next_iv;
            let plain = pkcs7_unpad(&buf).unwrap();
            buf.truncate(plain);
            frames.push(buf);
            wire = &wire[2 + len..];
        }
        frames
    }
}

// ── Fixtures ──────────────────────────────────────────────────

pub fn device(clock: &MockClock) -> Device {
    Protocol::new(
        Ports {
            transport: MockTransport::default(),
            crypto: MockCrypto::default(),
            clock: clock.clone(),
            firmware: MockFirmware::default(),
            descriptor: MockDescriptor::sample(),
        },
        DEVICE_ID,
        ProtocolConfig::default(),
    )
}

/// Queue the server half of a handshake on the device transport.
pub fn script_handshake(device: &mut Device, creds: &[u8; CREDENTIALS_SIZE]) {
    let nonce = [0x5Au8; NONCE_SIZE];
    let blob = CloudPeer::credentials_blob(creds);
    let inbound = &mut device.transport_mut().inbound;
    inbound.extend(nonce);
    inbound.extend(blob);
}

/// A device with an established session, its peer and clock. The hello
/// has already been consumed.
pub fn connected() -> (Device, CloudPeer, MockClock) {
    let clock = MockClock::new(1_000);
    let mut dev = device(&clock);
    let creds = credentials();
    script_handshake(&mut dev, &creds);
    dev.handshake().expect("handshake");
    let mut peer = CloudPeer::new(&creds);
    let out = std::mem::take(&mut dev.transport_mut().outbound);
    let hello = peer.open(&out[256..]);
    assert_eq!(hello.len(), 1);
    (dev, peer, clock)
}

// ── Frame helpers ─────────────────────────────────────────────

/// `CON <code>` request with a one-byte token and a path selector,
/// followed by `rest` (options and/or payload).
pub fn request(code: u8, id: u16, token: u8, path: u8, rest: &[u8]) -> Vec<u8> {
    let [hi, lo] = id.to_be_bytes();
    let mut f = vec![0x41, code, hi, lo, token, 0xB1, path];
    f.extend_from_slice(rest);
    f
}

/// Option with delta 0 (another Uri-Path segment) and inline length.
pub fn path_segment(value: &[u8]) -> Vec<u8> {
    assert!(value.len() < 13);
    let mut o = vec![value.len() as u8];
    o.extend_from_slice(value);
    o
}

pub fn msg_type(frame: &[u8]) -> u8 {
    (frame[0] >> 4) & 0x03
}

pub fn msg_code(frame: &[u8]) -> u8 {
    frame[1]
}

pub fn msg_id(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[2], frame[3]])
}

pub fn token(frame: &[u8]) -> Option<u8> {
    if frame[0] & 0x0F == 0 { None } else { Some(frame[4]) }
}

pub const CON: u8 = 0;
pub const NON: u8 = 1;
pub const ACK: u8 = 2;
