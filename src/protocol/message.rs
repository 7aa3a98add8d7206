//! Message classification and outbound frame builders.
//!
//! ```text
//!  code  │ path │ kind
//! ───────┼──────┼──────────────────────────────
//!  GET   │ v    │ VariableRequest
//!  GET   │ d    │ Describe
//!  POST  │ h    │ Hello
//!  POST  │ f    │ FunctionCall
//!  POST  │ u    │ UpdateBegin
//!  POST  │ c    │ Chunk
//!  POST  │ e/E  │ Event
//!  PUT   │ k    │ KeyChange
//!  PUT   │ u    │ UpdateDone
//!  PUT   │ s    │ SignalStart / SignalStop (first payload byte)
//!  EMPTY │  -   │ Ping (CON) / EmptyAck
//!  2.05  │  -   │ Time
//! ```
//!
//! Builders write an unencrypted, PKCS#7-padded frame body into `out`
//! and return its padded length. Message ids and tokens are supplied by
//! the caller so the builders stay pure.

use super::coap::{
    BLOCK_SIZE, FrameWriter, MessageType, OPTION_URI_PATH, code, decode_header,
};
use crate::error::CodecError;
use crate::ports::{DescriptorPort, VariableValue};

/// Function and variable keys are truncated to this many bytes.
pub const MAX_KEY_LENGTH: usize = 12;

/// Longest function argument the device accepts.
pub const MAX_FUNCTION_ARG_LENGTH: usize = 63;

/// Classified inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Hello,
    Describe,
    FunctionCall,
    VariableRequest,
    UpdateBegin,
    UpdateDone,
    Chunk,
    KeyChange,
    SignalStart,
    SignalStop,
    Ping,
    EmptyAck,
    Event,
    Time,
    Error,
}

/// Classify an unpadded plaintext frame. Never fails; anything
/// unrecognised or truncated is [`MessageKind::Error`].
pub fn classify(frame: &[u8]) -> MessageKind {
    let Ok(header) = decode_header(frame) else {
        return MessageKind::Error;
    };
    match (header.code, header.path) {
        (code::GET, Some(b'v')) => MessageKind::VariableRequest,
        (code::GET, Some(b'd')) => MessageKind::Describe,
        (code::POST, Some(b'h')) => MessageKind::Hello,
        (code::POST, Some(b'f')) => MessageKind::FunctionCall,
        (code::POST, Some(b'u')) => MessageKind::UpdateBegin,
        (code::POST, Some(b'c')) => MessageKind::Chunk,
        (code::POST, Some(b'e' | b'E')) => MessageKind::Event,
        (code::PUT, Some(b'k')) => MessageKind::KeyChange,
        (code::PUT, Some(b'u')) => MessageKind::UpdateDone,
        (code::PUT, Some(b's')) => {
            if frame
                .get(header.path_offset() + 2)
                .is_some_and(|&b| b != 0)
            {
                MessageKind::SignalStart
            } else {
                MessageKind::SignalStop
            }
        }
        (code::EMPTY, _) if header.msg_type == MessageType::Confirmable => MessageKind::Ping,
        (code::EMPTY, _) => MessageKind::EmptyAck,
        (code::CONTENT, _) => MessageKind::Time,
        _ => MessageKind::Error,
    }
}

// ── Acknowledgements ──────────────────────────────────────────

/// `ACK 0.00` echoing the request id.
pub fn empty_ack(out: &mut [u8], message_id: u16) -> Result<usize, CodecError> {
    let mut w = FrameWriter::new(out);
    w.header(MessageType::Acknowledgement, code::EMPTY, message_id, None)?;
    w.finish()
}

/// Piggybacked `ACK <code>` echoing the request id, and the token when given.
pub fn coded_ack(
    out: &mut [u8],
    token: Option<u8>,
    code: u8,
    message_id: u16,
) -> Result<usize, CodecError> {
    let mut w = FrameWriter::new(out);
    w.header(MessageType::Acknowledgement, code, message_id, token)?;
    w.finish()
}

/// Separate `NON <code>` response with a fresh id and the request token.
pub fn separate_response(
    out: &mut [u8],
    token: Option<u8>,
    code: u8,
    message_id: u16,
) -> Result<usize, CodecError> {
    let mut w = FrameWriter::new(out);
    w.header(MessageType::NonConfirmable, code, message_id, token)?;
    w.finish()
}

// ── Function and variable results ─────────────────────────────

/// `NON 2.04` carrying a function's return value as i32 BE.
pub fn function_return(
    out: &mut [u8],
    token: Option<u8>,
    message_id: u16,
    value: i32,
) -> Result<usize, CodecError> {
    let mut w = FrameWriter::new(out);
    w.header(MessageType::NonConfirmable, code::CHANGED, message_id, token)?
        .payload(&value.to_be_bytes())?;
    w.finish()
}

/// `ACK 2.05` carrying a variable value.
///
/// Booleans are one byte, ints i32 BE, doubles the device's native
/// little-endian layout. Strings are clipped so the padded frame still
/// fits `out`.
pub fn variable_value(
    out: &mut [u8],
    token: Option<u8>,
    message_id: u16,
    value: &VariableValue<'_>,
) -> Result<usize, CodecError> {
    let room = out.len().saturating_sub(6 + BLOCK_SIZE);
    let mut w = FrameWriter::new(out);
    w.header(MessageType::Acknowledgement, code::CONTENT, message_id, token)?;
    match *value {
        VariableValue::Boolean(b) => w.payload(&[u8::from(b)])?,
        VariableValue::Int(i) => w.payload(&i.to_be_bytes())?,
        VariableValue::Double(d) => w.payload(&d.to_le_bytes())?,
        VariableValue::String(s) => {
            let bytes = s.as_bytes();
            w.payload(&bytes[..bytes.len().min(room)])?
        }
    };
    w.finish()
}

/// `ACK 2.05` with the JSON description of functions and variables:
/// `{"f":["fn",..],"v":{"var":T,..}}` where `T` is the type code digit.
pub fn describe<D: DescriptorPort + ?Sized>(
    out: &mut [u8],
    token: Option<u8>,
    message_id: u16,
    descriptor: &D,
) -> Result<usize, CodecError> {
    let mut w = FrameWriter::new(out);
    w.header(MessageType::Acknowledgement, code::CONTENT, message_id, token)?
        .byte(super::coap::PAYLOAD_MARKER)?
        .bytes(b"{\"f\":[")?;
    let mut first = true;
    for i in 0..descriptor.num_functions() {
        let Some(key) = descriptor.function_key(i) else {
            continue;
        };
        if !first {
            w.byte(b',')?;
        }
        first = false;
        w.byte(b'"')?.bytes(truncate_key(key))?.byte(b'"')?;
    }
    w.bytes(b"],\"v\":{")?;
    first = true;
    for i in 0..descriptor.num_variables() {
        let Some(key) = descriptor.variable_key(i) else {
            continue;
        };
        let Some(var_type) = descriptor.variable_type(key) else {
            continue;
        };
        if !first {
            w.byte(b',')?;
        }
        first = false;
        w.byte(b'"')?
            .bytes(truncate_key(key))?
            .bytes(b"\":")?
            .byte(b'0' + var_type.code())?;
    }
    w.bytes(b"}}")?;
    w.finish()
}

/// Keys longer than [`MAX_KEY_LENGTH`] are cut on the wire.
pub fn truncate_key(key: &str) -> &[u8] {
    let bytes = key.as_bytes();
    &bytes[..bytes.len().min(MAX_KEY_LENGTH)]
}

// ── Device-initiated requests ─────────────────────────────────

/// `CON 0.00` keepalive.
pub fn ping(out: &mut [u8], message_id: u16) -> Result<usize, CodecError> {
    let mut w = FrameWriter::new(out);
    w.header(MessageType::Confirmable, code::EMPTY, message_id, None)?;
    w.finish()
}

/// `CON GET /c` asking the cloud to (re)send chunk `chunk_index`.
pub fn chunk_missed(
    out: &mut [u8],
    message_id: u16,
    chunk_index: u16,
) -> Result<usize, CodecError> {
    let mut w = FrameWriter::new(out);
    w.header(MessageType::Confirmable, code::GET, message_id, None)?
        .path(b'c')?
        .payload(&chunk_index.to_be_bytes())?;
    w.finish()
}

/// `NON POST /h` announcing product, version and the OTA result.
pub fn hello(
    out: &mut [u8],
    message_id: u16,
    product_id: u16,
    product_firmware_version: u16,
    newly_upgraded: bool,
) -> Result<usize, CodecError> {
    let [pid_hi, pid_lo] = product_id.to_be_bytes();
    let [ver_hi, ver_lo] = product_firmware_version.to_be_bytes();
    let mut w = FrameWriter::new(out);
    w.header(MessageType::NonConfirmable, code::POST, message_id, None)?
        .path(b'h')?
        .payload(&[pid_hi, pid_lo, ver_hi, ver_lo, 0, u8::from(newly_upgraded)])?;
    w.finish()
}

/// `CON GET /t` asking the cloud for the current Unix time.
pub fn time_request(out: &mut [u8], message_id: u16, token: u8) -> Result<usize, CodecError> {
    let mut w = FrameWriter::new(out);
    w.header(MessageType::Confirmable, code::GET, message_id, Some(token))?
        .path(b't')?;
    w.finish()
}

/// Key carried in the second Uri-Path option of a function or variable
/// request, or `None` when the frame has no key.
pub fn request_key(frame: &[u8], options_offset: usize) -> Option<&[u8]> {
    super::coap::Options::new(frame, options_offset)
        .filter(|o| o.number == OPTION_URI_PATH)
        .nth(1)
        .map(|o| o.value)
}
