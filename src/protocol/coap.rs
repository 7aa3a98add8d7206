//! Compact CoAP-style frame layout.
//!
//! ```text
//! ┌──────────────┬──────┬────────────┬─────────┬──────────────┬──────┬─────────┐
//! │ 0x40|T<<4|TKL│ code │ message id │ token   │ options      │ 0xFF │ payload │
//! │ 1B           │ 1B   │ 2B BE      │ TKL B   │ delta/len... │      │         │
//! └──────────────┴──────┴────────────┴─────────┴──────────────┴──────┴─────────┘
//! ```
//!
//! Commands are selected by a single one-character Uri-Path option
//! (`0xB1 <char>`) right after the token. Every frame is PKCS#7-padded to
//! a multiple of 16 before encryption.

use crate::error::CodecError;

/// AES block size; every encrypted frame is a multiple of this.
pub const BLOCK_SIZE: usize = 16;

/// Marker between options and payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Option header for a one-byte Uri-Path (delta 11, length 1).
pub const URI_PATH_1: u8 = 0xB1;

pub const OPTION_URI_PATH: u16 = 11;
pub const OPTION_MAX_AGE: u16 = 14;
pub const OPTION_URI_QUERY: u16 = 15;

/// Response and request codes used by the protocol.
pub mod code {
    pub const EMPTY: u8 = 0x00;
    pub const GET: u8 = 0x01;
    pub const POST: u8 = 0x02;
    pub const PUT: u8 = 0x03;
    /// 2.04
    pub const CHANGED: u8 = 0x44;
    /// 2.05
    pub const CONTENT: u8 = 0x45;
    /// 4.00
    pub const BAD_REQUEST: u8 = 0x80;
    /// 4.04
    pub const NOT_FOUND: u8 = 0x84;
}

/// CoAP message type (bits 5..4 of the first byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl MessageType {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }
}

/// Decoded fixed header of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: MessageType,
    pub code: u8,
    pub message_id: u16,
    /// First token byte, if the frame carries a token.
    pub token: Option<u8>,
    pub token_len: usize,
    /// One-character command path, when a `0xB1` Uri-Path follows the token.
    pub path: Option<u8>,
}

impl Header {
    /// Offset of the first option byte.
    pub const fn options_offset(&self) -> usize {
        4 + self.token_len
    }

    /// Offset of the one-character command path.
    pub const fn path_offset(&self) -> usize {
        5 + self.token_len
    }
}

/// Write the fixed header. Returns the number of bytes written (4 or 5).
pub fn encode_header(
    out: &mut [u8],
    msg_type: MessageType,
    code: u8,
    message_id: u16,
    token: Option<u8>,
) -> Result<usize, CodecError> {
    let len = 4 + usize::from(token.is_some());
    if out.len() < len {
        return Err(CodecError::BufferTooSmall);
    }
    out[0] = 0x40 | (msg_type as u8) << 4 | u8::from(token.is_some());
    out[1] = code;
    out[2..4].copy_from_slice(&message_id.to_be_bytes());
    if let Some(t) = token {
        out[4] = t;
    }
    Ok(len)
}

/// Parse the fixed header. Tokens longer than 8 bytes are rejected.
pub fn decode_header(frame: &[u8]) -> Result<Header, CodecError> {
    if frame.len() < 4 {
        return Err(CodecError::Truncated);
    }
    let token_len = usize::from(frame[0] & 0x0F);
    if token_len > 8 {
        return Err(CodecError::InvalidOption);
    }
    if frame.len() < 4 + token_len {
        return Err(CodecError::Truncated);
    }
    Ok(Header {
        msg_type: MessageType::from_bits(frame[0] >> 4),
        code: frame[1],
        message_id: u16::from_be_bytes([frame[2], frame[3]]),
        token: (token_len > 0).then(|| frame[4]),
        token_len,
        path: match frame.get(4 + token_len..6 + token_len) {
            Some(&[URI_PATH_1, c]) => Some(c),
            _ => None,
        },
    })
}

// ── Options ───────────────────────────────────────────────────

/// One decoded option: absolute number and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoapOption<'a> {
    pub number: u16,
    pub value: &'a [u8],
}

/// Iterator over the options of a frame.
///
/// Stops at the payload marker or the end of the frame. After `None`,
/// [`Options::payload`] gives whatever follows the marker.
pub struct Options<'a> {
    frame: &'a [u8],
    pos: usize,
    number: u16,
    payload_start: Option<usize>,
    failed: bool,
}

impl<'a> Options<'a> {
    pub fn new(frame: &'a [u8], offset: usize) -> Self {
        Self {
            frame,
            pos: offset,
            number: 0,
            payload_start: None,
            failed: false,
        }
    }

    /// Bytes after the payload marker, once iteration has reached it.
    pub fn payload(&self) -> &'a [u8] {
        self.payload_start.map_or(&[], |p| &self.frame[p..])
    }

    /// Whether iteration stopped on a malformed option.
    pub fn failed(&self) -> bool {
        self.failed
    }

    fn extended(&mut self, nibble: u8) -> Result<u16, CodecError> {
        match nibble {
            0..=12 => Ok(u16::from(nibble)),
            13 => {
                let b = *self.frame.get(self.pos).ok_or(CodecError::Truncated)?;
                self.pos += 1;
                Ok(u16::from(b) + 13)
            }
            14 => {
                let hi = *self.frame.get(self.pos).ok_or(CodecError::Truncated)?;
                let lo = *self.frame.get(self.pos + 1).ok_or(CodecError::Truncated)?;
                self.pos += 2;
                Ok(u16::from_be_bytes([hi, lo]).saturating_add(269))
            }
            _ => Err(CodecError::InvalidOption),
        }
    }

    fn step(&mut self) -> Result<Option<CoapOption<'a>>, CodecError> {
        let Some(&b) = self.frame.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        if b == PAYLOAD_MARKER {
            self.payload_start = Some(self.pos);
            return Ok(None);
        }
        let delta = self.extended(b >> 4)?;
        let len = usize::from(self.extended(b & 0x0F)?);
        let end = self.pos + len;
        if end > self.frame.len() {
            return Err(CodecError::Truncated);
        }
        self.number = self.number.saturating_add(delta);
        let value = &self.frame[self.pos..end];
        self.pos = end;
        Ok(Some(CoapOption {
            number: self.number,
            value,
        }))
    }
}

impl<'a> Iterator for Options<'a> {
    type Item = CoapOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.payload_start.is_some() {
            return None;
        }
        match self.step() {
            Ok(opt) => opt,
            Err(_) => {
                self.failed = true;
                None
            }
        }
    }
}

// ── Writer ────────────────────────────────────────────────────

/// Cursor for building an outbound frame in a caller-owned buffer.
pub struct FrameWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    last_option: u16,
}

impl<'a> FrameWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            last_option: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn header(
        &mut self,
        msg_type: MessageType,
        code: u8,
        message_id: u16,
        token: Option<u8>,
    ) -> Result<&mut Self, CodecError> {
        self.len += encode_header(&mut self.buf[self.len..], msg_type, code, message_id, token)?;
        Ok(self)
    }

    pub fn byte(&mut self, b: u8) -> Result<&mut Self, CodecError> {
        self.bytes(&[b])
    }

    pub fn bytes(&mut self, data: &[u8]) -> Result<&mut Self, CodecError> {
        let end = self.len + data.len();
        if end > self.buf.len() {
            return Err(CodecError::BufferTooSmall);
        }
        self.buf[self.len..end].copy_from_slice(data);
        self.len = end;
        Ok(self)
    }

    /// Append an option. Numbers must be non-decreasing; deltas and
    /// lengths above 12 use the one-byte extended form (max 268).
    pub fn option(&mut self, number: u16, value: &[u8]) -> Result<&mut Self, CodecError> {
        let delta = number
            .checked_sub(self.last_option)
            .ok_or(CodecError::InvalidOption)?;
        let (delta_nibble, delta_ext) = split_nibble(usize::from(delta))?;
        let (len_nibble, len_ext) = split_nibble(value.len())?;
        self.byte(delta_nibble << 4 | len_nibble)?;
        if let Some(e) = delta_ext {
            self.byte(e)?;
        }
        if let Some(e) = len_ext {
            self.byte(e)?;
        }
        self.bytes(value)?;
        self.last_option = number;
        Ok(self)
    }

    /// One-character command path.
    pub fn path(&mut self, selector: u8) -> Result<&mut Self, CodecError> {
        self.option(OPTION_URI_PATH, &[selector])
    }

    /// Payload marker followed by `data`. Empty data writes nothing.
    pub fn payload(&mut self, data: &[u8]) -> Result<&mut Self, CodecError> {
        if data.is_empty() {
            return Ok(self);
        }
        self.byte(PAYLOAD_MARKER)?;
        self.bytes(data)
    }

    /// PKCS#7-pad the frame in place and return the padded length.
    pub fn finish(self) -> Result<usize, CodecError> {
        pkcs7_pad(self.buf, self.len)
    }
}

fn split_nibble(v: usize) -> Result<(u8, Option<u8>), CodecError> {
    match v {
        0..=12 => Ok((v as u8, None)),
        13..=268 => Ok((13, Some((v - 13) as u8))),
        _ => Err(CodecError::InvalidOption),
    }
}

// ── PKCS#7 ────────────────────────────────────────────────────

/// Pad `buf[..len]` up to the next block boundary. A full block of
/// padding is added when `len` is already aligned.
pub fn pkcs7_pad(buf: &mut [u8], len: usize) -> Result<usize, CodecError> {
    let padded = (len & !(BLOCK_SIZE - 1)) + BLOCK_SIZE;
    if padded > buf.len() {
        return Err(CodecError::BufferTooSmall);
    }
    let pad = (padded - len) as u8;
    buf[len..padded].fill(pad);
    Ok(padded)
}

/// Length of the frame with its padding removed.
pub fn pkcs7_unpad(frame: &[u8]) -> Result<usize, CodecError> {
    let &pad = frame.last().ok_or(CodecError::InvalidPadding)?;
    let pad = usize::from(pad);
    if pad == 0 || pad > BLOCK_SIZE || pad > frame.len() {
        return Err(CodecError::InvalidPadding);
    }
    Ok(frame.len() - pad)
}
