//! Fixed-layout chat message and its binary encoding.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use std::fmt;
use thiserror::Error;

/// Size of the C client's receive buffer; the frame budget derives from it.
pub const BUFFER_SIZE: usize = 1024;

/// Sender field capacity, terminator included.
pub const USERNAME_SIZE: usize = 32;

/// Body field capacity, terminator included.
pub const MESSAGE_SIZE: usize = BUFFER_SIZE - USERNAME_SIZE - 64;

/// Sender name used for server-originated messages.
pub const SYSTEM_SENDER: &str = "System";

const KIND_OFFSET: usize = 0;
const SENDER_OFFSET: usize = KIND_OFFSET + 4;
const BODY_OFFSET: usize = SENDER_OFFSET + USERNAME_SIZE;
const SENT_AT_OFFSET: usize = align8(BODY_OFFSET + MESSAGE_SIZE);
const LENGTH_OFFSET: usize = SENT_AT_OFFSET + 8;

/// Bytes occupied by every message on the wire.
pub const FRAME_SIZE: usize = LENGTH_OFFSET + 8;

const _: () = assert!(FRAME_SIZE == 984);

const fn align8(offset: usize) -> usize {
    (offset + 7) & !7
}

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    Connect = 0,
    Disconnect = 1,
    Chat = 2,
    Notification = 3,
    Error = 4,
    Keepalive = 5,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Connect,
        MessageKind::Disconnect,
        MessageKind::Chat,
        MessageKind::Notification,
        MessageKind::Error,
        MessageKind::Keepalive,
    ];

    /// Wire tag of this kind.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u32) -> Result<MessageKind, DecodeError> {
        match tag {
            0 => Ok(MessageKind::Connect),
            1 => Ok(MessageKind::Disconnect),
            2 => Ok(MessageKind::Chat),
            3 => Ok(MessageKind::Notification),
            4 => Ok(MessageKind::Error),
            5 => Ok(MessageKind::Keepalive),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Connect => "connect",
            MessageKind::Disconnect => "disconnect",
            MessageKind::Chat => "chat",
            MessageKind::Notification => "notification",
            MessageKind::Error => "error",
            MessageKind::Keepalive => "keepalive",
        };
        f.write_str(name)
    }
}

/// Frame decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: got {len} bytes, expected {}", FRAME_SIZE)]
    Truncated { len: usize },

    #[error("unknown message kind {0}")]
    UnknownKind(u32),
}

/// One unit of wire communication.
///
/// `sender` and `body` are always bounded to their field capacities, both
/// when a message is built locally and when it is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    kind: MessageKind,
    sender: String,
    body: String,
    /// Unix seconds as sent; not validated.
    sent_at: i64,
    encoded_length: usize,
}

impl ChatMessage {
    /// Build a message stamped with the current time (whole seconds).
    ///
    /// Text longer than the field capacity is truncated on a character
    /// boundary; anything after an embedded NUL is dropped.
    pub fn new(kind: MessageKind, sender: &str, body: &str) -> Self {
        Self {
            kind,
            sender: bound(sender, USERNAME_SIZE).to_owned(),
            body: bound(body, MESSAGE_SIZE).to_owned(),
            sent_at: Utc::now().timestamp(),
            encoded_length: FRAME_SIZE,
        }
    }

    pub fn connect(username: &str) -> Self {
        Self::new(MessageKind::Connect, username, "")
    }

    pub fn disconnect(username: &str) -> Self {
        Self::new(MessageKind::Disconnect, username, "")
    }

    pub fn chat(sender: &str, body: &str) -> Self {
        Self::new(MessageKind::Chat, sender, body)
    }

    pub fn notification(body: &str) -> Self {
        Self::new(MessageKind::Notification, SYSTEM_SENDER, body)
    }

    pub fn error(body: &str) -> Self {
        Self::new(MessageKind::Error, SYSTEM_SENDER, body)
    }

    pub fn keepalive(sender: &str) -> Self {
        Self::new(MessageKind::Keepalive, sender, "")
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn sent_at(&self) -> i64 {
        self.sent_at
    }

    pub fn encoded_length(&self) -> usize {
        self.encoded_length
    }

    /// Encode into a standalone frame of exactly `FRAME_SIZE` bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_SIZE);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(FRAME_SIZE);
        dst.put_slice(&self.kind.tag().to_ne_bytes());
        put_padded(dst, self.sender.as_bytes(), USERNAME_SIZE);
        put_padded(dst, self.body.as_bytes(), MESSAGE_SIZE);
        dst.put_bytes(0, SENT_AT_OFFSET - (BODY_OFFSET + MESSAGE_SIZE));
        dst.put_slice(&self.sent_at.to_ne_bytes());
        dst.put_slice(&(FRAME_SIZE as u64).to_ne_bytes());
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Bytes past `FRAME_SIZE` are ignored.
    pub fn decode(src: &[u8]) -> Result<Self, DecodeError> {
        if src.len() < FRAME_SIZE {
            return Err(DecodeError::Truncated { len: src.len() });
        }

        let kind = MessageKind::from_tag(u32::from_ne_bytes(field(src, KIND_OFFSET)))?;
        let sender = read_text(&src[SENDER_OFFSET..SENDER_OFFSET + USERNAME_SIZE]);
        let body = read_text(&src[BODY_OFFSET..BODY_OFFSET + MESSAGE_SIZE]);

        let sent_at = i64::from_ne_bytes(field(src, SENT_AT_OFFSET));
        let encoded_length = u64::from_ne_bytes(field(src, LENGTH_OFFSET)) as usize;

        Ok(Self {
            kind,
            sender,
            body,
            sent_at,
            encoded_length,
        })
    }
}

/// Cut `text` at its first NUL and to at most `capacity - 1` bytes.
pub(crate) fn bound(text: &str, capacity: usize) -> &str {
    let text = text.find('\0').map_or(text, |nul| &text[..nul]);
    if text.len() < capacity {
        return text;
    }
    let mut end = capacity - 1;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn put_padded(dst: &mut BytesMut, text: &[u8], capacity: usize) {
    dst.put_slice(text);
    dst.put_bytes(0, capacity - text.len());
}

fn field<const N: usize>(src: &[u8], offset: usize) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&src[offset..offset + N]);
    raw
}

/// Read a NUL padded text field. The last byte is treated as the terminator
/// whatever its value.
fn read_text(raw: &[u8]) -> String {
    let capacity = raw.len();
    let raw = &raw[..capacity - 1];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = String::from_utf8_lossy(&raw[..end]);
    bound(&text, capacity).to_owned()
}
