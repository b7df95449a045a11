//! Chat wire protocol.
//!
//! Every message travels as one fixed-size binary frame, in both directions:
//!
//! ```text
//! offset  size  field
//!      0     4  kind            (u32, native byte order)
//!      4    32  sender          (NUL padded, at most 31 bytes of text)
//!     36   928  body            (NUL padded, at most 927 bytes of text)
//!    964     4  padding
//!    968     8  sent_at         (i64 unix seconds, native byte order)
//!    976     8  encoded_length  (u64, always FRAME_SIZE, informational)
//! ```
//!
//! Integers are not converted to network byte order, so peers must share the
//! platform's endianness. The layout is what the C chat client puts on the
//! wire, which keeps old clients working against this server.
//!
//! ## Handshake
//!
//! ```text
//! client                         server
//!   | -- Connect{sender=name} ---> |
//!   | <-- Notification ----------- |   registered
//!   | <-- Error ------------------ |   rejected, server closes
//! ```

pub mod codec;
pub mod message;
pub mod username;

pub use codec::FrameCodec;
pub use message::{
    ChatMessage, DecodeError, MessageKind, BUFFER_SIZE, FRAME_SIZE, MESSAGE_SIZE, SYSTEM_SENDER,
    USERNAME_SIZE,
};
pub use username::{validate_username, Username, UsernameError, MAX_USERNAME_LEN};
