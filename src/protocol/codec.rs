//! Stream framing for chat messages.
//!
//! TCP does not preserve message boundaries, so the decoder buffers until a
//! whole `FRAME_SIZE` frame is available. A frame that fails to decode is
//! consumed and yielded as an `Err` item; the stream itself stays usable.

use super::message::{ChatMessage, DecodeError, FRAME_SIZE};
use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Result<ChatMessage, DecodeError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_SIZE {
            src.reserve(FRAME_SIZE - src.len());
            return Ok(None);
        }
        let frame = src.split_to(FRAME_SIZE);
        Ok(Some(ChatMessage::decode(&frame)))
    }
}

impl<'a> Encoder<&'a ChatMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &'a ChatMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}
