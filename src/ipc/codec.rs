//! Length-prefixed MessagePack codec for tokio I/O.
//!
//! Framing: `[4 bytes: payload length, big-endian u32][N bytes: MessagePack payload]`

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{MAX_PAYLOAD_SIZE, Message, RawEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload too large: {0} bytes (max {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Splits a byte stream into length-prefixed frames.
#[derive(Debug, Default)]
struct FrameSplitter {
    /// Length of the frame being read, once its header is consumed.
    pending_len: Option<usize>,
}

impl FrameSplitter {
    fn next_frame(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, CodecError> {
        let payload_len = match self.pending_len {
            Some(len) => len,
            None => {
                if src.len() < 4 {
                    return Ok(None);
                }
                let len = src.get_u32() as usize;
                if len > MAX_PAYLOAD_SIZE {
                    return Err(CodecError::PayloadTooLarge(len));
                }
                self.pending_len = Some(len);
                len
            }
        };

        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            return Ok(None);
        }

        self.pending_len = None;
        Ok(Some(src.split_to(payload_len)))
    }
}

fn encode_message(item: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
    let payload = rmp_serde::to_vec_named(item)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }
    dst.reserve(4 + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.extend_from_slice(&payload);
    Ok(())
}

/// Typed codec: frames in, [`Message`] out.
///
/// Used by peers (the `status` command, tests). The service side uses
/// [`FrameCodec`] + [`decode_frame`] so an unknown `type` does not kill
/// the connection.
#[derive(Debug, Default)]
pub struct MessageCodec {
    frames: FrameSplitter,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.next_frame(src)? {
            Some(payload) => Ok(Some(rmp_serde::from_slice(&payload)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst)
    }
}

/// Frame-level codec returning raw payloads for two-phase decode.
#[derive(Debug, Default)]
pub struct FrameCodec {
    frames: FrameSplitter,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.frames.next_frame(src)
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst)
    }
}

#[derive(Debug)]
pub enum DecodeResult {
    Ok(Message),
    /// Well-formed map with a `type` we do not know.
    UnknownType(RawEnvelope),
    Malformed(rmp_serde::decode::Error),
}

/// Decode a raw frame, falling back to [`RawEnvelope`] on unknown types.
pub fn decode_frame(payload: &[u8]) -> DecodeResult {
    match rmp_serde::from_slice::<Message>(payload) {
        Ok(msg) => DecodeResult::Ok(msg),
        Err(_) => match rmp_serde::from_slice::<RawEnvelope>(payload) {
            Ok(envelope) => DecodeResult::UnknownType(envelope),
            Err(e) => DecodeResult::Malformed(e),
        },
    }
}
