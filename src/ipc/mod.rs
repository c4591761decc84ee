//! Socket framing and wire messages: MessagePack over a Unix socket.

pub mod codec;
pub mod protocol;
