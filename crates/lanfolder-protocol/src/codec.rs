//! Datagram codec for `tokio_util::udp::UdpFramed`.
//!
//! Each datagram is exactly one message, so the decoder always consumes the
//! whole buffer before parsing. A bad datagram yields an error for that
//! datagram only and leaves nothing behind for the next read.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::Message;
use crate::ProtocolError;

#[derive(Debug, Default, Clone, Copy)]
pub struct DatagramCodec;

impl Decoder for DatagramCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split();
        Message::decode(&datagram).map(Some)
    }
}

impl Encoder<Message> for DatagramCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.encode()?;
        dst.reserve(payload.len());
        dst.put_slice(payload.as_bytes());
        Ok(())
    }
}
