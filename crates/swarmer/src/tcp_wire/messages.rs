//! Messages exchanged after a successful handshake, and the codec that
//! frames them on the socket.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{Block, BlockInfo, MAX_MESSAGE_SIZE};
use crate::{bitfield::Bitfield, error::Error};

/// Core messages of the vanilla protocol, with no extensions.
///
/// Every frame is `<len: u32 BE><id: u8><payload>`, where `len` counts the
/// id byte and the payload. A frame of length zero is a [`Message::KeepAlive`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    /// Raw bitfield as sent by the peer, it may carry padding bits.
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece(Block),
    Cancel(BlockInfo),
    /// A message id this client does not understand.
    Unknown(u8),
}

/// The IDs of the [`Message`]s.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        use MessageId::*;
        Ok(match value {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            v => return Err(v),
        })
    }
}

impl Message {
    /// Decode the payload of a frame whose length prefix and id byte were
    /// already consumed.
    ///
    /// A known id with a payload of the wrong size is an error. An unknown
    /// id is not, it becomes [`Message::Unknown`] and the payload is
    /// discarded.
    pub fn decode(id: u8, mut payload: &[u8]) -> Result<Message, Error> {
        let Ok(msg_id) = MessageId::try_from(id) else {
            return Ok(Message::Unknown(id));
        };

        let len = payload.len();
        let malformed = || Error::MalformedMessage(id, len);

        let msg = match msg_id {
            // <len=0001><id=0>
            MessageId::Choke if len == 0 => Message::Choke,

            // <len=0001><id=1>
            MessageId::Unchoke if len == 0 => Message::Unchoke,

            // <len=0001><id=2>
            MessageId::Interested if len == 0 => Message::Interested,

            // <len=0001><id=3>
            MessageId::NotInterested if len == 0 => Message::NotInterested,

            // <len=0005><id=4><piece index>
            MessageId::Have if len == 4 => Message::Have(payload.get_u32()),

            // <len=0001+X><id=5><bitfield>
            MessageId::Bitfield => {
                Message::Bitfield(Bitfield::from_vec(payload.to_vec()))
            }

            // <len=0013><id=6><index><begin><length>
            MessageId::Request if len == 12 => {
                Message::Request(BlockInfo {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    len: payload.get_u32(),
                })
            }

            // <len=0009+X><id=7><index><begin><block>
            MessageId::Piece if len >= 8 => {
                let index = payload.get_u32();
                let begin = payload.get_u32();
                Message::Piece(Block { index, begin, block: payload.to_vec() })
            }

            // <len=0013><id=8><index><begin><length>
            MessageId::Cancel if len == 12 => {
                Message::Cancel(BlockInfo {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    len: payload.get_u32(),
                })
            }

            _ => return Err(malformed()),
        };

        Ok(msg)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: Message,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        match item {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Choke as u8);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Unchoke as u8);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Interested as u8);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::NotInterested as u8);
            }
            Message::Have(piece_index) => {
                buf.put_u32(1 + 4);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(piece_index);
            }
            Message::Bitfield(bitfield) => {
                let v = bitfield.into_vec();
                buf.put_u32(1 + v.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.extend_from_slice(&v);
            }
            Message::Request(block_info) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(MessageId::Request as u8);
                block_info.encode(buf);
            }
            Message::Piece(block) => {
                buf.put_u32(1 + 4 + 4 + block.block.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                block.encode(buf);
            }
            Message::Cancel(block_info) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(MessageId::Cancel as u8);
                block_info.encode(buf);
            }
            Message::Unknown(id) => {
                buf.put_u32(1);
                buf.put_u8(id);
            }
        }
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        // a malformed frame is skipped and the next one in the buffer, if
        // any, is decoded in the same call.
        loop {
            // the message length header must be present at the minimum,
            // otherwise we can't determine the message type
            if buf.len() < 4 {
                return Ok(None);
            }

            // peek at length prefix without consuming
            let size =
                u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

            if size == 0 {
                buf.advance(4);
                return Ok(Some(Message::KeepAlive));
            }

            if size > MAX_MESSAGE_SIZE {
                return Err(Error::MessageTooLarge(size));
            }

            // incomplete message, wait for the rest of the frame without
            // advancing the cursor.
            if buf.len() < 4 + size {
                buf.reserve(4 + size - buf.len());
                return Ok(None);
            }

            buf.advance(4);
            let id = buf.get_u8();
            let payload = buf.split_to(size - 1);

            match Message::decode(id, &payload) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    warn!("skipping frame: {e}");
                }
            }
        }
    }
}
