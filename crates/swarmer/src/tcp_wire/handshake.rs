//! Codec for encoding and decoding handshakes.
//!
//! This has to be a separate codec as the handshake has a different
//! structure than the rest of the messages. Moreover, handshakes may only
//! be sent once at the beginning of a connection, preceding all other
//! messages. Thus, after receiving and sending a handshake the codec
//! should be switched to [`MessageCodec`], but care should be taken not to
//! discard the underlying receive and send buffers.
//!
//! [`MessageCodec`]: super::MessageCodec

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::PSTR;
use crate::{error::Error, peer::PeerId, torrent::InfoHash};

#[derive(Debug)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Error> {
        buf.extend_from_slice(&handshake.serialize());
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Handshake>, Error> {
        if buf.is_empty() {
            return Ok(None);
        }

        // peek at the protocol length, the buffer is only advanced once the
        // whole handshake is there.
        let prot_len = buf[0] as usize;
        if prot_len != PSTR.len() {
            warn!("handshake with pstrlen {prot_len}, dropping connection");
            return Err(Error::HandshakeFailed);
        }

        if buf.len() < Handshake::LEN {
            return Ok(None);
        }

        let bytes = buf.split_to(Handshake::LEN);
        Handshake::deserialize(&bytes).map(Some)
    }
}

/// pstrlen = 19
/// pstr = "BitTorrent protocol"
/// This is the very first message exchanged. If the peer's protocol string
/// (`BitTorrent protocol`) or the info hash differs from ours, the connection
/// is severed. The reserved field is 8 zero bytes, this client does not
/// advertise any extension. The peer id is usually the client name and
/// version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub pstr_len: u8,
    pub pstr: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    /// Size of a handshake on the wire.
    pub const LEN: usize = 1 + 19 + 8 + 20 + 20;

    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            pstr_len: PSTR.len() as u8,
            pstr: PSTR,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn serialize(&self) -> [u8; Self::LEN] {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u8(self.pstr_len);
        buf.extend_from_slice(&self.pstr);
        buf.extend_from_slice(&self.reserved);
        buf.extend_from_slice(&self.info_hash.0);
        buf.extend_from_slice(&self.peer_id.0);

        let mut out = [0u8; Self::LEN];
        out.copy_from_slice(&buf);
        out
    }

    /// Parse a complete handshake. The buffer must be exactly
    /// [`Handshake::LEN`] bytes, longer or shorter buffers are rejected
    /// instead of truncated.
    pub fn deserialize(mut buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != Self::LEN {
            return Err(Error::HandshakeFailed);
        }

        let pstr_len = buf.get_u8();
        if pstr_len as usize != PSTR.len() {
            return Err(Error::HandshakeFailed);
        }

        let mut pstr = [0; 19];
        buf.copy_to_slice(&mut pstr);
        let mut reserved = [0; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Self {
            pstr_len,
            pstr,
            reserved,
            info_hash: InfoHash(info_hash),
            peer_id: PeerId(peer_id),
        })
    }

    /// Check `target`, the handshake received from the remote, against ours.
    pub fn validate(&self, target: &Self) -> bool {
        if self.info_hash != target.info_hash {
            warn!("info_hash from receiving handshake does not match ours");
            return false;
        }
        if target.pstr_len != 19 || target.pstr != PSTR {
            warn!("handshake with wrong pstr, dropping connection");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_layout() {
        let handshake = Handshake::new(InfoHash([5u8; 20]), PeerId([7u8; 20]));

        assert_eq!(handshake.pstr_len, 19);
        assert_eq!(handshake.pstr, PSTR);

        assert_eq!(
            handshake.serialize(),
            [
                19, 66, 105, 116, 84, 111, 114, 114, 101, 110, 116, 32, 112,
                114, 111, 116, 111, 99, 111, 108, 0, 0, 0, 0, 0, 0, 0, 0, 5,
                5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 7, 7,
                7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7
            ]
        );
    }

    #[test]
    fn handshake_round_trip_through_codec() {
        let ours = Handshake::new(InfoHash([1u8; 20]), PeerId([2u8; 20]));
        let theirs = Handshake::new(InfoHash([1u8; 20]), PeerId([3u8; 20]));

        let mut buf = BytesMut::new();
        HandshakeCodec.encode(theirs.clone(), &mut buf).unwrap();

        // a message that arrived in the same segment stays in the buffer
        buf.extend_from_slice(&[0, 0, 0, 1, 1]);

        let decoded = HandshakeCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, theirs);
        assert!(ours.validate(&decoded));
        assert_eq!(&buf[..], &[0, 0, 0, 1, 1]);
    }

    #[test]
    fn partial_handshake_waits() {
        let theirs = Handshake::new(InfoHash([1u8; 20]), PeerId([3u8; 20]));
        let bytes = theirs.serialize();

        let mut buf = BytesMut::from(&bytes[..40]);
        assert_eq!(HandshakeCodec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 40);

        buf.extend_from_slice(&bytes[40..]);
        assert_eq!(HandshakeCodec.decode(&mut buf).unwrap(), Some(theirs));
    }

    #[test]
    fn corrupted_handshake_is_rejected() {
        let bytes =
            Handshake::new(InfoHash([1u8; 20]), PeerId([3u8; 20])).serialize();

        // one byte short and one byte too long
        assert!(Handshake::deserialize(&bytes[..67]).is_err());
        let mut long = bytes.to_vec();
        long.push(0);
        assert!(Handshake::deserialize(&long).is_err());

        // wrong pstrlen
        let mut bad = bytes;
        bad[0] = 18;
        assert!(Handshake::deserialize(&bad).is_err());
        let mut buf = BytesMut::from(&bad[..]);
        assert!(matches!(
            HandshakeCodec.decode(&mut buf),
            Err(Error::HandshakeFailed)
        ));
    }

    #[test]
    fn info_hash_mismatch_fails_validation() {
        let ours = Handshake::new(InfoHash([1u8; 20]), PeerId([2u8; 20]));
        let theirs = Handshake::new(InfoHash([9u8; 20]), PeerId([3u8; 20]));
        assert!(!ours.validate(&theirs));

        let mut wrong_pstr = Handshake::new(InfoHash([1u8; 20]), PeerId([3u8; 20]));
        wrong_pstr.pstr[0] = b'b';
        assert!(!ours.validate(&wrong_pstr));
    }
}
