//! A remote peer: its connection, what it has and whether it lets us
//! download from it.
mod types;

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    net::TcpStream,
    sync::{Mutex, RwLock},
    time::timeout,
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, warn};
pub use types::*;

use crate::{
    bitfield::{Bitfield, PieceBitfield},
    error::Error,
    tcp_wire::{Handshake, HandshakeCodec, Message, MessageCodec},
    torrent::InfoHash,
};

type PeerSink = SplitSink<Framed<TcpStream, MessageCodec>, Message>;
type PeerStream = SplitStream<Framed<TcpStream, MessageCodec>>;

/// A connection with a remote peer.
///
/// `connect` and `do_handshake` take `&mut self`, they run before the peer
/// is shared. After the handshake the peer is put behind an `Arc` and the
/// read and write halves of the socket are used independently: one task
/// reads while another one writes requests.
pub struct Peer {
    pub addr: SocketAddr,
    id: PeerId,
    state: ConnectionState,
    /// Info hash sent in our handshake, the remote must answer with the
    /// same one.
    info_hash: InfoHash,
    /// The raw socket, between `connect` and `do_handshake`.
    socket: Option<TcpStream>,
    sink: Mutex<Option<PeerSink>>,
    stream: Mutex<Option<PeerStream>>,
    closed: AtomicBool,
    /// If we're choked, peer doesn't allow us to download pieces from them.
    choked: AtomicBool,
    pieces: RwLock<Bitfield>,
    pieces_count: usize,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("addr", &self.addr)
            .field("id", &self.id)
            .field("state", &self.state())
            .field("choked", &self.is_choked())
            .finish()
    }
}

impl Peer {
    pub fn new(addr: SocketAddr, pieces_count: u32) -> Self {
        Self {
            addr,
            id: PeerId::default(),
            state: ConnectionState::Disconnected,
            info_hash: InfoHash::default(),
            socket: None,
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            closed: AtomicBool::new(false),
            choked: AtomicBool::new(true),
            pieces: RwLock::new(Bitfield::from_piece(pieces_count as usize)),
            pieces_count: pieces_count as usize,
        }
    }

    /// Id of the remote, all zeroes until the handshake is done.
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Relaxed) {
            return ConnectionState::Disconnected;
        }
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn mark_disconnected(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Open the TCP connection.
    pub async fn connect(
        &mut self,
        connect_timeout: Duration,
    ) -> Result<(), Error> {
        self.state = ConnectionState::Connecting;

        let r = timeout(connect_timeout, TcpStream::connect(self.addr)).await;

        let socket = match r {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(Error::ConnectionFailed(self.addr, e.to_string()));
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(Error::ConnectionFailed(
                    self.addr,
                    "timed out".to_owned(),
                ));
            }
        };

        self.socket = Some(socket);
        Ok(())
    }

    /// Send our handshake and wait for the remote's.
    ///
    /// On success the socket is switched to the [`MessageCodec`], keeping
    /// whatever the remote already sent after its handshake.
    #[tracing::instrument(level = "debug", skip_all, fields(addr = %self.addr))]
    pub async fn do_handshake(
        &mut self,
        local_id: PeerId,
        info_hash: InfoHash,
        handshake_timeout: Duration,
    ) -> Result<(), Error> {
        let socket = self.socket.take().ok_or(Error::PeerNotConnected)?;

        self.state = ConnectionState::Handshaking;
        self.info_hash = info_hash;

        let mut socket = Framed::new(socket, HandshakeCodec);

        let theirs = match exchange_handshakes(
            &mut socket,
            Handshake::new(info_hash, local_id),
            handshake_timeout,
        )
        .await
        {
            Ok(theirs) if self.verify_handshake(&theirs) => theirs,
            Ok(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(Error::HandshakeFailed);
            }
            Err(e) => {
                debug!("handshake failed: {e}");
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        self.id = theirs.peer_id;

        let old_parts = socket.into_parts();
        let mut new_parts =
            FramedParts::new::<Message>(old_parts.io, MessageCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        let (sink, stream) = Framed::from_parts(new_parts).split();

        *self.sink.get_mut() = Some(sink);
        *self.stream.get_mut() = Some(stream);
        self.state = ConnectionState::Connected;

        debug!("connected with {}", self.id);

        Ok(())
    }

    /// Check the handshake of the remote against the info hash we sent.
    pub fn verify_handshake(&self, theirs: &Handshake) -> bool {
        Handshake::new(self.info_hash, PeerId::default()).validate(theirs)
    }

    /// Wait for the next message of this peer. Reading zero bytes means the
    /// remote closed the socket, the peer is then disconnected for good.
    pub async fn receive_message(&self) -> Result<Message, Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::PeerDisconnected);
        }

        let mut stream = self.stream.lock().await;
        let stream = stream.as_mut().ok_or(Error::PeerNotConnected)?;

        match stream.next().await {
            Some(Ok(msg)) => Ok(msg),
            Some(Err(e)) => {
                warn!("{} closing connection: {e}", self.addr);
                self.mark_disconnected();
                Err(Error::PeerDisconnected)
            }
            None => {
                debug!("{} closed the socket", self.addr);
                self.mark_disconnected();
                Err(Error::PeerDisconnected)
            }
        }
    }

    pub async fn send_message(&self, msg: Message) -> Result<(), Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::PeerDisconnected);
        }

        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(Error::PeerNotConnected)?;

        if let Err(e) = sink.send(msg).await {
            debug!("{} could not send message: {e}", self.addr);
            self.mark_disconnected();
            return Err(Error::PeerDisconnected);
        }

        Ok(())
    }

    /// Replace what we know of the pieces of this peer, spare bits of the
    /// last byte are ignored.
    pub async fn set_bitfield(&self, bitfield: Bitfield) {
        *self.pieces.write().await =
            Bitfield::from_payload(bitfield.into_vec(), self.pieces_count);
    }

    pub async fn set_have(&self, index: u32) -> Result<(), Error> {
        if !self.pieces.write().await.safe_set(index as usize) {
            return Err(Error::PieceOutOfBounds(index));
        }
        Ok(())
    }

    pub async fn have_piece(&self, index: u32) -> bool {
        self.pieces.read().await.safe_get(index as usize)
    }

    pub fn set_choked(&self) {
        self.choked.store(true, Ordering::Relaxed);
    }

    pub fn set_unchoked(&self) {
        self.choked.store(false, Ordering::Relaxed);
    }

    pub fn is_choked(&self) -> bool {
        self.choked.load(Ordering::Relaxed)
    }
}

async fn exchange_handshakes(
    socket: &mut Framed<TcpStream, HandshakeCodec>,
    ours: Handshake,
    handshake_timeout: Duration,
) -> Result<Handshake, Error> {
    socket.send(ours).await.map_err(|_| Error::PeerDisconnected)?;

    match timeout(handshake_timeout, socket.next()).await {
        Ok(Some(Ok(theirs))) => Ok(theirs),
        Ok(Some(Err(Error::HandshakeFailed))) => Err(Error::HandshakeFailed),
        Ok(Some(Err(_))) | Ok(None) => Err(Error::PeerDisconnected),
        Err(_) => {
            debug!("peer took too long to send the handshake");
            Err(Error::HandshakeFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::tcp_wire::PSTR;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn peer_without_socket(pieces: u32) -> Peer {
        Peer::new("127.0.0.1:6881".parse().unwrap(), pieces)
    }

    /// Accept one connection, read the handshake and answer with a handshake
    /// for `info_hash` followed by `extra` bytes in the same write.
    async fn remote(
        info_hash: InfoHash,
        extra: Vec<u8>,
    ) -> (SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; Handshake::LEN];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf[0], 19);
            assert_eq!(&buf[1..20], &PSTR);

            let mut reply = Handshake::new(info_hash, PeerId([9u8; 20]))
                .serialize()
                .to_vec();
            reply.extend(extra);
            socket.write_all(&reply).await.unwrap();

            // everything the client sends until it hangs up
            let mut received = Vec::new();
            let _ = socket.read_to_end(&mut received).await;
            received
        });

        (addr, handle)
    }

    #[tokio::test]
    async fn connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut peer = Peer::new(addr, 1);
        let r = peer.connect(TIMEOUT).await;
        assert!(matches!(r, Err(Error::ConnectionFailed(a, _)) if a == addr));
        assert_eq!(peer.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn handshake_then_messages() {
        let info_hash = InfoHash([3u8; 20]);
        // HAVE 1 arrives together with the handshake
        let (addr, remote) =
            remote(info_hash, vec![0, 0, 0, 5, 4, 0, 0, 0, 1]).await;

        let mut peer = Peer::new(addr, 4);
        peer.connect(TIMEOUT).await.unwrap();
        assert_eq!(peer.state(), ConnectionState::Connecting);

        peer.do_handshake(PeerId::gen(), info_hash, TIMEOUT).await.unwrap();
        assert!(peer.is_connected());
        assert_eq!(peer.id(), PeerId([9u8; 20]));

        assert_eq!(peer.receive_message().await.unwrap(), Message::Have(1));
        peer.send_message(Message::Interested).await.unwrap();

        drop(peer);
        assert_eq!(remote.await.unwrap(), vec![0, 0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn remote_hanging_up_disconnects() {
        let info_hash = InfoHash([3u8; 20]);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; Handshake::LEN];
            socket.read_exact(&mut buf).await.unwrap();
            let reply =
                Handshake::new(info_hash, PeerId([9u8; 20])).serialize();
            socket.write_all(&reply).await.unwrap();
        });

        let mut peer = Peer::new(addr, 4);
        peer.connect(TIMEOUT).await.unwrap();
        peer.do_handshake(PeerId::gen(), info_hash, TIMEOUT).await.unwrap();

        assert!(matches!(
            peer.receive_message().await,
            Err(Error::PeerDisconnected)
        ));
        assert_eq!(peer.state(), ConnectionState::Disconnected);
        assert!(matches!(
            peer.send_message(Message::KeepAlive).await,
            Err(Error::PeerDisconnected)
        ));
    }

    #[tokio::test]
    async fn wrong_info_hash_is_rejected() {
        let (addr, _remote) = remote(InfoHash([8u8; 20]), vec![]).await;

        let mut peer = Peer::new(addr, 4);
        peer.connect(TIMEOUT).await.unwrap();
        let r = peer
            .do_handshake(PeerId::gen(), InfoHash([3u8; 20]), TIMEOUT)
            .await;

        assert!(matches!(r, Err(Error::HandshakeFailed)));
        assert_eq!(peer.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn handshake_requires_a_socket() {
        let mut peer = peer_without_socket(1);
        let r = peer
            .do_handshake(PeerId::gen(), InfoHash::default(), TIMEOUT)
            .await;
        assert!(matches!(r, Err(Error::PeerNotConnected)));
        assert!(matches!(
            peer.receive_message().await,
            Err(Error::PeerNotConnected)
        ));
    }

    #[tokio::test]
    async fn availability() {
        let peer = peer_without_socket(10);
        assert!(peer.is_choked());
        assert!(!peer.have_piece(0).await);

        // 10 pieces, padding bits set in the second byte
        peer.set_bitfield(Bitfield::from_vec(vec![0b1000_0000, 0b0111_1111]))
            .await;
        assert!(peer.have_piece(0).await);
        assert!(peer.have_piece(9).await);
        assert!(!peer.have_piece(8).await);
        assert!(!peer.have_piece(10).await);
        assert!(!peer.have_piece(u32::MAX).await);

        peer.set_have(8).await.unwrap();
        assert!(peer.have_piece(8).await);
        assert!(matches!(
            peer.set_have(10).await,
            Err(Error::PieceOutOfBounds(10))
        ));

        peer.set_unchoked();
        assert!(!peer.is_choked());
        peer.set_choked();
        assert!(peer.is_choked());
    }
}
