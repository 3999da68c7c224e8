//! The set of peers of a download: connecting to them, reading whatever
//! they send and choosing who to ask for a piece.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use hashbrown::HashMap;
use rand::seq::SliceRandom;
use tokio::{
    sync::{Mutex, Notify, RwLock},
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::Error,
    peer::{Peer, PeerId},
    tcp_wire::Message,
    torrent::InfoHash,
};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Stop connecting once this many peers are connected.
    pub max_peers: usize,
    /// How many handshakes run at the same time.
    pub max_handshakes: usize,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PoolConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_peers: config.max_peers,
            max_handshakes: config.max_handshakes,
            connect_timeout: config.connect_timeout(),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

/// Outcome of [`PeerPool::get_random_peer_by_piece`].
#[derive(Debug, Clone)]
pub enum PeerPick {
    Peer(Arc<Peer>),
    /// Every connected peer is choking us, there is nobody to ask.
    AllPeersChoked,
    /// Some peers are unchoked, but none of them has the piece.
    NoPeersHavePiece,
}

#[derive(Debug)]
pub struct PeerPool {
    config: PoolConfig,
    pieces_count: u32,
    /// Addresses we were told about and did not try yet.
    candidates: Mutex<Vec<SocketAddr>>,
    /// Peers that completed the handshake, keyed by their address.
    connected: RwLock<HashMap<SocketAddr, Arc<Peer>>>,
    /// Notified each time a peer joins the connected set.
    wake: Arc<Notify>,
}

impl PeerPool {
    pub fn new(config: PoolConfig, pieces_count: u32) -> Self {
        Self {
            config,
            pieces_count,
            candidates: Mutex::new(Vec::new()),
            connected: RwLock::new(HashMap::new()),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Share a [`Notify`] that is woken whenever a new peer connects.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = wake;
        self
    }

    pub async fn add_peers(&self, addrs: impl IntoIterator<Item = SocketAddr>) {
        self.candidates.lock().await.extend(addrs);
    }

    /// Connect and handshake with the candidates, `max_handshakes` at a time.
    ///
    /// Every handshake of a batch is awaited before the next batch starts,
    /// and no new batch starts once `max_peers` are connected. Peers that
    /// fail are dropped without retry. Returns how many peers were added.
    #[tracing::instrument(skip_all)]
    pub async fn send_handshakes(
        &self,
        local_id: PeerId,
        info_hash: InfoHash,
    ) -> usize {
        let candidates = std::mem::take(&mut *self.candidates.lock().await);
        let mut added = 0;

        info!("connecting to {} peers", candidates.len());

        for batch in candidates.chunks(self.config.max_handshakes.max(1)) {
            if self.connected_len().await >= self.config.max_peers {
                break;
            }

            let mut handshakes = JoinSet::new();

            for addr in batch.iter().copied() {
                if self.connected.read().await.contains_key(&addr) {
                    continue;
                }
                let config = self.config.clone();
                let pieces_count = self.pieces_count;

                handshakes.spawn(async move {
                    let mut peer = Peer::new(addr, pieces_count);
                    peer.connect(config.connect_timeout).await?;
                    peer.do_handshake(
                        local_id,
                        info_hash,
                        config.handshake_timeout,
                    )
                    .await?;
                    // peers don't unchoke someone that is not interested
                    peer.send_message(Message::Interested).await?;
                    Ok::<_, Error>(peer)
                });
            }

            while let Some(r) = handshakes.join_next().await {
                match r {
                    Ok(Ok(peer)) => {
                        if self.add_connected(peer).await {
                            added += 1;
                        }
                    }
                    Ok(Err(e)) => debug!("{e}"),
                    Err(e) => warn!("handshake task failed: {e}"),
                }
            }
        }

        let connected = self.connected_len().await;
        info!("connected to {added} peers, {connected} in total");

        added
    }

    /// Add a peer that finished its handshake, unless the pool is full.
    pub(crate) async fn add_connected(&self, peer: Peer) -> bool {
        let mut connected = self.connected.write().await;

        if connected.len() >= self.config.max_peers
            || connected.contains_key(&peer.addr)
        {
            return false;
        }

        debug!("new peer {} {}", peer.addr, peer.id());
        connected.insert(peer.addr, Arc::new(peer));
        drop(connected);

        self.wake.notify_one();
        true
    }

    /// Wait until at least one connected peer sent a message and return
    /// every message that is ready by then.
    ///
    /// Peers that hang up are removed from the pool without affecting the
    /// messages of the others. `Ok` with an empty vec means nothing arrived
    /// within `readiness_timeout`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfPeers`] when there are no connected peers, including
    /// when the last ones disconnected during this call.
    pub async fn receive_messages(
        &self,
        readiness_timeout: Duration,
    ) -> Result<Vec<(Arc<Peer>, Message)>, Error> {
        loop {
            let peers = self.connected_peers().await;

            if peers.is_empty() {
                return Err(Error::OutOfPeers);
            }

            let mut reads: FuturesUnordered<_> = peers
                .into_iter()
                .map(|peer| async move {
                    let r = peer.receive_message().await;
                    (peer, r)
                })
                .collect();

            let first = match timeout(readiness_timeout, reads.next()).await {
                Ok(Some(r)) => r,
                Ok(None) => return Err(Error::OutOfPeers),
                Err(_) => return Ok(Vec::new()),
            };

            let mut ready = vec![first];
            while let Some(Some(r)) = reads.next().now_or_never() {
                ready.push(r);
            }

            // the reads still pending are cancelled, a framed read does not
            // lose bytes when dropped.
            drop(reads);

            let mut messages = Vec::with_capacity(ready.len());

            for (peer, r) in ready {
                match r {
                    Ok(msg) => messages.push((peer, msg)),
                    Err(e) => {
                        debug!("{} removed: {e}", peer.addr);
                        self.remove_peer(&peer.addr).await;
                    }
                }
            }

            if !messages.is_empty() {
                return Ok(messages);
            }
        }
    }

    /// Choose, uniformly at random, one of the unchoked peers that have the
    /// piece `index`.
    pub async fn get_random_peer_by_piece(&self, index: u32) -> PeerPick {
        let peers = self.connected_peers().await;

        if peers.iter().all(|p| p.is_choked()) {
            return PeerPick::AllPeersChoked;
        }

        let mut candidates = Vec::new();
        for peer in peers {
            if !peer.is_choked() && peer.have_piece(index).await {
                candidates.push(peer);
            }
        }

        let picked = {
            let mut rng = rand::thread_rng();
            candidates.choose(&mut rng).cloned()
        };

        match picked {
            Some(peer) => PeerPick::Peer(peer),
            None => PeerPick::NoPeersHavePiece,
        }
    }

    /// Remove a peer from the connected set, the peer is not tried again.
    pub async fn remove_peer(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
        self.connected.write().await.remove(addr)
    }

    pub async fn connected_peers(&self) -> Vec<Arc<Peer>> {
        self.connected.read().await.values().cloned().collect()
    }

    pub async fn connected_len(&self) -> usize {
        self.connected.read().await.len()
    }

    pub async fn num_unchoked(&self) -> usize {
        self.connected
            .read()
            .await
            .values()
            .filter(|p| !p.is_choked())
            .count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::BytesMut;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use tokio_util::codec::Encoder;

    use super::*;
    use crate::{
        bitfield::{Bitfield, PieceBitfield},
        tcp_wire::{Handshake, MessageCodec},
    };

    const READINESS: Duration = Duration::from_millis(500);

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn peer(port: u16, pieces: &[u32], choked: bool) -> Peer {
        let peer = Peer::new(addr(port), 4);
        let mut bitfield = Bitfield::from_piece(4);
        for p in pieces {
            bitfield.safe_set(*p as usize);
        }
        peer.set_bitfield(bitfield).await;
        if !choked {
            peer.set_unchoked();
        }
        peer
    }

    /// A remote that answers one handshake and writes `messages`. With
    /// `hang_up` it closes the socket right after, otherwise it stays until
    /// the client leaves.
    pub(crate) async fn remote(
        info_hash: InfoHash,
        messages: Vec<Message>,
        hang_up: bool,
    ) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; Handshake::LEN];
            socket.read_exact(&mut buf).await.unwrap();

            let mut out = BytesMut::new();
            out.extend_from_slice(
                &Handshake::new(info_hash, PeerId([1u8; 20])).serialize(),
            );
            for msg in messages {
                MessageCodec.encode(msg, &mut out).unwrap();
            }
            socket.write_all(&out).await.unwrap();

            if hang_up {
                // wait for our Interested, so the close is a clean EOF
                let mut interested = [0u8; 5];
                let _ = socket.read_exact(&mut interested).await;
            } else {
                let mut sink = Vec::new();
                let _ = socket.read_to_end(&mut sink).await;
            }
        });

        addr
    }

    #[tokio::test]
    async fn picks_only_unchoked_peers_with_the_piece() {
        let pool = PeerPool::new(PoolConfig::default(), 4);
        assert!(pool.add_connected(peer(1, &[0], false).await).await);
        assert!(pool.add_connected(peer(2, &[0], true).await).await);
        assert!(pool.add_connected(peer(3, &[1], false).await).await);

        for _ in 0..100 {
            let PeerPick::Peer(p) = pool.get_random_peer_by_piece(0).await else {
                panic!("peer 1 has the piece");
            };
            assert_eq!(p.addr, addr(1));
        }

        assert!(matches!(
            pool.get_random_peer_by_piece(2).await,
            PeerPick::NoPeersHavePiece
        ));
        assert_eq!(pool.num_unchoked().await, 2);
    }

    #[tokio::test]
    async fn pick_is_spread_among_candidates() {
        let pool = PeerPool::new(PoolConfig::default(), 4);
        pool.add_connected(peer(1, &[0], false).await).await;
        pool.add_connected(peer(2, &[0], false).await).await;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            if let PeerPick::Peer(p) = pool.get_random_peer_by_piece(0).await {
                seen.insert(p.addr);
            }
        }
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn all_choked() {
        let pool = PeerPool::new(PoolConfig::default(), 4);
        assert!(matches!(
            pool.get_random_peer_by_piece(0).await,
            PeerPick::AllPeersChoked
        ));

        pool.add_connected(peer(1, &[0, 1], true).await).await;
        pool.add_connected(peer(2, &[0], true).await).await;
        assert!(matches!(
            pool.get_random_peer_by_piece(0).await,
            PeerPick::AllPeersChoked
        ));
    }

    #[tokio::test]
    async fn pool_is_bounded_and_removal_is_idempotent() {
        let config = PoolConfig { max_peers: 2, ..Default::default() };
        let pool = PeerPool::new(config, 4);

        assert!(pool.add_connected(peer(1, &[], false).await).await);
        assert!(!pool.add_connected(peer(1, &[], false).await).await);
        assert!(pool.add_connected(peer(2, &[], false).await).await);
        assert!(!pool.add_connected(peer(3, &[], false).await).await);
        assert_eq!(pool.connected_len().await, 2);

        assert!(pool.remove_peer(&addr(1)).await.is_some());
        assert!(pool.remove_peer(&addr(1)).await.is_none());
        assert_eq!(pool.connected_len().await, 1);
    }

    #[tokio::test]
    async fn empty_pool_is_out_of_peers() {
        let pool = PeerPool::new(PoolConfig::default(), 4);
        assert!(matches!(
            pool.receive_messages(READINESS).await,
            Err(Error::OutOfPeers)
        ));
    }

    #[tokio::test]
    async fn handshakes_skip_dead_peers() {
        let info_hash = InfoHash([4u8; 20]);

        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let wrong_torrent = remote(InfoHash([5u8; 20]), vec![], false).await;
        let a = remote(info_hash, vec![], false).await;
        let b = remote(info_hash, vec![], false).await;

        let config = PoolConfig { max_handshakes: 2, ..Default::default() };
        let pool = PeerPool::new(config, 4);
        pool.add_peers([dead, a, wrong_torrent, b]).await;

        assert_eq!(pool.send_handshakes(PeerId::gen(), info_hash).await, 2);

        let mut connected: Vec<_> =
            pool.connected_peers().await.iter().map(|p| p.addr).collect();
        connected.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(connected, expected);
    }

    #[tokio::test]
    async fn handshakes_stop_at_max_peers() {
        let info_hash = InfoHash([4u8; 20]);
        let mut addrs = Vec::new();
        for _ in 0..3 {
            addrs.push(remote(info_hash, vec![], false).await);
        }

        let config =
            PoolConfig { max_peers: 2, max_handshakes: 1, ..Default::default() };
        let pool = PeerPool::new(config, 4);
        pool.add_peers(addrs).await;

        assert_eq!(pool.send_handshakes(PeerId::gen(), info_hash).await, 2);
        assert_eq!(pool.connected_len().await, 2);
    }

    #[tokio::test]
    async fn disconnected_peer_is_removed() {
        let info_hash = InfoHash([4u8; 20]);
        let leaving = remote(info_hash, vec![Message::Unchoke], true).await;

        let pool = PeerPool::new(PoolConfig::default(), 4);
        pool.add_peers([leaving]).await;
        assert_eq!(pool.send_handshakes(PeerId::gen(), info_hash).await, 1);

        let messages = pool.receive_messages(READINESS).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1, Message::Unchoke);

        // the remote hung up, its peer is dropped and nobody is left
        assert!(matches!(
            pool.receive_messages(READINESS).await,
            Err(Error::OutOfPeers)
        ));
        assert_eq!(pool.connected_len().await, 0);
        assert!(matches!(
            pool.receive_messages(READINESS).await,
            Err(Error::OutOfPeers)
        ));
    }

    #[tokio::test]
    async fn messages_of_many_peers() {
        let info_hash = InfoHash([4u8; 20]);
        let a = remote(info_hash, vec![Message::Have(1)], false).await;
        let b = remote(info_hash, vec![Message::Have(2)], false).await;
        let gone = remote(info_hash, vec![], true).await;

        let pool = PeerPool::new(PoolConfig::default(), 4);
        pool.add_peers([a, b, gone]).await;
        assert_eq!(pool.send_handshakes(PeerId::gen(), info_hash).await, 3);

        let mut haves = Vec::new();
        while haves.len() < 2 {
            for (peer, msg) in pool.receive_messages(READINESS).await.unwrap() {
                let Message::Have(i) = msg else { panic!("unexpected {msg:?}") };
                assert_eq!(peer.addr, if i == 1 { a } else { b });
                haves.push(i);
            }
        }
        haves.sort();
        assert_eq!(haves, vec![1, 2]);

        // the peer that hung up is dropped, the quiet ones time out
        let quiet = pool.receive_messages(READINESS).await.unwrap();
        assert!(quiet.is_empty());
        assert_eq!(pool.connected_len().await, 2);
        assert!(pool.remove_peer(&gone).await.is_none());
    }
}
