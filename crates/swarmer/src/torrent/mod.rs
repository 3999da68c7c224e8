//! Torrent is the download of one content.
//!
//! It owns the working set of pieces that were not written yet, and drives
//! two loops over the [`PeerPool`]: the requester, that asks peers for free
//! blocks, and the receiver, that handles every message the peers send and
//! hands full pieces to the [`PieceWriter`].
mod types;

// re-exports
pub use types::*;

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    spawn,
    sync::{Mutex, Notify},
    time::{interval, sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    counter::Counter,
    disk::PieceWriter,
    error::Error,
    peer::{Peer, PeerId},
    piece::{create_pieces, BlockStatus, FreeBlock, Piece},
    pool::{PeerPick, PeerPool, PoolConfig},
    tcp_wire::{self, BlockInfo, Message},
    utils::{percentage, to_human_readable},
};

/// State of a [`Torrent`] that is shared between its loops.
#[derive(Debug)]
pub struct TorrentCtx {
    pub content: ContentDescriptor,
    pub local_peer_id: PeerId,
    pub pool: PeerPool,
    /// Pieces that were not written yet, a piece leaves the map when it is
    /// full and comes back if its hash does not match.
    pub pieces: Mutex<BTreeMap<u32, Piece>>,
    /// Cleared when the download is over, every loop checks it.
    pub should_continue: AtomicBool,
    /// Wakes the requester before its interval elapses.
    pub wake: Arc<Notify>,
    pub counter: Arc<Counter>,
    pub config: Config,
}

impl TorrentCtx {
    pub fn new(
        content: ContentDescriptor,
        local_peer_id: PeerId,
        config: Config,
        counter: Arc<Counter>,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let pool = PeerPool::new(PoolConfig::from(&config), content.pieces_count())
            .with_wake(wake.clone());

        let pieces = create_pieces(
            content.total_length,
            content.piece_length,
            content.block_size,
        )
        .into_iter()
        .map(|piece| (piece.index, piece))
        .collect();

        Self {
            content,
            local_peer_id,
            pool,
            pieces: Mutex::new(pieces),
            should_continue: AtomicBool::new(true),
            wake,
            counter,
            config,
        }
    }

    pub fn should_continue(&self) -> bool {
        self.should_continue.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.should_continue.store(false, Ordering::Relaxed);
        self.wake.notify_one();
    }

    /// Send requests until nothing is left to download, sleeping between
    /// passes until woken or until `request_interval` elapses.
    pub async fn request_loop(self: Arc<Self>) {
        while self.should_continue() {
            self.request_pass().await;

            let _ = timeout(self.config.request_interval(), self.wake.notified())
                .await;
        }
        debug!("requester stopped");
    }

    /// Reserve free blocks, in piece order, up to the in-flight budget and
    /// ask a random unchoked peer that has the piece for each of them.
    /// Returns how many requests were sent.
    pub async fn request_pass(&self) -> usize {
        let requests = self.reserve_blocks().await;
        let mut sent = 0;

        // the lock of the pieces is not held while writing to the sockets
        for (peer, info) in requests {
            match peer.send_message(Message::Request(info)).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!("{} request failed: {e}", peer.addr);
                    if let Some(piece) =
                        self.pieces.lock().await.get_mut(&info.index)
                    {
                        piece.release_block(info.begin);
                    }
                    self.pool.remove_peer(&peer.addr).await;
                }
            }
        }

        sent
    }

    async fn reserve_blocks(&self) -> Vec<(Arc<Peer>, BlockInfo)> {
        let request_timeout = self.config.request_timeout();
        let mut pieces = self.pieces.lock().await;

        if pieces.is_empty() {
            self.should_continue.store(false, Ordering::Relaxed);
            return Vec::new();
        }

        let inflight: usize =
            pieces.values_mut().map(|p| p.reclaim_stale(request_timeout)).sum();
        let mut budget =
            self.config.max_inflight_requests.saturating_sub(inflight);
        let mut requests = Vec::new();

        'pieces: for piece in pieces.values_mut() {
            while budget > 0 {
                let info = match piece.get_free_block(request_timeout) {
                    FreeBlock::Block(info) => info,
                    FreeBlock::PieceIsPending | FreeBlock::PieceIsFull => {
                        continue 'pieces;
                    }
                };

                match self.pool.get_random_peer_by_piece(piece.index).await {
                    PeerPick::Peer(peer) => {
                        requests.push((peer, info));
                        budget -= 1;
                    }
                    PeerPick::NoPeersHavePiece => {
                        piece.release_block(info.begin);
                        continue 'pieces;
                    }
                    PeerPick::AllPeersChoked => {
                        piece.release_block(info.begin);
                        break 'pieces;
                    }
                }
            }
            // the budget is spent
            break;
        }

        requests
    }

    /// Log the progress of the download every second.
    pub async fn progress_loop(self: Arc<Self>) {
        let mut tick = interval(Duration::from_secs(1));
        let total = self.content.pieces_count();

        while self.should_continue() {
            tick.tick().await;
            self.counter.update_rates().await;

            let written = self.counter.pieces_written();
            let peers = self.pool.connected_len().await;
            let unchoked = self.pool.num_unchoked().await;

            info!(
                "{}: {written}/{total} pieces ({:.1}%), {}/s, {peers} peers, \
                 {unchoked} unchoked",
                self.content.name,
                percentage(written as u64, total as u64),
                to_human_readable(self.counter.download_rate()),
            );
        }
    }
}

/// Downloads a torrent into a [`PieceWriter`].
pub struct Torrent<W: PieceWriter> {
    pub ctx: Arc<TorrentCtx>,
    writer: W,
}

impl<W: PieceWriter> Torrent<W> {
    pub fn new(ctx: Arc<TorrentCtx>, writer: W) -> Self {
        Self { ctx, writer }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Connect to the peers of the pool and download every piece.
    ///
    /// Returns once every piece was written and the writer closed.
    ///
    /// # Errors
    ///
    /// Only errors of the [`PieceWriter`] end the download, problems with
    /// peers are handled by dropping them.
    #[tracing::instrument(skip(self), name = "torrent::run", fields(name = %self.ctx.content.name))]
    pub async fn run(&mut self) -> Result<(), Error> {
        let ctx = self.ctx.clone();

        info!(
            "downloading {} pieces, {}",
            ctx.content.pieces_count(),
            to_human_readable(ctx.content.total_length)
        );

        let handshakes = {
            let ctx = ctx.clone();
            spawn(async move {
                ctx.pool
                    .send_handshakes(ctx.local_peer_id, ctx.content.info_hash)
                    .await
            })
        };
        let requester = spawn(ctx.clone().request_loop());
        let progress = spawn(ctx.clone().progress_loop());

        let r = self.receive_loop().await;

        ctx.stop();
        handshakes.abort();
        progress.abort();
        if let Err(e) = requester.await {
            warn!("requester task failed: {e}");
        }

        r?;
        self.writer.close().await?;

        info!(
            "download of {} is complete, {} pieces rejected",
            ctx.content.name,
            ctx.counter.pieces_rejected.load(Ordering::Relaxed)
        );

        Ok(())
    }

    async fn receive_loop(&mut self) -> Result<(), Error> {
        let ctx = self.ctx.clone();

        while !ctx.pieces.lock().await.is_empty() {
            let messages =
                match ctx.pool.receive_messages(ctx.config.readiness_timeout()).await
                {
                    Ok(messages) => messages,
                    Err(Error::OutOfPeers) => {
                        debug!("no connected peers, waiting");
                        sleep(ctx.config.out_of_peers_delay()).await;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

            for (peer, msg) in messages {
                self.handle_message(&peer, msg).await?;
            }
        }

        Ok(())
    }

    async fn handle_message(
        &mut self,
        peer: &Peer,
        msg: Message,
    ) -> Result<(), Error> {
        let ctx = &self.ctx;

        match msg {
            Message::KeepAlive => {
                debug!("{} keepalive", peer.addr);
            }
            Message::Choke => {
                debug!("{} choked us", peer.addr);
                peer.set_choked();
            }
            Message::Unchoke => {
                debug!("{} unchoked us", peer.addr);
                peer.set_unchoked();
                ctx.wake.notify_one();
            }
            Message::Have(index) => {
                if let Err(e) = peer.set_have(index).await {
                    debug!("{} sent have: {e}", peer.addr);
                }
                ctx.wake.notify_one();
            }
            Message::Bitfield(bitfield) => {
                peer.set_bitfield(bitfield).await;
                ctx.wake.notify_one();
            }
            // we don't upload
            Message::Interested
            | Message::NotInterested
            | Message::Request(_)
            | Message::Cancel(_) => {
                debug!("{} ignoring {msg:?}", peer.addr);
            }
            Message::Unknown(id) => {
                warn!("{} sent a message with unknown id {id}", peer.addr);
            }
            Message::Piece(block) => {
                self.handle_block(block).await?;
            }
        }

        Ok(())
    }

    /// Store the data of a block, and write its piece when it is the last
    /// block missing.
    async fn handle_block(&mut self, block: tcp_wire::Block) -> Result<(), Error> {
        let ctx = &self.ctx;

        if block.is_empty() {
            debug!("ignoring empty block of piece {}", block.index);
            return Ok(());
        }

        let index = block.index;
        let begin = block.begin;

        let piece = {
            let mut pieces = ctx.pieces.lock().await;

            let Some(piece) = pieces.get_mut(&index) else {
                debug!("piece {index} was already written");
                return Ok(());
            };
            let Some(b) = piece.get_block_by_offset(begin) else {
                debug!("piece {index} has no block at offset {begin}");
                return Ok(());
            };
            if b.status() == BlockStatus::Full {
                debug!("duplicate block {begin} of piece {index}");
                return Ok(());
            }

            let len = block.block.len() as u64;
            if !b.set_full(block.block) {
                debug!("block {begin} of piece {index} has a wrong size");
                return Ok(());
            }
            ctx.counter.record_download(len);

            // a block arrived, there is budget for one more request
            ctx.wake.notify_one();

            if !piece.is_full() {
                return Ok(());
            }

            // a piece leaves the working set only once its hash matched,
            // the requester stops when the set is empty.
            if ctx.config.verify_pieces {
                if let Some(hash) = ctx.content.piece_hash(index) {
                    if !piece.verify(hash) {
                        warn!("piece {index} has a wrong hash, downloading again");
                        ctx.counter.record_piece_rejected();
                        piece.reset();
                        return Ok(());
                    }
                }
            }

            pieces.remove(&index)
        };

        let Some(piece) = piece else { return Ok(()) };

        self.writer.write_piece(&piece, ctx.content.piece_length).await?;
        ctx.counter.record_piece_written();

        debug!("wrote piece {index}");

        Ok(())
    }
}
