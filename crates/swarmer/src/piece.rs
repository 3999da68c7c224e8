//! Pieces and the blocks they are split into, with the bookkeeping of which
//! blocks were requested and which already arrived.
use std::time::Duration;

use tokio::time::Instant;

use crate::tcp_wire::BlockInfo;

/// Status of a [`Block`].
///
/// `Free -> Requested` when a request is sent, `Requested -> Full` when its
/// data arrives and `Requested -> Free` when the request goes stale or could
/// not be sent. A stale request may still be answered, so `Free -> Full` is
/// allowed too. `Full` is terminal unless the whole piece is reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlockStatus {
    #[default]
    Free,
    Requested,
    Full,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Byte offset inside of the piece.
    pub offset: u32,
    pub size: u32,
    status: BlockStatus,
    requested_at: Option<Instant>,
    data: Vec<u8>,
}

impl Block {
    pub fn new(offset: u32, size: u32) -> Self {
        Self {
            offset,
            size,
            status: BlockStatus::Free,
            requested_at: None,
            data: Vec::new(),
        }
    }

    pub fn status(&self) -> BlockStatus {
        self.status
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_requested(&mut self) {
        self.status = BlockStatus::Requested;
        self.requested_at = Some(Instant::now());
    }

    /// Store the data of a `Requested` or `Free` block, the latter being a
    /// late answer to a reclaimed request. A `Full` block or data with a
    /// length different from the block size is refused, and the block is
    /// left untouched.
    pub fn set_full(&mut self, data: Vec<u8>) -> bool {
        if self.status == BlockStatus::Full
            || data.is_empty()
            || data.len() != self.size as usize
        {
            return false;
        }
        self.data = data;
        self.status = BlockStatus::Full;
        self.requested_at = None;
        true
    }

    /// Return a requested block to `Free`.
    pub fn release(&mut self) {
        if self.status == BlockStatus::Requested {
            self.status = BlockStatus::Free;
            self.requested_at = None;
        }
    }

    /// A request older than `timeout` is considered lost and the block is
    /// freed, so another peer can be asked for it.
    pub fn calculate_status(&mut self, timeout: Duration) -> BlockStatus {
        if self.status == BlockStatus::Requested
            && self.requested_at.is_some_and(|at| at.elapsed() > timeout)
        {
            self.release();
        }
        self.status
    }
}

/// Outcome of [`Piece::get_free_block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeBlock {
    /// The block was marked as requested, the caller must either send a
    /// request for it or release it.
    Block(BlockInfo),
    /// Every block that is not full is waiting for a peer to answer.
    PieceIsPending,
    PieceIsFull,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Piece {
    pub index: u32,
    pub size: u32,
    blocks: Vec<Block>,
}

impl Piece {
    pub fn new(index: u32, size: u32, block_size: u32) -> Self {
        Self { index, size, blocks: create_blocks(size, block_size) }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Free every stale request of this piece. Returns how many blocks are
    /// still in flight.
    pub fn reclaim_stale(&mut self, timeout: Duration) -> usize {
        self.blocks
            .iter_mut()
            .map(|b| b.calculate_status(timeout))
            .filter(|s| *s == BlockStatus::Requested)
            .count()
    }

    /// Pick the first free block, in offset order, and mark it as requested.
    /// Stale requests are freed before looking.
    pub fn get_free_block(&mut self, timeout: Duration) -> FreeBlock {
        self.reclaim_stale(timeout);

        if let Some(block) =
            self.blocks.iter_mut().find(|b| b.status == BlockStatus::Free)
        {
            block.set_requested();
            return FreeBlock::Block(BlockInfo {
                index: self.index,
                begin: block.offset,
                len: block.size,
            });
        }

        if self.is_full() {
            FreeBlock::PieceIsFull
        } else {
            FreeBlock::PieceIsPending
        }
    }

    /// Undo a [`Piece::get_free_block`] whose request was never sent.
    pub fn release_block(&mut self, offset: u32) {
        if let Some(block) = self.get_block_by_offset(offset) {
            block.release();
        }
    }

    /// `None` when no block starts at `offset`, the data of such a message
    /// can't be placed and the piece stays pending.
    pub fn get_block_by_offset(&mut self, offset: u32) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.offset == offset)
    }

    pub fn is_full(&self) -> bool {
        self.blocks.iter().all(|b| b.status == BlockStatus::Full)
    }

    pub fn requested_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.status == BlockStatus::Requested)
            .count()
    }

    /// The data of the piece, only available once every block is full.
    pub fn get_data(&self) -> Option<Vec<u8>> {
        if !self.is_full() {
            return None;
        }
        let mut data = Vec::with_capacity(self.size as usize);
        for block in &self.blocks {
            data.extend_from_slice(&block.data);
        }
        Some(data)
    }

    /// Compare the SHA-1 of the data against `hash`.
    pub fn verify(&self, hash: &[u8; 20]) -> bool {
        self.get_data().is_some_and(|data| {
            sha1_smol::Sha1::from(&data).digest().bytes() == *hash
        })
    }

    /// Throw away every block, the piece will be downloaded again.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            *block = Block::new(block.offset, block.size);
        }
    }
}

/// Split `total` bytes in chunks of `chunk`, the last one holding the
/// remainder. Returns `(offset, size)` pairs.
fn partition(total: u64, chunk: u32) -> impl Iterator<Item = (u64, u32)> {
    let chunk = chunk as u64;
    let count = if chunk == 0 { 0 } else { total.div_ceil(chunk) };

    (0..count).map(move |i| {
        let offset = i * chunk;
        (offset, (total - offset).min(chunk) as u32)
    })
}

/// Split the content in pieces of `piece_length`, the last piece holds the
/// remainder.
pub fn create_pieces(
    total_length: u64,
    piece_length: u32,
    block_size: u32,
) -> Vec<Piece> {
    partition(total_length, piece_length)
        .enumerate()
        .map(|(index, (_, size))| Piece::new(index as u32, size, block_size))
        .collect()
}

/// Split a piece in blocks of `block_size`, the last block holds the
/// remainder.
pub fn create_blocks(piece_size: u32, block_size: u32) -> Vec<Block> {
    partition(piece_size as u64, block_size)
        .map(|(offset, size)| Block::new(offset as u32, size))
        .collect()
}
