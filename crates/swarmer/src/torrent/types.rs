use std::fmt::Display;

/// SHA-1 of the bencoded `info` dictionary, identifies a torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InfoHash(pub [u8; 20]);

impl From<[u8; 20]> for InfoHash {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InfoHash({self})")
    }
}

/// One file of a multi-file torrent. The last item of `path` is the file
/// name, the previous ones are directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: u64,
}

/// Everything the download needs to know about the content, independent of
/// where it came from. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    /// File name of a single-file torrent, or the root directory of a
    /// multi-file one.
    pub name: String,
    pub total_length: u64,
    pub piece_length: u32,
    pub block_size: u32,
    /// `None` for a single-file torrent.
    pub files: Option<Vec<FileEntry>>,
    pub info_hash: InfoHash,
    /// Expected SHA-1 of each piece, empty when unknown.
    pub piece_hashes: Vec<[u8; 20]>,
}

impl ContentDescriptor {
    pub fn pieces_count(&self) -> u32 {
        if self.piece_length == 0 {
            return 0;
        }
        self.total_length.div_ceil(self.piece_length as u64) as u32
    }

    /// Size of the piece at `index`, the last one might be smaller.
    pub fn piece_size(&self, index: u32) -> u32 {
        let start = index as u64 * self.piece_length as u64;
        let end = (start + self.piece_length as u64).min(self.total_length);
        end.saturating_sub(start) as u32
    }

    pub fn piece_hash(&self, index: u32) -> Option<&[u8; 20]> {
        self.piece_hashes.get(index as usize)
    }
}
