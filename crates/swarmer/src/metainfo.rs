//! Metainfo is a .torrent file with information about the Torrent.
use std::path::Path;

use bendy::{
    decoding::{self, Decoder, FromBencode, Object, ResultExt},
    encoding::AsString,
};

use crate::{
    error::Error,
    tcp_wire::BLOCK_LEN,
    torrent::{ContentDescriptor, FileEntry, InfoHash},
};

#[derive(Debug, PartialEq, Clone, Default)]
pub struct MetaInfo {
    pub announce: Option<String>,
    pub announce_list: Option<Vec<Vec<String>>>,
    pub comment: Option<String>,
    pub info: Info,
}

/// File related information.
/// In a multi file torrent `name` is the name of the root directory and
/// `file_length` is replaced by `files`.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Info {
    /// If the torrent has only 1 file, this value is some, and files is none
    pub file_length: Option<u64>,

    /// If the torrent has many files, this is some, and file_length is none.
    pub files: Option<Vec<File>>,

    pub name: String,

    /// length in bytes of each piece, the last piece may have a smaller length
    pub piece_length: u32,

    /// A (byte) string consisting of the concatenation of all 20-byte SHA1
    /// hash values, one per piece.
    pub pieces: Vec<u8>,

    /// SHA-1 of the raw `info` dictionary, computed while decoding.
    pub info_hash: InfoHash,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct File {
    pub length: u64,
    pub path: Vec<String>,
}

impl MetaInfo {
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::from_bencode(&bytes)?)
    }

    /// Every tracker url of the torrent, without duplicates, `announce`
    /// first.
    pub fn trackers(&self) -> Vec<String> {
        let mut trackers: Vec<String> = Vec::new();

        let list = self.announce_list.iter().flatten().flatten();
        for url in self.announce.iter().chain(list) {
            if !trackers.contains(url) {
                trackers.push(url.clone());
            }
        }

        trackers
    }
}

impl Info {
    /// Size of all the content, in bytes.
    pub fn total_length(&self) -> u64 {
        match &self.files {
            Some(files) => files.iter().map(|f| f.length).sum(),
            None => self.file_length.unwrap_or(0),
        }
    }

    pub fn piece_hashes(&self) -> Vec<[u8; 20]> {
        self.pieces
            .chunks_exact(20)
            .map(|c| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(c);
                hash
            })
            .collect()
    }
}

impl From<&MetaInfo> for ContentDescriptor {
    fn from(meta: &MetaInfo) -> Self {
        let info = &meta.info;

        ContentDescriptor {
            name: info.name.clone(),
            total_length: info.total_length(),
            piece_length: info.piece_length,
            block_size: BLOCK_LEN,
            files: info.files.as_ref().map(|files| {
                files
                    .iter()
                    .map(|f| FileEntry {
                        path: f.path.clone(),
                        length: f.length,
                    })
                    .collect()
            }),
            info_hash: info.info_hash,
            piece_hashes: info.piece_hashes(),
        }
    }
}

impl FromBencode for MetaInfo {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut announce = None;
        let mut announce_list = None;
        let mut comment = None;
        let mut info = None;

        let mut dict_dec = object.try_into_dictionary()?;
        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"announce", value) => {
                    announce = String::decode_bencode_object(value)
                        .context("announce")
                        .map(Some)?;
                }
                (b"announce-list", value) => {
                    announce_list = Vec::decode_bencode_object(value)
                        .context("announce_list")
                        .map(Some)?;
                }
                (b"comment", value) => {
                    comment = String::decode_bencode_object(value)
                        .context("comment")
                        .map(Some)?;
                }
                (b"info", value) => {
                    info = Info::decode_bencode_object(value)
                        .context("info")
                        .map(Some)?;
                }
                _ => {}
            }
        }

        let info =
            info.ok_or_else(|| decoding::Error::missing_field("info"))?;

        Ok(MetaInfo { announce, announce_list, comment, info })
    }
}

impl FromBencode for Info {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut files = None;
        let mut file_length = None;
        let mut name = None;
        let mut piece_length = None;
        let mut pieces = None;

        // the info hash is taken over the exact bytes of the dictionary
        let bytes = object.try_into_dictionary()?.into_raw()?;
        let info_hash =
            InfoHash(sha1_smol::Sha1::from(bytes).digest().bytes());

        let mut decoder = Decoder::new(bytes);
        let mut dict = decoder
            .next_object()?
            .ok_or_else(|| decoding::Error::missing_field("info"))?
            .try_into_dictionary()?;

        while let Some(pair) = dict.next_pair()? {
            match pair {
                (b"files", value) => {
                    files = Vec::<File>::decode_bencode_object(value)
                        .context("files")
                        .map(Some)?;
                }
                (b"length", value) => {
                    file_length = u64::decode_bencode_object(value)
                        .context("file.length")
                        .map(Some)?;
                }
                (b"name", value) => {
                    name = String::decode_bencode_object(value)
                        .context("name")
                        .map(Some)?;
                }
                (b"piece length", value) => {
                    piece_length = u32::decode_bencode_object(value)
                        .context("piece length")
                        .map(Some)?;
                }
                (b"pieces", value) => {
                    pieces = AsString::decode_bencode_object(value)
                        .context("pieces")
                        .map(|bytes| Some(bytes.0))?;
                }
                _ => {}
            }
        }

        let name =
            name.ok_or_else(|| decoding::Error::missing_field("name"))?;
        let piece_length = piece_length
            .ok_or_else(|| decoding::Error::missing_field("piece_length"))?;
        let pieces =
            pieces.ok_or_else(|| decoding::Error::missing_field("pieces"))?;

        let total_length = match (&file_length, &files) {
            (Some(length), _) => *length,
            (None, Some(files)) => files.iter().map(|f| f.length).sum(),
            (None, None) => return Err(decoding::Error::missing_field("length")),
        };

        if piece_length == 0 {
            return Err(decoding::Error::unexpected_token(
                "a piece length greater than 0",
                piece_length,
            )
            .context("piece length"));
        }

        // one 20 byte hash per piece
        let hashes_len = total_length.div_ceil(piece_length as u64) * 20;
        if pieces.len() as u64 != hashes_len {
            return Err(decoding::Error::unexpected_token(
                format!("{hashes_len} bytes of hashes"),
                pieces.len(),
            )
            .context("pieces"));
        }

        Ok(Info { file_length, files, name, piece_length, pieces, info_hash })
    }
}

impl FromBencode for File {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut dict_dec = object.try_into_dictionary()?;
        let mut length = 0;
        let mut path: Vec<String> = vec![];

        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"length", value) => {
                    length = u64::decode_bencode_object(value)
                        .context("length")?;
                }
                (b"path", value) => {
                    path = Vec::<String>::decode_bencode_object(value)
                        .context("path")?;
                }
                _ => {}
            }
        }

        Ok(Self { length, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &[u8] = b"d6:lengthi32768e4:name7:foo.txt\
        12:piece lengthi16384e6:pieces40:\
        aaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbe";

    fn torrent(info: &[u8]) -> Vec<u8> {
        let mut buf = b"d8:announce32:udp://tracker.test:6969/announce\
            13:announce-listll32:udp://tracker.test:6969/announceel\
            26:http://other.test/announceee4:info"
            .to_vec();
        buf.extend_from_slice(info);
        buf.push(b'e');
        buf
    }

    #[test]
    fn single_file() {
        let meta = MetaInfo::from_bencode(&torrent(INFO)).unwrap();

        assert_eq!(meta.info.name, "foo.txt");
        assert_eq!(meta.info.piece_length, 16384);
        assert_eq!(meta.info.total_length(), 32768);
        assert_eq!(meta.info.piece_hashes(), vec![[b'a'; 20], [b'b'; 20]]);

        // the hash is over the raw bytes of the info dict
        let expected = sha1_smol::Sha1::from(INFO).digest().bytes();
        assert_eq!(meta.info.info_hash, InfoHash(expected));

        assert_eq!(
            meta.trackers(),
            vec![
                "udp://tracker.test:6969/announce".to_owned(),
                "http://other.test/announce".to_owned(),
            ]
        );

        let content = ContentDescriptor::from(&meta);
        assert_eq!(content.pieces_count(), 2);
        assert_eq!(content.block_size, BLOCK_LEN);
        assert!(content.files.is_none());
        assert_eq!(content.piece_hash(1), Some(&[b'b'; 20]));
    }

    #[test]
    fn multi_file() {
        let info = b"d5:filesld6:lengthi10e4:pathl3:foo5:a.txteed\
            6:lengthi5e4:pathl5:b.txteee4:name3:dir\
            12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae";
        let meta = MetaInfo::from_bencode(&torrent(info)).unwrap();

        assert_eq!(meta.info.total_length(), 15);

        let content = ContentDescriptor::from(&meta);
        assert_eq!(
            content.files,
            Some(vec![
                FileEntry {
                    path: vec!["foo".into(), "a.txt".into()],
                    length: 10,
                },
                FileEntry { path: vec!["b.txt".into()], length: 5 },
            ])
        );
    }

    #[test]
    fn missing_fields_are_errors() {
        let no_length = b"d4:name3:foo12:piece lengthi1e6:pieces0:e";
        assert!(MetaInfo::from_bencode(&torrent(no_length)).is_err());
        assert!(MetaInfo::from_bencode(b"d8:announce3:fooe").is_err());
    }

    #[test]
    fn zero_piece_length_is_refused() {
        let info = b"d6:lengthi32768e4:name7:foo.txt\
            12:piece lengthi0e6:pieces0:e";
        assert!(MetaInfo::from_bencode(&torrent(info)).is_err());
    }

    #[test]
    fn pieces_must_hash_every_piece() {
        // two pieces of 16384 bytes but only one hash
        let short = b"d6:lengthi32768e4:name7:foo.txt\
            12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae";
        assert!(MetaInfo::from_bencode(&torrent(short)).is_err());

        // a trailing partial hash
        let ragged = b"d6:lengthi32768e4:name7:foo.txt\
            12:piece lengthi16384e6:pieces41:\
            aaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbce";
        assert!(MetaInfo::from_bencode(&torrent(ragged)).is_err());
    }
}
