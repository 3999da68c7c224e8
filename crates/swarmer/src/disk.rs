//! Disk is responsible for the file I/O of a download.
use std::{
    future::Future,
    io::SeekFrom,
    path::{Path, PathBuf},
};

use tokio::{
    fs::{create_dir_all, remove_file, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, info};

use crate::{
    error::Error,
    piece::Piece,
    torrent::{ContentDescriptor, FileEntry},
};

/// Destination of verified pieces.
pub trait PieceWriter: Send {
    /// Write the data of a full piece at byte offset
    /// `piece_size * piece.index` of the content.
    fn write_piece(
        &mut self,
        piece: &Piece,
        piece_size: u32,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Called once, after the last piece was written.
    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Writes the content into a single staging file, in piece order. On
/// [`PieceWriter::close`], a multi-file torrent is split into its file tree
/// and the staging file removed.
#[derive(Debug)]
pub struct Disk {
    staging: File,
    staging_path: PathBuf,
    /// `download_dir/name`, the file of a single-file torrent or the root
    /// directory of a multi-file one.
    root: PathBuf,
    files: Option<Vec<FileEntry>>,
}

impl Disk {
    pub async fn new(
        download_dir: impl AsRef<Path>,
        content: &ContentDescriptor,
    ) -> Result<Self, Error> {
        let download_dir = download_dir.as_ref();
        create_dir_all(download_dir).await?;

        let root = download_dir.join(&content.name);
        let staging_path = match content.files {
            Some(_) => download_dir.join(format!("{}.part", content.name)),
            None => root.clone(),
        };

        let staging = Self::open_file(&staging_path).await?;
        // an older file at the same path may be longer than the content
        staging.set_len(content.total_length).await?;

        debug!("staging file {staging_path:?}");

        Ok(Self { staging, staging_path, root, files: content.files.clone() })
    }

    pub async fn open_file(path: impl AsRef<Path>) -> Result<File, Error> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?)
    }

    /// Copy sequential ranges of the staging file into each file of the
    /// torrent, creating their directories.
    async fn split_files(&mut self) -> Result<(), Error> {
        let Some(files) = &self.files else { return Ok(()) };

        self.staging.seek(SeekFrom::Start(0)).await?;

        for meta_file in files {
            // the last item of the vec will be a file, all the previous ones
            // will be directories.
            let Some((file, dirs)) = meta_file.path.split_last() else {
                continue;
            };

            let mut path = self.root.clone();
            path.extend(dirs);
            create_dir_all(&path).await?;
            path.push(file);

            let mut out = File::create(&path).await?;
            let mut range = (&mut self.staging).take(meta_file.length);
            let copied = tokio::io::copy(&mut range, &mut out).await?;
            out.flush().await?;

            debug!("wrote {copied} bytes to {path:?}");
        }

        Ok(())
    }
}

impl PieceWriter for Disk {
    async fn write_piece(
        &mut self,
        piece: &Piece,
        piece_size: u32,
    ) -> Result<(), Error> {
        let data = piece.get_data().ok_or(Error::PieceIncomplete(piece.index))?;
        let offset = piece_size as u64 * piece.index as u64;

        self.staging.seek(SeekFrom::Start(offset)).await?;
        self.staging.write_all(&data).await?;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.staging.flush().await?;

        if self.files.is_some() {
            self.split_files().await?;
            remove_file(&self.staging_path).await?;
        }

        info!("content written to {:?}", self.root);
        Ok(())
    }
}
