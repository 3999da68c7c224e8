//! A library for downloading content with the BitTorrent protocol V1.
//!
//! This is the library behind the `swarmer` command line client. It has the
//! building blocks of a leecher: the peer wire protocol, the pool of
//! connected peers, the piece scheduler, trackers and the reconstruction of
//! the downloaded files on disk.
//!
//! # Example
//!
//! Download a torrent from a known list of peers:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use swarmer::{
//!     config::Config,
//!     counter::Counter,
//!     disk::Disk,
//!     metainfo::MetaInfo,
//!     peer::PeerId,
//!     torrent::{ContentDescriptor, Torrent, TorrentCtx},
//!     tracker::{PeerList, TrackerClient},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), swarmer::error::Error> {
//!     let config = Config::load().await?;
//!     let meta = MetaInfo::from_file("debian.torrent").await?;
//!     let content = ContentDescriptor::from(&meta);
//!     let local_id = PeerId::gen();
//!
//!     let list: PeerList = "127.0.0.1:6881".parse()?;
//!     let peers = list.get_peers(&local_id, config.listen_port, &content).await?;
//!
//!     let disk = Disk::new(&config.download_dir, &content).await?;
//!     let ctx =
//!         TorrentCtx::new(content, local_id, config, Arc::new(Counter::new()));
//!     ctx.pool.add_peers(peers).await;
//!
//!     Torrent::new(Arc::new(ctx), disk).run().await
//! }
//! ```

pub mod bitfield;
pub mod config;
pub mod counter;
pub mod disk;
pub mod error;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod pool;
pub mod tcp_wire;
pub mod torrent;
pub mod tracker;
pub mod utils;
