use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[clap(name = "swarmer")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// Path of the .torrent file to download.
    pub torrent: PathBuf,

    /// The directory in which the content will be downloaded.
    #[clap(short, long)]
    pub download_dir: Option<PathBuf>,

    /// Peers to download from instead of asking the trackers: a file with
    /// one `ip:port` per line, or a comma-separated list.
    #[clap(short, long, value_name = "FILE|LIST")]
    pub peers: Option<String>,

    /// Maximum number of connected peers.
    #[clap(short, long)]
    pub max_peers: Option<usize>,

    /// Port announced to the trackers.
    #[clap(long)]
    pub port: Option<u16>,

    /// Configuration file, instead of the one in the user's config folder.
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the logs to this file instead of stdout.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// More logs, `-v` for debug and `-vv` for trace.
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
