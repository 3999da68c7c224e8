//! Configuration of the client, read from a TOML file and `SWARMER_*`
//! environment variables on top of the defaults.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use tokio::fs::{create_dir_all, write};
use tracing::info;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Where the downloaded content is written.
    pub download_dir: PathBuf,
    /// Port announced to trackers.
    pub listen_port: u16,
    /// Maximum number of connected peers.
    pub max_peers: usize,
    /// How many handshakes are attempted at the same time.
    pub max_handshakes: usize,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// A block requested longer than this ago is requested again.
    pub request_timeout_ms: u64,
    /// Upper bound of how long the requester sleeps when nothing wakes it.
    pub request_interval_ms: u64,
    /// Blocks requested and not yet received, across all peers.
    pub max_inflight_requests: usize,
    /// How long to wait for any peer to send something before checking
    /// whether the download is done.
    pub readiness_timeout_ms: u64,
    /// Pause before reading again when no peer is connected.
    pub out_of_peers_delay_ms: u64,
    pub tracker_timeout_ms: u64,
    /// Check the SHA-1 of each piece before writing it.
    pub verify_pieces: bool,
}

impl Default for Config {
    fn default() -> Self {
        let download_dir = UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            download_dir,
            listen_port: 6881,
            max_peers: 12,
            max_handshakes: 80,
            connect_timeout_ms: 3_000,
            handshake_timeout_ms: 3_000,
            request_timeout_ms: 7_000,
            request_interval_ms: 50,
            max_inflight_requests: 64,
            readiness_timeout_ms: 1_000,
            out_of_peers_delay_ms: 2_000,
            tracker_timeout_ms: 3_000,
            verify_pieces: true,
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn out_of_peers_delay(&self) -> Duration {
        Duration::from_millis(self.out_of_peers_delay_ms)
    }

    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_millis(self.tracker_timeout_ms)
    }

    /// Returns the path of the configuration file in the user's config
    /// folder.
    ///
    /// If it doesn't exist, a file with the default configuration is
    /// created there.
    ///
    /// # Errors
    ///
    /// This fn can fail if the user has no home folder, or if the program
    /// does not have permission to create the folder or the file.
    pub async fn config_file() -> Result<PathBuf, Error> {
        let dotfile =
            ProjectDirs::from("", "", "Swarmer").ok_or(Error::HomeInvalid)?;
        let config_dir = dotfile.config_dir();

        if !config_dir.exists() {
            create_dir_all(config_dir).await?;
        }

        let config_path = config_dir.join("config.toml");

        if !config_path.exists() {
            let default_config = toml::to_string(&Config::default())?;
            write(&config_path, default_config).await?;
            info!("created default configuration at {config_path:?}");
        }

        Ok(config_path)
    }

    /// Layer, in order: defaults, the TOML file at `path` (if any) and
    /// `SWARMER_*` environment variables.
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let config = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("SWARMER").try_parsing(true),
            )
            .build()?
            .try_deserialize::<Config>()?;

        Ok(config)
    }

    /// Load the configuration from the user's config folder, creating the
    /// file with the defaults when it does not exist.
    pub async fn load() -> Result<Self, Error> {
        let path = Self::config_file().await?;
        Self::load_from(&path)
    }
}
