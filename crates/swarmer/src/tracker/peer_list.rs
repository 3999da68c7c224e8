//! Peers given by the user instead of a tracker: a file with one `ip:port`
//! per line, or an inline comma-separated list.
use std::{net::SocketAddr, path::Path, str::FromStr};

use tracing::debug;

use super::TrackerClient;
use crate::{error::Error, peer::PeerId, torrent::ContentDescriptor};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerList(pub Vec<SocketAddr>);

impl PeerList {
    /// `arg` is read as a file when such a file exists, otherwise it is
    /// parsed as an inline list.
    pub async fn from_arg(arg: &str) -> Result<Self, Error> {
        if Path::new(arg).is_file() {
            debug!("reading peers from {arg}");
            let content = tokio::fs::read_to_string(arg).await?;
            return content.parse();
        }
        arg.parse()
    }
}

impl FromStr for PeerList {
    type Err = Error;

    /// Blank lines and lines starting with `#` are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(['\n', ','])
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                line.parse::<SocketAddr>()
                    .map_err(|_| Error::InvalidPeerAddr(line.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl TrackerClient for PeerList {
    async fn get_peers(
        &self,
        _local_id: &PeerId,
        _port: u16,
        _content: &ContentDescriptor,
    ) -> Result<Vec<SocketAddr>, Error> {
        if self.0.is_empty() {
            return Err(Error::NoPeers);
        }
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use rand::{distributions::Alphanumeric, Rng};

    use super::*;

    #[test]
    fn file_format() {
        let list: PeerList = "# seeders\n127.0.0.1:6881\n\n  10.0.0.2:80  \r\n\
                              # [::1]:1\n[::1]:6882\n"
            .parse()
            .unwrap();

        assert_eq!(
            list.0,
            vec![
                "127.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:80".parse().unwrap(),
                "[::1]:6882".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn inline_list() {
        let list: PeerList = "127.0.0.1:1, 127.0.0.1:2".parse().unwrap();
        assert_eq!(list.0.len(), 2);
    }

    #[test]
    fn invalid_address() {
        let r = "127.0.0.1:1\nlocalhost".parse::<PeerList>();
        assert!(matches!(r, Err(Error::InvalidPeerAddr(addr)) if addr == "localhost"));
    }

    #[tokio::test]
    async fn from_file_or_inline() {
        let name: String = rand::thread_rng()
            .sample_iter(Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let path = std::env::temp_dir().join(format!("swarmer-{name}.peers"));
        tokio::fs::write(&path, "127.0.0.1:6881\n").await.unwrap();

        let list = PeerList::from_arg(path.to_str().unwrap()).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(list.0, vec!["127.0.0.1:6881".parse::<SocketAddr>().unwrap()]);

        let list = PeerList::from_arg("127.0.0.1:6882").await.unwrap();
        assert_eq!(list.0, vec!["127.0.0.1:6882".parse::<SocketAddr>().unwrap()]);

        let empty = PeerList::from_arg("").await.unwrap();
        let content = ContentDescriptor {
            name: "foo".to_owned(),
            total_length: 1,
            piece_length: 1,
            block_size: 1,
            files: None,
            info_hash: Default::default(),
            piece_hashes: vec![],
        };
        assert!(matches!(
            empty.get_peers(&PeerId::default(), 6881, &content).await,
            Err(Error::NoPeers)
        ));
    }
}
