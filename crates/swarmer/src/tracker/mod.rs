//! A tracker is a server that knows which peers are sharing a torrent.
//!
//! Every way of discovering peers implements [`TrackerClient`]: the HTTP
//! and UDP trackers of the metainfo, or a [`PeerList`] given by the user.
pub mod http;
pub mod peer_list;
pub mod udp;

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use futures::future::join_all;
use hashbrown::HashSet;
use tracing::{debug, info, warn};

use crate::{error::Error, peer::PeerId, torrent::ContentDescriptor};

pub use http::HttpTracker;
pub use peer_list::PeerList;
pub use udp::UdpTracker;

/// Something that can give us the addresses of peers of a torrent.
pub trait TrackerClient {
    /// Announce that we started downloading `content` and return the peers
    /// the tracker knows about.
    fn get_peers(
        &self,
        local_id: &PeerId,
        port: u16,
        content: &ContentDescriptor,
    ) -> impl Future<Output = Result<Vec<SocketAddr>, Error>> + Send;
}

#[derive(Debug)]
pub enum Tracker {
    Http(HttpTracker),
    Udp(UdpTracker),
}

impl Tracker {
    /// Build the tracker of an announce url, chosen by its scheme.
    pub fn from_url(url: &str, timeout: Duration) -> Result<Self, Error> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(Self::Http(HttpTracker::new(url, timeout)?));
        }
        if url.starts_with("udp://") {
            return Ok(Self::Udp(UdpTracker::new(url, timeout)?));
        }
        Err(Error::TrackerUnsupported(url.to_owned()))
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Http(t) => t.url(),
            Self::Udp(t) => t.url(),
        }
    }
}

impl TrackerClient for Tracker {
    async fn get_peers(
        &self,
        local_id: &PeerId,
        port: u16,
        content: &ContentDescriptor,
    ) -> Result<Vec<SocketAddr>, Error> {
        match self {
            Self::Http(t) => t.get_peers(local_id, port, content).await,
            Self::Udp(t) => t.get_peers(local_id, port, content).await,
        }
    }
}

/// Asks every tracker of a torrent at once and merges their answers.
#[derive(Debug, Default)]
pub struct TrackerManager {
    trackers: Vec<Tracker>,
}

impl TrackerManager {
    /// Trackers with an unsupported scheme are logged and left out.
    pub fn new(urls: &[String], timeout: Duration) -> Self {
        let trackers = urls
            .iter()
            .filter_map(|url| match Tracker::from_url(url, timeout) {
                Ok(tracker) => Some(tracker),
                Err(e) => {
                    warn!("skipping tracker: {e}");
                    None
                }
            })
            .collect();

        Self { trackers }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

impl TrackerClient for TrackerManager {
    /// Peers of all trackers that answered, without duplicates, in the
    /// order they were received.
    ///
    /// # Errors
    ///
    /// [`Error::NoPeers`] when no tracker returned any peer.
    #[tracing::instrument(skip_all)]
    async fn get_peers(
        &self,
        local_id: &PeerId,
        port: u16,
        content: &ContentDescriptor,
    ) -> Result<Vec<SocketAddr>, Error> {
        info!("announcing to {} trackers", self.trackers.len());

        let responses = join_all(
            self.trackers
                .iter()
                .map(|tracker| tracker.get_peers(local_id, port, content)),
        )
        .await;

        let mut seen = HashSet::new();
        let mut peers = Vec::new();

        for (tracker, r) in self.trackers.iter().zip(responses) {
            match r {
                Ok(addrs) => {
                    debug!("{} returned {} peers", tracker.url(), addrs.len());
                    peers.extend(addrs.into_iter().filter(|a| seen.insert(*a)));
                }
                Err(e) => warn!("tracker {} failed: {e}", tracker.url()),
            }
        }

        if peers.is_empty() {
            return Err(Error::NoPeers);
        }

        info!("trackers returned {} peers", peers.len());
        Ok(peers)
    }
}

/// Decode a compact peer list (BEP 23).
///
/// In ipv4 the addresses come in packets of 6 bytes, 4 for the ip and 2 for
/// the port. In ipv6 they are 18 bytes, 16 for the ip and 2 for the port.
pub fn parse_compact_peer_list(
    buf: &[u8],
    is_ipv6: bool,
) -> Result<Vec<SocketAddr>, Error> {
    let stride = if is_ipv6 { 18 } else { 6 };

    let chunks = buf.chunks_exact(stride);
    if !chunks.remainder().is_empty() {
        return Err(Error::TrackerCompactPeerList);
    }

    let peers = chunks
        .map(|hostport| {
            let (ip, port) = hostport.split_at(stride - 2);
            let ip = if is_ipv6 {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(ip);
                IpAddr::from(Ipv6Addr::from(octets))
            } else {
                IpAddr::from(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]))
            };
            let port = u16::from_be_bytes([port[0], port[1]]);

            SocketAddr::new(ip, port)
        })
        .collect();

    Ok(peers)
}
