//! HTTP(S) trackers, the announce is a GET with the torrent in the query
//! string, answered by a bencoded dictionary.
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use bendy::{
    decoding::{self, FromBencode, Object, ResultExt},
    encoding::AsString,
};
use reqwest::Client;
use tracing::debug;

use super::{parse_compact_peer_list, TrackerClient};
use crate::{error::Error, peer::PeerId, torrent::ContentDescriptor};

#[derive(Debug, Clone)]
pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.to_owned() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn announce_url(
        &self,
        local_id: &PeerId,
        port: u16,
        content: &ContentDescriptor,
    ) -> String {
        // some trackers carry a passkey in the query already
        let separator = if self.url.contains('?') { '&' } else { '?' };

        format!(
            "{}{separator}info_hash={}&peer_id={}&port={port}&uploaded=0\
             &downloaded=0&left={}&compact=1&event=started",
            self.url,
            urlencoding::encode_binary(&content.info_hash.0),
            urlencoding::encode_binary(&local_id.0),
            content.total_length,
        )
    }
}

impl TrackerClient for HttpTracker {
    async fn get_peers(
        &self,
        local_id: &PeerId,
        port: u16,
        content: &ContentDescriptor,
    ) -> Result<Vec<SocketAddr>, Error> {
        let url = self.announce_url(local_id, port, content);
        debug!("announcing to {url}");

        let bytes = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Response::from_bencode(&bytes)?.peers()
    }
}

/// The `peers` key is either a compact string or a list of dictionaries.
#[derive(Debug, Clone, PartialEq)]
enum Peers {
    Compact(Vec<u8>),
    Dicts(Vec<PeerDict>),
}

#[derive(Debug, Clone, PartialEq)]
struct PeerDict {
    ip: String,
    port: u16,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub failure_reason: Option<String>,
    /// Seconds the tracker wants us to wait before announcing again.
    pub interval: Option<u32>,
    peers: Option<Peers>,
    peers6: Option<Vec<u8>>,
}

impl Response {
    /// Every peer of the response, ipv4 first.
    ///
    /// # Errors
    ///
    /// [`Error::TrackerFailure`] when the tracker refused the announce.
    pub fn peers(&self) -> Result<Vec<SocketAddr>, Error> {
        if let Some(reason) = &self.failure_reason {
            return Err(Error::TrackerFailure(reason.clone()));
        }

        let mut peers = match &self.peers {
            Some(Peers::Compact(buf)) => parse_compact_peer_list(buf, false)?,
            Some(Peers::Dicts(dicts)) => dicts
                .iter()
                .filter_map(|p| match p.ip.parse::<IpAddr>() {
                    Ok(ip) => Some(SocketAddr::new(ip, p.port)),
                    Err(_) => {
                        debug!("ignoring peer with host {}", p.ip);
                        None
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        if let Some(buf) = &self.peers6 {
            peers.extend(parse_compact_peer_list(buf, true)?);
        }

        Ok(peers)
    }
}

impl FromBencode for Response {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut res = Response::default();

        let mut dict_dec = object.try_into_dictionary()?;
        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"failure reason", value) => {
                    res.failure_reason = String::decode_bencode_object(value)
                        .context("failure reason")
                        .map(Some)?;
                }
                (b"interval", value) => {
                    res.interval = u32::decode_bencode_object(value)
                        .context("interval")
                        .map(Some)?;
                }
                (b"peers", Object::Bytes(bytes)) => {
                    res.peers = Some(Peers::Compact(bytes.to_vec()));
                }
                (b"peers", value) => {
                    res.peers = Vec::<PeerDict>::decode_bencode_object(value)
                        .context("peers")
                        .map(|p| Some(Peers::Dicts(p)))?;
                }
                (b"peers6", value) => {
                    res.peers6 = AsString::decode_bencode_object(value)
                        .context("peers6")
                        .map(|bytes: AsString<Vec<u8>>| Some(bytes.0))?;
                }
                _ => {}
            }
        }

        Ok(res)
    }
}

impl FromBencode for PeerDict {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut ip = None;
        let mut port = None;

        let mut dict_dec = object.try_into_dictionary()?;
        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"ip", value) => {
                    ip = String::decode_bencode_object(value)
                        .context("ip")
                        .map(Some)?;
                }
                (b"port", value) => {
                    port = u16::decode_bencode_object(value)
                        .context("port")
                        .map(Some)?;
                }
                _ => {}
            }
        }

        let ip = ip.ok_or_else(|| decoding::Error::missing_field("ip"))?;
        let port = port.ok_or_else(|| decoding::Error::missing_field("port"))?;

        Ok(Self { ip, port })
    }
}
