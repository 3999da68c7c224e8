//! UDP trackers (BEP 15). A connect exchange gives us a connection id, that
//! is then used to announce.
use std::{net::SocketAddr, time::Duration};

use bytes::{Buf, BufMut, BytesMut};
use tokio::{net::UdpSocket, time::timeout};
use tracing::debug;

use super::{parse_compact_peer_list, TrackerClient};
use crate::{
    error::Error,
    peer::PeerId,
    torrent::{ContentDescriptor, InfoHash},
};

const PROTOCOL_ID: u64 = 0x41727101980;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

const EVENT_STARTED: u32 = 2;

/// How many times a request is sent before giving up.
const ATTEMPTS: u32 = 3;

const ANNOUNCE_RES_BUF_LEN: usize = 8192;

#[derive(Debug, Clone)]
pub struct UdpTracker {
    url: String,
    /// `host:port` of the tracker.
    host: String,
    timeout: Duration,
}

impl UdpTracker {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, Error> {
        let host = url
            .strip_prefix("udp://")
            .and_then(|rest| rest.split('/').next())
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::TrackerUnsupported(url.to_owned()))?;

        Ok(Self { url: url.to_owned(), host: host.to_owned(), timeout })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `req` and wait for the answer. A lost request is sent again,
    /// doubling the wait each time.
    async fn send_and_recv(
        &self,
        socket: &UdpSocket,
        req: &[u8],
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let mut retransmit = self.timeout;

        for i in 1..=ATTEMPTS {
            socket.send(req).await?;

            match timeout(retransmit, socket.recv(buf)).await {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    retransmit *= 2;
                    debug!(
                        "request to {} was lost ({i}/{ATTEMPTS}), trying \
                         again with {retransmit:?}",
                        self.host
                    );
                }
            }
        }

        Err(Error::TrackerResponse)
    }
}

impl TrackerClient for UdpTracker {
    async fn get_peers(
        &self,
        local_id: &PeerId,
        port: u16,
        content: &ContentDescriptor,
    ) -> Result<Vec<SocketAddr>, Error> {
        let addr = tokio::net::lookup_host(&self.host)
            .await?
            .next()
            .ok_or(Error::TrackerResponse)?;

        let local = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;

        let mut buf = [0u8; ANNOUNCE_RES_BUF_LEN];

        let transaction_id = rand::random::<u32>();
        let req = connect_request(transaction_id);
        let len = self.send_and_recv(&socket, &req, &mut buf).await?;
        let connection_id = parse_connect_response(&buf[..len], transaction_id)?;

        debug!("connected to {addr} with id {connection_id}");

        let transaction_id = rand::random::<u32>();
        let req = AnnounceRequest {
            connection_id,
            transaction_id,
            info_hash: content.info_hash,
            peer_id: *local_id,
            left: content.total_length,
            key: rand::random(),
            port,
        }
        .serialize();
        let len = self.send_and_recv(&socket, &req, &mut buf).await?;

        parse_announce_response(&buf[..len], transaction_id, addr.is_ipv6())
    }
}

pub fn connect_request(transaction_id: u32) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[..8].copy_from_slice(&PROTOCOL_ID.to_be_bytes());
    buf[8..12].copy_from_slice(&ACTION_CONNECT.to_be_bytes());
    buf[12..16].copy_from_slice(&transaction_id.to_be_bytes());
    buf
}

/// Read the action and transaction id that start every response, and the
/// error message when the action is an error.
fn response_header(
    buf: &mut &[u8],
    action: u32,
    transaction_id: u32,
) -> Result<(), Error> {
    if buf.len() < 8 {
        return Err(Error::TrackerResponse);
    }

    let res_action = buf.get_u32();
    let res_transaction_id = buf.get_u32();

    if res_transaction_id != transaction_id {
        return Err(Error::TrackerResponse);
    }
    if res_action == ACTION_ERROR {
        return Err(Error::TrackerFailure(
            String::from_utf8_lossy(*buf).into_owned(),
        ));
    }
    if res_action != action {
        return Err(Error::TrackerResponse);
    }

    Ok(())
}

/// Returns the connection id.
pub fn parse_connect_response(
    mut buf: &[u8],
    transaction_id: u32,
) -> Result<u64, Error> {
    response_header(&mut buf, ACTION_CONNECT, transaction_id)?;

    if buf.len() < 8 {
        return Err(Error::TrackerResponse);
    }
    Ok(buf.get_u64())
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnounceRequest {
    pub connection_id: u64,
    pub transaction_id: u32,
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub left: u64,
    pub key: u32,
    pub port: u16,
}

impl AnnounceRequest {
    pub const LEN: usize = 98;

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::LEN);

        buf.put_u64(self.connection_id);
        buf.put_u32(ACTION_ANNOUNCE);
        buf.put_u32(self.transaction_id);
        buf.put_slice(&self.info_hash.0);
        buf.put_slice(&self.peer_id.0);
        // downloaded
        buf.put_u64(0);
        buf.put_u64(self.left);
        // uploaded
        buf.put_u64(0);
        buf.put_u32(EVENT_STARTED);
        // ip address, the tracker uses the sender's
        buf.put_u32(0);
        buf.put_u32(self.key);
        // num_want, as many as the tracker wants to give
        buf.put_i32(-1);
        buf.put_u16(self.port);

        buf
    }
}

/// Decode the peers of an announce response, after the interval, leechers
/// and seeders.
pub fn parse_announce_response(
    mut buf: &[u8],
    transaction_id: u32,
    is_ipv6: bool,
) -> Result<Vec<SocketAddr>, Error> {
    response_header(&mut buf, ACTION_ANNOUNCE, transaction_id)?;

    if buf.len() < 12 {
        return Err(Error::TrackerResponse);
    }

    let interval = buf.get_u32();
    let leechers = buf.get_u32();
    let seeders = buf.get_u32();

    debug!("interval {interval}s, {leechers} leechers, {seeders} seeders");

    parse_compact_peer_list(buf, is_ipv6)
}
