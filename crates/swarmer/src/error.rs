use std::{io, net::SocketAddr};

use thiserror::Error;

impl From<bendy::decoding::Error> for Error {
    fn from(value: bendy::decoding::Error) -> Self {
        Self::Bencode(value.to_string())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not connect to the peer {0}: {1}")]
    ConnectionFailed(SocketAddr, String),

    #[error("The handshake received is not valid")]
    HandshakeFailed,

    #[error("The peer closed the socket")]
    PeerDisconnected,

    #[error("Tried to use a peer that did not finish the handshake")]
    PeerNotConnected,

    #[error("There are no connected peers left")]
    OutOfPeers,

    #[error("No peers in the torrent")]
    NoPeers,

    #[error("The piece index {0} is out of bounds")]
    PieceOutOfBounds(u32),

    #[error("Tried to read the data of piece {0} before all blocks arrived")]
    PieceIncomplete(u32),

    #[error("The peer sent a message of {0} bytes, larger than the maximum")]
    MessageTooLarge(usize),

    #[error("Message with id {0} has an invalid payload of {1} bytes")]
    MalformedMessage(u8, usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to decode the bencode buffer: {0}")]
    Bencode(String),

    #[error("Error while trying to load configuration: `{0}`")]
    Config(#[from] config::ConfigError),

    #[error("Could not serialize the default configuration")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("HTTP request to the tracker failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("The response received from the tracker was wrong")]
    TrackerResponse,

    #[error("The tracker refused the announce: {0}")]
    TrackerFailure(String),

    #[error("The peer list returned by the announce request is not valid")]
    TrackerCompactPeerList,

    #[error("Tracker url `{0}` has an unsupported scheme")]
    TrackerUnsupported(String),

    #[error("`{0}` is not a valid peer address")]
    InvalidPeerAddr(String),

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,
}
