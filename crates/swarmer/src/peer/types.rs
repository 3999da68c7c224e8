use std::fmt::Display;

use rand::{distributions::Alphanumeric, Rng};

/// Prefix of the peer ids generated by this client, Azureus-style.
pub const PEER_ID_PREFIX: &[u8; 8] = b"-SW0010-";

/// The 20 byte id of a peer, exchanged in the handshake.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// A random id for the local peer: the client prefix followed by 12
    /// alphanumeric characters.
    pub fn gen() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PEER_ID_PREFIX);

        let mut rng = rand::thread_rng();
        for b in &mut id[8..] {
            *b = rng.sample(Alphanumeric);
        }

        Self(id)
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({self})")
    }
}

/// Lifecycle of a peer connection.
///
/// `Disconnected` is both the initial and the terminal state, a connection
/// that dropped is never brought back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_the_client_prefix() {
        let a = PeerId::gen();
        let b = PeerId::gen();

        assert_eq!(&a.0[..8], PEER_ID_PREFIX);
        assert!(a.0[8..].iter().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 40);
    }
}
