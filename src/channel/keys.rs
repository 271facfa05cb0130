//! # Channel Keys
//!
//! Static X25519 key material configured out of band. Keys travel through
//! configuration as 64-character hex strings; anything else is rejected as a
//! handshake failure so a bad key aborts startup instead of surfacing later.

use std::fmt;

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use super::errors::{ChannelError, ChannelResult};
use crate::constants::channel::KEY_LENGTH;

/// Which end of a point-to-point channel this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Dispatcher,
    Worker,
}

impl ChannelRole {
    /// The role on the other end of the channel
    pub fn peer(self) -> Self {
        match self {
            ChannelRole::Dispatcher => ChannelRole::Worker,
            ChannelRole::Worker => ChannelRole::Dispatcher,
        }
    }

    pub(crate) fn as_byte(self) -> u8 {
        match self {
            ChannelRole::Dispatcher => 0,
            ChannelRole::Worker => 1,
        }
    }
}

/// Local secret plus the remote peer's public key
#[derive(Clone)]
pub struct ChannelKeys {
    local_secret: StaticSecret,
    local_public: PublicKey,
    remote_public: PublicKey,
}

impl fmt::Debug for ChannelKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelKeys")
            .field("local_secret", &"[REDACTED]")
            .field("local_public", &hex::encode(self.local_public.as_bytes()))
            .field("remote_public", &hex::encode(self.remote_public.as_bytes()))
            .finish()
    }
}

impl ChannelKeys {
    /// Build channel keys from raw key bytes
    pub fn from_bytes(local_secret: [u8; KEY_LENGTH], remote_public: [u8; KEY_LENGTH]) -> Self {
        let local_secret = StaticSecret::from(local_secret);
        let local_public = PublicKey::from(&local_secret);
        Self {
            local_secret,
            local_public,
            remote_public: PublicKey::from(remote_public),
        }
    }

    /// Parse channel keys from hex configuration values
    ///
    /// When `expected_local_public_hex` is given it must be the public half of
    /// the configured private key; a mismatched pair is a handshake failure.
    pub fn from_hex(
        local_secret_hex: &str,
        remote_public_hex: &str,
        expected_local_public_hex: Option<&str>,
    ) -> ChannelResult<Self> {
        let secret = decode_key("private key", local_secret_hex)?;
        let remote = decode_key("remote public key", remote_public_hex)?;
        let keys = Self::from_bytes(secret, remote);

        if let Some(expected) = expected_local_public_hex {
            let expected = decode_key("local public key", expected)?;
            if expected != keys.local_public.to_bytes() {
                return Err(ChannelError::handshake(
                    "configured public key does not match the private key",
                ));
            }
        }

        Ok(keys)
    }

    pub fn local_public(&self) -> &PublicKey {
        &self.local_public
    }

    pub fn remote_public(&self) -> &PublicKey {
        &self.remote_public
    }

    pub(crate) fn local_secret(&self) -> &StaticSecret {
        &self.local_secret
    }

    /// Keys for the opposite end, given the peer's secret
    pub fn for_peer(&self, peer_secret: [u8; KEY_LENGTH]) -> Self {
        Self::from_bytes(peer_secret, self.local_public.to_bytes())
    }
}

/// Freshly generated key pair, hex encoded for configuration files
#[derive(Debug, Clone)]
pub struct GeneratedKeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Generate a new static key pair
pub fn generate_key_pair() -> GeneratedKeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    GeneratedKeyPair {
        private_key: hex::encode(secret.to_bytes()),
        public_key: hex::encode(public.as_bytes()),
    }
}

fn decode_key(label: &str, value: &str) -> ChannelResult<[u8; KEY_LENGTH]> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| ChannelError::handshake(format!("{label} is not valid hex: {e}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        ChannelError::handshake(format!(
            "{label} must be {KEY_LENGTH} bytes, got {}",
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_pair_round_trips_through_hex() {
        let worker = generate_key_pair();
        let dispatcher = generate_key_pair();

        let keys = ChannelKeys::from_hex(
            &worker.private_key,
            &dispatcher.public_key,
            Some(&worker.public_key),
        )
        .expect("generated keys should parse");

        assert_eq!(hex::encode(keys.local_public().as_bytes()), worker.public_key);
        assert_eq!(
            hex::encode(keys.remote_public().as_bytes()),
            dispatcher.public_key
        );
    }

    #[test]
    fn test_short_private_key_is_rejected() {
        let dispatcher = generate_key_pair();
        let err = ChannelKeys::from_hex("abcd", &dispatcher.public_key, None).unwrap_err();
        assert!(matches!(err, ChannelError::HandshakeFailed { .. }));
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn test_non_hex_key_is_rejected() {
        let worker = generate_key_pair();
        let err = ChannelKeys::from_hex(&worker.private_key, "not-hex", None).unwrap_err();
        assert!(matches!(err, ChannelError::HandshakeFailed { .. }));
    }

    #[test]
    fn test_mismatched_public_key_is_rejected() {
        let worker = generate_key_pair();
        let other = generate_key_pair();
        let dispatcher = generate_key_pair();

        let err = ChannelKeys::from_hex(
            &worker.private_key,
            &dispatcher.public_key,
            Some(&other.public_key),
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let worker = generate_key_pair();
        let dispatcher = generate_key_pair();
        let keys = ChannelKeys::from_hex(&worker.private_key, &dispatcher.public_key, None)
            .expect("keys should parse");
        let rendered = format!("{keys:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&worker.private_key));
    }
}
