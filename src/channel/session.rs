//! # Session State
//!
//! Key schedule and per-frame sealing for an established channel.
//!
//! The handshake mixes the static X25519 agreement (authentication) with an
//! ephemeral agreement (fresh keys per session), so frame counters can start
//! from zero on every connection without reusing a nonce under the same key.
//!
//! Frame layout: `counter (u64 BE) || AES-256-GCM(ciphertext || tag)`.
//! Hello layout: `random nonce (12) || AES-256-GCM(role || ephemeral public)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::PublicKey;

use super::errors::{ChannelError, ChannelResult};
use super::keys::ChannelRole;
use crate::constants::channel::{
    COUNTER_LENGTH, KEY_LENGTH, LABEL_DISPATCHER_TO_WORKER, LABEL_WORKER_TO_DISPATCHER,
    NONCE_LENGTH, TAG_LENGTH,
};

const LABEL_HELLO: &[u8] = b"flowrelay/v1/hello";
const HELLO_PLAINTEXT_LENGTH: usize = 1 + KEY_LENGTH;
const HELLO_FRAME_LENGTH: usize = NONCE_LENGTH + HELLO_PLAINTEXT_LENGTH + TAG_LENGTH;

fn derive_key(label: &[u8], parts: &[&[u8]]) -> [u8; KEY_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; KEY_LENGTH];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn cipher_for(key: &[u8; KEY_LENGTH]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

fn counter_nonce(counter: u64) -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce[NONCE_LENGTH - COUNTER_LENGTH..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Static public keys of both ends, ordered dispatcher first
#[derive(Debug, Clone, Copy)]
pub(crate) struct Participants<'a> {
    pub dispatcher: &'a PublicKey,
    pub worker: &'a PublicKey,
}

impl<'a> Participants<'a> {
    pub fn new(role: ChannelRole, local: &'a PublicKey, remote: &'a PublicKey) -> Self {
        match role {
            ChannelRole::Dispatcher => Self {
                dispatcher: local,
                worker: remote,
            },
            ChannelRole::Worker => Self {
                dispatcher: remote,
                worker: local,
            },
        }
    }
}

/// Cipher used only for the hello exchange, keyed by the static agreement
pub(crate) struct HelloCipher {
    cipher: Aes256Gcm,
}

impl HelloCipher {
    pub fn new(static_shared: &[u8; KEY_LENGTH], participants: Participants<'_>) -> Self {
        let key = derive_key(
            LABEL_HELLO,
            &[
                static_shared,
                participants.dispatcher.as_bytes(),
                participants.worker.as_bytes(),
            ],
        );
        Self {
            cipher: cipher_for(&key),
        }
    }

    pub fn seal(&self, role: ChannelRole, ephemeral: &PublicKey) -> ChannelResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);

        let mut plaintext = Vec::with_capacity(HELLO_PLAINTEXT_LENGTH);
        plaintext.push(role.as_byte());
        plaintext.extend_from_slice(ephemeral.as_bytes());

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| ChannelError::handshake("failed to seal hello"))?;

        let mut frame = Vec::with_capacity(HELLO_FRAME_LENGTH);
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    /// Open the peer's hello, returning its ephemeral public key
    pub fn open(&self, expected_role: ChannelRole, frame: &[u8]) -> ChannelResult<PublicKey> {
        if frame.len() != HELLO_FRAME_LENGTH {
            return Err(ChannelError::handshake(format!(
                "hello frame must be {HELLO_FRAME_LENGTH} bytes, got {}",
                frame.len()
            )));
        }
        let (nonce, ciphertext) = frame.split_at(NONCE_LENGTH);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                ChannelError::handshake("peer hello failed authentication; keys do not match")
            })?;

        if plaintext[0] != expected_role.as_byte() {
            return Err(ChannelError::handshake("peer hello carries the wrong role"));
        }

        let mut ephemeral = [0u8; KEY_LENGTH];
        ephemeral.copy_from_slice(&plaintext[1..]);
        Ok(PublicKey::from(ephemeral))
    }
}

/// Per-session ciphers and counters for one established channel
pub(crate) struct SessionState {
    send_cipher: Aes256Gcm,
    recv_cipher: Aes256Gcm,
    next_send: u64,
    last_received: Option<u64>,
}

impl SessionState {
    /// Derive directional session keys from both agreements and all four public keys
    pub fn derive(
        role: ChannelRole,
        static_shared: &[u8; KEY_LENGTH],
        ephemeral_shared: &[u8; KEY_LENGTH],
        participants: Participants<'_>,
        ephemerals: Participants<'_>,
    ) -> Self {
        let parts: [&[u8]; 6] = [
            static_shared,
            ephemeral_shared,
            participants.dispatcher.as_bytes(),
            participants.worker.as_bytes(),
            ephemerals.dispatcher.as_bytes(),
            ephemerals.worker.as_bytes(),
        ];
        let to_worker = derive_key(LABEL_DISPATCHER_TO_WORKER, &parts);
        let to_dispatcher = derive_key(LABEL_WORKER_TO_DISPATCHER, &parts);

        let (send_key, recv_key) = match role {
            ChannelRole::Dispatcher => (to_worker, to_dispatcher),
            ChannelRole::Worker => (to_dispatcher, to_worker),
        };

        Self {
            send_cipher: cipher_for(&send_key),
            recv_cipher: cipher_for(&recv_key),
            next_send: 0,
            last_received: None,
        }
    }

    /// Seal a payload with the next send counter
    pub fn seal(&mut self, plaintext: &[u8]) -> ChannelResult<Vec<u8>> {
        let counter = self.next_send;
        let next = counter
            .checked_add(1)
            .ok_or(ChannelError::CounterExhausted)?;

        let ciphertext = self
            .send_cipher
            .encrypt(Nonce::from_slice(&counter_nonce(counter)), plaintext)
            .map_err(|_| ChannelError::malformed("payload could not be sealed"))?;
        self.next_send = next;

        let mut frame = Vec::with_capacity(COUNTER_LENGTH + ciphertext.len());
        frame.extend_from_slice(&counter.to_be_bytes());
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    /// Authenticate and decrypt a frame; counters must strictly increase
    pub fn open(&mut self, frame: &[u8]) -> ChannelResult<Vec<u8>> {
        if frame.len() < COUNTER_LENGTH + TAG_LENGTH {
            return Err(ChannelError::malformed(format!(
                "frame of {} bytes is shorter than header and tag",
                frame.len()
            )));
        }

        let (header, ciphertext) = frame.split_at(COUNTER_LENGTH);
        let mut counter_bytes = [0u8; COUNTER_LENGTH];
        counter_bytes.copy_from_slice(header);
        let counter = u64::from_be_bytes(counter_bytes);

        if let Some(last_accepted) = self.last_received {
            if counter <= last_accepted {
                return Err(ChannelError::ReplayOrOrderingError {
                    received: counter,
                    last_accepted,
                });
            }
        }

        let plaintext = self
            .recv_cipher
            .decrypt(Nonce::from_slice(&counter_nonce(counter)), ciphertext)
            .map_err(|_| ChannelError::Authentication)?;

        // Only authenticated frames move the window
        self.last_received = Some(counter);
        Ok(plaintext)
    }
}
