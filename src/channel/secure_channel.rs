//! # Secure Channel
//!
//! Authenticated, encrypted point-to-point channel over any
//! [`MessageTransport`]. Session state is owned by one channel instance and
//! guarded by its own lock; use one channel per logical direction of traffic.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use x25519_dalek::{EphemeralSecret, PublicKey};

use super::errors::{ChannelError, ChannelResult};
use super::keys::{ChannelKeys, ChannelRole};
use super::session::{HelloCipher, Participants, SessionState};
use super::transport::MessageTransport;

/// Encrypted channel with monotonic frame counters in both directions
pub struct SecureChannel {
    name: String,
    role: ChannelRole,
    transport: Arc<dyn MessageTransport>,
    session: Mutex<SessionState>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("peer", &self.transport.peer())
            .field("closed", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl SecureChannel {
    /// Run the hello exchange with the peer and derive session keys
    ///
    /// Fails with `HandshakeFailed` when the static agreement is
    /// non-contributory, the peer's hello does not authenticate (mismatched
    /// keys), or the peer does not answer within `handshake_timeout`.
    pub async fn establish(
        name: impl Into<String>,
        transport: Arc<dyn MessageTransport>,
        keys: &ChannelKeys,
        role: ChannelRole,
        handshake_timeout: Duration,
    ) -> ChannelResult<Self> {
        let name = name.into();

        let static_shared = keys.local_secret().diffie_hellman(keys.remote_public());
        if !static_shared.was_contributory() {
            return Err(ChannelError::handshake(
                "remote public key produced a non-contributory shared secret",
            ));
        }

        let participants = Participants::new(role, keys.local_public(), keys.remote_public());
        let hello = HelloCipher::new(static_shared.as_bytes(), participants);

        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);

        transport
            .push(hello.seal(role, &ephemeral_public)?)
            .await
            .map_err(|e| ChannelError::handshake(format!("failed to send hello: {e}")))?;

        let peer_frame = match tokio::time::timeout(handshake_timeout, transport.pull()).await {
            Err(_) => {
                return Err(ChannelError::handshake(format!(
                    "peer did not answer within {}ms",
                    handshake_timeout.as_millis()
                )))
            }
            Ok(Err(e)) => {
                return Err(ChannelError::handshake(format!(
                    "transport failed during handshake: {e}"
                )))
            }
            Ok(Ok(None)) => return Err(ChannelError::handshake("peer closed during handshake")),
            Ok(Ok(Some(frame))) => frame,
        };

        let peer_ephemeral = hello.open(role.peer(), &peer_frame)?;
        let ephemerals = Participants::new(role, &ephemeral_public, &peer_ephemeral);
        let ephemeral_shared = ephemeral.diffie_hellman(&peer_ephemeral);
        if !ephemeral_shared.was_contributory() {
            return Err(ChannelError::handshake(
                "peer ephemeral key produced a non-contributory shared secret",
            ));
        }

        let session = SessionState::derive(
            role,
            static_shared.as_bytes(),
            ephemeral_shared.as_bytes(),
            participants,
            ephemerals,
        );

        info!(
            channel = %name,
            role = ?role,
            peer = %transport.peer(),
            "🔐 Secure channel established"
        );

        Ok(Self {
            name,
            role,
            transport,
            session: Mutex::new(session),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seal and push one payload
    pub async fn send(&self, payload: &[u8]) -> ChannelResult<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        // Seal under the lock; push outside it
        let frame = self.session.lock().seal(payload)?;
        self.transport.push(frame).await?;
        Ok(())
    }

    /// Take and open a queued frame without waiting
    pub fn receive_nonblocking(&self) -> ChannelResult<Option<Vec<u8>>> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        match self.transport.try_pull()? {
            Some(frame) => self.session.lock().open(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Wait for the next frame or for shutdown
    pub async fn receive_blocking(&self) -> ChannelResult<Vec<u8>> {
        let frame = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ChannelError::Closed),
            frame = self.transport.pull() => frame?,
        };
        match frame {
            Some(frame) => self.session.lock().open(&frame),
            None => {
                debug!(channel = %self.name, "Peer went away");
                Err(ChannelError::Closed)
            }
        }
    }

    /// Close the channel; idempotent, unblocks any pending receive
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(channel = %self.name, "Secure channel shutting down");
        }
        self.shutdown.cancel();
        self.transport.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Establish both ends of a channel over connected transports (used in-process)
pub async fn establish_pair(
    name: &str,
    dispatcher_transport: Arc<dyn MessageTransport>,
    dispatcher_keys: &ChannelKeys,
    worker_transport: Arc<dyn MessageTransport>,
    worker_keys: &ChannelKeys,
    handshake_timeout: Duration,
) -> ChannelResult<(SecureChannel, SecureChannel)> {
    tokio::try_join!(
        SecureChannel::establish(
            name,
            dispatcher_transport,
            dispatcher_keys,
            ChannelRole::Dispatcher,
            handshake_timeout,
        ),
        SecureChannel::establish(
            name,
            worker_transport,
            worker_keys,
            ChannelRole::Worker,
            handshake_timeout,
        ),
    )
}
