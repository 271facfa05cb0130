//! # Secure Channel
//!
//! Authenticated, encrypted point-to-point messaging between the dispatcher
//! and a worker.
//!
//! ## Components
//!
//! - [`ChannelKeys`] / [`generate_key_pair`]: static X25519 key material
//! - [`SecureChannel`]: hello handshake, counter-ordered AES-256-GCM frames
//! - [`MessageTransport`]: frame push/pull underneath the channel, with
//!   [`MemoryTransport`] for in-process wiring and [`TcpTransport`] for
//!   length-prefixed TCP

pub mod errors;
pub mod keys;
pub mod secure_channel;
mod session;
pub mod transport;

pub use errors::{ChannelError, ChannelResult, TransportError};
pub use keys::{generate_key_pair, ChannelKeys, ChannelRole, GeneratedKeyPair};
pub use secure_channel::{establish_pair, SecureChannel};
pub use transport::{MemoryTransport, MessageTransport, TcpTransport};
