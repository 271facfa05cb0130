//! # System Constants
//!
//! Operational defaults and wire-level constants shared by the worker's
//! channels, executor, and configuration layer.

/// Prefix for the identity a worker presents to the dispatcher (`Worker-<id>`)
pub const WORKER_IDENTITY_PREFIX: &str = "Worker-";

/// Build the transport identity for a worker id
pub fn worker_identity(worker_id: u32) -> String {
    format!("{WORKER_IDENTITY_PREFIX}{worker_id}")
}

/// Secure channel wire constants
pub mod channel {
    /// Length of an X25519 private or public key in bytes
    pub const KEY_LENGTH: usize = 32;

    /// Length of the big-endian frame counter that prefixes every sealed frame
    pub const COUNTER_LENGTH: usize = 8;

    /// Length of the AES-GCM nonce derived from the frame counter
    pub const NONCE_LENGTH: usize = 12;

    /// AES-GCM authentication tag length
    pub const TAG_LENGTH: usize = 16;

    /// Upper bound on a single frame accepted from a stream transport
    pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

    /// Bounded queue between a transport reader and its consumer
    pub const DEFAULT_INBOUND_QUEUE: usize = 1024;

    /// KDF label for frames travelling dispatcher -> worker
    pub const LABEL_DISPATCHER_TO_WORKER: &[u8] = b"flowrelay/v1/dispatcher->worker";

    /// KDF label for frames travelling worker -> dispatcher
    pub const LABEL_WORKER_TO_DISPATCHER: &[u8] = b"flowrelay/v1/worker->dispatcher";
}

/// Default values for the worker configuration sections
pub mod defaults {
    pub const CAPACITY: usize = 4;
    pub const POLL_INTERVAL_MS: u64 = 100;
    pub const SHUTDOWN_GRACE_MS: u64 = 3_000;
    pub const CONTROL_JOIN_TIMEOUT_MS: u64 = 2_000;
    pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
    pub const EVENT_BUFFER_SIZE: usize = 1_024;
    pub const SINK_TIMEOUT_MS: u64 = 5_000;
    pub const RESULTS_BROADCAST_CAPACITY: usize = 1_000;
    pub const SUPERVISOR_PROCESSES: u32 = 1;
    pub const SUPERVISOR_KILL_GRACE_MS: u64 = 3_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_identity_format() {
        assert_eq!(worker_identity(0), "Worker-0");
        assert_eq!(worker_identity(17), "Worker-17");
    }
}
