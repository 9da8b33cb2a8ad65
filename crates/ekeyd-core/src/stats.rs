//! A connection's running counters, for operator-facing status output.

/// Snapshot of the lifetime counters for a single connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total packets handed to [`crate::connection::Connection::step`].
    pub packets_seen: u64,
    /// Times the default (reset) transition fired.
    pub resets: u64,
    /// Key requests issued to the device (initial plus rekey-on-boundary).
    pub key_requests: u64,
    /// Successful session-key derivations.
    pub rekeys: u64,
    /// Entropy bytes decrypted and emitted.
    pub entropy_bytes: u64,
    /// Repeated-key-request warnings counted while waiting on a reply.
    pub warnings: u64,
}
