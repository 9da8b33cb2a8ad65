//! Abstracts the two pieces of OS state the state machine needs: a source of
//! randomness for fresh nonces, and a monotonic clock for telemetry rate
//! gating. Tests supply a deterministic implementation; the daemon supplies
//! one backed by the OS.

/// OS-backed services the connection state machine depends on but does not
/// own, so tests can supply a deterministic substitute.
pub trait Platform {
    /// Fills `buffer` with OS-sourced random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Returns the current instant, for telemetry rate gating.
    fn now(&self) -> std::time::Instant;
}
