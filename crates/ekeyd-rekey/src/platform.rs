//! The production [`Platform`] implementation for the provisioning tool:
//! OS randomness via `getrandom`, monotonic time via [`std::time::Instant`].

use ekeyd_core::Platform;

/// Reads randomness straight from the OS; the host nonce the handshake
/// commits to before revealing comes from here.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    /// # Panics
    ///
    /// If the OS entropy source is unavailable. A rekey tool that cannot
    /// source a fresh nonce cannot safely provision a device at all.
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::getrandom(buffer).expect("OS randomness source is unavailable");
    }

    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }
}
