//! The long-term-rekey handshake: a short-lived state machine using the
//! same wire primitives as [`crate::connection::Connection`], run by the
//! standalone provisioning tool rather than the daemon.
//!
//! Unlike the connection state machine, failure here is fatal to the
//! handshake — there is no reset-and-retry loop once the serial number has
//! been read, so failures surface as a typed [`RekeyError`] instead of a
//! default transition.

use ekeyd_crypto::{Primitive, personalization};
use ekeyd_proto::packet::{DecodedPacket, PacketType, Payload};

use crate::env::Platform;

/// A device did not answer after this many `0x03` resets while the
/// handshake was waiting for its serial number.
const MAX_SERIAL_ATTEMPTS: u8 = 20;

/// One step of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RekeyAction {
    /// Send a single control byte (`0x03`, reset) to the device.
    SendControlByte(u8),
    /// Send a raw ASCII handshake line.
    SendLine(Vec<u8>),
    /// The handshake completed; this is the freshly derived long-term key
    /// for the serial number returned by [`RekeyHandshake::serial`].
    Done {
        /// The derived 32-byte long-term key.
        long_term_key: [u8; 32],
    },
    /// The handshake cannot continue.
    Fail(RekeyError),
}

/// Why a rekey handshake failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RekeyError {
    /// No serial number arrived after [`MAX_SERIAL_ATTEMPTS`] resets.
    #[error("device did not respond with a serial number after {0} attempts")]
    DeviceUnresponsive(u8),
    /// The serial-number payload was shorter than 12 bytes.
    #[error("serial-number payload too short")]
    ShortSerialPayload,
    /// The device's nonce-reply payload was shorter than 32 bytes.
    #[error("nonce-reply payload too short")]
    ShortNonceReply,
    /// A packet arrived that the current handshake stage didn't expect.
    #[error("unexpected packet for the current handshake stage")]
    UnexpectedPacket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitingSerial,
    AwaitingMacAck,
    AwaitingNonceReply,
    Finished,
}

/// Drives one device through the long-term-rekey handshake.
pub struct RekeyHandshake {
    stage: Stage,
    attempts: u8,
    master_secret: [u8; 32],
    serial: Option<[u8; 12]>,
    host_nonce: Option<[u8; 12]>,
}

impl RekeyHandshake {
    /// Starts a handshake that will derive a new long-term key under
    /// `master_secret` once the device completes the exchange.
    #[must_use]
    pub fn new(master_secret: [u8; 32]) -> Self {
        Self { stage: Stage::AwaitingSerial, attempts: 0, master_secret, serial: None, host_nonce: None }
    }

    /// The serial number seen so far, once the device has announced it.
    #[must_use]
    pub fn serial(&self) -> Option<[u8; 12]> {
        self.serial
    }

    /// Resets the device and begins waiting for its serial number.
    pub fn start(&mut self) -> Vec<RekeyAction> {
        self.attempts = 1;
        vec![RekeyAction::SendControlByte(0x03)]
    }

    /// Called by the driver when a read timed out waiting for a reply.
    /// Only meaningful while still waiting for the serial number — later
    /// stages have no retry budget.
    pub fn on_timeout(&mut self) -> Vec<RekeyAction> {
        if self.stage != Stage::AwaitingSerial {
            return vec![];
        }
        if self.attempts >= MAX_SERIAL_ATTEMPTS {
            return vec![RekeyAction::Fail(RekeyError::DeviceUnresponsive(self.attempts))];
        }
        self.attempts += 1;
        vec![RekeyAction::SendControlByte(0x03)]
    }

    /// Feeds one decoded packet through the handshake.
    pub fn step(&mut self, decoded: &DecodedPacket, platform: &impl Platform) -> Vec<RekeyAction> {
        match (self.stage, decoded.kind) {
            (Stage::AwaitingSerial, PacketType::SerialNumber) => self.handle_serial(decoded, platform),
            (Stage::AwaitingMacAck, PacketType::LongTermRekeyMac) => self.handle_mac_ack(),
            (Stage::AwaitingNonceReply, PacketType::LongTermRekey) => self.handle_nonce_reply(decoded),
            _ => vec![RekeyAction::Fail(RekeyError::UnexpectedPacket)],
        }
    }

    fn handle_serial(&mut self, decoded: &DecodedPacket, platform: &impl Platform) -> Vec<RekeyAction> {
        let Payload::Binary(bytes) = &decoded.payload else {
            return vec![RekeyAction::Fail(RekeyError::ShortSerialPayload)];
        };
        if bytes.len() < 12 {
            return vec![RekeyAction::Fail(RekeyError::ShortSerialPayload)];
        }
        let mut serial = [0u8; 12];
        serial.copy_from_slice(&bytes[..12]);
        self.serial = Some(serial);

        let mut host_nonce = [0u8; 12];
        platform.random_bytes(&mut host_nonce);
        self.host_nonce = Some(host_nonce);

        // The MAC commits to the nonce before it is revealed in the
        // following `L` line; the device can only check the commitment
        // once it holds both messages, which binds them together without
        // giving a passive observer the nonce before the host does.
        let primitive = Primitive::prepare(
            &serial,
            &self.master_secret,
            &personalization::MESSAGE_AUTHENTICATION_CODE_STATE_FOR_LONG_TERM_REKEYING,
        );
        let mac = ekeyd_crypto::compute_mac(&primitive, &host_nonce);

        self.stage = Stage::AwaitingMacAck;
        let mut line = Vec::with_capacity(9);
        line.push(b'M');
        line.extend_from_slice(ekeyd_proto::pem64::encode(&mac).as_bytes());
        vec![RekeyAction::SendLine(line)]
    }

    fn handle_mac_ack(&mut self) -> Vec<RekeyAction> {
        let Some(host_nonce) = self.host_nonce else {
            return vec![RekeyAction::Fail(RekeyError::UnexpectedPacket)];
        };
        self.stage = Stage::AwaitingNonceReply;
        let mut line = Vec::with_capacity(18);
        line.push(b'L');
        line.extend_from_slice(ekeyd_proto::pem64::encode(&host_nonce).as_bytes());
        line.push(b'.');
        vec![RekeyAction::SendLine(line)]
    }

    fn handle_nonce_reply(&mut self, decoded: &DecodedPacket) -> Vec<RekeyAction> {
        let Payload::Binary(bytes) = &decoded.payload else {
            return vec![RekeyAction::Fail(RekeyError::ShortNonceReply)];
        };
        if bytes.len() < 32 {
            return vec![RekeyAction::Fail(RekeyError::ShortNonceReply)];
        }
        let (Some(serial), Some(host_nonce)) = (self.serial, self.host_nonce) else {
            return vec![RekeyAction::Fail(RekeyError::UnexpectedPacket)];
        };
        let mut device_nonce_reply = [0u8; 32];
        device_nonce_reply.copy_from_slice(&bytes[..32]);

        let long_term_key =
            ekeyd_crypto::derive_long_term_key(&serial, &self.master_secret, &device_nonce_reply, &host_nonce);
        self.stage = Stage::Finished;
        vec![RekeyAction::Done { long_term_key }]
    }
}
