//! The per-connection state machine.
//!
//! Every call to [`Connection::step`] (or [`Connection::note_decode_error`])
//! takes one input and returns the list of actions a driver should perform —
//! send a control byte, send a handshake line, hand decrypted entropy to a
//! sink, or close the connection. The state machine itself never touches a
//! socket or a file; `ekeyd-host` owns all of that.
//!
//! The eight states and their transitions form a dense (state, packet kind)
//! table. Rather than encode that table as literal data, [`Connection::dispatch`]
//! is a `match` over `(state, kind)` pairs: the compiler lowers it to the
//! same jump table, and the fallthrough arm encodes the two defaults the
//! table actually has — reset from any "live" state, silent ignore from
//! `Close`, `Untrusted`, and `KeyedBad`.

use ekeyd_crypto::{Primitive, personalization};
use ekeyd_proto::packet::{DecodedPacket, PacketType, Payload};
use zeroize::Zeroize;

use crate::{env::Platform, stats::ConnectionStats, telemetry::Telemetry};

/// A repeated key request is tolerated this many times while waiting for a
/// reply before the connection is reset.
const KEYREQ_SESSION_SENT_LIMIT: u32 = 5;

/// A key request arriving while the last session key was rejected is
/// tolerated this many times before the connection is reset.
const KEYREQ_KEYED_BAD_LIMIT: u32 = 50;

/// The entropy sequence number at which a fresh session key is requested
/// proactively, before the device runs out of keystream.
const REKEY_BOUNDARY_SEQUENCE: u16 = 4095;

/// Looks up a device's long-term key by serial number. Implemented by
/// `ekeyd-keyring`; kept as a trait here so this crate never depends on
/// file-backed storage.
pub trait KeyLookup {
    /// Returns the long-term key for `serial`, if one is on file.
    fn find(&self, serial: &[u8; 12]) -> Option<[u8; 32]>;
}

/// The eight states a connection can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No serial number seen yet, or just reset.
    Init,
    /// Serial known and a long-term key found; waiting for a key request.
    Session,
    /// A key request was sent; waiting for the device's nonce reply.
    SessionSent,
    /// A session key was just derived; one entropy packet still pending
    /// before the MAC-verified steady state begins.
    KeyedFirst,
    /// Steady state: entropy packets are being decrypted and emitted.
    Keyed,
    /// The last session key was rejected by the device; waiting to see if
    /// it asks for a new one.
    KeyedBad,
    /// The device's serial number changed mid-connection.
    Untrusted,
    /// Terminal: the connection is being torn down.
    Close,
}

/// One action for a driver to carry out. The state machine never performs
/// I/O itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send a single control byte (currently only `0x03`, reset) to the
    /// device.
    SendControlByte(u8),
    /// Send a raw ASCII handshake line (not frame-wrapped) to the device.
    SendLine(Vec<u8>),
    /// Hand 32 bytes of decrypted entropy to the output sink.
    EmitEntropy([u8; 32]),
    /// Tear the connection down.
    Close,
}

/// The per-connection state machine described in the module doc.
pub struct Connection {
    state: ConnectionState,
    serial: Option<[u8; 12]>,
    long_term_key: Option<[u8; 32]>,
    mac_primitive: Option<Primitive>,
    cipher_primitive: Option<Primitive>,
    nonce_counter: u32,
    pending_host_nonce: Option<[u8; 12]>,
    keyreq_repeat_count: u32,
    stats: ConnectionStats,
    telemetry: Telemetry,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// A freshly accepted connection, before any serial number is known.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Init,
            serial: None,
            long_term_key: None,
            mac_primitive: None,
            cipher_primitive: None,
            nonce_counter: 0,
            pending_host_nonce: None,
            keyreq_repeat_count: 0,
            stats: ConnectionStats::default(),
            telemetry: Telemetry::default(),
        }
    }

    /// The connection's current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A snapshot of this connection's running counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Accumulated telemetry parsed from `Info` packets.
    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Handles one successfully decoded packet, MAC-verifying it first and
    /// rewriting its kind to [`PacketType::KeyRejected`] on mismatch.
    pub fn step(
        &mut self,
        decoded: DecodedPacket,
        platform: &impl Platform,
        keyring: &impl KeyLookup,
    ) -> Vec<ConnectionAction> {
        self.stats.packets_seen += 1;
        let kind = self.verify_and_classify(&decoded);
        self.dispatch(kind, decoded, platform, keyring)
    }

    /// Handles a frame that failed to decode at the protocol layer. A
    /// malformed frame is treated exactly like an unrecognized packet kind:
    /// reset from a live state, ignored from `Close`/`Untrusted`/`KeyedBad`.
    pub fn note_decode_error(&mut self) -> Vec<ConnectionAction> {
        self.stats.packets_seen += 1;
        match self.state {
            ConnectionState::Close | ConnectionState::Untrusted | ConnectionState::KeyedBad => {
                vec![]
            },
            _ => self.reset(),
        }
    }

    fn verify_and_classify(&self, decoded: &DecodedPacket) -> PacketType {
        if self.mac_primitive.is_none() && decoded.kind == PacketType::SerialNumber {
            return decoded.kind;
        }
        match &self.mac_primitive {
            None => PacketType::KeyRejected,
            Some(primitive) => {
                let expected = ekeyd_crypto::compute_mac(primitive, &decoded.mac_covered);
                if expected == decoded.mac { decoded.kind } else { PacketType::KeyRejected }
            },
        }
    }

    fn dispatch(
        &mut self,
        kind: PacketType,
        decoded: DecodedPacket,
        platform: &impl Platform,
        keyring: &impl KeyLookup,
    ) -> Vec<ConnectionAction> {
        use ConnectionState::{Close, Init, KeyedBad, KeyedFirst, Keyed, Session, SessionSent, Untrusted};
        use PacketType::{Entropy, Info, Key, KeyRejected, KeyRequest, SerialNumber};

        // Close/Untrusted/KeyedBad ignore everything except the one
        // explicit KeyedBad x KeyRequest cell; a device re-announcing its
        // serial here changes nothing until something external resets the
        // connection.
        match self.state {
            Close | Untrusted => return vec![],
            KeyedBad => {
                return if kind == KeyRequest {
                    self.handle_repeated_keyreq_keyed_bad()
                } else {
                    vec![]
                };
            },
            _ => {},
        }

        match (self.state, kind) {
            (Init, SerialNumber) => self.handle_serial_number(&decoded, keyring),
            (Session, Info) | (SessionSent, Info) | (KeyedFirst, Info) | (Keyed, Info) => {
                self.ingest_telemetry(&decoded, platform);
                vec![]
            },
            (Session, KeyRequest) | (Keyed, KeyRequest) => self.issue_key_request(platform),
            (SessionSent, KeyRequest) => self.handle_repeated_keyreq_session_sent(),
            (SessionSent, Key) => self.handle_key_reply(&decoded),
            (KeyedFirst, Entropy) | (Keyed, Entropy) => self.handle_entropy(&decoded, platform),
            (KeyedFirst, KeyRejected) => {
                self.state = ConnectionState::KeyedBad;
                vec![]
            },
            _ => self.reset(),
        }
    }

    fn ingest_telemetry(&mut self, decoded: &DecodedPacket, platform: &impl Platform) {
        if let Payload::Ascii(text) = &decoded.payload {
            self.telemetry.ingest(text, platform.now());
        }
    }

    fn handle_serial_number(&mut self, decoded: &DecodedPacket, keyring: &impl KeyLookup) -> Vec<ConnectionAction> {
        let Payload::Binary(bytes) = &decoded.payload else {
            return self.reset();
        };
        if bytes.len() < 12 {
            return self.reset();
        }
        let mut serial = [0u8; 12];
        serial.copy_from_slice(&bytes[..12]);

        // A serial that differs from one carried over from before a reset
        // marks the device untrusted immediately, without a reset byte —
        // this function is only ever reached from Init, so this is the one
        // remaining place that comparison applies.
        if let Some(known) = self.serial {
            if known != serial {
                self.state = ConnectionState::Untrusted;
                tracing::error!(?known, seen = ?serial, "serial number changed mid-connection");
                return vec![];
            }
        }

        self.serial = Some(serial);
        self.mac_primitive =
            Some(Primitive::prepare(&serial, &[0u8; 32], &personalization::MESSAGE_AUTHENTICATION_CODE_STATE));

        match keyring.find(&serial) {
            Some(long_term_key) => {
                self.long_term_key = Some(long_term_key);
                self.state = ConnectionState::Session;
                tracing::info!(?serial, "device attached");
            },
            None => {
                self.state = ConnectionState::Untrusted;
                tracing::error!(?serial, "no long-term key on file for device");
            },
        }
        vec![]
    }

    fn issue_key_request(&mut self, platform: &impl Platform) -> Vec<ConnectionAction> {
        self.nonce_counter = self.nonce_counter.wrapping_add(1);
        let mut nonce = [0u8; 12];
        nonce[0..4].copy_from_slice(&self.nonce_counter.to_be_bytes());
        platform.random_bytes(&mut nonce[4..12]);

        self.pending_host_nonce = Some(nonce);
        self.keyreq_repeat_count = 0;
        self.state = ConnectionState::SessionSent;
        self.stats.key_requests += 1;

        let mut line = Vec::with_capacity(14);
        line.push(b'K');
        line.extend_from_slice(ekeyd_proto::pem64::encode(&nonce).as_bytes());
        line.push(b'.');
        vec![ConnectionAction::SendLine(line)]
    }

    fn handle_repeated_keyreq_session_sent(&mut self) -> Vec<ConnectionAction> {
        self.keyreq_repeat_count += 1;
        if self.keyreq_repeat_count > KEYREQ_SESSION_SENT_LIMIT {
            return self.reset();
        }
        self.stats.warnings += 1;
        vec![]
    }

    fn handle_repeated_keyreq_keyed_bad(&mut self) -> Vec<ConnectionAction> {
        self.keyreq_repeat_count += 1;
        if self.keyreq_repeat_count > KEYREQ_KEYED_BAD_LIMIT {
            return self.reset();
        }
        vec![]
    }

    fn handle_key_reply(&mut self, decoded: &DecodedPacket) -> Vec<ConnectionAction> {
        if decoded.subcode != 12 {
            return self.reset();
        }
        let Payload::Binary(bytes) = &decoded.payload else {
            return self.reset();
        };
        if bytes.len() < 32 {
            return self.reset();
        }
        let (Some(serial), Some(long_term_key), Some(host_nonce)) =
            (self.serial, self.long_term_key, self.pending_host_nonce)
        else {
            return self.reset();
        };

        let mut device_nonce_reply = [0u8; 32];
        device_nonce_reply.copy_from_slice(&bytes[..32]);

        let session_key =
            ekeyd_crypto::derive_session_key(&serial, &long_term_key, &device_nonce_reply, &host_nonce);
        self.mac_primitive =
            Some(Primitive::prepare(&serial, &session_key, &personalization::MESSAGE_AUTHENTICATION_CODE_STATE));
        self.cipher_primitive =
            Some(Primitive::prepare(&serial, &session_key, &personalization::ENTROPY_ENCRYPTION_STATE));
        self.pending_host_nonce = None;
        self.state = ConnectionState::KeyedFirst;
        self.stats.rekeys += 1;
        tracing::info!(rekeys = self.stats.rekeys, "session key derived");
        vec![]
    }

    fn handle_entropy(&mut self, decoded: &DecodedPacket, platform: &impl Platform) -> Vec<ConnectionAction> {
        let Payload::Binary(bytes) = &decoded.payload else {
            return self.reset();
        };
        if bytes.len() < 32 {
            return self.reset();
        }
        let Some(cipher) = &self.cipher_primitive else {
            return self.reset();
        };

        let mut block = [0u8; 32];
        block.copy_from_slice(&bytes[..32]);
        let keystream = cipher.keystream(decoded.subcode_raw);
        ekeyd_crypto::xor_keystream(&mut block, &keystream);

        self.stats.entropy_bytes += 32;
        self.state = ConnectionState::Keyed;
        let mut actions = vec![ConnectionAction::EmitEntropy(block)];

        if decoded.subcode >= REKEY_BOUNDARY_SEQUENCE {
            actions.extend(self.issue_key_request(platform));
        }
        actions
    }

    fn reset(&mut self) -> Vec<ConnectionAction> {
        tracing::warn!(from = ?self.state, "resetting connection");
        self.mac_primitive = self
            .serial
            .map(|serial| Primitive::prepare(&serial, &[0u8; 32], &personalization::MESSAGE_AUTHENTICATION_CODE_STATE));
        self.cipher_primitive = None;
        if let Some(mut long_term_key) = self.long_term_key.take() {
            long_term_key.zeroize();
        }
        self.pending_host_nonce = None;
        self.keyreq_repeat_count = 0;
        self.state = ConnectionState::Init;
        self.stats.resets += 1;
        vec![ConnectionAction::SendControlByte(0x03)]
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(mut long_term_key) = self.long_term_key.take() {
            long_term_key.zeroize();
        }
    }
}
