//! `ekeyd-rekey` — provisions a device's long-term key and records it in a
//! keyring file.
//!
//! ```bash
//! ekeyd-rekey -f /etc/ekeyd/keyring -m <master-key-pem> /run/ekeyd/device.sock
//! ```

mod channel;
mod master_key;
mod platform;

use std::{path::PathBuf, process::ExitCode};

use channel::DeviceChannel;
use clap::Parser;
use ekeyd_core::{RekeyAction, RekeyHandshake};
use ekeyd_keyring::Keyring;
use ekeyd_proto::{frame::Framer, packet};
use platform::SystemPlatform;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_CMDLINE: u8 = 1;
const EXIT_LOAD_KEYRING: u8 = 2;
const EXIT_MASTER_KEY: u8 = 3;
const EXIT_DEVICE_IO: u8 = 4;
const EXIT_WRITE_KEYRING: u8 = 6;

/// Entropy key device long-term session key provisioning tool.
#[derive(Parser, Debug)]
#[command(name = "ekeyd-rekey")]
#[command(about = "Provisions a device's long-term key into a keyring")]
#[command(version)]
struct Args {
    /// Path to the device's byte channel.
    device_path: PathBuf,

    /// The master key of the device being updated, as PEM64 text (32 bytes,
    /// or 33 with a trailing CRC-8 check digit).
    #[arg(short = 'm', long = "master-key")]
    master_key: String,

    /// The expected serial number of the device, as PEM64 text. When given,
    /// a mismatching serial aborts the handshake instead of accepting it.
    #[arg(short = 's', long = "serial")]
    serial: Option<String>,

    /// Path to the keyring file to update.
    #[arg(short = 'f', long = "keyring", default_value = "/etc/ekeyd/keyring")]
    keyring: PathBuf,

    /// Do not update the keyring with the result; print it instead.
    #[arg(short = 'n', long = "no-persist")]
    no_persist: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EXIT_CMDLINE);
        },
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    run(&args)
}

fn run(args: &Args) -> ExitCode {
    let master_key = match master_key::extract(&args.master_key) {
        Ok(key) => key,
        Err(err) => {
            tracing::error!(%err, "could not use the given master key");
            return ExitCode::from(EXIT_MASTER_KEY);
        },
    };

    let expected_serial = match &args.serial {
        Some(text) => match decode_serial(text) {
            Some(serial) => Some(serial),
            None => {
                tracing::error!("the serial number given is not the correct length");
                return ExitCode::from(EXIT_CMDLINE);
            },
        },
        None => None,
    };

    let mut keyring = if args.no_persist {
        Keyring::new()
    } else {
        match Keyring::load(&args.keyring) {
            Ok(keyring) => keyring,
            Err(err) => {
                tracing::error!(%err, path = %args.keyring.display(), "unable to read the keyring file");
                return ExitCode::from(EXIT_LOAD_KEYRING);
            },
        }
    };

    let mut channel = match open_channel(&args.device_path) {
        Ok(channel) => channel,
        Err(err) => {
            tracing::error!(%err, path = %args.device_path.display(), "unable to open the entropy key device");
            return ExitCode::from(EXIT_DEVICE_IO);
        },
    };

    let platform = SystemPlatform;
    match drive_handshake(&mut channel, &platform, master_key, expected_serial) {
        Ok((serial, long_term_key)) => {
            tracing::info!(?serial, "long-term key derived");
            if args.no_persist {
                tracing::info!(long_term_key = %ekeyd_proto::pem64::encode(&long_term_key), "new key (not persisted)");
                return ExitCode::SUCCESS;
            }
            keyring.upsert(serial, long_term_key);
        },
        Err(code) => return ExitCode::from(code),
    }

    match keyring.save(&args.keyring) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, path = %args.keyring.display(), "unable to write the updated keyring file");
            ExitCode::from(EXIT_WRITE_KEYRING)
        },
    }
}

fn decode_serial(text: &str) -> Option<[u8; 12]> {
    let bytes = ekeyd_proto::pem64::decode(text.trim());
    if bytes.len() != 12 {
        return None;
    }
    let mut serial = [0u8; 12];
    serial.copy_from_slice(&bytes);
    Some(serial)
}

fn open_channel(path: &std::path::Path) -> std::io::Result<DeviceChannel> {
    if path.extension().is_some_and(|ext| ext == "sock") {
        return DeviceChannel::connect_unix(path);
    }
    match DeviceChannel::connect_unix(path) {
        Ok(channel) => Ok(channel),
        Err(_) => DeviceChannel::open_tty(path),
    }
}

/// Drives the handshake to completion, returning the derived key or the
/// exit code to report on failure.
fn drive_handshake(
    channel: &mut DeviceChannel,
    platform: &SystemPlatform,
    master_key: [u8; 32],
    expected_serial: Option<[u8; 12]>,
) -> Result<([u8; 12], [u8; 32]), u8> {
    let mut handshake = RekeyHandshake::new(master_key);
    perform(channel, handshake.start()).map_err(|_| EXIT_DEVICE_IO)?;

    let mut framer = Framer::new();
    let mut buffer = [0u8; 1024];

    loop {
        let count = channel.read_chunk(&mut buffer).map_err(|_| EXIT_DEVICE_IO)?;
        if count == 0 {
            let actions = handshake.on_timeout();
            if let Some(outcome) = dispatch(channel, &mut handshake, actions, expected_serial)? {
                return Ok(outcome);
            }
            continue;
        }
        for frame in framer.feed(&buffer[..count]) {
            let Ok(decoded) = packet::decode(&frame) else { continue };
            let actions = handshake.step(&decoded, platform);
            if let Some(outcome) = dispatch(channel, &mut handshake, actions, expected_serial)? {
                return Ok(outcome);
            }
        }
    }
}

fn dispatch(
    channel: &mut DeviceChannel,
    handshake: &mut RekeyHandshake,
    actions: Vec<RekeyAction>,
    expected_serial: Option<[u8; 12]>,
) -> Result<Option<([u8; 12], [u8; 32])>, u8> {
    for action in actions {
        match action {
            RekeyAction::SendControlByte(byte) => channel.write_all(&[byte]).map_err(|_| EXIT_DEVICE_IO)?,
            RekeyAction::SendLine(line) => channel.write_all(&line).map_err(|_| EXIT_DEVICE_IO)?,
            RekeyAction::Done { long_term_key } => {
                let serial = handshake.serial().ok_or(EXIT_DEVICE_IO)?;
                if let Some(expected) = expected_serial {
                    if expected != serial {
                        tracing::error!("serial number did not match the one specified");
                        return Err(EXIT_DEVICE_IO);
                    }
                }
                return Ok(Some((serial, long_term_key)));
            },
            RekeyAction::Fail(err) => {
                tracing::error!(%err, "rekey handshake failed");
                return Err(EXIT_DEVICE_IO);
            },
        }
    }
    Ok(None)
}

fn perform(channel: &mut DeviceChannel, actions: Vec<RekeyAction>) -> std::io::Result<()> {
    for action in actions {
        match action {
            RekeyAction::SendControlByte(byte) => channel.write_all(&[byte])?,
            RekeyAction::SendLine(line) => channel.write_all(&line)?,
            _ => {},
        }
    }
    Ok(())
}
