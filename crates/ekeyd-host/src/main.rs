//! `ekeyd` — bridges one or more entropy key devices to the host's random
//! pool.
//!
//! # Usage
//!
//! ```bash
//! # Read from the userland USB relay's socket, feed the kernel pool
//! ekeyd --device /run/ekeyd/device.sock --keyring /etc/ekeyd/keyring
//!
//! # Development: write plaintext entropy to a file instead
//! ekeyd --device /dev/ttyUSB0 --device-kind tty --sink file --sink-path /tmp/entropy.bin
//!
//! # Two devices of the same kind, read in the same poll loop
//! ekeyd --device /run/ekeyd/dev0.sock --device /run/ekeyd/dev1.sock
//! ```

mod driver;
mod platform;
mod sink;
mod stream;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use driver::DeviceDriver;
use ekeyd_keyring::Keyring;
use mio::{Events, Poll, Token};
use platform::SystemPlatform;
use sink::EntropySink;
use stream::Stream;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// The kind of byte channel every `--device` names.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceKind {
    /// A UNIX domain socket, fed by a userland USB relay.
    Socket,
    /// A serial tty, switched to raw mode on open.
    Tty,
    /// A plain file; useful for replaying a captured session.
    File,
}

/// Where decrypted entropy is written.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SinkKind {
    /// The kernel's random pool, via `RNDADDENTROPY` (Linux only).
    Kernel,
    /// A plain file.
    File,
    /// Handed back to an embedding host over an in-process channel instead
    /// of written anywhere; with no embedding host attached, the standalone
    /// daemon just logs each block at debug level.
    Foldback,
}

/// Entropy key daemon: decrypts framed entropy from one or more devices and
/// feeds it to the configured sink.
#[derive(Parser, Debug)]
#[command(name = "ekeyd")]
#[command(about = "Bridges entropy key devices to the host random pool")]
#[command(version)]
struct Args {
    /// Path to a device's byte channel. Repeatable; every device is polled
    /// from the same single-threaded loop.
    #[arg(long, required = true)]
    device: Vec<PathBuf>,

    /// What kind of channel every `--device` is.
    #[arg(long, value_enum, default_value_t = DeviceKind::Socket)]
    device_kind: DeviceKind,

    /// Path to the serial-to-long-term-key keyring file.
    #[arg(long, default_value = "/etc/ekeyd/keyring")]
    keyring: PathBuf,

    /// Where decrypted entropy is written.
    #[arg(long, value_enum, default_value_t = SinkKind::Kernel)]
    sink: SinkKind,

    /// Path the sink writes to (ignored for `--sink kernel`/`--sink foldback`
    /// unless set).
    #[arg(long)]
    sink_path: Option<PathBuf>,

    /// Entropy credit claimed per byte when feeding the kernel pool.
    #[arg(long, default_value_t = 8)]
    bits_per_byte: u32,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(devices = ?args.device, "ekeyd starting");

    let keyring = Keyring::load(&args.keyring)?;
    let mut sink = open_sink(&args)?;
    let platform = SystemPlatform;

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(8);

    match args.device_kind {
        DeviceKind::Socket => {
            let mut drivers = Vec::with_capacity(args.device.len());
            for (index, path) in args.device.iter().enumerate() {
                let mut driver = DeviceDriver::new(stream::UnixSocketStream::connect(path)?);
                register(&mut poll, driver.stream_mut(), Token(index))?;
                drivers.push(driver);
            }
            run_devices(&mut poll, &mut events, &mut drivers, &platform, &keyring, sink.as_mut())
        },
        DeviceKind::Tty => {
            let mut drivers = Vec::with_capacity(args.device.len());
            for (index, path) in args.device.iter().enumerate() {
                let mut driver = DeviceDriver::new(stream::TtyStream::open(path)?);
                register(&mut poll, driver.stream_mut(), Token(index))?;
                drivers.push(driver);
            }
            run_devices(&mut poll, &mut events, &mut drivers, &platform, &keyring, sink.as_mut())
        },
        DeviceKind::File => {
            let mut drivers = Vec::with_capacity(args.device.len());
            for (index, path) in args.device.iter().enumerate() {
                let mut driver = DeviceDriver::new(stream::FileStream::open(path)?);
                register(&mut poll, driver.stream_mut(), Token(index))?;
                drivers.push(driver);
            }
            run_devices(&mut poll, &mut events, &mut drivers, &platform, &keyring, sink.as_mut())
        },
    }
}

fn register(poll: &mut Poll, stream: &mut impl Stream, token: Token) -> std::io::Result<()> {
    stream.register(poll.registry(), token)?;
    Ok(())
}

/// Drives every device's `DeviceDriver` from one poll loop, exiting once
/// all of them have reached EOF.
fn run_devices<S: Stream>(
    poll: &mut Poll,
    events: &mut Events,
    drivers: &mut [DeviceDriver<S>],
    platform: &SystemPlatform,
    keyring: &Keyring,
    sink: &mut dyn EntropySink,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut live = vec![true; drivers.len()];
    let mut remaining = drivers.len();

    while remaining > 0 {
        poll.poll(events, None)?;
        for event in events.iter() {
            let index = event.token().0;
            let Some(driver) = drivers.get_mut(index) else { continue };
            if !live[index] {
                continue;
            }
            let eof = driver.on_readable(platform, keyring, sink)?;
            if eof {
                tracing::info!(device = index, stats = ?driver.stats(), "device stream closed");
                live[index] = false;
                remaining -= 1;
            }
        }
    }
    Ok(())
}

fn open_sink(args: &Args) -> Result<Box<dyn EntropySink>, Box<dyn std::error::Error>> {
    match args.sink {
        SinkKind::Kernel => open_kernel_sink(args),
        SinkKind::File => {
            let path = args
                .sink_path
                .clone()
                .ok_or("--sink-path is required when --sink file")?;
            Ok(Box::new(sink::FileSink::open(&path)?))
        },
        SinkKind::Foldback => Ok(Box::new(open_foldback_sink())),
    }
}

#[cfg(target_os = "linux")]
fn open_kernel_sink(args: &Args) -> Result<Box<dyn EntropySink>, Box<dyn std::error::Error>> {
    let path = args.sink_path.clone().unwrap_or_else(|| PathBuf::from("/dev/random"));
    Ok(Box::new(sink::KernelSink::open(&path, args.bits_per_byte)?))
}

#[cfg(not(target_os = "linux"))]
fn open_kernel_sink(_args: &Args) -> Result<Box<dyn EntropySink>, Box<dyn std::error::Error>> {
    Err("the kernel sink is only available on Linux; pass --sink file".into())
}

/// Builds a foldback sink and spawns the thread that stands in for the
/// embedding scripting host this standalone binary doesn't have: it just
/// drains the channel and logs what arrives.
fn open_foldback_sink() -> sink::FoldbackSink {
    let (sink, receiver) = sink::FoldbackSink::channel();
    std::thread::spawn(move || {
        let mut blocks = 0u64;
        while let Ok(block) = receiver.recv() {
            blocks += 1;
            tracing::debug!(blocks, bytes = block.len(), "folded-back entropy block");
        }
    });
    sink
}
