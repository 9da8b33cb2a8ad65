//! A blocking byte channel to the single device being provisioned.
//!
//! Unlike [`ekeyd_host`]'s non-blocking, poll-driven `Stream`, this tool only
//! ever talks to one device at a time and is content to block with a short
//! timeout between reads rather than register with an event loop.

use std::{
    io::{self, Read, Write},
    os::unix::net::UnixStream as StdUnixStream,
    path::Path,
    time::Duration,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// The device's byte channel, opened as whichever kind of file it turned
/// out to be.
pub enum DeviceChannel {
    /// A UNIX domain socket to a userland USB relay.
    Unix(StdUnixStream),
    /// A serial tty, switched to raw mode.
    Tty(std::fs::File),
    /// A plain file, for replaying a captured session in tests.
    #[cfg_attr(not(test), allow(dead_code))]
    File(std::fs::File),
}

impl DeviceChannel {
    /// Connects to a listening UNIX socket.
    pub fn connect_unix(path: &Path) -> io::Result<Self> {
        let stream = StdUnixStream::connect(path)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(Self::Unix(stream))
    }

    /// Opens `path` as a tty and switches it to raw mode.
    pub fn open_tty(path: &Path) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        set_raw_mode(&file)?;
        Ok(Self::Tty(file))
    }

    /// Opens `path` as a plain file.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn open_file(path: &Path) -> io::Result<Self> {
        Ok(Self::File(std::fs::File::open(path)?))
    }

    /// Reads one chunk. A read timeout is reported as `Ok(0)`, the same as
    /// "nothing has arrived yet", rather than as an error — the caller
    /// already has its own retry budget via [`ekeyd_core::RekeyHandshake::on_timeout`].
    pub fn read_chunk(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let result = match self {
            Self::Unix(stream) => stream.read(buffer),
            Self::Tty(file) | Self::File(file) => file.read(buffer),
        };
        match result {
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(0),
            other => other,
        }
    }

    /// Writes `data` in full.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Unix(stream) => stream.write_all(data),
            Self::Tty(file) | Self::File(file) => file.write_all(data),
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn set_raw_mode(file: &std::fs::File) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    use nix::sys::termios::{self, SetArg};

    let fd = file.as_raw_fd();
    // SAFETY: `fd` comes from `file`, which outlives both borrows below.
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    let mut attrs = termios::tcgetattr(borrowed).map_err(io::Error::from)?;
    termios::cfmakeraw(&mut attrs);
    termios::tcsetattr(borrowed, SetArg::TCSANOW, &attrs).map_err(io::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ekeyd-rekey-channel-test-{}-{name}", std::process::id()))
    }

    #[test]
    fn open_file_replays_a_captured_session() {
        let path = scratch_path("replay");
        std::fs::File::create(&path).unwrap().write_all(b"captured frame bytes").unwrap();

        let mut channel = DeviceChannel::open_file(&path).unwrap();
        let mut buffer = [0u8; 64];
        let count = channel.read_chunk(&mut buffer).unwrap();
        assert_eq!(&buffer[..count], b"captured frame bytes");

        std::fs::remove_file(&path).ok();
    }
}
