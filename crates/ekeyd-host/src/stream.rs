//! The opaque duplex byte channel a device is reached through: a UNIX
//! socket (the common case, fed by a userland USB relay), a raw-mode tty
//! (a device wired directly to a serial port), or a plain file (useful for
//! replaying a captured session in tests).
//!
//! Every implementation is non-blocking at acquisition; a short read
//! surfaces as [`std::io::ErrorKind::WouldBlock`] rather than suspending,
//! matching the poll-driven, single-step-per-wakeup model the rest of the
//! daemon assumes.

use std::{
    io::{self, Read, Write},
    os::unix::{io::AsRawFd, net::UnixStream as StdUnixStream},
    path::Path,
};

use mio::{Interest, Registry, Token, event::Source, unix::SourceFd};

/// A duplex byte channel to one device, registrable with an `mio` poller.
pub trait Stream {
    /// Reads whatever is currently available. Returns
    /// `Err(WouldBlock)` rather than blocking when nothing is ready.
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    /// Writes `data` in full, retrying on transient `WouldBlock` — control
    /// bytes and handshake lines are always small enough that this never
    /// meaningfully blocks the single-threaded poll loop.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Registers this stream's file descriptor with an `mio` poller.
    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()>;
}

/// A UNIX domain socket connection to the userland relay process.
pub struct UnixSocketStream {
    inner: StdUnixStream,
}

impl UnixSocketStream {
    /// Connects to a listening UNIX socket and puts it in non-blocking
    /// mode.
    pub fn connect(path: &Path) -> io::Result<Self> {
        let inner = StdUnixStream::connect(path)?;
        inner.set_nonblocking(true)?;
        Ok(Self { inner })
    }
}

impl Stream for UnixSocketStream {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buffer)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        write_all_retrying(&mut self.inner, data)
    }

    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        SourceFd(&self.inner.as_raw_fd()).register(registry, token, Interest::READABLE)
    }
}

/// A serial tty opened in raw mode: no line editing, no signal characters,
/// 8 bits, no parity — every byte that arrives is handed to the framer
/// untouched.
#[cfg(unix)]
pub struct TtyStream {
    file: std::fs::File,
}

#[cfg(unix)]
impl TtyStream {
    /// Opens `path` and switches the underlying tty to raw mode.
    pub fn open(path: &Path) -> io::Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc_o_nonblock())
            .open(path)?;
        set_raw_mode(&file)?;
        Ok(Self { file })
    }
}

#[cfg(unix)]
impl Stream for TtyStream {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.file.read(buffer)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        write_all_retrying(&mut self.file, data)
    }

    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        SourceFd(&self.file.as_raw_fd()).register(registry, token, Interest::READABLE)
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn set_raw_mode(file: &std::fs::File) -> io::Result<()> {
    use nix::sys::termios::{self, SetArg};
    let fd = file.as_raw_fd();
    // SAFETY: `fd` comes from `file`, which outlives both borrows below.
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    let mut attrs = termios::tcgetattr(borrowed).map_err(io::Error::from)?;
    termios::cfmakeraw(&mut attrs);
    termios::tcsetattr(borrowed, SetArg::TCSANOW, &attrs).map_err(io::Error::from)?;
    Ok(())
}

#[cfg(unix)]
fn libc_o_nonblock() -> i32 {
    nix::libc::O_NONBLOCK
}

/// A plain file, used in tests to replay a captured byte stream; writes are
/// discarded counts only, there is no device on the other end to answer.
pub struct FileStream {
    file: std::fs::File,
}

impl FileStream {
    /// Opens `path` for reading a captured byte stream.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self { file: std::fs::File::open(path)? })
    }
}

impl Stream for FileStream {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.file.read(buffer)
    }

    fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        SourceFd(&self.file.as_raw_fd()).register(registry, token, Interest::READABLE)
    }
}

fn write_all_retrying(writer: &mut impl Write, data: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        match writer.write(&data[offset..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(written) => offset += written,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
