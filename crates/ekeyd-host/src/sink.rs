//! Where decrypted entropy ends up: the kernel's random pool, a plain file,
//! or handed back to an embedding scripting host ("foldback").

use std::{
    io::{self, Write},
    sync::mpsc,
};

/// A destination for decrypted entropy bytes.
pub trait EntropySink {
    /// Consumes one 32-byte entropy block.
    fn write_entropy(&mut self, block: &[u8; 32]) -> io::Result<()>;
}

/// Feeds the kernel's random pool via `RNDADDENTROPY`, claiming
/// `bits_per_byte` bits of entropy credit for every byte written. Linux
/// only; configuring a non-Linux target for this sink is a startup error
/// the caller is expected to check for ahead of time.
#[cfg(target_os = "linux")]
pub struct KernelSink {
    device: std::fs::File,
    bits_per_byte: u32,
}

#[cfg(target_os = "linux")]
impl KernelSink {
    /// Opens `/dev/random` (or an overridden device path) for writing.
    pub fn open(path: &std::path::Path, bits_per_byte: u32) -> io::Result<Self> {
        let device = std::fs::OpenOptions::new().write(true).open(path)?;
        Ok(Self { device, bits_per_byte })
    }
}

#[cfg(target_os = "linux")]
mod ioctl {
    use std::os::unix::io::RawFd;

    #[repr(C)]
    pub struct RandPoolInfo {
        pub entropy_count: i32,
        pub buf_size: i32,
        pub buf: [u8; 32],
    }

    const RNDADDENTROPY: u64 = 0x4004_5203;

    /// # Safety
    ///
    /// `fd` must refer to an open, writable `/dev/random`-like device, and
    /// `info` must describe exactly `info.buf`'s valid prefix.
    #[allow(unsafe_code)]
    pub unsafe fn add_entropy(fd: RawFd, info: &RandPoolInfo) -> std::io::Result<()> {
        let ret = unsafe { libc::ioctl(fd, RNDADDENTROPY, std::ptr::from_ref(info)) };
        if ret == 0 { Ok(()) } else { Err(std::io::Error::last_os_error()) }
    }
}

#[cfg(target_os = "linux")]
impl EntropySink for KernelSink {
    #[allow(unsafe_code)]
    fn write_entropy(&mut self, block: &[u8; 32]) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        let entropy_bits = i32::try_from(block.len() as u32 * self.bits_per_byte).unwrap_or(i32::MAX);
        let info = ioctl::RandPoolInfo { entropy_count: entropy_bits, buf_size: 32, buf: *block };
        // SAFETY: `self.device` stays open for the call and `info.buf` is
        // exactly 32 initialized bytes matching `buf_size`.
        unsafe { ioctl::add_entropy(self.device.as_raw_fd(), &info) }
    }
}

/// Writes raw plaintext entropy bytes to a file, for hosts without a
/// kernel pool to feed (containers, non-Linux targets, testing).
pub struct FileSink {
    file: std::fs::File,
}

impl FileSink {
    /// Opens (creating if needed) `path` for appending entropy bytes.
    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl EntropySink for FileSink {
    fn write_entropy(&mut self, block: &[u8; 32]) -> io::Result<()> {
        self.file.write_all(block)
    }
}

/// Hands entropy bytes back to an embedding host over a channel instead of
/// writing them anywhere itself.
pub struct FoldbackSink {
    sender: mpsc::Sender<[u8; 32]>,
}

impl FoldbackSink {
    /// Builds a sink paired with the receiving end an embedding host reads
    /// from.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<[u8; 32]>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl EntropySink for FoldbackSink {
    fn write_entropy(&mut self, block: &[u8; 32]) -> io::Result<()> {
        self.sender.send(*block).map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foldback_sink_delivers_blocks_in_order() {
        let (mut sink, receiver) = FoldbackSink::channel();
        sink.write_entropy(&[1u8; 32]).unwrap();
        sink.write_entropy(&[2u8; 32]).unwrap();
        assert_eq!(receiver.recv().unwrap(), [1u8; 32]);
        assert_eq!(receiver.recv().unwrap(), [2u8; 32]);
    }

    #[test]
    fn file_sink_appends_each_block() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("ekeyd-file-sink-test-{:?}", std::thread::current().id()));
        let mut sink = FileSink::open(&path).unwrap();
        sink.write_entropy(&[9u8; 32]).unwrap();
        sink.write_entropy(&[9u8; 32]).unwrap();
        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents.len(), 64);
        std::fs::remove_file(&path).ok();
    }
}
