//! Byte stream framing.
//!
//! A [`Framer`] turns an arbitrary byte stream into a sequence of 64-byte
//! frames delimited by a start-of-frame marker (`* `) and an end-of-frame
//! marker (CR LF). It performs no I/O of its own — the caller feeds it
//! whatever bytes the underlying [stream](crate) produced — and it never
//! blocks or errors outright on garbled input: misframed bytes are resynced
//! past and counted, never panicked on.
//!
//! # Resync algorithm
//!
//! Each time the internal buffer holds at least 64 bytes, the leading
//! 64-byte window is checked against the frame markers:
//!
//! - Markers hold: the window is a frame. Drain it and report success.
//! - The start marker doesn't hold: search the rest of the window for the
//!   next `*`. If one is found, drop everything before it (this is the
//!   resync) and re-check. If none is found, the whole window is garbage;
//!   drop it and wait for more bytes.
//! - The start marker holds but the end marker doesn't: drop just the
//!   leading `*` and re-check — the frame was a false start.
//!
//! Every one of those three misframe branches increments
//! [`Framer::framing_errors`].

/// Size of a wire frame in bytes.
pub const FRAME_SIZE: usize = 64;

/// Byte at offset 0 of every valid frame.
const SOF_MARKER: u8 = b'*';
/// Byte at offset 1 of every valid frame.
const SOF_SPACE: u8 = b' ';
/// Byte at offset 62 of every valid frame.
const EOF_CR: u8 = 0x0D;
/// Byte at offset 63 of every valid frame.
const EOF_LF: u8 = 0x0A;

/// A validated 64-byte frame, still undecoded.
pub type RawFrame = [u8; FRAME_SIZE];

/// Incremental frame reassembler.
///
/// Pure data transformation: accepts bytes via [`Framer::feed`], returns
/// zero or more complete frames. Holds no reference to any I/O source.
#[derive(Debug, Default, Clone)]
pub struct Framer {
    buf: Vec<u8>,
    frames_ok: u64,
    framing_errors: u64,
}

impl Framer {
    /// Creates an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames successfully extracted so far.
    #[must_use]
    pub fn frames_ok(&self) -> u64 {
        self.frames_ok
    }

    /// Number of resync steps taken so far (one per misframe encountered,
    /// not one per byte skipped).
    #[must_use]
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Feeds newly-read bytes and returns every frame they complete, in
    /// order. May return an empty vector if the bytes didn't complete a
    /// frame, or more than one if they completed several at once.
    pub fn feed(&mut self, input: &[u8]) -> Vec<RawFrame> {
        self.buf.extend_from_slice(input);
        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract() {
            frames.push(frame);
        }
        frames
    }

    fn try_extract(&mut self) -> Option<RawFrame> {
        loop {
            if self.buf.len() < FRAME_SIZE {
                return None;
            }

            let window = &self.buf[0..FRAME_SIZE];
            let sof_ok = window[0] == SOF_MARKER && window[1] == SOF_SPACE;
            let eof_ok = window[62] == EOF_CR && window[63] == EOF_LF;

            if sof_ok && eof_ok {
                let mut frame = [0u8; FRAME_SIZE];
                frame.copy_from_slice(window);
                self.buf.drain(0..FRAME_SIZE);
                self.frames_ok += 1;
                return Some(frame);
            }

            self.framing_errors += 1;

            if !sof_ok {
                match window[1..].iter().position(|&b| b == SOF_MARKER) {
                    Some(offset) => {
                        self.buf.drain(0..=offset);
                    },
                    None => {
                        self.buf.drain(0..FRAME_SIZE);
                        return None;
                    },
                }
            } else {
                self.buf.drain(0..1);
            }
        }
    }
}
