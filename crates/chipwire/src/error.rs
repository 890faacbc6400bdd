//! Error types shared by the parsers, the interpreter, the hardware
//! buffer and the cache manager.

use std::io;

/// Error type for all parsing, playback and caching operations.
///
/// The variants fall into the classes described in the error handling
/// design:
/// - `BadMagic`, `Truncated`, `InvalidOffset` are format errors. The
///   current file is unplayable; the caller moves on to the next one.
/// - `StreamAlignment` means an undocumented opcode was found mid
///   stream. Resuming past it would desynchronize every subsequent
///   register write, so it is fatal for the file by design.
/// - `ShortWrite` and `Transport` abort the current track but not the
///   session; the write buffer is cleared before they are returned.
/// - `CacheWrite` degrades the session to uncached playback.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// A file ident did not match its expected magic bytes.
    #[error("invalid ident: expected {expected:?}, found {found:02X?}")]
    BadMagic {
        expected: &'static str,
        found: [u8; 4],
    },

    /// Input ended while the parser required more bytes.
    #[error("truncated input at 0x{offset:X}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A stored header offset resolved outside the legal range.
    #[error("invalid {what} offset 0x{offset:X}")]
    InvalidOffset { what: &'static str, offset: usize },

    /// An opcode outside the documented command set was found.
    #[error("undocumented opcode 0x{opcode:02X} at offset 0x{offset:X}")]
    StreamAlignment { opcode: u8, offset: usize },

    /// The hardware link accepted fewer bytes than were handed to it.
    #[error("short transport write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// The hardware link reported an I/O failure.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// The cache file could not be created or written.
    #[error("cache write failed: {0}")]
    CacheWrite(#[source] io::Error),

    /// Any other filesystem I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PlayerError {
    /// True when the error invalidates the current file as a whole
    /// (format damage or stream misalignment), as opposed to a
    /// transport or cache condition the session can survive.
    pub fn is_fatal_for_file(&self) -> bool {
        matches!(
            self,
            PlayerError::BadMagic { .. }
                | PlayerError::Truncated { .. }
                | PlayerError::InvalidOffset { .. }
                | PlayerError::StreamAlignment { .. }
        )
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, PlayerError>;
