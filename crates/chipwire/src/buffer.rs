//! Hardware link abstraction and the register write buffer.
//!
//! The serial/USB transport itself lives outside this crate; the core
//! sees it only as a [`HardwareLink`] it can push bytes into. This
//! module owns everything between a decoded register write and those
//! bytes: wire framing, batching, the flush policy and the no-op wait
//! frames used for very short delays.

use std::io;

use crate::error::{PlayerError, Result};

/// Capacity of the write buffer in bytes.
const WRITE_BUF_SIZE: usize = 64 * 1024;

/// Largest single transfer handed to the link per flush chunk.
const FLUSH_CHUNK: usize = 4096;

/// Delays below this many samples are expressed as buffered no-op
/// frames instead of a host-side sleep. The hardware executes one no-op
/// per sample period at its own deterministic rate, which is more
/// precise than any sub-millisecond sleep the host could make.
pub const HW_WAIT_THRESHOLD: u32 = 10;

/// No-op single-byte frame understood by the four-byte protocol.
const WAIT_FRAME: u8 = 0x80;

/// One register write addressed to a physical slot. This is the unit
/// the wire protocol frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub slot: u8,
    pub port: u8,
    pub addr: u8,
    pub data: u8,
}

impl RegisterWrite {
    /// The all-zero pseudo-write that requests a wait without a
    /// register transfer. Recognized only by
    /// [`WriteBuffer::push_wait_and_write`] and never framed onto the
    /// wire; a plain [`WriteBuffer::push_write`] transmits every write
    /// it is given, zeros included.
    pub const WAIT_MARKER: RegisterWrite = RegisterWrite {
        slot: 0,
        port: 0,
        addr: 0,
        data: 0,
    };

    /// True for the wait pseudo-write.
    pub fn is_wait_marker(&self) -> bool {
        self.port == 0 && self.addr == 0 && self.data == 0
    }
}

/// The opaque transport handle the core writes through.
///
/// Opening a device by index and configuring it belongs to the
/// transport layer; the core receives an already-open link. `write`
/// returns the number of bytes the device accepted.
pub trait HardwareLink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

/// Wire framing variants. Exactly one is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// slot bit, port shifted left one, address, data. This variant
    /// also understands single-byte no-op wait frames.
    FourByte,
    /// (slot << 4) | port, address, data.
    ThreeByte,
}

impl Framing {
    fn encode(self, w: RegisterWrite, out: &mut [u8; 4]) -> usize {
        match self {
            Framing::FourByte => {
                out[0] = w.slot & 1;
                out[1] = (w.port & 7) << 1;
                out[2] = w.addr;
                out[3] = w.data;
                4
            }
            Framing::ThreeByte => {
                out[0] = ((w.slot & 7) << 4) | (w.port & 3);
                out[1] = w.addr;
                out[2] = w.data;
                3
            }
        }
    }

    /// Whether this framing has a hardware-timed no-op frame.
    pub fn supports_wait_frames(self) -> bool {
        matches!(self, Framing::FourByte)
    }
}

/// When buffered frames are pushed to the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Flush after every register write.
    PerWrite,
    /// Flush once per interpreted source command.
    #[default]
    PerCommand,
}

/// Bounded byte buffer in front of the hardware link.
///
/// Encoded frames accumulate until [`flush`](WriteBuffer::flush) is
/// called or an append would overflow the capacity, which forces a
/// flush first. A transport failure clears the buffer entirely so
/// stale partial frames are never resent into the next track.
pub struct WriteBuffer<L> {
    link: L,
    framing: Framing,
    buf: Box<[u8]>,
    len: usize,
}

impl<L: HardwareLink> WriteBuffer<L> {
    pub fn new(link: L, framing: Framing) -> Self {
        Self {
            link,
            framing,
            buf: vec![0u8; WRITE_BUF_SIZE].into_boxed_slice(),
            len: 0,
        }
    }

    /// The framing this buffer encodes with.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Number of buffered, unflushed bytes.
    pub fn pending(&self) -> usize {
        self.len
    }

    /// Append one register write. Forces a flush first when the frame
    /// would not fit.
    pub fn push_write(&mut self, w: RegisterWrite) -> Result<()> {
        let mut frame = [0u8; 4];
        let n = self.framing.encode(w, &mut frame);
        if self.len + n > self.buf.len() {
            self.flush()?;
        }
        self.buf[self.len..self.len + n].copy_from_slice(&frame[..n]);
        self.len += n;
        Ok(())
    }

    /// Append `samples` hardware-timed no-op frames, one per sample
    /// period. Only meaningful on framings that support them; others
    /// leave the timing to the host scheduler.
    pub fn push_wait_frames(&mut self, samples: u32) -> Result<()> {
        if !self.framing.supports_wait_frames() {
            return Ok(());
        }
        let mut remaining = samples as usize;
        while remaining > 0 {
            if self.len == self.buf.len() {
                self.flush()?;
            }
            let n = remaining.min(self.buf.len() - self.len);
            self.buf[self.len..self.len + n].fill(WAIT_FRAME);
            self.len += n;
            remaining -= n;
        }
        Ok(())
    }

    /// Buffer `samples` of hardware-timed delay, then the write itself.
    /// The wait pseudo-write is recognized here and never transmitted,
    /// which lets a caller express a pure delay through the same entry
    /// point as a delayed write.
    pub fn push_wait_and_write(&mut self, samples: u32, w: RegisterWrite) -> Result<()> {
        if samples > 0 {
            self.push_wait_frames(samples)?;
        }
        if w.is_wait_marker() {
            return Ok(());
        }
        self.push_write(w)
    }

    /// Transmit all buffered frames in chunks of at most 4096 bytes.
    ///
    /// Buffered bytes are released only after each chunk fully
    /// succeeds. Any transport error or short write clears the whole
    /// buffer and aborts with a transport error.
    pub fn flush(&mut self) -> Result<()> {
        let mut sent = 0;
        while sent < self.len {
            let chunk = (self.len - sent).min(FLUSH_CHUNK);
            match self.link.write(&self.buf[sent..sent + chunk]) {
                Ok(n) if n == chunk => sent += n,
                Ok(n) => {
                    log::error!("hardware flush wrote {} of {} bytes, clearing buffer", n, chunk);
                    self.len = 0;
                    return Err(PlayerError::ShortWrite {
                        written: n,
                        expected: chunk,
                    });
                }
                Err(e) => {
                    log::error!("hardware flush failed: {}", e);
                    self.len = 0;
                    return Err(PlayerError::Transport(e));
                }
            }
        }
        self.len = 0;
        Ok(())
    }

    /// Drop all buffered frames without transmitting them.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Give the link back, discarding anything still buffered.
    pub fn into_link(self) -> L {
        self.link
    }
}
