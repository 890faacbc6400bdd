//! S98 format handling: header parsing and the command-stream
//! interpreter.
//!
//! S98 is an older and much simpler register log. The header is a
//! fixed 0x20 bytes; sync commands carry 7-bit variable-length values
//! in units of one timer tick, 10 ms for NTSC material and 20 ms for
//! PAL. Device opcodes below 0x80 select a fixed chip with one or two
//! trailing bytes.

use crate::binutil::{read_u8_at, read_u32_le_at, read_varint7_at};
use crate::chip::Chip;
use crate::error::{PlayerError, Result};
use crate::sink::{ChipWrite, RegisterSink};
use crate::vgm::header::VGM_SAMPLE_RATE;
use crate::vgm::stream::{CommandStream, Step};

/// Fixed S98 header length.
const S98_HEADER_LEN: usize = 0x20;

/// Denominator value marking PAL material in the timer fields.
const PAL_TIMER_DENOMINATOR: u32 = 198;

/// Parsed S98 header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct S98Header {
    /// ASCII version digit following the magic.
    pub version: u8,
    pub timer_info: u32,
    pub timer_info2: u32,
    pub compressing: u32,
    pub offset_to_dump: u32,
    pub offset_to_loop: u32,
    pub device_count: u32,
}

impl S98Header {
    /// Length of one sync unit in microseconds: 10 ms unless both
    /// timer fields are set and the denominator names PAL.
    pub fn sync_unit_us(&self) -> u32 {
        if self.timer_info != 0
            && self.timer_info2 != 0
            && self.timer_info2 == PAL_TIMER_DENOMINATOR
        {
            20_000
        } else {
            10_000
        }
    }
}

/// Parse an S98 header located at the start of `bytes`.
pub fn parse_s98_header(bytes: &[u8]) -> Result<S98Header> {
    if bytes.len() < S98_HEADER_LEN {
        return Err(PlayerError::Truncated {
            offset: 0,
            needed: S98_HEADER_LEN,
            available: bytes.len(),
        });
    }
    if &bytes[0..3] != b"S98" {
        let mut id: [u8; 4] = [0; 4];
        id.copy_from_slice(&bytes[0..4]);
        return Err(PlayerError::BadMagic {
            expected: "S98",
            found: id,
        });
    }

    Ok(S98Header {
        version: bytes[3],
        timer_info: read_u32_le_at(bytes, 4)?,
        timer_info2: read_u32_le_at(bytes, 8)?,
        compressing: read_u32_le_at(bytes, 12)?,
        offset_to_dump: read_u32_le_at(bytes, 16)?,
        offset_to_loop: read_u32_le_at(bytes, 20)?,
        device_count: read_u32_le_at(bytes, 24)?,
    })
}

/// Chip and port selected by a device opcode, when this player models
/// the device.
fn device_chip(op: u8) -> Option<(Chip, u8)> {
    match op {
        0x00 => Some((Chip::Ym2151, 0)),
        0x01 => Some((Chip::Ym2203, 0)),
        0x02 => Some((Chip::Ym2612, 0)),
        0x03 => Some((Chip::Ym2608, 0)),
        0x04 => Some((Chip::Ym2413, 0)),
        0x05 => Some((Chip::Ym3812, 0)),
        0x06 => Some((Chip::Ym3526, 0)),
        0x07 => Some((Chip::Y8950, 0)),
        0x08 => Some((Chip::Ymf262, 0)),
        _ => None,
    }
}

/// S98 command-stream interpreter state.
pub struct S98Stream<'a> {
    bytes: &'a [u8],
    pos: usize,
    loop_offset: usize,
    loops_played: u32,
    requested_loops: u32,
    sync_unit_us: u64,
    ended: bool,
}

impl<'a> S98Stream<'a> {
    pub fn new(bytes: &'a [u8], header: &S98Header) -> Self {
        Self {
            bytes,
            pos: header.offset_to_dump as usize,
            loop_offset: header.offset_to_loop as usize,
            loops_played: 1,
            requested_loops: 1,
            sync_unit_us: header.sync_unit_us() as u64,
            ended: false,
        }
    }

    /// How many times the dump should play. Zero means loop forever.
    pub fn set_requested_loops(&mut self, loops: u32) {
        self.requested_loops = loops;
    }

    fn sync_samples(&self, ticks: u64) -> u32 {
        (ticks * self.sync_unit_us * VGM_SAMPLE_RATE as u64 / 1_000_000) as u32
    }
}

impl CommandStream for S98Stream<'_> {
    fn step(&mut self, sink: &mut dyn RegisterSink) -> Result<Step> {
        if self.ended {
            return Ok(Step::End);
        }
        if self.pos >= self.bytes.len() {
            self.ended = true;
            return Ok(Step::End);
        }

        let op = read_u8_at(self.bytes, self.pos)?;
        self.pos += 1;

        match op {
            0x00..=0x0F => {
                let addr = read_u8_at(self.bytes, self.pos)?;
                let data = read_u8_at(self.bytes, self.pos + 1)?;
                self.pos += 2;
                if let Some((chip, port)) = device_chip(op) {
                    sink.chip_write(ChipWrite {
                        chip,
                        port,
                        addr,
                        data,
                    })?;
                }
                Ok(Step::Command)
            }
            0x10 => {
                let addr = read_u8_at(self.bytes, self.pos)?;
                let data = read_u8_at(self.bytes, self.pos + 1)?;
                self.pos += 2;
                sink.chip_write(ChipWrite {
                    chip: Chip::Ay8910,
                    port: 0,
                    addr,
                    data,
                })?;
                Ok(Step::Command)
            }
            0x11 => {
                let data = read_u8_at(self.bytes, self.pos)?;
                self.pos += 1;
                sink.chip_write(ChipWrite {
                    chip: Chip::Sn76489,
                    port: 0,
                    addr: 0,
                    data,
                })?;
                Ok(Step::Command)
            }
            0x12..=0x1F => {
                self.pos += 1;
                Ok(Step::Command)
            }
            0xFF => {
                let (ticks, consumed) = read_varint7_at(self.bytes, self.pos)?;
                self.pos += consumed;
                let samples = self.sync_samples(ticks as u64 + 1);
                sink.wait(samples)?;
                Ok(Step::Wait(samples))
            }
            0xFE => {
                let (ms, consumed) = read_varint7_at(self.bytes, self.pos)?;
                self.pos += consumed;
                if ms == 0 {
                    return Ok(Step::Command);
                }
                let samples =
                    (ms as u64 * 1000 * VGM_SAMPLE_RATE as u64 / 1_000_000) as u32;
                sink.wait(samples)?;
                Ok(Step::Wait(samples))
            }
            0xFD => {
                if self.loop_offset != 0
                    && (self.requested_loops == 0 || self.loops_played < self.requested_loops)
                {
                    self.loops_played += 1;
                    self.pos = self.loop_offset;
                    Ok(Step::Command)
                } else {
                    self.ended = true;
                    Ok(Step::End)
                }
            }
            0xFC => {
                self.ended = true;
                Ok(Step::End)
            }
            _ => {
                // Devices this player has no mapping for still carry
                // two operand bytes; skipping them keeps the sync
                // commands aligned.
                self.pos += 2;
                Ok(Step::Command)
            }
        }
    }

    fn position(&self) -> usize {
        self.pos
    }
}
