//! VGM command-stream interpreter.
//!
//! [`VgmStream`] is a cursor machine over the command region of a VGM
//! image: each [`step`](VgmStream::step) decodes the opcode at the
//! cursor, pushes its effect into a [`RegisterSink`], advances, and
//! reports how many samples the stream consumed. Looping, the two
//! overridable frame waits and the skip table for documented commands
//! this player does not model all live here.
//!
//! Stream damage is unforgiving by design: one undocumented opcode
//! means every following byte would be misinterpreted as operands, so
//! the interpreter refuses to continue instead of desynchronizing the
//! hardware.

use crate::binutil::{read_slice, read_u8_at, read_u16_le_at, read_u32_le_at};
use crate::chip::Chip;
use crate::error::{PlayerError, Result};
use crate::sink::{ChipWrite, RegisterSink};
use crate::vgm::header::{VGM_DEFAULT_WAIT1, VGM_DEFAULT_WAIT2, VgmHeader};

/// Outcome of one interpreter step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A command was executed; no stream time passed.
    Command,
    /// The stream consumed this many samples.
    Wait(u32),
    /// The stream terminated.
    End,
}

/// A steppable command stream, implemented by the VGM and S98
/// interpreters.
pub trait CommandStream {
    fn step(&mut self, sink: &mut dyn RegisterSink) -> Result<Step>;

    /// Current byte position in the underlying image.
    fn position(&self) -> usize;
}

/// VGM command-stream interpreter state.
pub struct VgmStream<'a> {
    bytes: &'a [u8],
    pos: usize,
    data_end: usize,
    loop_offset: usize,
    loops_played: u32,
    requested_loops: u32,
    wait1: u32,
    wait2: u32,
    ended: bool,
}

impl<'a> VgmStream<'a> {
    /// Build an interpreter over `bytes`, positioned at `data_start`.
    /// The command region ends where the GD3 block begins, or at the
    /// end of the image when there is none.
    pub fn new(bytes: &'a [u8], header: &VgmHeader, data_start: usize) -> Self {
        let mut data_end = bytes.len();
        if header.gd3_offset != 0 {
            data_end = data_end.min(header.gd3_offset as usize);
        }
        Self {
            bytes,
            pos: data_start.min(data_end),
            data_end,
            loop_offset: header.loop_offset as usize,
            loops_played: 1,
            requested_loops: 1,
            wait1: VGM_DEFAULT_WAIT1,
            wait2: VGM_DEFAULT_WAIT2,
            ended: false,
        }
    }

    /// How many times the whole stream should play. Zero means loop
    /// forever.
    pub fn set_requested_loops(&mut self, loops: u32) {
        self.requested_loops = loops;
    }

    /// Number of passes started so far, counting the first.
    pub fn loops_played(&self) -> u32 {
        self.loops_played
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    fn operand(&mut self, len: usize) -> Result<&'a [u8]> {
        let raw = read_slice(self.bytes, self.pos, len)?;
        self.pos += len;
        Ok(raw)
    }

    fn emit_wait(&mut self, sink: &mut dyn RegisterSink, samples: u32) -> Result<Step> {
        sink.wait(samples)?;
        Ok(Step::Wait(samples))
    }

    fn chip_write2(
        &mut self,
        sink: &mut dyn RegisterSink,
        chip: Chip,
        port: u8,
    ) -> Result<Step> {
        let op = self.operand(2)?;
        sink.chip_write(ChipWrite {
            chip,
            port,
            addr: op[0],
            data: op[1],
        })?;
        Ok(Step::Command)
    }
}

impl CommandStream for VgmStream<'_> {
    fn step(&mut self, sink: &mut dyn RegisterSink) -> Result<Step> {
        if self.ended {
            return Ok(Step::End);
        }
        if self.pos >= self.data_end {
            // Image ran out without an end command; treat it as a
            // normal end of track.
            self.ended = true;
            return Ok(Step::End);
        }

        let op_pos = self.pos;
        let op = read_u8_at(self.bytes, self.pos)?;
        self.pos += 1;

        match op {
            0x50 => {
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
            0x51 => self.chip_write2(sink, Chip::Ym2413, 0),
            0x52 | 0x53 => self.chip_write2(sink, Chip::Ym2612, op - 0x52),
            0x54 => self.chip_write2(sink, Chip::Ym2151, 0),
            0x55 => self.chip_write2(sink, Chip::Ym2203, 0),
            0x56 | 0x57 => self.chip_write2(sink, Chip::Ym2608, op - 0x56),
            0xA0 => self.chip_write2(sink, Chip::Ay8910, 0),
            0xBC => self.chip_write2(sink, Chip::WonderSwan, 0),

            0x61 => {
                let n = read_u16_le_at(self.bytes, self.pos)?;
                self.pos += 2;
                self.emit_wait(sink, n as u32)
            }
            0x62 => {
                let n = self.wait1;
                self.emit_wait(sink, n)
            }
            0x63 => {
                let n = self.wait2;
                self.emit_wait(sink, n)
            }
            0x64 => {
                // Override the length of one of the frame waits.
                let target = read_u8_at(self.bytes, self.pos)?;
                let len = read_u16_le_at(self.bytes, self.pos + 1)? as u32;
                self.pos += 3;
                match target {
                    0x62 => self.wait1 = len,
                    0x63 => self.wait2 = len,
                    _ => {}
                }
                Ok(Step::Command)
            }
            0x70..=0x7F => {
                let n = (op & 0x0F) as u32 + 1;
                self.emit_wait(sink, n)
            }
            0x80..=0x8F => {
                // DAC sample write plus short wait. The sample comes
                // out of a data bank this player does not stream, but
                // the wait must still be honored to stay aligned.
                let n = (op & 0x0F) as u32;
                self.emit_wait(sink, n)
            }

            0x66 => {
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

            0x67 => {
                let marker = read_u8_at(self.bytes, self.pos)?;
                if marker != 0x66 {
                    return Err(PlayerError::StreamAlignment {
                        opcode: op,
                        offset: op_pos,
                    });
                }
                let kind = read_u8_at(self.bytes, self.pos + 1)?;
                let size = (read_u32_le_at(self.bytes, self.pos + 2)? & 0x7FFF_FFFF) as usize;
                let payload = read_slice(self.bytes, self.pos + 6, size)?;
                sink.data_block(kind, payload)?;
                self.pos += 6 + size;
                Ok(Step::Command)
            }

            0xE0 => {
                // PCM data bank seek.
                self.operand(4)?;
                Ok(Step::Command)
            }

            other => match documented_operand_len(other) {
                Some(len) => {
                    let raw = read_slice(self.bytes, op_pos, 1 + len)?;
                    self.pos += len;
                    sink.passthrough(raw)?;
                    Ok(Step::Command)
                }
                None => Err(PlayerError::StreamAlignment {
                    opcode: other,
                    offset: op_pos,
                }),
            },
        }
    }

    fn position(&self) -> usize {
        self.pos
    }
}

/// Operand length of documented commands the interpreter does not
/// model. `None` marks an undocumented opcode.
fn documented_operand_len(op: u8) -> Option<usize> {
    match op {
        0x30..=0x3F => Some(1),
        0x40..=0x4E => Some(2),
        0x4F => Some(1),
        0x58..=0x5F => Some(2),
        0x68 => Some(11),
        0x90 | 0x91 => Some(4),
        0x92 => Some(5),
        0x93 => Some(10),
        0x94 => Some(1),
        0x95 => Some(4),
        0xA1..=0xAF => Some(2),
        0xB0..=0xBF => Some(2),
        0xC0..=0xCF => Some(3),
        0xD0..=0xDF => Some(3),
        0xE1..=0xFF => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_support::CollectSink;

    fn stream_over(body: &[u8]) -> (Vec<u8>, VgmHeader) {
        let header = VgmHeader {
            version: 0x150,
            data_offset: 0x40,
            ..Default::default()
        };
        let mut image = vec![0u8; 0x40];
        image.extend_from_slice(body);
        (image, header)
    }

    #[test]
    fn test_wait_override_changes_frame_waits() {
        let (image, header) = stream_over(&[
            0x64, 0x62, 0x10, 0x00, // wait1 = 16
            0x62, 0x63, 0x66,
        ]);
        let mut sink = CollectSink::default();
        let mut s = VgmStream::new(&image, &header, 0x40);
        assert_eq!(s.step(&mut sink).unwrap(), Step::Command);
        assert_eq!(s.step(&mut sink).unwrap(), Step::Wait(16));
        assert_eq!(s.step(&mut sink).unwrap(), Step::Wait(882));
        assert_eq!(s.step(&mut sink).unwrap(), Step::End);
    }

    #[test]
    fn test_undocumented_opcode_is_fatal() {
        let (image, header) = stream_over(&[0x65, 0x66]);
        let mut sink = CollectSink::default();
        let mut s = VgmStream::new(&image, &header, 0x40);
        assert!(matches!(
            s.step(&mut sink),
            Err(PlayerError::StreamAlignment {
                opcode: 0x65,
                offset: 0x40
            })
        ));
    }

    #[test]
    fn test_documented_unmodeled_opcode_passes_through() {
        let (image, header) = stream_over(&[0x4F, 0xFF, 0x66]);
        let mut sink = CollectSink::default();
        let mut s = VgmStream::new(&image, &header, 0x40);
        assert_eq!(s.step(&mut sink).unwrap(), Step::Command);
        assert_eq!(sink.passthrough, vec![vec![0x4F, 0xFF]]);
    }

    #[test]
    fn test_dac_write_and_wait_stays_aligned() {
        let (image, header) = stream_over(&[0x83, 0x70, 0x66]);
        let mut sink = CollectSink::default();
        let mut s = VgmStream::new(&image, &header, 0x40);
        assert_eq!(s.step(&mut sink).unwrap(), Step::Wait(3));
        assert_eq!(s.step(&mut sink).unwrap(), Step::Wait(1));
        assert_eq!(s.step(&mut sink).unwrap(), Step::End);
    }

    #[test]
    fn test_data_block_is_surfaced_and_skipped() {
        let (image, header) = stream_over(&[
            0x67, 0x66, 0x81, 0x03, 0x00, 0x00, 0x00, 0xAA, 0xBB, 0xCC, 0x66,
        ]);
        let mut sink = CollectSink::default();
        let mut s = VgmStream::new(&image, &header, 0x40);
        assert_eq!(s.step(&mut sink).unwrap(), Step::Command);
        assert_eq!(sink.blocks, vec![(0x81, 3)]);
        assert_eq!(s.step(&mut sink).unwrap(), Step::End);
    }
}
