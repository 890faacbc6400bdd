//! Register sinks: destinations for decoded log commands.
//!
//! The interpreter decodes a log into chip writes, waits and opaque
//! passthrough bytes, and pushes them into a [`RegisterSink`]. Two real
//! implementations exist: [`HardwareSink`] feeds the write buffer in
//! front of the serial link, and [`CacheSink`] re-encodes the stream
//! into a VGM body for the cache file. [`TranscodingSink`] interposes a
//! transcoder between the interpreter and either of them.

use crate::buffer::{FlushPolicy, HW_WAIT_THRESHOLD, HardwareLink, RegisterWrite, WriteBuffer};
use crate::chip::{Chip, ChipRegistry};
use crate::error::Result;
use crate::transcode::{OpmSink, Transcoder};

/// One decoded register write, still addressed by chip identity rather
/// than physical slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipWrite {
    pub chip: Chip,
    pub port: u8,
    pub addr: u8,
    pub data: u8,
}

/// Destination for the interpreter's output.
///
/// Only `chip_write` is mandatory; the remaining hooks default to
/// no-ops so simple sinks stay simple.
pub trait RegisterSink {
    /// One decoded chip register write.
    fn chip_write(&mut self, w: ChipWrite) -> Result<()>;

    /// The stream advances by `samples` at 44100 Hz.
    fn wait(&mut self, samples: u32) -> Result<()> {
        let _ = samples;
        Ok(())
    }

    /// A documented command this player does not model, raw bytes
    /// including the opcode.
    fn passthrough(&mut self, raw: &[u8]) -> Result<()> {
        let _ = raw;
        Ok(())
    }

    /// A data block of `kind` found in the stream.
    fn data_block(&mut self, kind: u8, payload: &[u8]) -> Result<()> {
        let _ = (kind, payload);
        Ok(())
    }

    /// Push any buffered output toward its destination.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: RegisterSink + ?Sized> RegisterSink for &mut S {
    fn chip_write(&mut self, w: ChipWrite) -> Result<()> {
        (**self).chip_write(w)
    }

    fn wait(&mut self, samples: u32) -> Result<()> {
        (**self).wait(samples)
    }

    fn passthrough(&mut self, raw: &[u8]) -> Result<()> {
        (**self).passthrough(raw)
    }

    fn data_block(&mut self, kind: u8, payload: &[u8]) -> Result<()> {
        (**self).data_block(kind, payload)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Sink feeding decoded writes into the hardware write buffer.
///
/// Chip identities resolve to physical slots through the registry;
/// writes to unassigned chips are dropped silently. Short waits are
/// expressed as hardware-timed no-op frames so they ride inside the
/// buffered stream instead of requiring a host sleep.
pub struct HardwareSink<L> {
    buffer: WriteBuffer<L>,
    registry: ChipRegistry,
    policy: FlushPolicy,
}

impl<L: HardwareLink> HardwareSink<L> {
    pub fn new(buffer: WriteBuffer<L>, registry: ChipRegistry, policy: FlushPolicy) -> Self {
        Self {
            buffer,
            registry,
            policy,
        }
    }

    pub fn set_policy(&mut self, policy: FlushPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn registry(&self) -> &ChipRegistry {
        &self.registry
    }

    pub fn buffer_mut(&mut self) -> &mut WriteBuffer<L> {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> WriteBuffer<L> {
        self.buffer
    }
}

impl<L: HardwareLink> RegisterSink for HardwareSink<L> {
    fn chip_write(&mut self, w: ChipWrite) -> Result<()> {
        let Some(slot) = self.registry.slot_for(w.chip) else {
            // Not installed. Normal, not an error.
            return Ok(());
        };
        self.buffer.push_write(RegisterWrite {
            slot,
            port: w.port,
            addr: w.addr,
            data: w.data,
        })?;
        if self.policy == FlushPolicy::PerWrite {
            self.buffer.flush()?;
        }
        Ok(())
    }

    fn wait(&mut self, samples: u32) -> Result<()> {
        if samples > 0 && samples < HW_WAIT_THRESHOLD {
            self.buffer
                .push_wait_and_write(samples, RegisterWrite::WAIT_MARKER)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.buffer.flush()
    }
}

/// Forwards transcoded YM2151 writes into a register sink.
struct OpmForward<'a, S> {
    inner: &'a mut S,
}

impl<S: RegisterSink> OpmSink for OpmForward<'_, S> {
    fn opm_write(&mut self, addr: u8, data: u8) -> Result<()> {
        self.inner.chip_write(ChipWrite {
            chip: Chip::Ym2151,
            port: 0,
            addr,
            data,
        })
    }
}

/// Sink adapter interposing a transcoder between the interpreter and
/// another sink.
///
/// Writes to the transcoder's source chip run through the engine;
/// stray writes to the target chip are dropped so they cannot fight
/// the transcoded voices; everything else passes through untouched.
pub struct TranscodingSink<S> {
    inner: S,
    engine: Transcoder,
}

impl<S: RegisterSink> TranscodingSink<S> {
    pub fn new(engine: Transcoder, inner: S) -> Self {
        Self { inner, engine }
    }

    /// Emit the engine's initial target-chip setup into the inner sink.
    pub fn init(&mut self) -> Result<()> {
        self.engine.init(&mut OpmForward {
            inner: &mut self.inner,
        })
    }

    pub fn engine_mut(&mut self) -> &mut Transcoder {
        &mut self.engine
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: RegisterSink> RegisterSink for TranscodingSink<S> {
    fn chip_write(&mut self, w: ChipWrite) -> Result<()> {
        if w.chip == self.engine.source() {
            self.engine.write(
                &w,
                &mut OpmForward {
                    inner: &mut self.inner,
                },
            )
        } else if w.chip == Chip::Ym2151 {
            // A stray target-chip write in the source would conflict
            // with the voices the engine manages.
            Ok(())
        } else {
            self.inner.chip_write(w)
        }
    }

    fn wait(&mut self, samples: u32) -> Result<()> {
        self.engine.elapse(
            samples,
            &mut OpmForward {
                inner: &mut self.inner,
            },
        )?;
        self.inner.wait(samples)
    }

    fn passthrough(&mut self, raw: &[u8]) -> Result<()> {
        self.inner.passthrough(raw)
    }

    fn data_block(&mut self, kind: u8, payload: &[u8]) -> Result<()> {
        self.inner.data_block(kind, payload)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

/// YM2608 Delta-T ADPCM data block kind, the one payload the cache
/// keeps.
const DATA_BLOCK_YM2608_DELTA_T: u8 = 0x81;

/// Sink re-encoding the command stream into a VGM body.
///
/// Chip writes become their VGM opcodes, waits are re-encoded with the
/// standard wait commands, passthrough bytes are copied verbatim. The
/// caller marks the loop point and finally closes the body with the
/// end-of-data command.
#[derive(Debug, Default)]
pub struct CacheSink {
    out: Vec<u8>,
    total_samples: u64,
    loop_mark: Option<usize>,
}

impl CacheSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes encoded so far.
    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Sum of all encoded waits, in samples.
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Record the current output position as the loop point. The first
    /// call wins.
    pub fn mark_loop(&mut self) {
        if self.loop_mark.is_none() {
            self.loop_mark = Some(self.out.len());
        }
    }

    /// Byte offset of the recorded loop point within the body.
    pub fn loop_mark(&self) -> Option<usize> {
        self.loop_mark
    }

    /// Close the body with the end command and return it.
    pub fn finish(mut self) -> Vec<u8> {
        self.out.push(0x66);
        self.out
    }
}

impl RegisterSink for CacheSink {
    fn chip_write(&mut self, w: ChipWrite) -> Result<()> {
        match w.chip {
            Chip::Sn76489 => self.out.extend_from_slice(&[0x50, w.data]),
            Chip::Ym2413 => self.out.extend_from_slice(&[0x51, w.addr, w.data]),
            Chip::Ym2612 => {
                self.out
                    .extend_from_slice(&[0x52 | (w.port & 1), w.addr, w.data])
            }
            Chip::Ym2151 => self.out.extend_from_slice(&[0x54, w.addr, w.data]),
            Chip::Ym2203 => self.out.extend_from_slice(&[0x55, w.addr, w.data]),
            Chip::Ym2608 => {
                self.out
                    .extend_from_slice(&[0x56 | (w.port & 1), w.addr, w.data])
            }
            Chip::Ym3812 => self.out.extend_from_slice(&[0x5A, w.addr, w.data]),
            Chip::Ym3526 => self.out.extend_from_slice(&[0x5B, w.addr, w.data]),
            Chip::Y8950 => self.out.extend_from_slice(&[0x5C, w.addr, w.data]),
            Chip::Ymf262 => {
                self.out
                    .extend_from_slice(&[0x5E | (w.port & 1), w.addr, w.data])
            }
            Chip::Ay8910 => self.out.extend_from_slice(&[0xA0, w.addr, w.data]),
            Chip::WonderSwan => self.out.extend_from_slice(&[0xBC, w.addr, w.data]),
        }
        Ok(())
    }

    fn wait(&mut self, samples: u32) -> Result<()> {
        self.total_samples += samples as u64;
        let mut n = samples;
        while n > 0 {
            if n == 735 {
                self.out.push(0x62);
                break;
            } else if n == 882 {
                self.out.push(0x63);
                break;
            } else if n <= 16 {
                self.out.push(0x70 | (n - 1) as u8);
                break;
            } else {
                let chunk = n.min(65535);
                self.out.push(0x61);
                self.out.extend_from_slice(&(chunk as u16).to_le_bytes());
                n -= chunk;
            }
        }
        Ok(())
    }

    fn passthrough(&mut self, raw: &[u8]) -> Result<()> {
        self.out.extend_from_slice(raw);
        Ok(())
    }

    fn data_block(&mut self, kind: u8, payload: &[u8]) -> Result<()> {
        // ADPCM sample RAM is meaningful to the substitute setup too;
        // every other block kind belongs to hardware the cache no
        // longer addresses.
        if kind == DATA_BLOCK_YM2608_DELTA_T {
            self.out.extend_from_slice(&[0x67, 0x66, kind]);
            self.out
                .extend_from_slice(&(payload.len() as u32).to_le_bytes());
            self.out.extend_from_slice(payload);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::CollectSink;
    use super::*;

    #[test]
    fn test_cache_sink_encodes_chip_writes() {
        let mut sink = CacheSink::new();
        sink.chip_write(ChipWrite {
            chip: Chip::Ym2151,
            port: 0,
            addr: 0x28,
            data: 0x4A,
        })
        .unwrap();
        sink.chip_write(ChipWrite {
            chip: Chip::Sn76489,
            port: 0,
            addr: 0,
            data: 0x9F,
        })
        .unwrap();
        assert_eq!(sink.finish(), vec![0x54, 0x28, 0x4A, 0x50, 0x9F, 0x66]);
    }

    #[test]
    fn test_cache_sink_wait_encoding() {
        let mut sink = CacheSink::new();
        sink.wait(735).unwrap();
        sink.wait(882).unwrap();
        sink.wait(3).unwrap();
        sink.wait(1000).unwrap();
        assert_eq!(sink.total_samples(), 735 + 882 + 3 + 1000);
        assert_eq!(
            sink.finish(),
            vec![0x62, 0x63, 0x72, 0x61, 0xE8, 0x03, 0x66]
        );
    }

    #[test]
    fn test_cache_sink_loop_mark_first_wins() {
        let mut sink = CacheSink::new();
        sink.wait(10).unwrap();
        sink.mark_loop();
        sink.wait(10).unwrap();
        sink.mark_loop();
        assert_eq!(sink.loop_mark(), Some(1));
    }

    #[test]
    fn test_transcoding_sink_drops_stray_target_writes() {
        let engine = Transcoder::for_source(Chip::Ay8910, 1_789_773).unwrap();
        let mut ts = TranscodingSink::new(engine, CollectSink::default());
        ts.chip_write(ChipWrite {
            chip: Chip::Ym2151,
            port: 0,
            addr: 0x08,
            data: 0x00,
        })
        .unwrap();
        assert!(ts.inner_mut().writes.is_empty());
    }

    #[test]
    fn test_transcoding_sink_translates_source_writes() {
        let engine = Transcoder::for_source(Chip::Ay8910, 1_789_773).unwrap();
        let mut ts = TranscodingSink::new(engine, CollectSink::default());
        ts.chip_write(ChipWrite {
            chip: Chip::Ay8910,
            port: 0,
            addr: 0x00,
            data: 0xCD,
        })
        .unwrap();
        assert!(!ts.inner_mut().writes.is_empty());
        assert!(
            ts.inner_mut()
                .writes
                .iter()
                .all(|w| w.chip == Chip::Ym2151)
        );
    }

    #[test]
    fn test_transcoding_sink_passes_other_chips() {
        let engine = Transcoder::for_source(Chip::Ay8910, 1_789_773).unwrap();
        let mut ts = TranscodingSink::new(engine, CollectSink::default());
        let w = ChipWrite {
            chip: Chip::Ym2413,
            port: 0,
            addr: 0x10,
            data: 0x20,
        };
        ts.chip_write(w).unwrap();
        assert_eq!(ts.inner_mut().writes, vec![w]);
    }
}
