//! Chip-to-chip register transcoders.
//!
//! Each transcoder holds a full shadow of its source chip's registers
//! and recomputes the target parameters on every write. This is
//! continuous re-synthesis of intent (pitch, volume, pan, key on/off),
//! not a one-shot conversion and never a translation of audio samples.
//! All supported sources currently target the YM2151; output leaves
//! through the [`OpmSink`] a caller supplies per call, so the same
//! engine drives live hardware and the cache builder alike.

pub mod ay_to_opm;
pub mod note;
pub mod opn_to_opm;
pub mod sn_to_ay;
pub mod ws_to_opm;

pub use ay_to_opm::{AyStereoMode, AyToOpm};
pub use opn_to_opm::{DEFAULT_LFO_AMPLITUDE, OpnToOpm};
pub use sn_to_ay::SnToAy;
pub use ws_to_opm::WsToOpm;

use crate::chip::Chip;
use crate::error::Result;
use crate::sink::ChipWrite;

/// Destination for transcoded YM2151 register writes.
pub trait OpmSink {
    fn opm_write(&mut self, addr: u8, data: u8) -> Result<()>;
}

/// User-tunable transcoding parameters.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeOptions {
    /// Stereo channel assignment for PSG sources.
    pub ay_stereo: AyStereoMode,
    /// LFO amplitude scale for OPN sources.
    pub lfo_amplitude: f64,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            ay_stereo: AyStereoMode::default(),
            lfo_amplitude: DEFAULT_LFO_AMPLITUDE,
        }
    }
}

/// A transcoding engine bound to one source chip.
#[derive(Debug, Clone)]
pub enum Transcoder {
    Ay(AyToOpm),
    Opn(OpnToOpm),
    Sn(SnToAy),
    Ws(WsToOpm),
}

impl Transcoder {
    /// Build the engine for `source`, or `None` when no transcoding
    /// path to the YM2151 exists for that chip.
    pub fn for_source(source: Chip, source_clock: u32) -> Option<Self> {
        match source {
            Chip::Ay8910 => Some(Transcoder::Ay(AyToOpm::new(source_clock))),
            Chip::Ym2612 | Chip::Ym2203 | Chip::Ym2608 => {
                Some(Transcoder::Opn(OpnToOpm::new(source, source_clock)))
            }
            Chip::Sn76489 => Some(Transcoder::Sn(SnToAy::new())),
            Chip::WonderSwan => Some(Transcoder::Ws(WsToOpm::new(source_clock))),
            _ => None,
        }
    }

    /// The chip whose writes this engine consumes.
    pub fn source(&self) -> Chip {
        match self {
            Transcoder::Ay(_) => Chip::Ay8910,
            Transcoder::Opn(t) => t.source_chip(),
            Transcoder::Sn(_) => Chip::Sn76489,
            Transcoder::Ws(_) => Chip::WonderSwan,
        }
    }

    /// Apply user-tunable parameters. Takes effect from the next
    /// [`init`](Transcoder::init) or register update.
    pub fn apply_options(&mut self, options: TranscodeOptions) {
        match self {
            Transcoder::Ay(t) => t.set_stereo(options.ay_stereo),
            Transcoder::Sn(t) => t.ay().set_stereo(options.ay_stereo),
            Transcoder::Opn(t) => t.set_lfo_amplitude(options.lfo_amplitude),
            Transcoder::Ws(_) => {}
        }
    }

    /// Emit the engine's initial target-chip setup.
    pub fn init(&mut self, out: &mut dyn OpmSink) -> Result<()> {
        match self {
            Transcoder::Ay(t) => t.init(out),
            Transcoder::Opn(t) => t.init(out),
            Transcoder::Sn(t) => t.init(out),
            Transcoder::Ws(t) => t.init(out),
        }
    }

    /// Feed one source-chip write through the engine.
    pub fn write(&mut self, w: &ChipWrite, out: &mut dyn OpmSink) -> Result<()> {
        match self {
            Transcoder::Ay(t) => t.write_reg(w.addr, w.data, out),
            Transcoder::Opn(t) => t.write_reg(w.addr, w.data, w.port, out),
            Transcoder::Sn(t) => t.write(w.data, out),
            Transcoder::Ws(t) => t.write_reg(w.addr, w.data, out),
        }
    }

    /// Advance engine-internal clocks by `samples`. The AY envelope is
    /// simulated per sample here; the WonderSwan engine tracks time for
    /// its key-on frequency delay.
    pub fn elapse(&mut self, samples: u32, out: &mut dyn OpmSink) -> Result<()> {
        match self {
            Transcoder::Ay(t) => t.elapse(samples, out),
            Transcoder::Sn(t) => t.elapse(samples, out),
            Transcoder::Ws(t) => {
                t.elapse(samples);
                Ok(())
            }
            Transcoder::Opn(_) => Ok(()),
        }
    }
}

/// Test sink collecting every OPM write.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct CollectOpm {
    pub writes: Vec<(u8, u8)>,
}

#[cfg(test)]
impl OpmSink for CollectOpm {
    fn opm_write(&mut self, addr: u8, data: u8) -> Result<()> {
        self.writes.push((addr, data));
        Ok(())
    }
}
