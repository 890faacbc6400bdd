//! AY-3-8910 PSG to YM2151 transcoder.
//!
//! The three tone channels land on OPM voices 4, 5 and 6 and the shared
//! noise generator on voice 7. The transcoder shadows all sixteen PSG
//! registers and recomputes the affected OPM parameters on every write.
//! The hardware envelope generator has no OPM counterpart, so it is
//! simulated sample by sample: as a volume curve normally, and as an
//! audible waveform driving the voice frequency when its period is
//! short enough to reach pitch range.

use super::OpmSink;
use super::note::freq_to_opm_note;
use crate::chip::Chip;
use crate::error::Result;

/// First OPM voice used for PSG tone channels.
const OPM_CH_BASE: u8 = 4;

/// OPM voice carrying the shared noise generator.
const OPM_NOISE_CH: u8 = 7;

/// PSG volume (0..15) to OPM total level for tone voices.
const VOL_TO_TL: [u8; 16] = [127, 62, 56, 52, 46, 42, 36, 32, 28, 24, 20, 16, 12, 8, 4, 0];

/// PSG volume (0..15) to OPM total level for the noise slot.
const N_VOL_TO_TL: [u8; 16] = [
    127, 126, 125, 124, 123, 122, 121, 120, 116, 112, 105, 96, 82, 64, 37, 0,
];

const OPM_PAN_LEFT: u8 = 0x40;
const OPM_PAN_RIGHT: u8 = 0x80;
const OPM_PAN_CENTER: u8 = 0xC0;

/// Envelope periods below this many ticks are audible as pitch and
/// drive the voice frequency instead of its volume.
const ENVELOPE_PITCH_THRESHOLD: i32 = 200;

/// Stereo channel assignment for the three PSG channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AyStereoMode {
    /// A left, B center, C right.
    #[default]
    Abc,
    /// A left, C center, B right.
    Acb,
    /// B left, A center, C right.
    Bac,
    /// Everything center.
    Mono,
}

impl AyStereoMode {
    pub fn name(self) -> &'static str {
        match self {
            AyStereoMode::Abc => "ABC",
            AyStereoMode::Acb => "ACB",
            AyStereoMode::Bac => "BAC",
            AyStereoMode::Mono => "Mono",
        }
    }

    /// Pan byte per PSG channel A, B, C under this mode.
    fn pan_map(self) -> [u8; 3] {
        match self {
            AyStereoMode::Abc => [OPM_PAN_LEFT, OPM_PAN_CENTER, OPM_PAN_RIGHT],
            AyStereoMode::Acb => [OPM_PAN_LEFT, OPM_PAN_RIGHT, OPM_PAN_CENTER],
            AyStereoMode::Bac => [OPM_PAN_CENTER, OPM_PAN_LEFT, OPM_PAN_RIGHT],
            AyStereoMode::Mono => [OPM_PAN_CENTER, OPM_PAN_CENTER, OPM_PAN_CENTER],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopeStep {
    SlideUp,
    SlideDown,
    HoldBottom,
    HoldTop,
}

use EnvelopeStep::{HoldBottom, HoldTop, SlideDown, SlideUp};

/// Two-segment behavior of the sixteen hardware envelope shapes.
const ENVELOPE_SHAPES: [[EnvelopeStep; 2]; 16] = [
    [SlideDown, HoldBottom],
    [SlideDown, HoldBottom],
    [SlideDown, HoldBottom],
    [SlideDown, HoldBottom],
    [SlideUp, HoldBottom],
    [SlideUp, HoldBottom],
    [SlideUp, HoldBottom],
    [SlideUp, HoldBottom],
    [SlideDown, SlideDown],
    [SlideDown, HoldBottom],
    [SlideDown, SlideUp],
    [SlideDown, HoldTop],
    [SlideUp, SlideUp],
    [SlideUp, HoldTop],
    [SlideUp, SlideDown],
    [SlideUp, HoldBottom],
];

/// Shapes that repeat on their own; every other shape is one-shot and
/// must be re-triggered on key-on and note changes.
fn shape_repeats(shape: usize) -> bool {
    matches!(shape, 8 | 10 | 12 | 14)
}

/// AY-3-8910 to YM2151 transcoder state.
#[derive(Debug, Clone)]
pub struct AyToOpm {
    regs: [u8; 16],
    source_clock: f64,
    clock_ratio: f64,
    stereo: AyStereoMode,
    env_counter: i32,
    env_period: i32,
    env_shape: usize,
    env_segment: usize,
    env_value: i32,
}

impl AyToOpm {
    pub fn new(source_clock: u32) -> Self {
        let opm_clock = Chip::Ym2151.default_clock() as f64;
        Self {
            regs: [0; 16],
            source_clock: source_clock as f64,
            clock_ratio: source_clock as f64 / opm_clock,
            stereo: AyStereoMode::default(),
            env_counter: 0,
            env_period: 1,
            env_shape: 0,
            env_segment: 0,
            env_value: 0,
        }
    }

    pub fn stereo_mode(&self) -> AyStereoMode {
        self.stereo
    }

    /// Current shadowed value of a PSG register.
    pub fn register(&self, addr: u8) -> u8 {
        self.regs.get(addr as usize).copied().unwrap_or(0)
    }

    /// Set the stereo assignment without emitting writes; it takes
    /// effect at the next init or panning update.
    pub fn set_stereo(&mut self, mode: AyStereoMode) {
        self.stereo = mode;
    }

    /// Emit the initial voice setup: panning per the stereo mode, the
    /// fixed two-operator patch on voices 4..6, the noise patch on
    /// voice 7, and the initial key-ons. Audibility is controlled by
    /// total level from here on.
    pub fn init(&mut self, out: &mut dyn OpmSink) -> Result<()> {
        self.set_stereo_mode(self.stereo, out)?;

        for ch in 0..3u8 {
            let opm_ch = OPM_CH_BASE + ch;
            out.opm_write(0x40 + opm_ch, 0x02)?; // M1 DT=0 ML=2
            out.opm_write(0x50 + opm_ch, 0x01)?; // C1 DT=0 ML=1
            out.opm_write(0x60 + opm_ch, 0x1B)?; // M1 TL=27
            out.opm_write(0x70 + opm_ch, 0x7F)?; // C1 TL=127, muted
            out.opm_write(0x80 + opm_ch, 0x1F)?; // M1 AR=31
            out.opm_write(0x90 + opm_ch, 0x1F)?; // C1 AR=31
            out.opm_write(0xA0 + opm_ch, 0x00)?;
            out.opm_write(0xB0 + opm_ch, 0x00)?;
            out.opm_write(0xC0 + opm_ch, 0x00)?;
            out.opm_write(0xD0 + opm_ch, 0x00)?;
            out.opm_write(0xE0 + opm_ch, 0x00)?;
            out.opm_write(0xF0 + opm_ch, 0x00)?;
            out.opm_write(0x08, (0xF << 3) | opm_ch)?; // key on all slots
        }

        out.opm_write(0x20 + OPM_NOISE_CH, 0xFC)?; // RL on, FB=7, CON=4
        out.opm_write(0x58 + OPM_NOISE_CH, 0x00)?; // C2 DT=0 ML=0
        out.opm_write(0x78 + OPM_NOISE_CH, 0x7F)?; // C2 TL=127, muted
        out.opm_write(0x98 + OPM_NOISE_CH, 0x1F)?; // C2 AR=31
        out.opm_write(0xB8 + OPM_NOISE_CH, 0x00)?;
        out.opm_write(0xD8 + OPM_NOISE_CH, 0x00)?;
        out.opm_write(0xF8 + OPM_NOISE_CH, 0x00)?;
        out.opm_write(0x08, (0x8 << 3) | OPM_NOISE_CH)?; // noise slot only

        Ok(())
    }

    /// Apply one shadowed PSG register write and re-emit the affected
    /// OPM parameters.
    pub fn write_reg(&mut self, addr: u8, data: u8, out: &mut dyn OpmSink) -> Result<()> {
        if addr > 15 {
            return Ok(());
        }

        let old_data = self.regs[addr as usize];
        self.regs[addr as usize] = data;

        match addr {
            0..=5 => {
                // Tone period. Updating volume here too keeps fast
                // arpeggios from dropping notes, and one-shot envelopes
                // re-trigger on the note change.
                let ch = (addr >> 1) as usize;
                self.recalculate_freq(ch, out)?;
                self.update_tone(ch, out)?;
                if self.regs[8 + ch] & 0x10 != 0 && !shape_repeats(self.env_shape) {
                    self.env_counter = 0;
                    self.env_segment = 0;
                    self.reset_envelope_segment();
                }
            }
            6 => self.update_noise(out)?,
            7 => {
                for ch in 0..3usize {
                    let old_tone_on = (old_data >> ch) & 1 == 0;
                    let new_tone_on = (data >> ch) & 1 == 0;
                    let opm_ch = OPM_CH_BASE + ch as u8;

                    if new_tone_on && !old_tone_on {
                        // Mixer enable is a real key-on, not merely a
                        // volume change; fast arpeggios drop notes
                        // otherwise.
                        self.recalculate_freq(ch, out)?;
                        self.update_tone(ch, out)?;
                        out.opm_write(0x08, (0xF << 3) | opm_ch)?;
                        if self.regs[8 + ch] & 0x10 != 0 && !shape_repeats(self.env_shape) {
                            self.env_counter = 0;
                            self.env_segment = 0;
                            self.reset_envelope_segment();
                        }
                    } else if !new_tone_on && old_tone_on {
                        out.opm_write(0x08, opm_ch)?;
                    }
                }
                self.update_tone(0, out)?;
                self.update_tone(1, out)?;
                self.update_tone(2, out)?;
                self.update_noise(out)?;
            }
            8..=10 => {
                let ch = (addr - 8) as usize;
                self.update_tone(ch, out)?;
                // Envelope-as-waveform status may have changed with the
                // mode bit.
                self.recalculate_freq(ch, out)?;
                self.update_noise(out)?;
            }
            11 | 12 => {
                self.env_period =
                    (((self.regs[12] as i32) << 8) | self.regs[11] as i32).max(1);
                self.recalculate_freq(0, out)?;
                self.recalculate_freq(1, out)?;
                self.recalculate_freq(2, out)?;
            }
            13 => {
                self.env_shape = (data & 0x0F) as usize;
                self.env_counter = 0;
                self.env_segment = 0;
                self.reset_envelope_segment();
                self.recalculate_freq(0, out)?;
                self.recalculate_freq(1, out)?;
                self.recalculate_freq(2, out)?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Advance the envelope simulation by `samples` ticks.
    pub fn elapse(&mut self, samples: u32, out: &mut dyn OpmSink) -> Result<()> {
        for _ in 0..samples {
            self.update_envelope(out)?;
        }
        Ok(())
    }

    /// Switch the stereo assignment and re-emit panning for the tone
    /// voices and the noise voice.
    pub fn set_stereo_mode(&mut self, mode: AyStereoMode, out: &mut dyn OpmSink) -> Result<()> {
        self.stereo = mode;
        let pan = mode.pan_map();
        for ch in 0..3u8 {
            let opm_ch = OPM_CH_BASE + ch;
            out.opm_write(0x20 + opm_ch, (pan[ch as usize] & 0xC0) | 0x3C)?;
        }
        self.update_noise(out)
    }

    fn update_envelope(&mut self, out: &mut dyn OpmSink) -> Result<()> {
        self.env_counter += 1;
        if self.env_counter < self.env_period {
            return Ok(());
        }
        self.env_counter = 0;
        match ENVELOPE_SHAPES[self.env_shape][self.env_segment] {
            SlideUp => {
                self.env_value += 1;
                if self.env_value > 31 {
                    self.env_segment ^= 1;
                    self.reset_envelope_segment();
                }
            }
            SlideDown => {
                self.env_value -= 1;
                if self.env_value < 0 {
                    self.env_segment ^= 1;
                    self.reset_envelope_segment();
                }
            }
            HoldTop | HoldBottom => {}
        }
        for ch in 0..3usize {
            if self.regs[8 + ch] & 0x10 != 0 {
                self.update_tone(ch, out)?;
            }
        }
        Ok(())
    }

    fn reset_envelope_segment(&mut self) {
        match ENVELOPE_SHAPES[self.env_shape][self.env_segment] {
            SlideDown | HoldTop => self.env_value = 31,
            SlideUp | HoldBottom => self.env_value = 0,
        }
    }

    /// Step count of one envelope cycle when the shape repeats; zero
    /// for one-shot shapes, which never act as a waveform.
    fn envelope_waveform_steps(&self) -> i32 {
        match self.env_shape {
            8 | 9 | 11 | 12 | 13 | 15 => 32,
            10 | 14 => 64,
            _ => 0,
        }
    }

    fn envelope_as_waveform(&self, ch: usize) -> bool {
        self.regs[8 + ch] & 0x10 != 0 && self.env_period < ENVELOPE_PITCH_THRESHOLD
    }

    fn update_freq(&self, ch: usize, freq: f64, out: &mut dyn OpmSink) -> Result<()> {
        let (kc, kf) = freq_to_opm_note(freq, self.clock_ratio);
        let opm_ch = OPM_CH_BASE + ch as u8;
        out.opm_write(0x28 + opm_ch, kc)?;
        out.opm_write(0x30 + opm_ch, kf << 2)
    }

    fn recalculate_freq(&mut self, ch: usize, out: &mut dyn OpmSink) -> Result<()> {
        if self.envelope_as_waveform(ch) {
            let steps = self.envelope_waveform_steps();
            if steps > 0 {
                let freq =
                    self.source_clock / (16.0 * self.env_period as f64 * steps as f64);
                return self.update_freq(ch, freq, out);
            }
        }

        let tp = (((self.regs[ch * 2 + 1] & 0x0F) as u32) << 8) | self.regs[ch * 2] as u32;
        if tp == 0 {
            self.update_freq(ch, 0.0, out)
        } else {
            let freq = self.source_clock / (16.0 * tp as f64);
            self.update_freq(ch, freq, out)
        }
    }

    fn update_tone(&mut self, ch: usize, out: &mut dyn OpmSink) -> Result<()> {
        let v = self.regs[8 + ch];
        let tone_enabled = (1 << ch) & self.regs[7] == 0;
        let as_waveform = self.envelope_as_waveform(ch);
        let opm_ch = OPM_CH_BASE + ch as u8;

        if tone_enabled || as_waveform {
            let t_vol = if v & 0x10 != 0 {
                if as_waveform {
                    15
                } else {
                    (self.env_value >> 1) as u8
                }
            } else {
                v & 0x0F
            };
            out.opm_write(0x70 + opm_ch, VOL_TO_TL[(t_vol & 0x0F) as usize].min(127))
        } else {
            out.opm_write(0x70 + opm_ch, 0x7F)
        }
    }

    fn update_noise(&mut self, out: &mut dyn OpmSink) -> Result<()> {
        let pan_map = self.stereo.pan_map();
        let mut n_vol: u8 = 0;
        let mut on_left = false;
        let mut on_right = false;

        for ch in 0..3usize {
            if self.regs[7] & (0x8 << ch) == 0 {
                n_vol = n_vol.max(self.regs[8 + ch] & 0x0F);
                // The shared generator's position is the union of the
                // positions of every channel with noise enabled.
                let pan = pan_map[ch];
                if pan == OPM_PAN_LEFT || pan == OPM_PAN_CENTER {
                    on_left = true;
                }
                if pan == OPM_PAN_RIGHT || pan == OPM_PAN_CENTER {
                    on_right = true;
                }
            }
        }

        let noise_pan = match (on_left, on_right) {
            (true, true) => OPM_PAN_CENTER,
            (true, false) => OPM_PAN_LEFT,
            (false, true) => OPM_PAN_RIGHT,
            (false, false) => OPM_PAN_CENTER,
        };

        let n_freq = self.regs[6] & 0x1F;
        out.opm_write(0x0F, 0x80 | (0x1F - n_freq))?;
        out.opm_write(0x20 + OPM_NOISE_CH, (noise_pan & 0xC0) | 0x3C)?;
        out.opm_write(0x78 + OPM_NOISE_CH, N_VOL_TO_TL[n_vol as usize].min(127))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::CollectOpm;

    fn prepared(stereo: AyStereoMode) -> (AyToOpm, CollectOpm) {
        let mut t = AyToOpm::new(1_789_773);
        let mut out = CollectOpm::default();
        t.set_stereo_mode(stereo, &mut out).unwrap();
        t.init(&mut out).unwrap();
        out.writes.clear();
        (t, out)
    }

    #[test]
    fn test_tone_period_emits_key_code() {
        let (mut t, mut out) = prepared(AyStereoMode::Abc);
        t.write_reg(0x00, 0xCD, &mut out).unwrap();
        t.write_reg(0x01, 0x02, &mut out).unwrap();
        assert!(out.writes.iter().any(|&(a, _)| a == 0x28 + 4));
        assert!(out.writes.iter().any(|&(a, _)| a == 0x30 + 4));
    }

    #[test]
    fn test_mixer_enable_issues_key_on() {
        let (mut t, mut out) = prepared(AyStereoMode::Abc);
        t.write_reg(0x00, 0xCD, &mut out).unwrap();
        t.write_reg(0x01, 0x02, &mut out).unwrap();
        out.writes.clear();
        t.write_reg(0x07, 0b1111_1110, &mut out).unwrap();
        assert!(out.writes.contains(&(0x08, (0xF << 3) | 4)));
    }

    #[test]
    fn test_mixer_disable_issues_key_off() {
        let (mut t, mut out) = prepared(AyStereoMode::Abc);
        t.write_reg(0x07, 0b1111_1110, &mut out).unwrap();
        out.writes.clear();
        t.write_reg(0x07, 0b1111_1111, &mut out).unwrap();
        assert!(out.writes.contains(&(0x08, 4)));
    }

    #[test]
    fn test_short_envelope_period_drives_frequency() {
        let (mut t, mut out) = prepared(AyStereoMode::Abc);
        // Channel A in envelope mode, repeating sawtooth, short period.
        t.write_reg(0x0B, 50, &mut out).unwrap();
        t.write_reg(0x0C, 0, &mut out).unwrap();
        t.write_reg(0x0D, 8, &mut out).unwrap();
        t.write_reg(0x08, 0x10, &mut out).unwrap();
        out.writes.clear();
        t.write_reg(0x0B, 40, &mut out).unwrap();
        // Frequency updates arrive even with a zero tone period.
        assert!(out.writes.iter().any(|&(a, _)| a == 0x28 + 4));
    }

    #[test]
    fn test_envelope_volume_tracks_slide() {
        let (mut t, mut out) = prepared(AyStereoMode::Abc);
        // Long period so the envelope stays a volume curve: shape 13
        // slides up then holds top.
        t.write_reg(0x0B, 0x00, &mut out).unwrap();
        t.write_reg(0x0C, 0x01, &mut out).unwrap();
        t.write_reg(0x0D, 13, &mut out).unwrap();
        t.write_reg(0x08, 0x10, &mut out).unwrap();
        t.write_reg(0x07, 0b1111_1110, &mut out).unwrap();
        out.writes.clear();
        // One full envelope period elapses and the tone level follows.
        t.elapse(0x100, &mut out).unwrap();
        assert!(out.writes.iter().any(|&(a, _)| a == 0x70 + 4));
    }

    #[test]
    fn test_noise_pan_follows_enabled_channels() {
        let (mut t, mut out) = prepared(AyStereoMode::Abc);
        // Noise on channel A only; A pans left under ABC.
        t.write_reg(0x08, 0x0C, &mut out).unwrap();
        out.writes.clear();
        t.write_reg(0x07, 0b1111_0111, &mut out).unwrap();
        let pan_write = out
            .writes
            .iter()
            .rev()
            .find(|&&(a, _)| a == 0x20 + OPM_NOISE_CH)
            .copied()
            .unwrap();
        assert_eq!(pan_write.1 & 0xC0, OPM_PAN_LEFT);
    }

    #[test]
    fn test_noise_frequency_is_inverted() {
        let (mut t, mut out) = prepared(AyStereoMode::Abc);
        t.write_reg(0x06, 0x03, &mut out).unwrap();
        let nf = out
            .writes
            .iter()
            .rev()
            .find(|&&(a, _)| a == 0x0F)
            .copied()
            .unwrap();
        assert_eq!(nf.1, 0x80 | (0x1F - 0x03));
    }
}
