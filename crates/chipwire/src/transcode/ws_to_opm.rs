//! WonderSwan APU to YM2151 transcoder.
//!
//! The four WonderSwan channels land on OPM voices 4..7. Channel 3 can
//! be switched into a noise role, which moves it to the dedicated noise
//! slot of voice 7 with an 11-bit period bucketed down to the OPM's
//! 5-bit noise frequency. Tone channels carry a fixed pitch correction,
//! and an active note defers frequency updates for a short window after
//! key-on so the driver's pre-stabilization period writes do not read
//! as vibrato.

use super::OpmSink;
use super::note::freq_to_opm_note_biased;
use crate::chip::Chip;
use crate::error::Result;

const NUM_WS_CHANNELS: usize = 4;

/// First OPM voice used for WonderSwan channels.
const OPM_CH_BASE: u8 = 4;

/// OPM voice carrying channel 3 when it runs as noise.
const OPM_NOISE_CH: u8 = 7;

const OPM_PAN_LEFT: u8 = 0x40;
const OPM_PAN_RIGHT: u8 = 0x80;
const OPM_PAN_CENTER: u8 = 0xC0;

/// Fixed pitch correction in semitones: one octave down, two and a
/// half semitones up.
const PITCH_BIAS_SEMITONES: f64 = -9.5;

/// Frequency updates for an active note are held back this long after
/// key-on (100 ms of samples).
const FREQ_UPDATE_DELAY_SAMPLES: u32 = 4410;

/// Channel volume (0..15) to OPM total level for tones.
const VOL_TO_TL: [u8; 16] = [127, 40, 38, 36, 34, 32, 30, 28, 26, 24, 22, 20, 18, 17, 16, 15];

/// Channel volume (0..15) to OPM total level for the noise slot.
const NOISE_VOL_TO_TL: [u8; 16] = [
    127, 125, 122, 119, 116, 113, 110, 107, 104, 101, 98, 95, 92, 89, 86, 83,
];

#[derive(Debug, Clone, Copy, Default)]
struct WsChannel {
    period: u16,
    vol_left: u8,
    vol_right: u8,
    enabled: bool,
    active: bool,
    note_on_time: u32,
    last_kc: u8,
    last_kf: u8,
}

/// WonderSwan to YM2151 transcoder state.
#[derive(Debug, Clone)]
pub struct WsToOpm {
    channels: [WsChannel; NUM_WS_CHANNELS],
    regs: [u8; 0x20],
    total_samples: u32,
    clock_ratio: f64,
}

impl WsToOpm {
    pub fn new(source_clock: u32) -> Self {
        Self {
            channels: [WsChannel::default(); NUM_WS_CHANNELS],
            regs: [0; 0x20],
            total_samples: 0,
            clock_ratio: source_clock as f64 / Chip::Ym2151.default_clock() as f64,
        }
    }

    /// Emit the initial voice setup for the four tone voices and the
    /// noise slot.
    pub fn init(&mut self, out: &mut dyn OpmSink) -> Result<()> {
        for ch in 0..NUM_WS_CHANNELS {
            self.channels[ch].enabled = true;
            let opm_ch = OPM_CH_BASE + ch as u8;
            out.opm_write(0x20 + opm_ch, OPM_PAN_CENTER | 0x3C)?;
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
            out.opm_write(0xE0 + opm_ch, 0x0F)?; // M1 SL=0 RR=15
            out.opm_write(0xF0 + opm_ch, 0x0F)?; // C1 SL=0 RR=15
        }

        out.opm_write(0x20 + OPM_NOISE_CH, OPM_PAN_CENTER | 0x3C)?;
        out.opm_write(0x58 + OPM_NOISE_CH, 0x00)?;
        out.opm_write(0x78 + OPM_NOISE_CH, 0x7F)?;
        out.opm_write(0x98 + OPM_NOISE_CH, 0x1F)?;
        out.opm_write(0xB8 + OPM_NOISE_CH, 0x00)?;
        out.opm_write(0xD8 + OPM_NOISE_CH, 0x00)?;
        out.opm_write(0xF8 + OPM_NOISE_CH, 0x0F)?;
        out.opm_write(0x08, (0x8 << 3) | OPM_NOISE_CH)?;

        Ok(())
    }

    /// Advance the sample clock used for the key-on frequency delay.
    pub fn elapse(&mut self, samples: u32) {
        self.total_samples = self.total_samples.wrapping_add(samples);
    }

    /// Apply one shadowed APU register write (0x00..0x1F) and update
    /// the affected channel.
    pub fn write_reg(&mut self, addr: u8, data: u8, out: &mut dyn OpmSink) -> Result<()> {
        if addr > 0x1F {
            return Ok(());
        }
        self.regs[addr as usize] = data;

        match addr {
            0x00..=0x07 => {
                let ch = (addr / 2) as usize;
                let lo = self.regs[ch * 2] as u16;
                let hi = (self.regs[ch * 2 + 1] & 0x07) as u16;
                let period = (hi << 8) | lo;
                self.channels[ch].period = if period == 0x7FF { 2048 } else { period };
                self.update_channel(ch, out)?;
            }
            0x08..=0x0B => {
                let ch = (addr - 0x08) as usize;
                self.channels[ch].vol_right = data & 0x0F;
                self.channels[ch].vol_left = data >> 4;
                self.update_channel(ch, out)?;
            }
            0x0E => {
                // Noise control affects channel 3 when it runs as noise.
                self.update_channel(3, out)?;
            }
            0x10 => {
                for ch in 0..NUM_WS_CHANNELS {
                    self.channels[ch].enabled = data & (1 << ch) != 0;
                }
                // The same register selects channel 3's noise mode.
                self.update_channel(0, out)?;
                self.update_channel(1, out)?;
                self.update_channel(2, out)?;
                self.update_channel(3, out)?;
            }
            _ => {}
        }

        Ok(())
    }

    fn period_to_freq(period: u16) -> f64 {
        if period >= 2048 {
            return 0.0;
        }
        (3_072_000.0 / (2048.0 - period as f64)) / 32.0
    }

    /// Bucket an 11-bit channel period down to the OPM 5-bit noise
    /// frequency. Higher period means lower rate on both sides.
    fn noise_frequency(period: u16) -> u8 {
        match period {
            p if p > 1800 => 31,
            p if p > 1600 => 30,
            p if p > 1400 => 29,
            p if p > 1200 => 28,
            p if p > 1000 => 26,
            p if p > 800 => 24,
            p if p > 600 => 22,
            p if p > 400 => 18,
            p if p > 200 => 12,
            p if p > 100 => 6,
            _ => 2,
        }
    }

    fn pan_for(state: &WsChannel) -> u8 {
        if state.vol_left + state.vol_right > 0 {
            if state.vol_left == 0 {
                return OPM_PAN_RIGHT;
            }
            if state.vol_right == 0 {
                return OPM_PAN_LEFT;
            }
        }
        OPM_PAN_CENTER
    }

    fn update_channel(&mut self, ch: usize, out: &mut dyn OpmSink) -> Result<()> {
        let state = self.channels[ch];
        let is_noise_mode = ch == 3 && self.regs[0x10] & 0x80 != 0;
        let should_be_on = state.enabled && (state.vol_left > 0 || state.vol_right > 0);

        if is_noise_mode {
            // Channel 3 drives the dedicated noise slot; its tone half
            // is keyed off.
            out.opm_write(0x08, OPM_NOISE_CH)?;

            if should_be_on {
                let max_vol = state.vol_left.max(state.vol_right);
                let pan = Self::pan_for(&state);
                let tl = NOISE_VOL_TO_TL[(max_vol & 0x0F) as usize];

                out.opm_write(0x0F, 0x80 | Self::noise_frequency(state.period))?;
                out.opm_write(0x20 + OPM_NOISE_CH, pan | 0x3C)?;
                out.opm_write(0x78 + OPM_NOISE_CH, tl)?;
                out.opm_write(0x08, (0x8 << 3) | OPM_NOISE_CH)?;
            } else {
                out.opm_write(0x78 + OPM_NOISE_CH, 0x7F)?;
            }
            self.channels[ch].active = should_be_on;
            return Ok(());
        }

        let opm_ch = OPM_CH_BASE + ch as u8;

        if ch == 3 {
            // Leaving noise mode: make sure the noise slot is silent.
            out.opm_write(0x78 + OPM_NOISE_CH, 0x7F)?;
        }

        if should_be_on && !state.active {
            let freq = Self::period_to_freq(state.period);
            if freq == 0.0 {
                self.channels[ch].active = false;
                return Ok(());
            }
            let (kc, kf) = freq_to_opm_note_biased(freq, self.clock_ratio, PITCH_BIAS_SEMITONES);
            self.channels[ch].active = true;
            self.channels[ch].note_on_time = self.total_samples;
            self.channels[ch].last_kc = kc;
            self.channels[ch].last_kf = kf;

            out.opm_write(0x28 + opm_ch, kc)?;
            out.opm_write(0x30 + opm_ch, kf << 2)?;
            out.opm_write(0x20 + opm_ch, Self::pan_for(&state) | 0x3C)?;

            let max_vol = state.vol_left.max(state.vol_right);
            out.opm_write(0x70 + opm_ch, VOL_TO_TL[(max_vol & 0x0F) as usize])?;

            // Two-slot patch: key on M1 and C1 together.
            out.opm_write(0x08, (3 << 3) | opm_ch)?;
        } else if !should_be_on && state.active {
            self.channels[ch].active = false;
            out.opm_write(0x08, opm_ch)?;
        } else if should_be_on && state.active {
            if self.total_samples >= state.note_on_time.wrapping_add(FREQ_UPDATE_DELAY_SAMPLES) {
                let freq = Self::period_to_freq(state.period);
                if freq > 0.0 {
                    let (kc, kf) =
                        freq_to_opm_note_biased(freq, self.clock_ratio, PITCH_BIAS_SEMITONES);
                    if kc != state.last_kc || kf != state.last_kf {
                        self.channels[ch].last_kc = kc;
                        self.channels[ch].last_kf = kf;
                        out.opm_write(0x28 + opm_ch, kc)?;
                        out.opm_write(0x30 + opm_ch, kf << 2)?;
                    }
                }
            }

            out.opm_write(0x20 + opm_ch, Self::pan_for(&state) | 0x3C)?;
            let max_vol = state.vol_left.max(state.vol_right);
            out.opm_write(0x70 + opm_ch, VOL_TO_TL[(max_vol & 0x0F) as usize])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::CollectOpm;

    fn prepared() -> (WsToOpm, CollectOpm) {
        let mut t = WsToOpm::new(3_072_000);
        let mut out = CollectOpm::default();
        t.init(&mut out).unwrap();
        out.writes.clear();
        (t, out)
    }

    #[test]
    fn test_volume_write_keys_on_tone() {
        let (mut t, mut out) = prepared();
        t.write_reg(0x00, 0x80, &mut out).unwrap();
        t.write_reg(0x01, 0x07, &mut out).unwrap();
        out.writes.clear();
        t.write_reg(0x08, 0xFF, &mut out).unwrap();
        assert!(out.writes.contains(&(0x08, (3 << 3) | 4)));
    }

    #[test]
    fn test_zero_volume_keys_off() {
        let (mut t, mut out) = prepared();
        t.write_reg(0x00, 0x80, &mut out).unwrap();
        t.write_reg(0x01, 0x07, &mut out).unwrap();
        t.write_reg(0x08, 0xFF, &mut out).unwrap();
        out.writes.clear();
        t.write_reg(0x08, 0x00, &mut out).unwrap();
        assert!(out.writes.contains(&(0x08, 4)));
    }

    #[test]
    fn test_frequency_update_deferred_after_key_on() {
        let (mut t, mut out) = prepared();
        t.write_reg(0x00, 0x80, &mut out).unwrap();
        t.write_reg(0x01, 0x07, &mut out).unwrap();
        t.write_reg(0x08, 0xFF, &mut out).unwrap();
        out.writes.clear();

        // Within the delay window a period write changes no key code.
        t.elapse(100);
        t.write_reg(0x00, 0x90, &mut out).unwrap();
        assert!(!out.writes.iter().any(|&(a, _)| a == 0x28 + 4));

        // After the window the update goes through.
        t.elapse(FREQ_UPDATE_DELAY_SAMPLES);
        t.write_reg(0x00, 0xA0, &mut out).unwrap();
        assert!(out.writes.iter().any(|&(a, _)| a == 0x28 + 4));
    }

    #[test]
    fn test_channel3_noise_mode_uses_noise_slot() {
        let (mut t, mut out) = prepared();
        // Noise mode on, all channels enabled.
        t.write_reg(0x10, 0x8F, &mut out).unwrap();
        t.write_reg(0x06, 0x00, &mut out).unwrap();
        t.write_reg(0x07, 0x07, &mut out).unwrap();
        out.writes.clear();
        t.write_reg(0x0B, 0x55, &mut out).unwrap();
        assert!(out.writes.contains(&(0x08, (0x8 << 3) | OPM_NOISE_CH)));
        assert!(out.writes.iter().any(|&(a, d)| a == 0x0F && d & 0x80 != 0));
    }

    #[test]
    fn test_noise_period_buckets() {
        assert_eq!(WsToOpm::noise_frequency(2000), 31);
        assert_eq!(WsToOpm::noise_frequency(1500), 29);
        assert_eq!(WsToOpm::noise_frequency(900), 24);
        assert_eq!(WsToOpm::noise_frequency(150), 6);
        assert_eq!(WsToOpm::noise_frequency(50), 2);
    }

    #[test]
    fn test_stereo_pan_from_volume_nibbles() {
        let (mut t, mut out) = prepared();
        t.write_reg(0x00, 0x80, &mut out).unwrap();
        t.write_reg(0x01, 0x07, &mut out).unwrap();
        // Left nibble only: pan hard left.
        t.write_reg(0x08, 0xF0, &mut out).unwrap();
        let pan = out
            .writes
            .iter()
            .rev()
            .find(|&&(a, _)| a == 0x20 + 4)
            .copied()
            .unwrap();
        assert_eq!(pan.1 & 0xC0, OPM_PAN_LEFT);
    }
}
