//! OPN family (YM2612, YM2203, YM2608) to YM2151 transcoder.
//!
//! Both chip families are four-operator FM, so per-operator parameters
//! copy across with address remapping. Channels 0..2 of port 0 and
//! 0..2 of port 1 land on OPM voices 0..5; the reserved fourth channel
//! slot of the six-channel parts is skipped. Frequency moves from the
//! OPN f-number/block pair to the OPM key-code/fraction pair, and the
//! per-channel L/R bits are cached so they can be repacked into the OPM
//! register that combines them with feedback and connection.

use super::OpmSink;
use super::note::freq_to_opm_note;
use crate::chip::Chip;
use crate::error::Result;

/// Default scale applied to the PMS depth when repacking AMS/PMS.
pub const DEFAULT_LFO_AMPLITUDE: f64 = 0.90;

/// OPN LFO rate nibble to OPM LFO frequency register value.
const LFO_LUT: [u8; 16] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0xC1, 0xC7, 0xC9, 0xCB, 0xCD, 0xD4, 0xF9, 0xFF,
];

/// OPN family to YM2151 transcoder state.
#[derive(Debug, Clone)]
pub struct OpnToOpm {
    regs: [[u8; 256]; 2],
    source: Chip,
    source_clock: f64,
    clock_ratio: f64,
    clock_div: f64,
    lr_cache: [u8; 8],
    lfo_amplitude: f64,
}

impl OpnToOpm {
    pub fn new(source: Chip, source_clock: u32) -> Self {
        let opm_clock = 3_579_545.0;
        Self {
            regs: [[0; 256]; 2],
            source,
            source_clock: source_clock as f64,
            clock_ratio: opm_clock / Chip::Ym2151.default_clock() as f64,
            clock_div: if source == Chip::Ym2203 { 1.0 } else { 2.0 },
            lr_cache: [3; 8],
            lfo_amplitude: DEFAULT_LFO_AMPLITUDE,
        }
    }

    /// The OPN variant this engine was built for.
    pub fn source_chip(&self) -> Chip {
        self.source
    }

    /// Scale factor applied to the PMS depth, tunable at runtime.
    pub fn set_lfo_amplitude(&mut self, amplitude: f64) {
        self.lfo_amplitude = amplitude.clamp(0.0, 1.0);
    }

    pub fn lfo_amplitude(&self) -> f64 {
        self.lfo_amplitude
    }

    /// Emit the fixed LFO setup: rescaled AMD/PMD and a triangle wave.
    pub fn init(&mut self, out: &mut dyn OpmSink) -> Result<()> {
        out.opm_write(0x19, 0x10)?; // AMD
        out.opm_write(0x19, 0xA8)?; // PMD
        out.opm_write(0x1B, 0x02)?; // triangle LFO waveform
        Ok(())
    }

    /// Apply one shadowed OPN register write for `port` and emit the
    /// remapped OPM writes.
    pub fn write_reg(&mut self, addr: u8, data: u8, port: u8, out: &mut dyn OpmSink) -> Result<()> {
        if port > 1 {
            return Ok(());
        }
        self.regs[port as usize][addr as usize] = data;

        if port == 0 {
            if addr == 0x22 && self.source != Chip::Ym2203 {
                out.opm_write(0x18, LFO_LUT[(data & 0x0F) as usize])?;
            } else if addr == 0x28 {
                // Key on/off: OPN channels 0,1,2,4,5,6 map onto OPM
                // voices 0..5.
                let opn_ch = data & 0x07;
                if opn_ch == 3 || opn_ch > 6 {
                    return Ok(());
                }
                let opm_ch = if opn_ch < 3 { opn_ch } else { opn_ch - 1 };
                let slots = (data & 0xF0) >> 4;
                out.opm_write(0x08, (slots << 3) | opm_ch)?;
            }
        }

        if (0x30..=0x8F).contains(&addr) {
            let nch = addr & 3;
            if !(port == 0 && nch == 3) {
                let ch = if port == 0 { 0 } else { 3 } + nch;
                let slot = (addr >> 2) & 3;
                let base = 0x40 + ((addr & 0xF0) - 0x30) * 2;
                out.opm_write(base + slot * 8 + ch, data)?;
            }
        }

        if (0xB0..=0xB2).contains(&addr) {
            let nch = addr & 3;
            let ch = if port == 0 { 0 } else { 3 } + nch;
            out.opm_write(0x20 + ch, (self.rl_flags(ch) << 6) | (data & 0x3F))?;
        }

        if (0xB4..=0xB6).contains(&addr) {
            let nch = addr & 3;
            let ch = if port == 0 { 0 } else { 3 } + nch;
            self.lr_cache[ch as usize] = (data >> 6) & 0x3;
            let ams = (data >> 4) & 0x3;
            let pms = data & 0x7;

            let scaled_pms = ((pms as f64 * self.lfo_amplitude) as u8).min(7);
            out.opm_write(0x38 + ch, (scaled_pms << 4) | ams)?;
            out.opm_write(
                0x20 + ch,
                (self.rl_flags(ch) << 6) | (self.regs[port as usize][0xB0 + nch as usize] & 0x3F),
            )?;
        }

        if (0xA0..=0xA2).contains(&addr) || (0xA4..=0xA6).contains(&addr) {
            let nch = addr & 3;
            let ch = if port == 0 { 0 } else { 3 } + nch;
            let al = self.regs[port as usize][0xA0 + nch as usize] as u16;
            let ah = self.regs[port as usize][0xA4 + nch as usize] as u16;
            let fnum = (((ah & 7) << 8) | al) >> 2;
            let blk = ((ah >> 3) & 7) as u8;
            let (kc, kf) = self.opn_freq_to_opm_key(fnum, blk);
            out.opm_write(0x28 + ch, kc)?;
            out.opm_write(0x30 + ch, kf << 2)?;
        }

        Ok(())
    }

    fn rl_flags(&self, ch: u8) -> u8 {
        if self.source == Chip::Ym2203 {
            // The YM2203 is mono; both outputs stay on.
            return 3;
        }
        let lr = self.lr_cache[ch as usize];
        ((lr & 1) << 1) | ((lr >> 1) & 1)
    }

    fn fnum_to_freq(&self, fnum: u16, blk: u8) -> f64 {
        (self.source_clock * fnum as f64)
            / ((72.0 * self.clock_div) * (1u32 << (20 - blk as u32)) as f64)
    }

    fn opn_freq_to_opm_key(&self, fnum: u16, blk: u8) -> (u8, u8) {
        freq_to_opm_note(self.fnum_to_freq(fnum, blk), self.clock_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::CollectOpm;

    #[test]
    fn test_operator_write_remaps_address() {
        let mut t = OpnToOpm::new(Chip::Ym2612, 7_670_454);
        let mut out = CollectOpm::default();
        // TL of operator 0, channel 0: OPN 0x40 -> OPM 0x60.
        t.write_reg(0x40, 0x23, 0, &mut out).unwrap();
        assert_eq!(out.writes, vec![(0x60, 0x23)]);
    }

    #[test]
    fn test_port1_channels_shift_up() {
        let mut t = OpnToOpm::new(Chip::Ym2612, 7_670_454);
        let mut out = CollectOpm::default();
        // Channel 1 of port 1 is voice 4.
        t.write_reg(0x41, 0x55, 1, &mut out).unwrap();
        assert_eq!(out.writes, vec![(0x60 + 4, 0x55)]);
    }

    #[test]
    fn test_reserved_channel_slot_skipped() {
        let mut t = OpnToOpm::new(Chip::Ym2612, 7_670_454);
        let mut out = CollectOpm::default();
        t.write_reg(0x43, 0x11, 0, &mut out).unwrap();
        assert!(out.writes.is_empty());
    }

    #[test]
    fn test_key_on_channel_remap() {
        let mut t = OpnToOpm::new(Chip::Ym2612, 7_670_454);
        let mut out = CollectOpm::default();
        // OPN channel 4 becomes OPM voice 3.
        t.write_reg(0x28, 0xF4, 0, &mut out).unwrap();
        assert_eq!(out.writes, vec![(0x08, (0xF << 3) | 3)]);
        out.writes.clear();
        // Channel 3 is reserved and ignored.
        t.write_reg(0x28, 0xF3, 0, &mut out).unwrap();
        assert!(out.writes.is_empty());
    }

    #[test]
    fn test_ym2203_always_carries_both_outputs() {
        let mut t = OpnToOpm::new(Chip::Ym2203, 4_000_000);
        let mut out = CollectOpm::default();
        t.write_reg(0xB0, 0x3A, 0, &mut out).unwrap();
        assert_eq!(out.writes, vec![(0x20, (3 << 6) | 0x3A)]);
    }

    #[test]
    fn test_lr_cache_repacks_into_fb_con() {
        let mut t = OpnToOpm::new(Chip::Ym2612, 7_670_454);
        let mut out = CollectOpm::default();
        t.write_reg(0xB0, 0x3A, 0, &mut out).unwrap();
        out.writes.clear();
        // Left only on channel 0: OPN L is bit 7, OPM swaps the pair.
        t.write_reg(0xB4, 0x80, 0, &mut out).unwrap();
        let fb_con = out.writes.iter().find(|&&(a, _)| a == 0x20).unwrap();
        assert_eq!(fb_con.1, (1 << 6) | 0x3A);
    }

    #[test]
    fn test_frequency_write_emits_key_pair() {
        let mut t = OpnToOpm::new(Chip::Ym2612, 7_670_454);
        let mut out = CollectOpm::default();
        t.write_reg(0xA4, 0x22, 0, &mut out).unwrap();
        out.writes.clear();
        t.write_reg(0xA0, 0x69, 0, &mut out).unwrap();
        assert_eq!(out.writes.len(), 2);
        assert_eq!(out.writes[0].0, 0x28);
        assert_eq!(out.writes[1].0, 0x30);
    }

    #[test]
    fn test_lfo_rate_goes_through_lut() {
        let mut t = OpnToOpm::new(Chip::Ym2612, 7_670_454);
        let mut out = CollectOpm::default();
        t.write_reg(0x22, 0x0F, 0, &mut out).unwrap();
        assert_eq!(out.writes, vec![(0x18, 0xFF)]);
        out.writes.clear();
        // The YM2203 has no LFO; nothing is emitted.
        let mut t2 = OpnToOpm::new(Chip::Ym2203, 4_000_000);
        t2.write_reg(0x22, 0x0F, 0, &mut out).unwrap();
        assert!(out.writes.is_empty());
    }
}
