//! VGM header parsing.
//!
//! The VGM main header is versioned: the base header is 0x40 bytes, and
//! versions 1.01, 1.51, 1.61, 1.70 and 1.71 extend it to 0x80, 0xB8,
//! 0xC0 and 0xE4 bytes. Each field is read only when the header version
//! introduced it and when it lies inside the region the data offset
//! leaves to the header; everything else stays zero. Offsets stored in
//! the header are relative to their own field position with zero meaning
//! "absent" and are resolved to absolute positions at parse time.

use crate::binutil::{
    read_rel_offset_at, read_slice, read_u8_at, read_u16_le_at, read_u32_le_at,
};
use crate::chip::Chip;
use crate::error::{PlayerError, Result};

/// Sample rate every VGM wait command is expressed in.
pub const VGM_SAMPLE_RATE: u32 = 44100;

/// Default sample count of the `0x62` one-frame wait (1/60 s).
pub const VGM_DEFAULT_WAIT1: u32 = 735;

/// Default sample count of the `0x63` one-frame wait (1/50 s).
pub const VGM_DEFAULT_WAIT2: u32 = 882;

/// Parsed VGM header with the fields the player consumes.
///
/// `gd3_offset`, `loop_offset` and `data_offset` are stored resolved to
/// absolute file positions; zero means the block is absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VgmHeader {
    pub version: u32,
    pub eof_offset: u32,
    pub gd3_offset: u32,
    pub total_samples: u32,
    pub loop_offset: u32,
    pub loop_samples: u32,
    pub rate: u32,
    pub data_offset: u32,
    pub sn76489_clock: u32,
    pub sn76489_feedback: u16,
    pub sn76489_shift_width: u8,
    pub sn76489_flags: u8,
    pub ym2413_clock: u32,
    pub ym2612_clock: u32,
    pub ym2151_clock: u32,
    pub ym2203_clock: u32,
    pub ym2608_clock: u32,
    pub ay8910_clock: u32,
    pub wonderswan_clock: u32,
}

impl VgmHeader {
    /// Header length in bytes defined by `version`.
    pub(crate) fn header_len_for_version(version: u32) -> usize {
        if version >= 0x171 {
            0xE4
        } else if version >= 0x170 {
            0xC0
        } else if version >= 0x161 {
            0xB8
        } else if version >= 0x151 {
            0x80
        } else {
            0x40
        }
    }

    /// The chip the log was recorded for, chosen from the clock fields
    /// in the priority order the original player uses. `None` when no
    /// known clock is set.
    pub fn primary_chip(&self) -> Option<Chip> {
        if self.ym2608_clock != 0 {
            Some(Chip::Ym2608)
        } else if self.ym2612_clock != 0 {
            Some(Chip::Ym2612)
        } else if self.ym2203_clock != 0 {
            Some(Chip::Ym2203)
        } else if self.ym2151_clock != 0 {
            Some(Chip::Ym2151)
        } else if self.ay8910_clock != 0 {
            Some(Chip::Ay8910)
        } else if self.sn76489_clock != 0 {
            Some(Chip::Sn76489)
        } else if self.wonderswan_clock != 0 {
            Some(Chip::WonderSwan)
        } else if self.ym2413_clock != 0 {
            Some(Chip::Ym2413)
        } else {
            None
        }
    }

    /// The stored clock for `chip`, falling back to the chip's default
    /// when the header carries none. The dual-chip bit is masked off.
    pub fn clock_for(&self, chip: Chip) -> u32 {
        let stored = match chip {
            Chip::Sn76489 => self.sn76489_clock,
            Chip::Ym2413 => self.ym2413_clock,
            Chip::Ym2612 => self.ym2612_clock,
            Chip::Ym2151 => self.ym2151_clock,
            Chip::Ym2203 => self.ym2203_clock,
            Chip::Ym2608 => self.ym2608_clock,
            Chip::Ay8910 => self.ay8910_clock,
            Chip::WonderSwan => self.wonderswan_clock,
            _ => 0,
        } & 0x3FFF_FFFF;
        if stored == 0 { chip.default_clock() } else { stored }
    }
}

/// Parse a VGM header located at the start of `bytes`.
///
/// Returns the parsed header and the absolute position where the
/// command stream begins. Fails with a format error on bad magic, a
/// short initial read, or a data offset that resolves in front of the
/// base header.
pub fn parse_vgm_header(bytes: &[u8]) -> Result<(VgmHeader, usize)> {
    if bytes.len() < 0x40 {
        return Err(PlayerError::Truncated {
            offset: 0,
            needed: 0x40,
            available: bytes.len(),
        });
    }

    let ident = read_slice(bytes, 0x00, 4)?;
    if ident != b"Vgm " {
        let mut id: [u8; 4] = [0; 4];
        id.copy_from_slice(ident);
        return Err(PlayerError::BadMagic {
            expected: "Vgm ",
            found: id,
        });
    }

    let version = read_u32_le_at(bytes, 0x08)?;
    let header_len = VgmHeader::header_len_for_version(version);

    // The data_offset field exists from 1.50 on; earlier versions start
    // the command stream right after the 0x40-byte header.
    let data_start = if version >= 0x150 {
        match read_rel_offset_at(bytes, 0x34)? {
            0 => 0x40,
            abs => abs as usize,
        }
    } else {
        0x40
    };
    if data_start < 0x40 {
        return Err(PlayerError::InvalidOffset {
            what: "vgm data",
            offset: data_start,
        });
    }

    // A field is readable when this version defines it and it does not
    // overlap the command stream region.
    let limit = header_len.min(data_start);
    let should_read =
        |off: usize, sz: usize, min_ver: u32| -> bool { version >= min_ver && off + sz <= limit };

    let mut h = VgmHeader {
        version,
        eof_offset: read_u32_le_at(bytes, 0x04)?,
        gd3_offset: read_rel_offset_at(bytes, 0x14)?,
        total_samples: read_u32_le_at(bytes, 0x18)?,
        loop_offset: read_rel_offset_at(bytes, 0x1C)?,
        loop_samples: read_u32_le_at(bytes, 0x20)?,
        data_offset: data_start as u32,
        sn76489_clock: read_u32_le_at(bytes, 0x0C)?,
        ym2413_clock: read_u32_le_at(bytes, 0x10)?,
        ..Default::default()
    };

    {
        h.rate                = if should_read(0x24, 4, 0x101) { read_u32_le_at(bytes, 0x24)? } else { 0 };
        h.sn76489_feedback    = if should_read(0x28, 2, 0x110) { read_u16_le_at(bytes, 0x28)? } else { 0 };
        h.sn76489_shift_width = if should_read(0x2A, 1, 0x110) { read_u8_at(bytes, 0x2A)? } else { 0 };
        h.sn76489_flags       = if should_read(0x2B, 1, 0x151) { read_u8_at(bytes, 0x2B)? } else { 0 };
        h.ym2612_clock        = if should_read(0x2C, 4, 0x110) { read_u32_le_at(bytes, 0x2C)? } else { 0 };
        h.ym2151_clock        = if should_read(0x30, 4, 0x110) { read_u32_le_at(bytes, 0x30)? } else { 0 };
        h.ym2203_clock        = if should_read(0x44, 4, 0x151) { read_u32_le_at(bytes, 0x44)? } else { 0 };
        h.ym2608_clock        = if should_read(0x48, 4, 0x151) { read_u32_le_at(bytes, 0x48)? } else { 0 };
        h.ay8910_clock        = if should_read(0x74, 4, 0x151) { read_u32_le_at(bytes, 0x74)? } else { 0 };
        h.wonderswan_clock    = if should_read(0xC0, 4, 0x171) { read_u32_le_at(bytes, 0xC0)? } else { 0 };
    }

    Ok((h, data_start))
}
