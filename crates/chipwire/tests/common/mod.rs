//! Shared helpers for the integration tests.
#![allow(dead_code)]

use chipwire::{ChipWrite, RegisterSink, Result, VgmHeader};

/// Header length the parser associates with `version`.
pub fn header_len(version: u32) -> usize {
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

/// Build a raw VGM image: a zeroed header of the version's length with
/// ident, version and data offset filled in, followed by `body`.
/// Returns the image and the absolute body start.
pub fn vgm_image(version: u32, body: &[u8]) -> (Vec<u8>, usize) {
    let hlen = header_len(version);
    let mut image = vec![0u8; hlen];
    image[0..4].copy_from_slice(b"Vgm ");
    image[0x08..0x0C].copy_from_slice(&version.to_le_bytes());
    if version >= 0x150 {
        image[0x34..0x38].copy_from_slice(&((hlen - 0x34) as u32).to_le_bytes());
    }
    image.extend_from_slice(body);
    (image, hlen)
}

/// Poke a little-endian u32 field into an image.
pub fn poke_u32(image: &mut [u8], off: usize, v: u32) {
    image[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Set an offset field using the on-disk relative convention.
pub fn poke_rel_offset(image: &mut [u8], field: usize, absolute: usize) {
    poke_u32(image, field, (absolute - field) as u32);
}

/// Sink recording everything the interpreter produces.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub writes: Vec<ChipWrite>,
    pub waited: u64,
    pub passthrough: Vec<Vec<u8>>,
    pub flushes: usize,
}

impl RegisterSink for CollectSink {
    fn chip_write(&mut self, w: ChipWrite) -> Result<()> {
        self.writes.push(w);
        Ok(())
    }

    fn wait(&mut self, samples: u32) -> Result<()> {
        self.waited += samples as u64;
        Ok(())
    }

    fn passthrough(&mut self, raw: &[u8]) -> Result<()> {
        self.passthrough.push(raw.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Parse helper asserting success.
pub fn parse(image: &[u8]) -> (VgmHeader, usize) {
    chipwire::parse_vgm_header(image).expect("header should parse")
}
