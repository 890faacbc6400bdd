//! GD3 metadata parsing and serialization.
//!
//! The GD3 chunk is a four-byte ident (`"Gd3 "`), a 32-bit LE version, a
//! 32-bit LE length, and eleven UTF-16LE nul-terminated strings (track,
//! game, system and author names in English and Japanese, release date,
//! log creator, notes). Parsing is bounded by the declared length so a
//! short chunk truncates fields instead of reading into following data.

use crate::binutil::{read_slice, read_u16_le_at, read_u32_le_at};
use crate::error::{PlayerError, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gd3 {
    pub track_name_en: Option<String>,
    pub track_name_jp: Option<String>,
    pub game_name_en: Option<String>,
    pub game_name_jp: Option<String>,
    pub system_name_en: Option<String>,
    pub system_name_jp: Option<String>,
    pub author_name_en: Option<String>,
    pub author_name_jp: Option<String>,
    pub release_date: Option<String>,
    pub creator: Option<String>,
    pub notes: Option<String>,
    /// Raw chunk version, e.g. `0x00000100` for 1.00.
    pub version: u32,
}

impl Gd3 {
    /// Serialize back into raw GD3 chunk bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();

        out.extend_from_slice(b"Gd3 ");
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&0_u32.to_le_bytes());

        let fields: [&Option<String>; 11] = [
            &self.track_name_en,
            &self.track_name_jp,
            &self.game_name_en,
            &self.game_name_jp,
            &self.system_name_en,
            &self.system_name_jp,
            &self.author_name_en,
            &self.author_name_jp,
            &self.release_date,
            &self.creator,
            &self.notes,
        ];

        let mut data: Vec<u8> = Vec::new();
        for f in &fields {
            if let Some(s) = f {
                for code in s.encode_utf16() {
                    data.extend_from_slice(&code.to_le_bytes());
                }
            }
            data.extend_from_slice(&0_u16.to_le_bytes());
        }

        let len = data.len() as u32;
        out.extend_from_slice(&data);
        out[8..12].copy_from_slice(&len.to_le_bytes());
        out
    }
}

/// Parse a GD3 chunk starting at offset 0 of `bytes`.
pub fn parse_gd3(bytes: &[u8]) -> Result<Gd3> {
    if bytes.len() < 12 {
        return Err(PlayerError::Truncated {
            offset: 0,
            needed: 12,
            available: bytes.len(),
        });
    }

    let ident = read_slice(bytes, 0, 4)?;
    if ident != b"Gd3 " {
        let mut id: [u8; 4] = [0; 4];
        id.copy_from_slice(ident);
        return Err(PlayerError::BadMagic {
            expected: "Gd3 ",
            found: id,
        });
    }

    let version = read_u32_le_at(bytes, 4)?;
    let data_len = read_u32_le_at(bytes, 8)? as usize;

    let data_off = 0x0C_usize;
    let data_len = data_len.min(bytes.len().saturating_sub(data_off));
    let data = read_slice(bytes, data_off, data_len)?;

    // Eleven UTF-16LE nul-terminated fields, tolerant of truncation:
    // a stream that ends mid code unit leaves the remaining fields empty.
    let mut fields: Vec<Option<String>> = Vec::with_capacity(11);
    let mut i = 0_usize;
    for _ in 0..11 {
        let mut codes: Vec<u16> = Vec::new();
        let mut truncated = false;
        loop {
            if i + 1 >= data.len() {
                truncated = true;
                break;
            }
            let code = read_u16_le_at(data, i)?;
            i += 2;
            if code == 0 {
                break;
            }
            codes.push(code);
        }

        if truncated {
            while fields.len() < 11 {
                fields.push(None);
            }
            break;
        }

        if codes.is_empty() {
            fields.push(None);
        } else {
            match String::from_utf16(&codes) {
                Ok(s) => fields.push(Some(s)),
                Err(_) => fields.push(None),
            }
        }
    }

    Ok(Gd3 {
        track_name_en: fields[0].clone(),
        track_name_jp: fields[1].clone(),
        game_name_en: fields[2].clone(),
        game_name_jp: fields[3].clone(),
        system_name_en: fields[4].clone(),
        system_name_jp: fields[5].clone(),
        author_name_en: fields[6].clone(),
        author_name_jp: fields[7].clone(),
        release_date: fields[8].clone(),
        creator: fields[9].clone(),
        notes: fields[10].clone(),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gd3_round_trip() {
        let gd3 = Gd3 {
            track_name_en: Some("Stage 1".to_string()),
            game_name_en: Some("Example Game".to_string()),
            author_name_en: Some("Composer".to_string()),
            version: 0x0100,
            ..Default::default()
        };
        let bytes = gd3.to_bytes();
        let parsed = parse_gd3(&bytes).unwrap();
        assert_eq!(parsed, gd3);
    }

    #[test]
    fn test_gd3_bad_magic() {
        let bytes = b"Gd4 \x00\x01\x00\x00\x00\x00\x00\x00".to_vec();
        assert!(matches!(
            parse_gd3(&bytes),
            Err(PlayerError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_gd3_truncated_fields_are_empty() {
        // Declared length covers only one complete field.
        let gd3 = Gd3 {
            track_name_en: Some("T".to_string()),
            ..Default::default()
        };
        let mut bytes = gd3.to_bytes();
        bytes.truncate(12 + 4);
        bytes[8..12].copy_from_slice(&4_u32.to_le_bytes());
        let parsed = parse_gd3(&bytes).unwrap();
        assert_eq!(parsed.track_name_en.as_deref(), Some("T"));
        assert_eq!(parsed.game_name_en, None);
    }
}
