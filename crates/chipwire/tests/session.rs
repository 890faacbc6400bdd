//! End-to-end playback through the session driver with a mock link.

mod common;

use std::io::{self, Write as _};
use std::sync::Arc;

use chipwire::{Chip, ChipRegistry, Framing, HardwareLink, Player, PlayerError};
use common::{poke_u32, vgm_image};
use parking_lot::Mutex;

/// Link double that records every byte the player transmits.
#[derive(Clone, Default)]
struct SharedLink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl HardwareLink for SharedLink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

fn opm_registry() -> ChipRegistry {
    let mut reg = ChipRegistry::new();
    reg.assign(Chip::Ym2151, 0);
    reg
}

/// A short YM2151 log: two writes separated by tiny waits.
fn opm_source() -> Vec<u8> {
    let body = [
        0x54, 0x28, 0x4A, // key code
        0x71, // wait 2
        0x54, 0x08, 0x78, // key on
        0x73, // wait 4
        0x66,
    ];
    let (mut image, _) = vgm_image(0x151, &body);
    poke_u32(&mut image, 0x30, 3_579_545); // YM2151 clock
    image
}

fn play_bytes(file_bytes: &[u8]) -> chipwire::Result<Vec<u8>> {
    let dir = tempfile::tempdir().unwrap();
    let song = dir.path().join("song.vgm");
    std::fs::write(&song, file_bytes).unwrap();

    let link = SharedLink::default();
    let recorded = Arc::clone(&link.bytes);
    let mut player = Player::new(link, Framing::FourByte, opm_registry(), dir.path().join("cache"));
    player.control().set_loop_count(1);
    player.play_file(&song)?;

    let out = recorded.lock().clone();
    Ok(out)
}

#[test]
fn test_direct_playback_reaches_link() {
    let sent = play_bytes(&opm_source()).unwrap();
    // Both register writes arrive framed in order; the short waits ride
    // along as single-byte no-op frames.
    let first = [0x00, 0x00, 0x28, 0x4A];
    let second = [0x00, 0x00, 0x08, 0x78];
    let pos1 = sent
        .windows(4)
        .position(|w| w == first)
        .expect("first write framed");
    let pos2 = sent
        .windows(4)
        .position(|w| w == second)
        .expect("second write framed");
    assert!(pos1 < pos2);
    assert!(sent.iter().filter(|&&b| b == 0x80).count() >= 6);
}

/// Gzip-compressed input plays byte-identically to its plain form.
#[test]
fn test_vgz_input_matches_plain() {
    let plain = opm_source();

    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&plain).unwrap();
    let gz = encoder.finish().unwrap();

    let sent_plain = play_bytes(&plain).unwrap();
    let sent_gz = play_bytes(&gz).unwrap();
    assert_eq!(sent_plain, sent_gz);
}

/// An unrecognized file is rejected without touching the link beyond a
/// flush of nothing.
#[test]
fn test_unknown_magic_rejected() {
    let err = play_bytes(b"RIFF....").unwrap_err();
    assert!(matches!(err, PlayerError::BadMagic { .. }));
}

/// Cancellation before the first iteration stops playback immediately.
#[test]
fn test_quit_stops_playback() {
    let dir = tempfile::tempdir().unwrap();
    let song = dir.path().join("song.vgm");
    std::fs::write(&song, opm_source()).unwrap();

    let link = SharedLink::default();
    let recorded = Arc::clone(&link.bytes);
    let mut player = Player::new(link, Framing::FourByte, opm_registry(), dir.path().join("cache"));
    player.control().request_quit();
    player.play_file(&song).unwrap();

    assert!(recorded.lock().is_empty());
}

/// An AY source with only a YM2151 installed goes through the cache
/// manager and reaches the link as YM2151 traffic.
#[test]
fn test_transcoded_playback_reaches_link() {
    let mut body = Vec::new();
    body.extend_from_slice(&[0xA0, 0x00, 0xCD]);
    body.extend_from_slice(&[0xA0, 0x01, 0x02]);
    body.extend_from_slice(&[0xA0, 0x08, 0x0F]);
    body.extend_from_slice(&[0xA0, 0x07, 0xFE]);
    body.push(0x72);
    body.push(0x66);
    let (mut image, _) = vgm_image(0x151, &body);
    poke_u32(&mut image, 0x74, 1_789_773);

    let sent = play_bytes(&image).unwrap();
    assert!(!sent.is_empty());
    // The PSG tone lands on OPM voice 4: a key-code write to 0x2C
    // framed for slot 0 must have gone out.
    assert!(
        sent.windows(3)
            .any(|w| w == [0x00, 0x00, 0x28 + 4]),
        "expected a transcoded key-code frame"
    );
}
