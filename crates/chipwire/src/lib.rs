//! chipwire: replayer for retro sound-chip register-write logs over
//! serial-attached FM/PSG hardware.
//!
//! `chipwire` plays prerecorded chip-music command logs (VGM, S98) by
//! re-emitting every recorded register write, sample-accurately timed,
//! to physical sound chips behind an opaque serial link. When a log
//! asks for a chip that is not installed, the register stream is
//! transcoded live into the register semantics of an installed
//! substitute (currently the YM2151), and the transcoded stream can be
//! cached to disk so the conversion happens once per file.
//!
//! Key pieces:
//! - Format parsers for versioned VGM headers (with GD3 metadata and
//!   transparent `.vgz` decompression) and the fixed S98 header.
//! - A command-stream interpreter per format, dispatching opcodes into
//!   a [`sink::RegisterSink`].
//! - A real-time scheduler that converts wall time on the monotonic
//!   clock into owed samples and drains the interpreter against that
//!   debt, with interchangeable wait strategies.
//! - A bounded hardware write buffer with two wire framings and two
//!   flush policies.
//! - Stateful chip transcoders (AY8910, OPN family, SN76489 and
//!   WonderSwan, all onto the YM2151) that shadow the source chip's
//!   registers and continuously re-synthesize pitch, volume, pan and
//!   key state.
//! - A cache manager that builds, detects and reuses transcoded
//!   streams.
//!
//! The serial/USB transport itself, configuration loading and any user
//! interface are out of scope; the core consumes an opened
//! [`HardwareLink`] and a chip-to-slot [`ChipRegistry`] and exposes a
//! [`SessionControl`] flag set for an input-handling thread.
//!
//! # Example
//!
//! ```no_run
//! use chipwire::{Chip, ChipRegistry, Framing, HardwareLink, Player};
//! use std::io;
//! use std::path::Path;
//!
//! // The transport lives outside this crate; anything that can write
//! // bytes will do.
//! struct Serial;
//! impl HardwareLink for Serial {
//!     fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
//!         Ok(bytes.len())
//!     }
//! }
//!
//! let mut registry = ChipRegistry::new();
//! registry.assign(Chip::Ym2151, 0);
//!
//! let mut player = Player::new(Serial, Framing::FourByte, registry, "cache");
//!
//! // Hand this to the input thread; it pauses, skips and quits.
//! let control = player.control();
//!
//! player
//!     .play_file(Path::new("song.vgm"))
//!     .expect("playback failed");
//! # let _ = control;
//! ```

mod binutil;
pub mod buffer;
pub mod cache;
pub mod chip;
pub mod control;
pub mod error;
pub mod meta;
pub mod s98;
pub mod sched;
pub mod session;
pub mod sink;
pub mod transcode;
pub mod vgm;

pub use buffer::{FlushPolicy, Framing, HardwareLink, RegisterWrite, WriteBuffer};
pub use cache::{CacheManager, CacheMode, PreparedVgm};
pub use chip::{Chip, ChipRegistry};
pub use control::SessionControl;
pub use error::{PlayerError, Result};
pub use meta::Gd3;
pub use s98::{S98Header, S98Stream, parse_s98_header};
pub use sched::WaitStrategy;
pub use session::{Player, TrackInfo};
pub use sink::{CacheSink, ChipWrite, HardwareSink, RegisterSink, TranscodingSink};
pub use transcode::{AyStereoMode, TranscodeOptions, Transcoder};
pub use vgm::{CommandStream, Step, VgmHeader, VgmStream, parse_vgm_header};
