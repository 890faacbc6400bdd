//! The playback session.
//!
//! [`Player`] is the playback unit: it owns the hardware sink, the
//! chip registry, the cache manager and all per-track state. The
//! input-handling side of an application shares only the
//! [`SessionControl`] flag set and the published [`TrackInfo`]; it
//! never touches the hardware link. One track plays at a time;
//! [`Player::play_file`] blocks until the track ends, is skipped, or
//! fails.
//!
//! Every exit path out of a track, including errors, flushes the write
//! buffer so no stale frames bleed into the next track.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::{FlushPolicy, Framing, HardwareLink, WriteBuffer};
use crate::cache::{CacheManager, CacheMode, PreparedVgm};
use crate::chip::{Chip, ChipRegistry};
use crate::control::SessionControl;
use crate::error::{PlayerError, Result};
use crate::meta::{Gd3, parse_gd3};
use crate::s98::{S98Stream, parse_s98_header};
use crate::sched::{Scheduler, WaitStrategy};
use crate::sink::{ChipWrite, HardwareSink, RegisterSink, TranscodingSink};
use crate::transcode::{TranscodeOptions, Transcoder};
use crate::vgm::stream::{CommandStream, Step, VgmStream};

/// Pause is polled at this coarse interval to avoid busy-waiting.
const PAUSE_POLL: Duration = Duration::from_millis(100);

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// What is currently playing, published for a UI to read.
#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    pub file_name: String,
    pub gd3: Option<Gd3>,
    pub total_samples: u32,
    pub from_cache: bool,
    /// Source and target chip when a transcoded stream is playing.
    pub conversion: Option<(Chip, Chip)>,
}

/// The playback unit.
pub struct Player<L: HardwareLink> {
    sink: HardwareSink<L>,
    control: Arc<SessionControl>,
    cache: CacheManager,
    strategy: WaitStrategy,
    transcode_options: TranscodeOptions,
    now_playing: Arc<Mutex<Option<TrackInfo>>>,
}

impl<L: HardwareLink> Player<L> {
    /// Build a player over an opened hardware link.
    pub fn new(
        link: L,
        framing: Framing,
        registry: ChipRegistry,
        cache_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            sink: HardwareSink::new(
                WriteBuffer::new(link, framing),
                registry,
                FlushPolicy::default(),
            ),
            control: Arc::new(SessionControl::new()),
            cache: CacheManager::new(cache_dir),
            strategy: WaitStrategy::default(),
            transcode_options: TranscodeOptions::default(),
            now_playing: Arc::new(Mutex::new(None)),
        }
    }

    /// The control handle shared with the input-handling unit.
    pub fn control(&self) -> Arc<SessionControl> {
        Arc::clone(&self.control)
    }

    /// Handle to the published track information.
    pub fn now_playing(&self) -> Arc<Mutex<Option<TrackInfo>>> {
        Arc::clone(&self.now_playing)
    }

    pub fn set_wait_strategy(&mut self, strategy: WaitStrategy) {
        self.strategy = strategy;
    }

    pub fn set_flush_policy(&mut self, policy: FlushPolicy) {
        self.sink.set_policy(policy);
    }

    pub fn set_cache_mode(&mut self, mode: CacheMode) {
        self.cache.set_mode(mode);
    }

    pub fn set_transcode_options(&mut self, options: TranscodeOptions) {
        self.transcode_options = options;
    }

    /// Play one file to completion. Blocks on the calling thread; the
    /// shared control flags pause, skip or abort it. Per-track intents
    /// (next/prev/stop) are left set for the caller's playlist logic
    /// to consume.
    pub fn play_file(&mut self, path: &Path) -> Result<()> {
        let bytes = load_image(path)?;

        let result = if bytes.starts_with(b"Vgm ") {
            self.play_vgm(path, bytes)
        } else if bytes.starts_with(b"S98") {
            self.play_s98(path, bytes)
        } else {
            let mut found = [0u8; 4];
            let n = bytes.len().min(4);
            found[..n].copy_from_slice(&bytes[..n]);
            Err(PlayerError::BadMagic {
                expected: "Vgm / S98",
                found,
            })
        };

        // Mandatory flush on every exit path. A transport error has
        // already cleared the buffer, so this cannot resend anything
        // stale.
        let flushed = self.sink.flush();
        match result {
            Err(e) => {
                log::error!("{}: {}", path.display(), e);
                Err(e)
            }
            Ok(()) => flushed,
        }
    }

    fn play_vgm(&mut self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        let prepared =
            self.cache
                .prepare(path, bytes, self.sink.registry(), self.transcode_options)?;
        let loops = self.control.loop_count();
        let control = Arc::clone(&self.control);
        let strategy = self.strategy;
        let per_command = self.sink.policy() == FlushPolicy::PerCommand;

        match prepared {
            PreparedVgm::Direct {
                bytes,
                header,
                data_start,
            } => {
                self.publish(path, &bytes, header.gd3_offset, header.total_samples, false, None);
                let mut stream = VgmStream::new(&bytes, &header, data_start);
                stream.set_requested_loops(loops);
                let res = drive(&mut stream, &mut self.sink, &control, strategy, per_command);
                log_at_position(path, &stream, &res);
                res
            }
            PreparedVgm::Cached {
                bytes,
                header,
                data_start,
                source,
            } => {
                self.publish(
                    path,
                    &bytes,
                    header.gd3_offset,
                    header.total_samples,
                    true,
                    Some((source, Chip::Ym2151)),
                );
                let mut stream = VgmStream::new(&bytes, &header, data_start);
                stream.set_requested_loops(loops);
                let res = drive(&mut stream, &mut self.sink, &control, strategy, per_command);
                log_at_position(path, &stream, &res);
                let quieted = quiet_opm(&mut self.sink);
                res.and(quieted)
            }
            PreparedVgm::Live {
                bytes,
                header,
                data_start,
                source,
            } => {
                self.publish(
                    path,
                    &bytes,
                    header.gd3_offset,
                    header.total_samples,
                    false,
                    Some((source, Chip::Ym2151)),
                );
                let mut engine = Transcoder::for_source(source, header.clock_for(source))
                    .expect("prepare only selects transcodable sources");
                engine.apply_options(self.transcode_options);

                let mut sink = TranscodingSink::new(engine, &mut self.sink);
                sink.init()?;

                let mut stream = VgmStream::new(&bytes, &header, data_start);
                stream.set_requested_loops(loops);
                let res = drive(&mut stream, &mut sink, &control, strategy, per_command);
                log_at_position(path, &stream, &res);
                drop(sink);
                let quieted = quiet_opm(&mut self.sink);
                res.and(quieted)
            }
        }
    }

    fn play_s98(&mut self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        let header = parse_s98_header(&bytes)?;
        {
            let mut info = self.now_playing.lock();
            *info = Some(TrackInfo {
                file_name: file_name_of(path),
                ..Default::default()
            });
        }

        let control = Arc::clone(&self.control);
        let strategy = self.strategy;
        let per_command = self.sink.policy() == FlushPolicy::PerCommand;

        let mut stream = S98Stream::new(&bytes, &header);
        stream.set_requested_loops(self.control.loop_count());
        let res = drive(&mut stream, &mut self.sink, &control, strategy, per_command);
        log_at_position(path, &stream, &res);
        res
    }

    fn publish(
        &self,
        path: &Path,
        bytes: &[u8],
        gd3_offset: u32,
        total_samples: u32,
        from_cache: bool,
        conversion: Option<(Chip, Chip)>,
    ) {
        let gd3 = if gd3_offset != 0 && (gd3_offset as usize) < bytes.len() {
            parse_gd3(&bytes[gd3_offset as usize..]).ok()
        } else {
            None
        };
        let mut info = self.now_playing.lock();
        *info = Some(TrackInfo {
            file_name: file_name_of(path),
            gd3,
            total_samples,
            from_cache,
            conversion,
        });
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read a log image, transparently decompressing gzip input (.vgz).
fn load_image(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path)?;
    if raw.len() >= 2 && raw[0..2] == GZIP_MAGIC {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
        Ok(out)
    } else {
        Ok(raw)
    }
}

fn log_at_position(path: &Path, stream: &dyn CommandStream, res: &Result<()>) {
    if let Err(e) = res {
        log::error!(
            "{}: stopped at offset 0x{:X}: {}",
            path.display(),
            stream.position(),
            e
        );
    }
}

/// Key off and silence every OPM voice. Issued after transcoded
/// playback so the substitute chip's voices never ring into the next
/// track.
fn quiet_opm(sink: &mut dyn RegisterSink) -> Result<()> {
    // SL=15 RR=15 on every operator slot, then key off all channels.
    for addr in 0xE0..=0xFFu8 {
        sink.chip_write(ChipWrite {
            chip: Chip::Ym2151,
            port: 0,
            addr,
            data: 0xFF,
        })?;
    }
    for ch in 0..8u8 {
        sink.chip_write(ChipWrite {
            chip: Chip::Ym2151,
            port: 0,
            addr: 0x08,
            data: ch,
        })?;
    }
    sink.flush()
}

/// The real-time drain loop shared by both formats.
///
/// Each iteration converts elapsed wall time into owed samples, steps
/// the interpreter until the debt is paid, then blocks for one
/// scheduling quantum. Cancellation is observed within one iteration;
/// pausing freezes the debt and re-anchors the clock on resume so no
/// catch-up burst follows.
fn drive(
    stream: &mut dyn CommandStream,
    sink: &mut dyn RegisterSink,
    control: &SessionControl,
    strategy: WaitStrategy,
    per_command_flush: bool,
) -> Result<()> {
    let mut sched = Scheduler::new(strategy);
    sched.rearm();

    loop {
        if control.cancelled() {
            return Ok(());
        }
        if control.is_paused() {
            while control.is_paused() && !control.cancelled() {
                std::thread::sleep(PAUSE_POLL);
            }
            sched.rearm();
            continue;
        }

        let speed = control.speed();
        let due = sched.advance(speed);
        let mut done: u32 = 0;
        let mut steps: u32 = 0;
        while done < due {
            match stream.step(sink)? {
                Step::Command => {}
                Step::Wait(n) => done += n,
                Step::End => {
                    sched.settle(done);
                    return Ok(());
                }
            }
            if per_command_flush {
                sink.flush()?;
            }
            // A looping stream with no waits in its loop body would
            // otherwise pin this drain forever.
            steps += 1;
            if steps & 0x3FF == 0 && control.cancelled() {
                return Ok(());
            }
        }
        sched.settle(done);
        sched.idle(speed);
    }
}
