//! Transcoded-stream cache manager.
//!
//! Transcoding a log is deterministic, so it only has to happen once:
//! the first play of a source that needs it runs the interpreter
//! against a [`CacheSink`] and stores the re-encoded YM2151 stream next
//! to similar files in the cache directory. Later plays find the file
//! and replay it directly.
//!
//! Cache files key on the source file name, not its content. A renamed
//! but unchanged file converts again; a changed but unrenamed file
//! replays the stale cache until a rebuild is forced. This is a known,
//! accepted limitation.

use std::fs;
use std::path::{Path, PathBuf};

use crate::binutil::write_u32;
use crate::chip::{Chip, ChipRegistry};
use crate::error::{PlayerError, Result};
use crate::sink::{CacheSink, TranscodingSink};
use crate::transcode::{Transcoder, TranscodeOptions};
use crate::vgm::header::{VgmHeader, parse_vgm_header};
use crate::vgm::stream::{CommandStream, Step, VgmStream};

/// Suffix appended to the source file name to form the cache file
/// name.
const CACHE_SUFFIX: &str = ".opm.vgm";

/// Fixed header size of generated cache files.
const CACHE_HEADER_LEN: usize = 0x100;

/// Whether existing cache files are reused or rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Reuse a cache file when one exists.
    #[default]
    Normal,
    /// Always rebuild, replacing any existing file.
    Rebuild,
}

/// Outcome of preparing a VGM image for playback.
pub enum PreparedVgm {
    /// The source plays as recorded.
    Direct {
        bytes: Vec<u8>,
        header: VgmHeader,
        data_start: usize,
    },
    /// A transcoded image (fresh or reused) plays instead of the
    /// source.
    Cached {
        bytes: Vec<u8>,
        header: VgmHeader,
        data_start: usize,
        source: Chip,
    },
    /// The cache could not be written; the source plays through a live
    /// transcoder.
    Live {
        bytes: Vec<u8>,
        header: VgmHeader,
        data_start: usize,
        source: Chip,
    },
}

/// Decides whether transcoding is needed and builds or reuses cache
/// files.
pub struct CacheManager {
    dir: PathBuf,
    mode: CacheMode,
}

impl CacheManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            mode: CacheMode::default(),
        }
    }

    pub fn set_mode(&mut self, mode: CacheMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// The cache file path for `source`.
    pub fn cache_path(&self, source: &Path) -> PathBuf {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        self.dir.join(format!("{}{}", name, CACHE_SUFFIX))
    }

    /// Decide how `bytes` (the raw VGM image read from `path`) should
    /// be played given the installed chips, building a cache file on
    /// the way when that is possible.
    pub fn prepare(
        &self,
        path: &Path,
        bytes: Vec<u8>,
        registry: &ChipRegistry,
        options: TranscodeOptions,
    ) -> Result<PreparedVgm> {
        let (header, data_start) = parse_vgm_header(&bytes)?;

        let source = header.primary_chip();
        let needs_transcoding = match source {
            Some(chip) => {
                !registry.has(chip)
                    && registry.has(Chip::Ym2151)
                    && Transcoder::for_source(chip, 1).is_some()
            }
            None => false,
        };
        if !needs_transcoding {
            return Ok(PreparedVgm::Direct {
                bytes,
                header,
                data_start,
            });
        }
        let source = source.expect("transcoding requires a source chip");

        let cache_path = self.cache_path(path);
        if self.mode == CacheMode::Normal
            && let Ok(cached) = fs::read(&cache_path)
            && let Ok((cached_header, cached_start)) = parse_vgm_header(&cached)
        {
            log::info!(
                "{}: playing {} from cache {}",
                path.display(),
                source,
                cache_path.display()
            );
            return Ok(PreparedVgm::Cached {
                bytes: cached,
                header: cached_header,
                data_start: cached_start,
                source,
            });
        }

        log::info!(
            "{}: converting {} to {}",
            path.display(),
            source,
            Chip::Ym2151
        );
        match self.build(&cache_path, &bytes, &header, data_start, source, options) {
            Ok(cached) => {
                let (cached_header, cached_start) = parse_vgm_header(&cached)?;
                Ok(PreparedVgm::Cached {
                    bytes: cached,
                    header: cached_header,
                    data_start: cached_start,
                    source,
                })
            }
            Err(e @ (PlayerError::CacheWrite(_) | PlayerError::Io(_))) => {
                // Disk trouble never kills playback; fall back to
                // transcoding on the fly for this session.
                log::warn!(
                    "{}: cache write failed ({}), playing uncached",
                    path.display(),
                    e
                );
                Ok(PreparedVgm::Live {
                    bytes,
                    header,
                    data_start,
                    source,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Run the conversion pass and write the cache file. Returns the
    /// complete cache image.
    fn build(
        &self,
        cache_path: &Path,
        bytes: &[u8],
        header: &VgmHeader,
        data_start: usize,
        source: Chip,
        options: TranscodeOptions,
    ) -> Result<Vec<u8>> {
        let clock = header.clock_for(source);
        let mut engine = Transcoder::for_source(source, clock)
            .expect("transcodable source checked by caller");
        engine.apply_options(options);

        let mut sink = TranscodingSink::new(engine, CacheSink::new());
        sink.init()?;

        let mut stream = VgmStream::new(bytes, header, data_start);
        stream.set_requested_loops(1);
        let loop_abs = header.loop_offset as usize;

        loop {
            if loop_abs != 0 && stream.position() >= loop_abs {
                sink.inner_mut().mark_loop();
            }
            if stream.step(&mut sink)? == Step::End {
                break;
            }
        }

        let body_sink = sink.into_inner();
        let total_samples = body_sink.total_samples().min(u32::MAX as u64) as u32;
        let loop_mark = body_sink.loop_mark();
        let body = body_sink.finish();

        let mut out = vec![0u8; CACHE_HEADER_LEN];
        out.extend_from_slice(&body);

        // Copy the GD3 block over unchanged so the cached file keeps
        // its metadata.
        let mut gd3_cache_start: u32 = 0;
        if header.gd3_offset != 0 {
            let gd3_start = header.gd3_offset as usize;
            if gd3_start + 12 <= bytes.len() {
                let declared = u32::from_le_bytes([
                    bytes[gd3_start + 8],
                    bytes[gd3_start + 9],
                    bytes[gd3_start + 10],
                    bytes[gd3_start + 11],
                ]) as usize;
                let gd3_end = (gd3_start + 12 + declared).min(bytes.len());
                gd3_cache_start = out.len() as u32;
                out.extend_from_slice(&bytes[gd3_start..gd3_end]);
            }
        }

        // Finalize the header only now that the body is complete; a
        // crash mid-build leaves a file no later run will mistake for
        // a valid cache.
        out[0..4].copy_from_slice(b"Vgm ");
        let out_len = out.len() as u32;
        write_u32(&mut out, 0x04, out_len - 4);
        write_u32(&mut out, 0x08, header.version.max(0x151));
        if gd3_cache_start != 0 {
            write_u32(&mut out, 0x14, gd3_cache_start - 0x14);
        }
        write_u32(&mut out, 0x18, total_samples);
        if let Some(mark) = loop_mark {
            write_u32(&mut out, 0x1C, (CACHE_HEADER_LEN + mark) as u32 - 0x1C);
            write_u32(&mut out, 0x20, header.loop_samples);
        }
        write_u32(&mut out, 0x24, header.rate);
        write_u32(&mut out, 0x30, Chip::Ym2151.default_clock());
        write_u32(&mut out, 0x34, CACHE_HEADER_LEN as u32 - 0x34);

        fs::create_dir_all(&self.dir).map_err(PlayerError::CacheWrite)?;
        fs::write(cache_path, &out).map_err(PlayerError::CacheWrite)?;
        log::info!(
            "wrote cache {} ({} bytes, {} samples)",
            cache_path.display(),
            out.len(),
            total_samples
        );

        Ok(out)
    }
}
