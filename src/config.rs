use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::composite::surface::{PixelFormat, SurfaceDesc};
use crate::encode::backend::EncoderConfig;
use crate::encode::ffmpeg::default_ffmpeg_bin;
use crate::encode::session::{DEFAULT_POLL_INTERVAL, DEFAULT_STALL_TIMEOUT};
use crate::foundation::core::Fps;
use crate::foundation::error::{ImgseqError, ImgseqResult};

pub const DEFAULT_BITRATE: u32 = 3_000_000;
pub const DEFAULT_KEYFRAME_INTERVAL_SECS: u32 = 2;
pub const DEFAULT_QUEUE_DEPTH: usize = 4;
pub const DEFAULT_BACKGROUND: [u8; 4] = [0, 0, 0, 255];

/// Everything one encode needs. Immutable once the pipeline starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeSession {
    pub source_dir: PathBuf,
    pub output: PathBuf,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Average bitrate in bit/s.
    pub bitrate: u32,
    pub keyframe_interval_secs: u32,
    pub pixel_format: PixelFormat,
    /// Opaque colour that transparent pixels are flattened over.
    pub background_rgba: [u8; 4],
    /// Frames allowed to wait in the encoder input queue.
    pub queue_depth: usize,
    /// Time without encoder progress after which the encode fails.
    pub stall_timeout: Duration,
    pub poll_interval: Duration,
    pub ffmpeg_bin: PathBuf,
}

impl EncodeSession {
    /// Session with default encoder settings.
    pub fn new(
        source_dir: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        fps: u32,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            output: output.into(),
            fps,
            width,
            height,
            bitrate: DEFAULT_BITRATE,
            keyframe_interval_secs: DEFAULT_KEYFRAME_INTERVAL_SECS,
            pixel_format: PixelFormat::default(),
            background_rgba: DEFAULT_BACKGROUND,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ffmpeg_bin: default_ffmpeg_bin(),
        }
    }

    /// Validated encoder parameters. Fails with a configuration error on any bad number.
    pub fn encoder_config(&self) -> ImgseqResult<EncoderConfig> {
        let fps = Fps::new(self.fps)?;
        if self.keyframe_interval_secs == 0 {
            return Err(ImgseqError::configuration(
                "keyframe interval must be > 0 seconds",
            ));
        }
        if self.stall_timeout.is_zero() {
            return Err(ImgseqError::configuration("stall timeout must be > 0"));
        }
        let cfg = EncoderConfig {
            width: self.width,
            height: self.height,
            fps,
            bitrate: self.bitrate,
            keyframe_interval_secs: self.keyframe_interval_secs,
            pixel_format: self.pixel_format,
            queue_depth: self.queue_depth,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check parameters, then the filesystem: the source directory must be readable and the
    /// output's parent directory must exist and accept new files.
    pub fn validate(&self) -> ImgseqResult<EncoderConfig> {
        let cfg = self.encoder_config()?;

        let meta = std::fs::metadata(&self.source_dir).map_err(|e| {
            ImgseqError::io(
                format!("source folder '{}'", self.source_dir.display()),
                e,
            )
        })?;
        if !meta.is_dir() {
            return Err(ImgseqError::io(
                format!("source folder '{}'", self.source_dir.display()),
                std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
            ));
        }

        let parent = output_parent(&self.output);
        if !parent.is_dir() {
            return Err(ImgseqError::io(
                format!("output directory '{}'", parent.display()),
                std::io::Error::new(std::io::ErrorKind::NotFound, "directory does not exist"),
            ));
        }
        tempfile::NamedTempFile::new_in(parent)
            .and_then(|probe| probe.close())
            .map_err(|e| {
                ImgseqError::io(
                    format!("output directory '{}' is not writable", parent.display()),
                    e,
                )
            })?;
        Ok(cfg)
    }

    pub fn surface_desc(&self) -> SurfaceDesc {
        SurfaceDesc {
            width: self.width,
            height: self.height,
            format: self.pixel_format,
        }
    }

    /// Surfaces in flight: the encoder queue plus one being composited and one being written.
    pub fn surface_pool_capacity(&self) -> usize {
        self.queue_depth.saturating_add(2)
    }
}

fn output_parent(output: &Path) -> &Path {
    match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Parse `#rrggbb` (or `#rrggbbaa`) into RGBA8. Alpha defaults to opaque.
pub fn parse_hex_color(s: &str) -> ImgseqResult<[u8; 4]> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    let bad = || ImgseqError::configuration(format!("invalid colour '{s}', expected #rrggbb"));
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return Err(bad());
    }
    let mut out = [0, 0, 0, 255];
    for (i, slot) in out.iter_mut().enumerate().take(hex.len() / 2) {
        *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| bad())?;
    }
    Ok(out)
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
