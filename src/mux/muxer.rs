use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::encode::access_unit::AccessUnit;
use crate::encode::h264::{self, CodecParameters};
use crate::foundation::core::Timestamp;
use crate::foundation::error::{ImgseqError, ImgseqResult};
use crate::mux::atoms;
use crate::mux::mp4::{self, SampleInfo, VideoTrackInfo};

/// Output container. MP4 is the only one supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContainerFormat {
    #[default]
    Mp4,
}

/// Handle returned by [`Mp4Muxer::add_track`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrackIndex(pub usize);

/// Video track description, taken from the encoder's negotiated output format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackConfig {
    pub params: CodecParameters,
    /// Nominal frame duration, used for the last sample.
    pub frame_duration_us: u64,
}

#[derive(Clone, Copy, Debug)]
struct SampleRecord {
    offset: u64,
    size: u32,
    pts: Timestamp,
    is_sync: bool,
}

/// Progressive MP4 writer for one H.264 track.
///
/// Samples are appended to a 64-bit `mdat` as they arrive; `moov` is written at the end by
/// [`Mp4Muxer::finalize`]. A muxer that is dropped without being finalized deletes its file.
pub struct Mp4Muxer {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    mdat_size_pos: u64,
    cursor: u64,
    track: Option<TrackConfig>,
    samples: Vec<SampleRecord>,
    started: bool,
    finalized: bool,
}

impl Mp4Muxer {
    /// Create `path` (replacing any existing file) and write the file header.
    pub fn open(path: impl AsRef<Path>, format: ContainerFormat) -> ImgseqResult<Self> {
        let ContainerFormat::Mp4 = format;
        let path = path.as_ref().to_path_buf();
        remove_if_exists(&path)?;

        let file = File::create(&path).map_err(|e| {
            ImgseqError::io(format!("failed to create output '{}'", path.display()), e)
        })?;
        let mut muxer = Self {
            path,
            writer: None,
            mdat_size_pos: 0,
            cursor: 0,
            track: None,
            samples: Vec::new(),
            started: false,
            finalized: false,
        };

        let mut writer = BufWriter::new(file);
        let header = mp4::write_ftyp(&mut writer)
            .and_then(|()| atoms::large_box_size_placeholder(&mut writer, b"mdat"));
        muxer.writer = Some(writer);
        match header {
            Ok(size_pos) => {
                muxer.mdat_size_pos = size_pos;
                muxer.cursor = size_pos + 8;
                tracing::debug!(path = %muxer.path.display(), "mp4 opened");
                Ok(muxer)
            }
            Err(e) => {
                let err = ImgseqError::mux(format!("failed to write mp4 header: {e}"));
                muxer.discard();
                Err(err)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Bytes of sample data written into `mdat`.
    pub fn bytes_written(&self) -> u64 {
        self.samples.iter().map(|s| u64::from(s.size)).sum()
    }

    /// Track duration in microseconds: first sample to the end of the last one.
    pub fn duration_us(&self) -> u64 {
        match (self.samples.first(), self.samples.last(), &self.track) {
            (Some(first), Some(last), Some(track)) => {
                last.pts.as_micros() - first.pts.as_micros() + track.frame_duration_us
            }
            _ => 0,
        }
    }

    pub fn add_track(&mut self, config: TrackConfig) -> ImgseqResult<TrackIndex> {
        self.ensure_open("add_track")?;
        if self.started {
            return Err(ImgseqError::protocol("add_track called after start"));
        }
        if self.track.is_some() {
            return Err(ImgseqError::protocol("mp4 muxer supports a single video track"));
        }
        if config.frame_duration_us == 0 || config.frame_duration_us > u64::from(u32::MAX) {
            return Err(ImgseqError::configuration(format!(
                "frame duration {}us is out of range",
                config.frame_duration_us
            )));
        }
        let (w, h) = (config.params.width, config.params.height);
        if w == 0 || h == 0 || w > u32::from(u16::MAX) || h > u32::from(u16::MAX) {
            return Err(ImgseqError::configuration(format!(
                "track size {w}x{h} cannot be stored in mp4"
            )));
        }
        tracing::info!(width = w, height = h, "added video track");
        self.track = Some(config);
        Ok(TrackIndex(0))
    }

    pub fn start(&mut self) -> ImgseqResult<()> {
        self.ensure_open("start")?;
        if self.started {
            return Err(ImgseqError::protocol("muxer already started"));
        }
        if self.track.is_none() {
            return Err(ImgseqError::protocol("muxer started without a track"));
        }
        self.started = true;
        Ok(())
    }

    /// Append one encoded picture. Annex B input is stored length-prefixed; parameter sets and
    /// delimiters are dropped because they live in `avcC`.
    pub fn write_sample(&mut self, track: TrackIndex, unit: &AccessUnit) -> ImgseqResult<()> {
        self.ensure_open("write_sample")?;
        if !self.started {
            return Err(ImgseqError::protocol("write_sample called before start"));
        }
        if self.track.is_none() || track != TrackIndex(0) {
            return Err(ImgseqError::protocol(format!("unknown track {}", track.0)));
        }
        if unit.is_codec_config() {
            return Err(ImgseqError::protocol(
                "codec config units are not samples",
            ));
        }
        if let Some(last) = self.samples.last()
            && unit.pts <= last.pts
        {
            return Err(ImgseqError::protocol(format!(
                "sample time {}us is not after previous {}us",
                unit.pts.as_micros(),
                last.pts.as_micros()
            )));
        }

        let payload = h264::annexb_to_length_prefixed(&unit.data);
        if payload.is_empty() {
            return Err(ImgseqError::protocol("access unit carries no picture data"));
        }
        let size = u32::try_from(payload.len()).map_err(|_| {
            ImgseqError::mux(format!("sample of {} bytes is too large", payload.len()))
        })?;

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ImgseqError::protocol("muxer is closed"))?;
        writer
            .write_all(&payload)
            .map_err(|e| ImgseqError::mux(format!("failed to write sample: {e}")))?;

        self.samples.push(SampleRecord {
            offset: self.cursor,
            size,
            pts: unit.pts,
            is_sync: unit.is_key_frame(),
        });
        self.cursor += u64::from(size);
        Ok(())
    }

    /// Patch `mdat`, append `moov`, and sync the file to disk.
    pub fn finalize(&mut self) -> ImgseqResult<()> {
        self.ensure_open("finalize")?;
        if !self.started {
            return Err(ImgseqError::protocol("finalize called before start"));
        }
        if self.samples.is_empty() {
            return Err(ImgseqError::protocol("finalize called with no samples"));
        }
        let track = self
            .track
            .as_ref()
            .ok_or_else(|| ImgseqError::protocol("muxer has no track"))?;

        let samples = sample_table(&self.samples, track.frame_duration_us)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ImgseqError::protocol("muxer is closed"))?;

        atoms::fill_large_box_size(writer, self.mdat_size_pos)
            .and_then(|()| {
                mp4::write_moov(
                    writer,
                    &VideoTrackInfo {
                        params: &track.params,
                        samples: &samples,
                    },
                )
            })
            .and_then(|()| writer.flush())
            .and_then(|()| writer.get_ref().sync_all())
            .map_err(|e| ImgseqError::mux(format!("failed to finalize mp4: {e}")))?;

        self.writer = None;
        self.finalized = true;
        tracing::info!(
            path = %self.path.display(),
            samples = self.samples.len(),
            duration_us = self.duration_us(),
            "mp4 finalized"
        );
        Ok(())
    }

    /// Close and delete the partial output. No-op once finalized or aborted.
    pub fn abort(&mut self) -> ImgseqResult<()> {
        if self.finalized || self.writer.is_none() {
            return Ok(());
        }
        self.writer = None;
        tracing::debug!(path = %self.path.display(), "removing partial mp4");
        remove_if_exists(&self.path)
    }

    fn discard(&mut self) {
        if let Err(e) = self.abort() {
            tracing::warn!(error = %e, "failed to remove partial output");
        }
    }

    fn ensure_open(&self, op: &str) -> ImgseqResult<()> {
        if self.finalized {
            return Err(ImgseqError::protocol(format!("{op} called after finalize")));
        }
        if self.writer.is_none() {
            return Err(ImgseqError::protocol(format!("{op} called on an aborted muxer")));
        }
        Ok(())
    }
}

impl Drop for Mp4Muxer {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Per-sample durations from timestamp deltas; the last sample lasts one nominal frame.
fn sample_table(records: &[SampleRecord], frame_duration_us: u64) -> ImgseqResult<Vec<SampleInfo>> {
    let next_pts = records
        .iter()
        .skip(1)
        .map(|r| r.pts.as_micros())
        .map(Some)
        .chain(std::iter::once(None));
    records
        .iter()
        .zip(next_pts)
        .map(|(r, next)| {
            let delta = next.map_or(frame_duration_us, |n| n - r.pts.as_micros());
            let duration = u32::try_from(delta).map_err(|_| {
                ImgseqError::mux(format!("sample duration {delta}us exceeds 32 bits"))
            })?;
            Ok(SampleInfo {
                offset: r.offset,
                size: r.size,
                duration,
                is_sync: r.is_sync,
            })
        })
        .collect()
}

pub(crate) fn remove_if_exists(path: &Path) -> ImgseqResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ImgseqError::io(
            format!("failed to remove '{}'", path.display()),
            e,
        )),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/mux/muxer.rs"]
mod tests;
