use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::composite::compositor::Compositor;
use crate::composite::surface::{SurfacePool, SurfacePoolStats};
use crate::config::EncodeSession;
use crate::encode::access_unit::AccessUnit;
use crate::encode::backend::{EncoderConfig, VideoEncoder};
use crate::encode::ffmpeg::FfmpegEncoder;
use crate::encode::session::EncoderSession;
use crate::foundation::core::PresentationTimeline;
use crate::foundation::error::{ImgseqError, ImgseqResult};
use crate::frames::source::FrameSource;
use crate::mux::muxer::{self, ContainerFormat, Mp4Muxer, TrackConfig, TrackIndex};

/// Cooperative cancellation flag shared between a caller and a running pipeline.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> ImgseqResult<()> {
        if self.is_cancelled() {
            return Err(ImgseqError::Cancelled);
        }
        Ok(())
    }
}

/// Summary of a finished encode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub frames: u64,
    pub samples: u64,
    /// Sample bytes written to the container.
    pub bytes: u64,
    pub duration_us: u64,
    pub surfaces: SurfacePoolStats,
}

type EncoderFactory = Arc<dyn Fn(&EncodeSession) -> Box<dyn VideoEncoder> + Send + Sync>;

/// Runs image folder → encoder → MP4 for one [`EncodeSession`] at a time.
#[derive(Clone)]
pub struct Pipeline {
    encoder_factory: EncoderFactory,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::with_encoder(|session| Box::new(FfmpegEncoder::new(session.ffmpeg_bin.clone())))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline using the system ffmpeg encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline using a custom encoder backend, built fresh for every run.
    pub fn with_encoder(
        factory: impl Fn(&EncodeSession) -> Box<dyn VideoEncoder> + Send + Sync + 'static,
    ) -> Self {
        Self {
            encoder_factory: Arc::new(factory),
        }
    }

    /// Encode `session` and return the absolute path of the written MP4.
    ///
    /// On failure the encoder is released, any partial output is removed, and the first error is
    /// returned unchanged.
    pub fn run(&self, session: &EncodeSession, cancel: &CancelToken) -> ImgseqResult<PathBuf> {
        self.run_with_stats(session, cancel).map(|(path, _)| path)
    }

    #[tracing::instrument(
        skip_all,
        fields(folder = %session.source_dir.display(), output = %session.output.display())
    )]
    pub fn run_with_stats(
        &self,
        session: &EncodeSession,
        cancel: &CancelToken,
    ) -> ImgseqResult<(PathBuf, EncodeStats)> {
        let cfg = session.validate()?;
        let frames = FrameSource::list(&session.source_dir)?;
        if frames.is_empty() {
            return Err(ImgseqError::configuration(format!(
                "no images found in '{}'",
                session.source_dir.display()
            )));
        }
        let output = std::path::absolute(&session.output).map_err(|e| {
            ImgseqError::io(
                format!("resolve output path '{}'", session.output.display()),
                e,
            )
        })?;
        muxer::remove_if_exists(&output)?;

        let pool = SurfacePool::new(session.surface_desc(), session.surface_pool_capacity())?;
        let mut encoder = EncoderSession::new((self.encoder_factory)(session))
            .with_timeouts(session.poll_interval, session.stall_timeout);

        tracing::info!(
            backend = encoder.backend_name(),
            frames = frames.len(),
            width = cfg.width,
            height = cfg.height,
            fps = cfg.fps.get(),
            "encode started"
        );
        let started = Instant::now();
        let mut run = Run {
            session,
            cancel,
            timeline: PresentationTimeline::new(cfg.fps),
            muxer: None,
            track: None,
            samples: 0,
        };

        match run.drive(&mut encoder, &pool, &frames, cfg, &output) {
            Ok(()) => {
                if let Err(e) = encoder.release() {
                    if let Err(re) = muxer::remove_if_exists(&output) {
                        tracing::warn!(
                            error = %re,
                            "failed to remove output after release failure"
                        );
                    }
                    return Err(e);
                }
                let muxer = run
                    .muxer
                    .as_ref()
                    .ok_or_else(|| ImgseqError::protocol("muxer missing after encode"))?;
                let stats = EncodeStats {
                    frames: frames.len() as u64,
                    samples: run.samples,
                    bytes: muxer.bytes_written(),
                    duration_us: muxer.duration_us(),
                    surfaces: pool.stats(),
                };
                drop(pool);
                tracing::info!(
                    samples = stats.samples,
                    bytes = stats.bytes,
                    duration_us = stats.duration_us,
                    surfaces_allocated = stats.surfaces.allocated,
                    surfaces_reused = stats.surfaces.reused,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "encode finished"
                );
                Ok((output, stats))
            }
            Err(err) => {
                tracing::warn!(error = %err, kind = %err.kind(), "encode failed; cleaning up");
                if let Err(e) = encoder.release() {
                    tracing::warn!(error = %e, "encoder release failed during cleanup");
                }
                if let Some(muxer) = run.muxer.as_mut()
                    && let Err(e) = muxer.abort()
                {
                    tracing::warn!(error = %e, "failed to remove partial output");
                }
                Err(err)
            }
        }
    }
}

struct Run<'a> {
    session: &'a EncodeSession,
    cancel: &'a CancelToken,
    timeline: PresentationTimeline,
    muxer: Option<Mp4Muxer>,
    track: Option<TrackIndex>,
    samples: u64,
}

impl Run<'_> {
    fn drive(
        &mut self,
        encoder: &mut EncoderSession,
        pool: &SurfacePool,
        frames: &FrameSource,
        cfg: EncoderConfig,
        output: &std::path::Path,
    ) -> ImgseqResult<()> {
        encoder.configure(cfg)?;
        encoder.start()?;
        self.muxer = Some(Mp4Muxer::open(output, ContainerFormat::Mp4)?);
        let mut compositor =
            Compositor::new(self.session.surface_desc(), self.session.background_rgba);

        for frame in frames.frames() {
            self.cancel.check()?;
            let frame = frame?;
            let mut surface = pool.acquire(self.session.stall_timeout)?;
            compositor.composite(&frame.image, &mut surface)?;
            let pts = self.timeline.pts(frame.index);
            tracing::trace!(index = frame.index.0, pts = pts.as_micros(), "submitting frame");
            encoder.submit(surface, pts)?;
            let units = encoder.drain_output(Duration::ZERO)?;
            self.forward(encoder, units)?;
        }

        encoder.signal_end_of_stream()?;
        let mut last_progress = Instant::now();
        while !encoder.is_complete() {
            self.cancel.check()?;
            let units = encoder.drain_output(self.session.poll_interval)?;
            if units.is_empty() {
                if last_progress.elapsed() >= self.session.stall_timeout {
                    return Err(ImgseqError::protocol(format!(
                        "encoder stalled: no output for {:?} while draining",
                        self.session.stall_timeout
                    )));
                }
                continue;
            }
            last_progress = Instant::now();
            self.forward(encoder, units)?;
        }

        self.muxer_mut()?.finalize()
    }

    /// Send picture units to the muxer, creating the track on the first one.
    fn forward(&mut self, encoder: &EncoderSession, units: Vec<AccessUnit>) -> ImgseqResult<()> {
        for unit in units.iter().filter(|u| u.is_sample()) {
            let track = match self.track {
                Some(track) => track,
                None => {
                    let params = encoder.track_parameters().cloned().ok_or_else(|| {
                        ImgseqError::protocol("encoder output arrived before its format")
                    })?;
                    let frame_duration_us = self.timeline.frame_duration_us();
                    let muxer = self.muxer_mut()?;
                    let track = muxer.add_track(TrackConfig {
                        params,
                        frame_duration_us,
                    })?;
                    muxer.start()?;
                    self.track = Some(track);
                    track
                }
            };
            self.muxer_mut()?.write_sample(track, unit)?;
            self.samples += 1;
        }
        Ok(())
    }

    fn muxer_mut(&mut self) -> ImgseqResult<&mut Mp4Muxer> {
        self.muxer
            .as_mut()
            .ok_or_else(|| ImgseqError::protocol("muxer not open"))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/orchestrator.rs"]
mod tests;
