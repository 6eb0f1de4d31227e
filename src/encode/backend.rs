use std::time::Duration;

use crate::composite::surface::{PixelFormat, PooledSurface, SurfaceDesc};
use crate::foundation::core::Fps;
use crate::foundation::error::{ImgseqError, ImgseqResult};

/// Parameters handed to an encoder backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    /// Average bitrate in bit/s.
    pub bitrate: u32,
    pub keyframe_interval_secs: u32,
    pub pixel_format: PixelFormat,
    /// Frames that may wait in the backend's input queue.
    pub queue_depth: usize,
}

impl EncoderConfig {
    pub fn surface_desc(&self) -> SurfaceDesc {
        SurfaceDesc {
            width: self.width,
            height: self.height,
            format: self.pixel_format,
        }
    }

    /// GOP length in frames (`fps * keyframe_interval_secs`, at least 1).
    pub fn keyframe_interval_frames(&self) -> u32 {
        self.fps
            .get()
            .saturating_mul(self.keyframe_interval_secs)
            .max(1)
    }

    /// Checks shared by every backend producing 4:2:0 H.264.
    pub fn validate(&self) -> ImgseqResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ImgseqError::configuration("width/height must be > 0"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(ImgseqError::configuration(format!(
                "width/height must be even for 4:2:0 H.264, got {}x{}",
                self.width, self.height
            )));
        }
        if self.bitrate == 0 {
            return Err(ImgseqError::configuration("bitrate must be > 0"));
        }
        if self.queue_depth == 0 {
            return Err(ImgseqError::configuration("queue depth must be > 0"));
        }
        Ok(())
    }
}

/// Result of offering a frame to a backend's bounded input queue.
#[derive(Debug)]
pub enum PushOutcome {
    Accepted,
    /// Queue full; the frame is handed back untouched.
    Full(PooledSurface),
}

/// Raw backend output, in decode order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderEvent {
    /// One complete Annex B access unit.
    Packet(Vec<u8>),
    /// The backend flushed everything after `finish_input`.
    End,
    /// The backend died; carries its diagnostic output.
    Failed(String),
}

/// An H.264 encoder the session can drive.
///
/// Backends own their threads and queues. `push_frame` must never block longer than `timeout`
/// and must never drop a frame it returns as accepted.
pub trait VideoEncoder: Send {
    fn name(&self) -> &'static str;

    /// Check that the backend can encode `cfg` at all, without starting anything.
    fn probe(&mut self, cfg: &EncoderConfig) -> ImgseqResult<()>;

    fn start(&mut self, cfg: &EncoderConfig) -> ImgseqResult<()>;

    fn push_frame(&mut self, frame: PooledSurface, timeout: Duration)
    -> ImgseqResult<PushOutcome>;

    /// Close the input side. Remaining output is still delivered, followed by
    /// [`EncoderEvent::End`].
    fn finish_input(&mut self) -> ImgseqResult<()>;

    /// Wait up to `timeout` for the next event; `None` when nothing arrived in time.
    fn poll_output(&mut self, timeout: Duration) -> ImgseqResult<Option<EncoderEvent>>;

    /// Stop the backend and reclaim its resources. Must be idempotent.
    fn shutdown(&mut self) -> ImgseqResult<()>;
}
