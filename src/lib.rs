//! imgseq turns an ordered directory of still images into an H.264 MP4.
//!
//! Frames are decoded in file-name order, flattened onto fixed-size surfaces, encoded by an
//! [`encode::backend::VideoEncoder`] (the system `ffmpeg` with libx264 by default) and written
//! to a single-track MP4 by a pure Rust muxer.
//!
//! - Describe the job with an [`EncodeSession`] (or parse an [`EncodeRequest`])
//! - Run it with [`Pipeline::run`], or in the background with [`pipeline::worker::spawn`]
#![forbid(unsafe_code)]

pub mod composite;
pub mod config;
pub mod encode;
pub mod foundation;
pub mod frames;
pub mod mux;
pub mod pipeline;
pub mod request;

pub use crate::composite::surface::{PixelFormat, SurfaceDesc};
pub use crate::config::EncodeSession;
pub use crate::encode::access_unit::{AccessUnit, AccessUnitFlags};
pub use crate::encode::ffmpeg::FfmpegEncoder;
pub use crate::foundation::core::{Fps, FrameIndex, PresentationTimeline, Timestamp};
pub use crate::foundation::error::{ErrorKind, ImgseqError, ImgseqResult};
pub use crate::frames::source::FrameSource;
pub use crate::mux::muxer::{ContainerFormat, Mp4Muxer};
pub use crate::pipeline::orchestrator::{CancelToken, EncodeStats, Pipeline};
pub use crate::pipeline::worker::EncodeJob;
pub use crate::request::{EncodeRequest, EncodeResponse};
