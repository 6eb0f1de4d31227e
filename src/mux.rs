//! MP4 container writing.

pub mod atoms;
pub mod mp4;
pub mod muxer;
