//! H.264 encoding: backend trait, the ffmpeg backend, bitstream helpers and the session state
//! machine that sits between the compositor and the muxer.

pub mod access_unit;
pub mod backend;
pub mod ffmpeg;
pub mod h264;
pub mod session;
