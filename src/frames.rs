//! Input frame discovery and decoding.

pub mod source;

use std::path::PathBuf;

use crate::foundation::core::FrameIndex;

/// Decoded still image: straight-alpha RGBA8, row-major, tightly packed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba8: Vec<u8>,
}

/// One input frame in presentation order.
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: FrameIndex,
    pub path: PathBuf,
    pub image: DecodedImage,
}
