use std::path::{Path, PathBuf};

use crate::{
    foundation::{
        core::FrameIndex,
        error::{ImgseqError, ImgseqResult},
    },
    frames::{DecodedImage, Frame},
};

/// File extensions treated as still images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff", "webp", "tga", "qoi",
];

/// Ordered list of the still images inside one directory.
///
/// Order is a byte-wise comparison of file names. It is not numeric-aware: callers must zero-pad
/// frame numbers (`frame-00001.png`) to get the intended order.
#[derive(Clone, Debug)]
pub struct FrameSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl FrameSource {
    /// Enumerate the image files directly inside `dir`.
    pub fn list(dir: impl AsRef<Path>) -> ImgseqResult<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| ImgseqError::io(format!("read directory '{}'", dir.display()), e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| ImgseqError::io(format!("read directory '{}'", dir.display()), e))?;
            let path = entry.path();
            if !is_image_file_name(&path) || !path.is_file() {
                continue;
            }
            files.push(path);
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        if has_mixed_digit_widths(&files) {
            tracing::warn!(
                dir = %dir.display(),
                "frame names have numeric parts of different widths; ordering is lexicographic, \
                 zero-pad frame numbers to get numeric order"
            );
        }

        tracing::debug!(dir = %dir.display(), frames = files.len(), "listed frames");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.files
    }

    /// Decode one image file to straight-alpha RGBA8.
    pub fn decode(path: &Path) -> ImgseqResult<DecodedImage> {
        let reader = image::ImageReader::open(path)
            .map_err(|e| ImgseqError::decode(path, format!("open failed: {e}")))?
            .with_guessed_format()
            .map_err(|e| ImgseqError::decode(path, format!("format detection failed: {e}")))?;
        let img = reader
            .decode()
            .map_err(|e| ImgseqError::decode(path, e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(ImgseqError::decode(path, "image has zero width or height"));
        }
        Ok(DecodedImage {
            width,
            height,
            rgba8: rgba.into_raw(),
        })
    }

    /// Decode frames lazily in order. Stops being useful after the first error: callers treat a
    /// decode failure as fatal for the whole sequence.
    pub fn frames(&self) -> impl Iterator<Item = ImgseqResult<Frame>> + '_ {
        self.files.iter().enumerate().map(|(i, path)| {
            Ok(Frame {
                index: FrameIndex(i as u64),
                path: path.clone(),
                image: Self::decode(path)?,
            })
        })
    }
}

fn is_image_file_name(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    if name.as_encoded_bytes().starts_with(b".") {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// `true` when the last run of digits in the file stems differs in width across files.
fn has_mixed_digit_widths(files: &[PathBuf]) -> bool {
    let mut widths = files
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()))
        .filter_map(last_digit_run_len);
    let Some(first) = widths.next() else {
        return false;
    };
    widths.any(|w| w != first)
}

fn last_digit_run_len(stem: &str) -> Option<usize> {
    let bytes = stem.as_bytes();
    let end = bytes.iter().rposition(u8::is_ascii_digit)? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map_or(0, |i| i + 1);
    Some(end - start)
}

#[cfg(test)]
#[path = "../../tests/unit/frames/source.rs"]
mod tests;
