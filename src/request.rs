//! JSON request/response contract for callers that drive imgseq from another process.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::composite::surface::PixelFormat;
use crate::config::{EncodeSession, parse_hex_color};
use crate::foundation::error::{ErrorKind, ImgseqError, ImgseqResult};

/// One encode job as submitted by a caller.
///
/// ```json
/// { "folder": "frames/", "fps": 30, "width": 1280, "height": 720, "output": "out.mp4",
///   "bitrate": 3000000, "keyframe_interval": 2, "pixel_format": "rgba",
///   "background": "#000000", "queue_depth": 4 }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodeRequest {
    pub folder: PathBuf,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub output: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    /// Seconds between keyframes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyframe_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<PixelFormat>,
    /// `#rrggbb` or `#rrggbbaa`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
}

impl EncodeRequest {
    pub fn from_reader<R: std::io::Read>(r: R) -> ImgseqResult<Self> {
        serde_json::from_reader(r)
            .map_err(|e| ImgseqError::configuration(format!("parse encode request JSON: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> ImgseqResult<Self> {
        let path = path.as_ref();
        let f = File::open(path)
            .map_err(|e| ImgseqError::io(format!("open request '{}'", path.display()), e))?;
        Self::from_reader(BufReader::new(f))
    }

    /// Convert to a session, filling defaults for omitted fields.
    ///
    /// Numeric ranges are checked later by [`EncodeSession::validate`]; only the background
    /// colour is parsed here.
    pub fn into_session(self) -> ImgseqResult<EncodeSession> {
        let mut session =
            EncodeSession::new(self.folder, self.output, self.fps, self.width, self.height);
        if let Some(bitrate) = self.bitrate {
            session.bitrate = bitrate;
        }
        if let Some(secs) = self.keyframe_interval {
            session.keyframe_interval_secs = secs;
        }
        if let Some(format) = self.pixel_format {
            session.pixel_format = format;
        }
        if let Some(bg) = self.background.as_deref() {
            session.background_rgba = parse_hex_color(bg)?;
        }
        if let Some(depth) = self.queue_depth {
            session.queue_depth = depth;
        }
        Ok(session)
    }
}

/// Terminal outcome of one request, serialized with a `status` tag.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EncodeResponse {
    Ok { path: PathBuf },
    Error { kind: ErrorKind, message: String },
}

impl EncodeResponse {
    pub fn from_result(result: &ImgseqResult<PathBuf>) -> Self {
        match result {
            Ok(path) => Self::Ok { path: path.clone() },
            Err(e) => Self::from_error(e),
        }
    }

    pub fn from_error(err: &ImgseqError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn to_json(&self) -> ImgseqResult<String> {
        serde_json::to_string(self)
            .map_err(|e| ImgseqError::Other(anyhow::anyhow!("serialize response: {e}")))
    }
}

#[cfg(test)]
#[path = "../tests/unit/request.rs"]
mod tests;
