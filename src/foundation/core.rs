use crate::foundation::error::{ImgseqError, ImgseqResult};

/// Zero-based, dense frame ordinal.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Presentation time in microseconds from stream start.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn as_micros(self) -> u64 {
        self.0
    }
}

/// Integer frames-per-second. Always > 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Fps(u32);

impl Fps {
    pub fn new(fps: u32) -> ImgseqResult<Self> {
        if fps == 0 {
            return Err(ImgseqError::configuration("fps must be > 0"));
        }
        if fps > 1_000_000 {
            return Err(ImgseqError::configuration(
                "fps must not exceed 1_000_000 (frame duration would round to zero)",
            ));
        }
        Ok(Self(fps))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Fps {
    type Error = ImgseqError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Fps> for u32 {
    fn from(value: Fps) -> Self {
        value.0
    }
}

/// Maps frame ordinals to presentation times.
///
/// The frame duration is `1_000_000 / fps` microseconds (integer division) and frame `i` is
/// presented at `i * frame_duration`: gapless, strictly increasing, starting at zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentationTimeline {
    frame_duration_us: u64,
}

impl PresentationTimeline {
    pub fn new(fps: Fps) -> Self {
        Self {
            frame_duration_us: 1_000_000 / u64::from(fps.get()),
        }
    }

    pub fn frame_duration_us(self) -> u64 {
        self.frame_duration_us
    }

    pub fn pts(self, idx: FrameIndex) -> Timestamp {
        Timestamp(idx.0.saturating_mul(self.frame_duration_us))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
