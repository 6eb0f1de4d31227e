use crate::foundation::core::Timestamp;

bitflags::bitflags! {
    /// Per-unit flags reported by the encoder.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AccessUnitFlags: u8 {
        /// Independently decodable (IDR) frame.
        const KEY_FRAME = 0b0000_0001;
        /// Parameter sets only (SPS/PPS); no picture data.
        const CODEC_CONFIG = 0b0000_0010;
        /// Last unit of the stream. May carry no payload.
        const END_OF_STREAM = 0b0000_0100;
    }
}

/// One unit of encoder output: an Annex B byte payload plus timing and flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    pub pts: Timestamp,
    pub flags: AccessUnitFlags,
}

impl AccessUnit {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(AccessUnitFlags::KEY_FRAME)
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(AccessUnitFlags::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(AccessUnitFlags::END_OF_STREAM)
    }

    /// `true` for units that carry a picture and belong in the container as a sample.
    pub fn is_sample(&self) -> bool {
        !self.is_codec_config() && !self.data.is_empty()
    }

    pub(crate) fn end_of_stream(pts: Timestamp) -> Self {
        Self {
            data: Vec::new(),
            pts,
            flags: AccessUnitFlags::END_OF_STREAM,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/access_unit.rs"]
mod tests;
