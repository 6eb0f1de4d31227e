//! Minimal H.264 bitstream handling: Annex B NAL scanning, access-unit splitting and SPS parsing.
//!
//! Only what the muxer needs is parsed: parameter sets for `avcC`, picture dimensions, and the
//! NAL types that mark key frames and access-unit boundaries.

use crate::foundation::error::{ImgseqError, ImgseqResult};

/// H.264 NAL unit type constants.
pub mod nal_type {
    pub const NON_IDR_SLICE: u8 = 1;
    pub const IDR_SLICE: u8 = 5;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
}

pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1f)
}

/// Iterator over the NAL units of an Annex B byte stream, without start codes or trailing zeros.
pub struct AnnexBNalIter<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> AnnexBNalIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }
}

impl<'a> Iterator for AnnexBNalIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (pos, len) = find_start_code(self.data, self.cursor)?;
            let nal_start = pos + len;
            let nal_end = find_start_code(self.data, nal_start).map_or(self.data.len(), |(p, _)| p);
            self.cursor = nal_end;

            let mut nal = &self.data[nal_start..nal_end];
            while let [rest @ .., 0] = nal {
                nal = rest;
            }
            if !nal.is_empty() {
                return Some(nal);
            }
        }
    }
}

/// Position and length of the next 3- or 4-byte start code at or after `from`.
pub fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && data.get(i + 3) == Some(&1) {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Append `nal` to `out` with a 4-byte start code.
pub fn push_annexb(out: &mut Vec<u8>, nal: &[u8]) {
    out.extend_from_slice(&[0, 0, 0, 1]);
    out.extend_from_slice(nal);
}

/// Convert Annex B to 4-byte big-endian length-prefixed NAL units (the MP4 sample format),
/// dropping parameter sets and access-unit delimiters.
pub fn annexb_to_length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    for nal in AnnexBNalIter::new(data) {
        if matches!(
            nal_unit_type(nal),
            Some(nal_type::SPS | nal_type::PPS | nal_type::AUD)
        ) {
            continue;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// An encoder output unit split into parameter sets and picture data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitUnit {
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
    /// Remaining NAL units (Annex B), without SPS/PPS/AUD.
    pub picture: Vec<u8>,
    pub key_frame: bool,
    pub has_slice: bool,
}

pub fn split_access_unit(data: &[u8]) -> SplitUnit {
    let mut out = SplitUnit::default();
    for nal in AnnexBNalIter::new(data) {
        match nal_unit_type(nal) {
            Some(nal_type::SPS) => out.sps = Some(nal.to_vec()),
            Some(nal_type::PPS) => out.pps = Some(nal.to_vec()),
            Some(nal_type::AUD) => {}
            Some(t) => {
                if t == nal_type::IDR_SLICE {
                    out.key_frame = true;
                }
                if (nal_type::NON_IDR_SLICE..=nal_type::IDR_SLICE).contains(&t) {
                    out.has_slice = true;
                }
                push_annexb(&mut out.picture, nal);
            }
            None => {}
        }
    }
    out
}

/// Negotiated H.264 output format: parameter sets plus the picture size they declare.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecParameters {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub profile_idc: u8,
    pub profile_compat: u8,
    pub level_idc: u8,
}

impl CodecParameters {
    pub fn from_parameter_sets(sps: Vec<u8>, pps: Vec<u8>) -> ImgseqResult<Self> {
        if nal_unit_type(&sps) != Some(nal_type::SPS) {
            return Err(ImgseqError::protocol("codec config is missing a valid SPS"));
        }
        if nal_unit_type(&pps) != Some(nal_type::PPS) {
            return Err(ImgseqError::protocol("codec config is missing a valid PPS"));
        }
        let info = parse_sps(&sps)?;
        Ok(Self {
            width: info.width,
            height: info.height,
            profile_idc: info.profile_idc,
            profile_compat: info.profile_compat,
            level_idc: info.level_idc,
            sps,
            pps,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub profile_compat: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

/// Parse the fields of an SPS NAL unit (header byte included) up to the frame cropping window.
pub fn parse_sps(nal: &[u8]) -> ImgseqResult<SpsInfo> {
    if nal.len() < 4 {
        return Err(ImgseqError::protocol("SPS is truncated"));
    }
    let rbsp = unescape_rbsp(&nal[1..]);
    if rbsp.len() < 4 {
        return Err(ImgseqError::protocol("SPS is truncated"));
    }
    let profile_idc = rbsp[0];
    let profile_compat = rbsp[1];
    let level_idc = rbsp[2];
    let mut r = BitReader::new(&rbsp[3..]);

    let _sps_id = r.ue()?;
    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = r.ue()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = r.bit()? == 1;
        }
        let _bit_depth_luma = r.ue()?;
        let _bit_depth_chroma = r.ue()?;
        let _qpprime_bypass = r.bit()?;
        if r.bit()? == 1 {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.bit()? == 1 {
                    r.skip_scaling_list(if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let _log2_max_frame_num = r.ue()?;
    match r.ue()? {
        0 => {
            let _log2_max_poc_lsb = r.ue()?;
        }
        1 => {
            let _delta_always_zero = r.bit()?;
            let _offset_non_ref = r.se()?;
            let _offset_top_bottom = r.se()?;
            for _ in 0..r.ue()? {
                let _offset_ref_frame = r.se()?;
            }
        }
        _ => {}
    }
    let _max_num_ref_frames = r.ue()?;
    let _gaps_allowed = r.bit()?;
    let width_mbs = r.ue()? + 1;
    let height_map_units = r.ue()? + 1;
    let frame_mbs_only = r.bit()?;
    if frame_mbs_only == 0 {
        let _mb_adaptive = r.bit()?;
    }
    let _direct_8x8 = r.bit()?;

    let (mut crop_l, mut crop_r, mut crop_t, mut crop_b) = (0, 0, 0, 0);
    if r.bit()? == 1 {
        crop_l = r.ue()?;
        crop_r = r.ue()?;
        crop_t = r.ue()?;
        crop_b = r.ue()?;
    }

    let chroma_array_type = if separate_colour_plane {
        0
    } else {
        chroma_format_idc
    };
    let (sub_w, sub_h) = match chroma_array_type {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let field_factor = 2 - frame_mbs_only;
    let (crop_unit_x, crop_unit_y) = if chroma_array_type == 0 {
        (1, field_factor)
    } else {
        (sub_w, sub_h * field_factor)
    };

    let full_w = width_mbs * 16;
    let full_h = field_factor * height_map_units * 16;
    let width = full_w
        .checked_sub(crop_unit_x * (crop_l + crop_r))
        .ok_or_else(|| ImgseqError::protocol("SPS cropping exceeds picture width"))?;
    let height = full_h
        .checked_sub(crop_unit_y * (crop_t + crop_b))
        .ok_or_else(|| ImgseqError::protocol("SPS cropping exceeds picture height"))?;

    Ok(SpsInfo {
        profile_idc,
        profile_compat,
        level_idc,
        width,
        height,
    })
}

/// Strip emulation-prevention bytes (`00 00 03` -> `00 00`).
fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bit(&mut self) -> ImgseqResult<u32> {
        let byte = self
            .data
            .get(self.pos / 8)
            .ok_or_else(|| ImgseqError::protocol("SPS ended unexpectedly"))?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(u32::from(bit))
    }

    fn ue(&mut self) -> ImgseqResult<u32> {
        let mut leading = 0;
        while self.bit()? == 0 {
            leading += 1;
            if leading > 31 {
                return Err(ImgseqError::protocol("SPS exp-Golomb code too long"));
            }
        }
        let mut suffix = 0u32;
        for _ in 0..leading {
            suffix = (suffix << 1) | self.bit()?;
        }
        Ok(((1u64 << leading) - 1 + u64::from(suffix)) as u32)
    }

    fn se(&mut self) -> ImgseqResult<i32> {
        let k = self.ue()?;
        let magnitude = k.div_ceil(2) as i32;
        Ok(if k % 2 == 1 { magnitude } else { -magnitude })
    }

    fn skip_scaling_list(&mut self, size: usize) -> ImgseqResult<()> {
        let mut last = 8i32;
        let mut next = 8i32;
        for _ in 0..size {
            if next != 0 {
                next = (last + self.se()? + 256) % 256;
            }
            if next != 0 {
                last = next;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/h264.rs"]
mod tests;
