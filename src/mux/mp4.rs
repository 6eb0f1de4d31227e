//! Structural MP4 boxes for a single H.264 video track: `ftyp` up front, `moov` at the end.

use std::io::{Result, Seek, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::encode::h264::CodecParameters;
use crate::mux::atoms::{
    begin_box, encode_language, end_box, version_for, write_box_header, write_full_box_header,
    write_time, write_unity_matrix, write_version_flags, write_zeros,
};

/// Media timescale: presentation times are microseconds.
pub const MEDIA_TIMESCALE: u32 = 1_000_000;
/// Movie timescale used by `mvhd` and `tkhd`.
pub const MOVIE_TIMESCALE: u32 = 1_000;

const TRACK_ID: u32 = 1;

/// Where one sample landed in `mdat` and how long it lasts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleInfo {
    pub offset: u64,
    pub size: u32,
    /// In [`MEDIA_TIMESCALE`] units.
    pub duration: u32,
    pub is_sync: bool,
}

/// Everything `moov` needs to describe the video track.
#[derive(Clone, Debug)]
pub struct VideoTrackInfo<'a> {
    pub params: &'a CodecParameters,
    pub samples: &'a [SampleInfo],
}

impl VideoTrackInfo<'_> {
    pub fn media_duration(&self) -> u64 {
        self.samples.iter().map(|s| u64::from(s.duration)).sum()
    }

    fn movie_duration(&self) -> u64 {
        to_movie_timescale(self.media_duration())
    }
}

/// Convert media ticks (µs) to movie ticks (ms), rounding to nearest.
pub fn to_movie_timescale(media: u64) -> u64 {
    let per = u64::from(MEDIA_TIMESCALE / MOVIE_TIMESCALE);
    media.saturating_add(per / 2) / per
}

pub fn write_ftyp<W: Write>(w: &mut W) -> Result<()> {
    let brands: [&[u8; 4]; 4] = [b"isom", b"iso2", b"avc1", b"mp41"];
    write_box_header(w, b"ftyp", 16 + 4 * brands.len() as u32)?;
    w.write_all(b"isom")?;
    w.write_u32::<BigEndian>(0x200)?;
    for brand in brands {
        w.write_all(brand)?;
    }
    Ok(())
}

pub fn write_moov<W: Write + Seek>(w: &mut W, track: &VideoTrackInfo<'_>) -> Result<()> {
    let moov = begin_box(w, b"moov")?;
    write_mvhd(w, track.movie_duration())?;
    write_trak(w, track)?;
    end_box(w, moov)
}

fn write_mvhd<W: Write + Seek>(w: &mut W, duration: u64) -> Result<()> {
    let version = version_for(&[duration]);
    let start = begin_box(w, b"mvhd")?;
    write_version_flags(w, version, 0)?;
    write_time(w, version, 0)?; // creation_time
    write_time(w, version, 0)?; // modification_time
    w.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
    write_time(w, version, duration)?;
    w.write_u32::<BigEndian>(0x0001_0000)?; // rate 1.0
    w.write_u16::<BigEndian>(0x0100)?; // volume 1.0
    write_zeros(w, 10)?;
    write_unity_matrix(w)?;
    write_zeros(w, 24)?;
    w.write_u32::<BigEndian>(TRACK_ID + 1)?;
    end_box(w, start)
}

fn write_trak<W: Write + Seek>(w: &mut W, track: &VideoTrackInfo<'_>) -> Result<()> {
    let start = begin_box(w, b"trak")?;
    write_tkhd(w, track)?;
    write_mdia(w, track)?;
    end_box(w, start)
}

fn write_tkhd<W: Write + Seek>(w: &mut W, track: &VideoTrackInfo<'_>) -> Result<()> {
    let duration = track.movie_duration();
    let version = version_for(&[duration]);
    let start = begin_box(w, b"tkhd")?;
    // enabled | in_movie | in_preview
    write_version_flags(w, version, 0x000007)?;
    write_time(w, version, 0)?;
    write_time(w, version, 0)?;
    w.write_u32::<BigEndian>(TRACK_ID)?;
    write_zeros(w, 4)?;
    write_time(w, version, duration)?;
    write_zeros(w, 8)?;
    w.write_i16::<BigEndian>(0)?; // layer
    w.write_i16::<BigEndian>(0)?; // alternate_group
    w.write_u16::<BigEndian>(0)?; // volume
    write_zeros(w, 2)?;
    write_unity_matrix(w)?;
    w.write_u32::<BigEndian>(track.params.width << 16)?;
    w.write_u32::<BigEndian>(track.params.height << 16)?;
    end_box(w, start)
}

fn write_mdia<W: Write + Seek>(w: &mut W, track: &VideoTrackInfo<'_>) -> Result<()> {
    let start = begin_box(w, b"mdia")?;
    write_mdhd(w, track.media_duration())?;
    write_hdlr(w)?;
    write_minf(w, track)?;
    end_box(w, start)
}

fn write_mdhd<W: Write + Seek>(w: &mut W, duration: u64) -> Result<()> {
    let version = version_for(&[duration]);
    let start = begin_box(w, b"mdhd")?;
    write_version_flags(w, version, 0)?;
    write_time(w, version, 0)?;
    write_time(w, version, 0)?;
    w.write_u32::<BigEndian>(MEDIA_TIMESCALE)?;
    write_time(w, version, duration)?;
    w.write_u16::<BigEndian>(encode_language(b"und"))?;
    w.write_u16::<BigEndian>(0)?;
    end_box(w, start)
}

fn write_hdlr<W: Write + Seek>(w: &mut W) -> Result<()> {
    let start = begin_box(w, b"hdlr")?;
    write_version_flags(w, 0, 0)?;
    write_zeros(w, 4)?;
    w.write_all(b"vide")?;
    write_zeros(w, 12)?;
    w.write_all(b"VideoHandler\0")?;
    end_box(w, start)
}

fn write_minf<W: Write + Seek>(w: &mut W, track: &VideoTrackInfo<'_>) -> Result<()> {
    let start = begin_box(w, b"minf")?;

    write_full_box_header(w, b"vmhd", 20, 0, 0x000001)?;
    write_zeros(w, 8)?; // graphicsmode + opcolor

    let dinf = begin_box(w, b"dinf")?;
    let dref = begin_box(w, b"dref")?;
    write_version_flags(w, 0, 0)?;
    w.write_u32::<BigEndian>(1)?;
    // Self-contained: media lives in this file.
    write_full_box_header(w, b"url ", 12, 0, 0x000001)?;
    end_box(w, dref)?;
    end_box(w, dinf)?;

    write_stbl(w, track)?;
    end_box(w, start)
}

fn write_stbl<W: Write + Seek>(w: &mut W, track: &VideoTrackInfo<'_>) -> Result<()> {
    let start = begin_box(w, b"stbl")?;
    write_stsd(w, track.params)?;
    write_stts(w, track.samples)?;
    write_stss(w, track.samples)?;
    write_stsc(w, track.samples)?;
    write_stsz(w, track.samples)?;
    write_chunk_offsets(w, track.samples)?;
    end_box(w, start)
}

fn write_stsd<W: Write + Seek>(w: &mut W, params: &CodecParameters) -> Result<()> {
    let start = begin_box(w, b"stsd")?;
    write_version_flags(w, 0, 0)?;
    w.write_u32::<BigEndian>(1)?;

    let avc1 = begin_box(w, b"avc1")?;
    write_zeros(w, 6)?;
    w.write_u16::<BigEndian>(1)?; // data_reference_index
    write_zeros(w, 16)?;
    w.write_u16::<BigEndian>(params.width as u16)?;
    w.write_u16::<BigEndian>(params.height as u16)?;
    w.write_u32::<BigEndian>(0x0048_0000)?; // 72 dpi
    w.write_u32::<BigEndian>(0x0048_0000)?;
    write_zeros(w, 4)?;
    w.write_u16::<BigEndian>(1)?; // frame_count
    write_zeros(w, 32)?; // compressorname
    w.write_u16::<BigEndian>(0x0018)?;
    w.write_i16::<BigEndian>(-1)?;
    write_avcc(w, params)?;
    end_box(w, avc1)?;

    end_box(w, start)
}

fn write_avcc<W: Write + Seek>(w: &mut W, params: &CodecParameters) -> Result<()> {
    let start = begin_box(w, b"avcC")?;
    w.write_u8(1)?;
    w.write_u8(params.profile_idc)?;
    w.write_u8(params.profile_compat)?;
    w.write_u8(params.level_idc)?;
    w.write_u8(0xFF)?; // 4-byte NAL lengths
    w.write_u8(0xE1)?; // one SPS
    w.write_u16::<BigEndian>(params.sps.len() as u16)?;
    w.write_all(&params.sps)?;
    w.write_u8(1)?;
    w.write_u16::<BigEndian>(params.pps.len() as u16)?;
    w.write_all(&params.pps)?;
    end_box(w, start)
}

/// `(count, duration)` runs.
pub fn duration_runs(samples: &[SampleInfo]) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for s in samples {
        match runs.last_mut() {
            Some((count, duration)) if *duration == s.duration => *count += 1,
            _ => runs.push((1, s.duration)),
        }
    }
    runs
}

fn write_stts<W: Write + Seek>(w: &mut W, samples: &[SampleInfo]) -> Result<()> {
    let runs = duration_runs(samples);
    let start = begin_box(w, b"stts")?;
    write_version_flags(w, 0, 0)?;
    w.write_u32::<BigEndian>(runs.len() as u32)?;
    for (count, duration) in runs {
        w.write_u32::<BigEndian>(count)?;
        w.write_u32::<BigEndian>(duration)?;
    }
    end_box(w, start)
}

fn write_stss<W: Write + Seek>(w: &mut W, samples: &[SampleInfo]) -> Result<()> {
    let sync: Vec<u32> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_sync)
        .map(|(i, _)| i as u32 + 1)
        .collect();
    let start = begin_box(w, b"stss")?;
    write_version_flags(w, 0, 0)?;
    w.write_u32::<BigEndian>(sync.len() as u32)?;
    for n in sync {
        w.write_u32::<BigEndian>(n)?;
    }
    end_box(w, start)
}

/// One sample per chunk.
fn write_stsc<W: Write + Seek>(w: &mut W, samples: &[SampleInfo]) -> Result<()> {
    let start = begin_box(w, b"stsc")?;
    write_version_flags(w, 0, 0)?;
    if samples.is_empty() {
        w.write_u32::<BigEndian>(0)?;
    } else {
        for v in [1u32, 1, 1, 1] {
            w.write_u32::<BigEndian>(v)?;
        }
    }
    end_box(w, start)
}

fn write_stsz<W: Write + Seek>(w: &mut W, samples: &[SampleInfo]) -> Result<()> {
    let start = begin_box(w, b"stsz")?;
    write_version_flags(w, 0, 0)?;
    let uniform = samples
        .first()
        .map(|first| first.size)
        .filter(|&size| samples.iter().all(|s| s.size == size));
    w.write_u32::<BigEndian>(uniform.unwrap_or(0))?;
    w.write_u32::<BigEndian>(samples.len() as u32)?;
    if uniform.is_none() {
        for s in samples {
            w.write_u32::<BigEndian>(s.size)?;
        }
    }
    end_box(w, start)
}

fn write_chunk_offsets<W: Write + Seek>(w: &mut W, samples: &[SampleInfo]) -> Result<()> {
    let wide = samples.iter().any(|s| s.offset > u64::from(u32::MAX));
    let start = begin_box(w, if wide { b"co64" } else { b"stco" })?;
    write_version_flags(w, 0, 0)?;
    w.write_u32::<BigEndian>(samples.len() as u32)?;
    for s in samples {
        if wide {
            w.write_u64::<BigEndian>(s.offset)?;
        } else {
            w.write_u32::<BigEndian>(s.offset as u32)?;
        }
    }
    end_box(w, start)
}

#[cfg(test)]
#[path = "../../tests/unit/mux/mp4.rs"]
mod tests;
