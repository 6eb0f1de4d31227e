//! Low-level ISO BMFF box writing helpers.
//!
//! A box is a 4-byte big-endian size (header included) followed by a 4-byte type. Full boxes add a
//! version byte and 24 bits of flags. Sizes that are unknown up front are written as placeholders
//! and patched once the box content is complete.

use std::io::{Result, Seek, SeekFrom, Write};

use byteorder::{BigEndian, WriteBytesExt};

pub fn write_box_header<W: Write>(w: &mut W, box_type: &[u8; 4], size: u32) -> Result<()> {
    w.write_u32::<BigEndian>(size)?;
    w.write_all(box_type)
}

pub fn write_full_box_header<W: Write>(
    w: &mut W,
    box_type: &[u8; 4],
    size: u32,
    version: u8,
    flags: u32,
) -> Result<()> {
    write_box_header(w, box_type, size)?;
    write_version_flags(w, version, flags)
}

pub fn write_version_flags<W: Write>(w: &mut W, version: u8, flags: u32) -> Result<()> {
    w.write_u32::<BigEndian>((u32::from(version) << 24) | (flags & 0x00FF_FFFF))
}

/// Start a box of unknown size. Returns the offset to hand to [`end_box`].
pub fn begin_box<W: Write + Seek>(w: &mut W, box_type: &[u8; 4]) -> Result<u64> {
    let pos = w.stream_position()?;
    write_box_header(w, box_type, 0)?;
    Ok(pos)
}

/// Patch the size of the box started at `start` to end at the current position.
pub fn end_box<W: Write + Seek>(w: &mut W, start: u64) -> Result<()> {
    let end = w.stream_position()?;
    let size = u32::try_from(end - start).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("box of {} bytes exceeds the 32-bit size field", end - start),
        )
    })?;
    w.seek(SeekFrom::Start(start))?;
    w.write_u32::<BigEndian>(size)?;
    w.seek(SeekFrom::Start(end))?;
    Ok(())
}

/// Write a 64-bit box header with a zero size. Returns the offset of the 64-bit size field.
pub fn large_box_size_placeholder<W: Write + Seek>(w: &mut W, box_type: &[u8; 4]) -> Result<u64> {
    write_box_header(w, box_type, 1)?;
    let size_pos = w.stream_position()?;
    w.write_u64::<BigEndian>(0)?;
    Ok(size_pos)
}

/// Patch a 64-bit size written by [`large_box_size_placeholder`] to end at the current position.
pub fn fill_large_box_size<W: Write + Seek>(w: &mut W, size_pos: u64) -> Result<()> {
    let end = w.stream_position()?;
    let total = end - (size_pos - 8);
    w.seek(SeekFrom::Start(size_pos))?;
    w.write_u64::<BigEndian>(total)?;
    w.seek(SeekFrom::Start(end))?;
    Ok(())
}

pub fn write_zeros<W: Write>(w: &mut W, count: usize) -> Result<()> {
    const ZEROS: [u8; 64] = [0; 64];
    let mut left = count;
    while left > 0 {
        let n = left.min(ZEROS.len());
        w.write_all(&ZEROS[..n])?;
        left -= n;
    }
    Ok(())
}

/// Identity transformation matrix (16.16, last column 2.30).
pub fn write_unity_matrix<W: Write>(w: &mut W) -> Result<()> {
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        w.write_u32::<BigEndian>(v)?;
    }
    Ok(())
}

/// ISO 639-2/T code packed as three 5-bit letters.
pub fn encode_language(lang: &[u8; 3]) -> u16 {
    lang.iter()
        .fold(0u16, |acc, &c| (acc << 5) | u16::from(c.saturating_sub(0x60) & 0x1f))
}

/// Write a duration-bearing time field as 32 or 64 bits, depending on the box version.
pub fn write_time<W: Write>(w: &mut W, version: u8, value: u64) -> Result<()> {
    if version == 1 {
        w.write_u64::<BigEndian>(value)
    } else {
        w.write_u32::<BigEndian>(value as u32)
    }
}

/// Box version needed to store `values` (1 when any exceeds 32 bits).
pub fn version_for(values: &[u64]) -> u8 {
    u8::from(values.iter().any(|&v| v > u64::from(u32::MAX)))
}

#[cfg(test)]
#[path = "../../tests/unit/mux/atoms.rs"]
mod tests;
