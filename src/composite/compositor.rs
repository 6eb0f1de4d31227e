use image::{ImageBuffer, Rgba, imageops::FilterType};

use crate::{
    composite::surface::{PixelFormat, Surface, SurfaceDesc},
    foundation::{
        error::{ImgseqError, ImgseqResult},
        math::over_opaque,
    },
    frames::DecodedImage,
};

/// Draws decoded images into encoder input surfaces.
///
/// Sources are flattened over an opaque background colour, stretched to exactly the target size
/// with bilinear (triangle) filtering when sizes differ, then written in the surface's byte order.
/// Output is a pure function of the input image and settings.
#[derive(Debug)]
pub struct Compositor {
    desc: SurfaceDesc,
    bg_rgba: [u8; 4],
    scratch: Vec<u8>,
}

impl Compositor {
    pub fn new(desc: SurfaceDesc, bg_rgba: [u8; 4]) -> Self {
        Self {
            desc,
            bg_rgba,
            scratch: Vec::new(),
        }
    }

    pub fn desc(&self) -> SurfaceDesc {
        self.desc
    }

    pub fn composite(&mut self, src: &DecodedImage, dst: &mut Surface) -> ImgseqResult<()> {
        if dst.desc() != self.desc {
            return Err(ImgseqError::protocol(format!(
                "surface {:?} does not match compositor target {:?}",
                dst.desc(),
                self.desc
            )));
        }
        let expected = (src.width as usize)
            .saturating_mul(src.height as usize)
            .saturating_mul(4);
        if src.rgba8.len() != expected {
            return Err(ImgseqError::protocol(format!(
                "decoded image buffer is {} bytes, expected {expected} for {}x{}",
                src.rgba8.len(),
                src.width,
                src.height
            )));
        }

        self.scratch.resize(src.rgba8.len(), 0);
        flatten_over_bg(&mut self.scratch, &src.rgba8, self.bg_rgba);

        let resized;
        let pixels: &[u8] = if (src.width, src.height) == (self.desc.width, self.desc.height) {
            &self.scratch
        } else {
            let view = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(
                src.width,
                src.height,
                self.scratch.as_slice(),
            )
            .ok_or_else(|| ImgseqError::protocol("scratch buffer does not match image size"))?;
            resized = image::imageops::resize(
                &view,
                self.desc.width,
                self.desc.height,
                FilterType::Triangle,
            );
            resized.as_raw()
        };

        let mut lock = dst.lock();
        write_pixels(lock.pixels_mut(), pixels, self.desc.format);
        Ok(())
    }
}

fn flatten_over_bg(dst: &mut [u8], src: &[u8], bg_rgba: [u8; 4]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = s[3];
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }
        d[0] = over_opaque(s[0], a, bg_rgba[0]);
        d[1] = over_opaque(s[1], a, bg_rgba[1]);
        d[2] = over_opaque(s[2], a, bg_rgba[2]);
        d[3] = 255;
    }
}

fn write_pixels(dst: &mut [u8], opaque_rgba: &[u8], format: PixelFormat) {
    match format {
        PixelFormat::Rgba8 => dst.copy_from_slice(opaque_rgba),
        PixelFormat::Bgra8 => {
            for (d, s) in dst.chunks_exact_mut(4).zip(opaque_rgba.chunks_exact(4)) {
                d[0] = s[2];
                d[1] = s[1];
                d[2] = s[0];
                d[3] = s[3];
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composite/compositor.rs"]
mod tests;
