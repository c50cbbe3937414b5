//! Aspect-preserving resize onto a padded detector canvas.

use super::pixels::chw_tensor;
use crate::error::VisionError;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Gray level of the padding bands.
pub const PAD_GRAY: u8 = 114;

/// Mapping between source image coordinates and letterboxed canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl LetterboxTransform {
    /// `scale = min(tw / w, th / h)`; the scaled image is centred with integer padding.
    pub fn compute(
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Self, VisionError> {
        if source_width == 0 || source_height == 0 || target_width == 0 || target_height == 0 {
            return Err(VisionError::Inference(format!(
                "cannot letterbox {}x{} onto {}x{}",
                source_width, source_height, target_width, target_height
            )));
        }
        let scale = (target_width as f32 / source_width as f32)
            .min(target_height as f32 / source_height as f32);
        let (new_w, new_h) = scaled_size(source_width, source_height, scale, target_width, target_height);
        Ok(Self {
            scale,
            pad_x: ((target_width - new_w) / 2) as f32,
            pad_y: ((target_height - new_h) / 2) as f32,
            source_width,
            source_height,
            target_width,
            target_height,
        })
    }

    /// Size of the resized image inside the canvas.
    pub fn scaled_size(&self) -> (u32, u32) {
        scaled_size(
            self.source_width,
            self.source_height,
            self.scale,
            self.target_width,
            self.target_height,
        )
    }

    pub fn to_canvas(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
    }

    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

fn scaled_size(w: u32, h: u32, scale: f32, tw: u32, th: u32) -> (u32, u32) {
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, tw);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, th);
    (new_w, new_h)
}

/// Detector input ready for inference.
#[derive(Debug, Clone)]
pub struct Letterboxed {
    /// `[3, target_height, target_width]`, RGB, values in `[0, 1]`
    pub tensor: Vec<f32>,
    pub transform: LetterboxTransform,
}

pub fn letterbox(
    image: &RgbImage,
    target_width: u32,
    target_height: u32,
) -> Result<Letterboxed, VisionError> {
    let (w, h) = image.dimensions();
    let transform = LetterboxTransform::compute(w, h, target_width, target_height)?;
    let (new_w, new_h) = transform.scaled_size();

    let mut canvas = RgbImage::from_pixel(target_width, target_height, Rgb([PAD_GRAY; 3]));
    if (new_w, new_h) == (w, h) {
        imageops::replace(&mut canvas, image, transform.pad_x as i64, transform.pad_y as i64);
    } else {
        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
        imageops::replace(&mut canvas, &resized, transform.pad_x as i64, transform.pad_y as i64);
    }

    Ok(Letterboxed {
        tensor: chw_tensor(&canvas, 1.0, 0.0),
        transform,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_image_pads_vertically() {
        let t = LetterboxTransform::compute(1280, 720, 640, 640).unwrap();
        assert_eq!(t.scale, 0.5);
        assert_eq!(t.scaled_size(), (640, 360));
        assert_eq!(t.pad_x, 0.0);
        assert_eq!(t.pad_y, 140.0);
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        assert!(LetterboxTransform::compute(0, 720, 640, 640).is_err());
        assert!(LetterboxTransform::compute(1280, 720, 640, 0).is_err());
    }

    #[test]
    fn test_letterbox_fills_padding_gray() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
        let boxed = letterbox(&image, 4, 4).unwrap();
        let plane = 16;
        assert_eq!(boxed.tensor.len(), plane * 3);
        // Row 0 is padding, row 1 is image.
        let gray = PAD_GRAY as f32 / 255.0;
        assert_eq!(boxed.tensor[0], gray);
        assert_eq!(boxed.tensor[4], 1.0);
        assert_eq!(boxed.tensor[plane + 4], 1.0);
    }
}
