//! Conversion of captured frames into RGB images and planar tensors.

use crate::error::VisionError;
use image::{ImageFormat, Rgb, RgbImage};
use watchpost_core::{CapturedFrame, FrameEncoding};

/// Decodes a captured frame into an RGB image.
///
/// Placeholder frames carry no pixels and are rejected.
pub fn frame_to_rgb(frame: &CapturedFrame) -> Result<RgbImage, VisionError> {
    if frame.is_synthetic() {
        return Err(VisionError::Inference(
            "placeholder frame has no pixel data".to_string(),
        ));
    }
    match frame.encoding() {
        FrameEncoding::Jpeg => {
            let image = image::load_from_memory_with_format(frame.payload(), ImageFormat::Jpeg)?;
            Ok(image.to_rgb8())
        }
        FrameEncoding::Nv12 => nv12_to_rgb(frame),
        FrameEncoding::RawBgr => bgr_to_rgb(frame),
    }
}

fn check_dims(frame: &CapturedFrame) -> Result<(usize, usize), VisionError> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    if w == 0 || h == 0 {
        return Err(VisionError::Inference(format!(
            "{:?} frame has no dimensions",
            frame.encoding()
        )));
    }
    Ok((w, h))
}

fn nv12_to_rgb(frame: &CapturedFrame) -> Result<RgbImage, VisionError> {
    let (w, h) = check_dims(frame)?;
    let stride = frame.stride() as usize;
    let uv_stride = frame.uv_stride() as usize;
    let data = frame.payload();
    let chroma = stride * h;
    let chroma_width = (w + 1) / 2 * 2;
    let required = chroma + uv_stride * ((h + 1) / 2 - 1) + chroma_width;
    if stride < w || uv_stride < chroma_width || data.len() < required {
        return Err(VisionError::Inference(format!(
            "NV12 payload of {} bytes too small for {}x{}",
            data.len(),
            w,
            h
        )));
    }

    let mut image = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        let uv_row = chroma + (y / 2) * uv_stride;
        for x in 0..w {
            let luma = data[y * stride + x] as i32 - 16;
            let uv = uv_row + (x & !1);
            let u = data[uv] as i32 - 128;
            let v = data[uv + 1] as i32 - 128;
            // BT.601 limited range
            let c = 298 * luma;
            let r = (c + 409 * v + 128) >> 8;
            let g = (c - 100 * u - 208 * v + 128) >> 8;
            let b = (c + 516 * u + 128) >> 8;
            image.put_pixel(x as u32, y as u32, Rgb([clamp(r), clamp(g), clamp(b)]));
        }
    }
    Ok(image)
}

fn bgr_to_rgb(frame: &CapturedFrame) -> Result<RgbImage, VisionError> {
    let (w, h) = check_dims(frame)?;
    let stride = frame.stride() as usize;
    let data = frame.payload();
    if stride < w * 3 || data.len() < stride * (h - 1) + w * 3 {
        return Err(VisionError::Inference(format!(
            "BGR payload of {} bytes too small for {}x{}",
            data.len(),
            w,
            h
        )));
    }
    let mut image = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        let row = &data[y * stride..y * stride + w * 3];
        for (x, px) in row.chunks_exact(3).enumerate() {
            image.put_pixel(x as u32, y as u32, Rgb([px[2], px[1], px[0]]));
        }
    }
    Ok(image)
}

#[inline]
fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Flattens an RGB image into a `[3, H, W]` plane-major tensor, mapping each
/// byte `p` to `p / 255 * scale + offset`.
pub fn chw_tensor(image: &RgbImage, scale: f32, offset: f32) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let plane = (w * h) as usize;
    let mut tensor = vec![0.0f32; plane * 3];
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = (y * w + x) as usize;
        for c in 0..3 {
            tensor[idx + c * plane] = pixel[c] as f32 / 255.0 * scale + offset;
        }
    }
    tensor
}
