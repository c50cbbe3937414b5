//! Letterbox geometry and detector output decoding

use image::{Rgb, RgbImage};
use proptest::prelude::*;
use watchpost_eye::codec::{
    letterbox, non_max_suppression, Candidate, DetectionCodec, LetterboxTransform, RawTensor, PAD_GRAY,
};

proptest! {
    #[test]
    fn test_letterbox_round_trip(
        img_w in 1u32..4000,
        img_h in 1u32..4000,
        target_w in 1u32..2048,
        target_h in 1u32..2048,
        fx in 0.0f32..1.0,
        fy in 0.0f32..1.0,
    ) {
        let t = LetterboxTransform::compute(img_w, img_h, target_w, target_h).unwrap();
        let px = fx * (img_w - 1) as f32;
        let py = fy * (img_h - 1) as f32;
        let (cx, cy) = t.to_canvas(px, py);
        let (bx, by) = t.to_source(cx, cy);
        prop_assert!((bx - px).abs() <= 1.0, "x {} -> {} -> {}", px, cx, bx);
        prop_assert!((by - py).abs() <= 1.0, "y {} -> {} -> {}", py, cy, by);

        let (new_w, new_h) = t.scaled_size();
        prop_assert!(new_w <= target_w && new_h <= target_h);
        prop_assert!(t.pad_x + new_w as f32 <= target_w as f32);
        prop_assert!(t.pad_y + new_h as f32 <= target_h as f32);
    }
}

#[test]
fn test_letterboxed_image_sits_inside_padding() {
    let image = RgbImage::from_pixel(200, 100, Rgb([0, 255, 0]));
    let boxed = letterbox(&image, 64, 64).unwrap();
    let t = boxed.transform;
    assert_eq!(t.scaled_size(), (64, 32));
    assert_eq!((t.pad_x, t.pad_y), (0.0, 16.0));

    let plane = 64 * 64;
    let green = |x: usize, y: usize| boxed.tensor[plane + y * 64 + x];
    let gray = PAD_GRAY as f32 / 255.0;
    assert_eq!(green(10, 5), gray);
    assert_eq!(green(10, 30), 1.0);
    assert_eq!(green(10, 60), gray);
}

#[test]
fn test_boxes_map_back_to_source_pixels() {
    // 200x100 image letterboxed to 64x64: scale 0.32, pad_y 16.
    let t = LetterboxTransform::compute(200, 100, 64, 64).unwrap();
    let (cx, cy) = t.to_canvas(100.0, 50.0);
    let (w, h) = (20.0 * t.scale, 10.0 * t.scale);
    // Box-major [N=1, 4 + 1 classes]
    let output = RawTensor::new(vec![1, 1, 5], vec![cx, cy, w, h, 0.8]);
    let kept = DetectionCodec::default()
        .decode(&output, &t, Some(1), 0.25)
        .unwrap();
    assert_eq!(kept.len(), 1);
    let region = kept[0].to_region();
    assert!((region.x - 90).abs() <= 1);
    assert!((region.y - 45).abs() <= 1);
    assert!((region.width - 20).abs() <= 1);
    assert!((region.height - 10).abs() <= 1);
}

#[test]
fn test_confidence_boundary_is_strict() {
    let t = LetterboxTransform::compute(100, 100, 100, 100).unwrap();
    let codec = DetectionCodec::default();
    let at = RawTensor::new(vec![1, 5, 1], vec![50.0, 50.0, 10.0, 10.0, 0.6]);
    assert!(codec.decode(&at, &t, Some(1), 0.6).unwrap().is_empty());
    let above = RawTensor::new(vec![1, 5, 1], vec![50.0, 50.0, 10.0, 10.0, 0.6 + 1e-4]);
    assert_eq!(codec.decode(&above, &t, Some(1), 0.6).unwrap().len(), 1);
}

#[test]
fn test_attribute_and_box_major_agree() {
    let t = LetterboxTransform::compute(640, 640, 640, 640).unwrap();
    let boxes = [
        [100.0f32, 100.0, 50.0, 50.0, 0.9, 0.1],
        [400.0, 300.0, 80.0, 40.0, 0.2, 0.7],
        [102.0, 101.0, 50.0, 50.0, 0.8, 0.05],
    ];
    let box_major: Vec<f32> = boxes.iter().flatten().copied().collect();
    let mut attr_major = Vec::new();
    for a in 0..6 {
        for b in &boxes {
            attr_major.push(b[a]);
        }
    }
    let codec = DetectionCodec::default();
    let from_box = codec
        .decode(&RawTensor::new(vec![1, 3, 6], box_major), &t, Some(2), 0.5)
        .unwrap();
    let from_attr = codec
        .decode(&RawTensor::new(vec![1, 6, 3], attr_major), &t, Some(2), 0.5)
        .unwrap();
    assert_eq!(from_box, from_attr);
    // Third box overlaps the first and is suppressed.
    assert_eq!(from_box.len(), 2);
    assert_eq!(from_box[0].class_id, 0);
    assert_eq!(from_box[1].class_id, 1);
}

#[test]
fn test_nms_spec_pairs() {
    let b = |score, x2, y2| Candidate {
        class_id: 0,
        score,
        x1: 0.0,
        y1: 0.0,
        x2,
        y2,
    };
    let kept = non_max_suppression(vec![b(0.7, 100.0, 90.0), b(0.9, 100.0, 100.0)], 0.45, 300);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].score, 0.9);

    let kept = non_max_suppression(vec![b(0.9, 10.0, 10.0), b(0.7, 10.0, 1.0)], 0.45, 300);
    assert_eq!(kept.len(), 2);
}
