//! Detector output tensor decoding.
//!
//! Single-output detectors emit one 2-D matrix (after a batch dimension of 1)
//! with one axis over boxes and the other over attributes
//! `[cx, cy, w, h, scores...]`. Which axis is which varies between exports, so
//! the layout is inferred from the shape.

use super::letterbox::LetterboxTransform;
use crate::error::VisionError;
use watchpost_core::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[attributes, boxes]`
    AttributeMajor,
    /// `[boxes, attributes]`
    BoxMajor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMode {
    /// `4 + classes` attributes; the score is the best class probability.
    ClassMax,
    /// `5 + classes` attributes; attribute 4 already holds the final score
    /// and only the class is taken from the class block.
    Fused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
    pub layout: TensorLayout,
    pub attributes: usize,
    pub boxes: usize,
    pub score: ScoreMode,
}

impl OutputLayout {
    /// Infers the layout from a tensor shape.
    ///
    /// With a known class count the attribute axis must hold `4 + classes` or
    /// `5 + classes` values. Without one, the smaller axis is taken as the
    /// attribute axis in class-max form. Shapes that fit neither axis are an
    /// error.
    pub fn detect(shape: &[usize], num_classes: Option<usize>) -> Result<Self, VisionError> {
        let dims: Vec<usize> = match shape {
            [d0, d1] => vec![*d0, *d1],
            [1, d0, d1] => vec![*d0, *d1],
            _ => {
                return Err(VisionError::Inference(format!(
                    "unsupported detector output shape {:?}",
                    shape
                )))
            }
        };
        let (d0, d1) = (dims[0], dims[1]);
        let candidates = if d0 <= d1 {
            [(d0, d1, TensorLayout::AttributeMajor), (d1, d0, TensorLayout::BoxMajor)]
        } else {
            [(d1, d0, TensorLayout::BoxMajor), (d0, d1, TensorLayout::AttributeMajor)]
        };

        match num_classes {
            Some(classes) => {
                for (attributes, boxes, layout) in candidates {
                    let score = if attributes == 4 + classes {
                        ScoreMode::ClassMax
                    } else if attributes == 5 + classes {
                        ScoreMode::Fused
                    } else {
                        continue;
                    };
                    return Ok(Self { layout, attributes, boxes, score });
                }
                Err(VisionError::Inference(format!(
                    "detector output shape {:?} does not fit {} classes",
                    shape, classes
                )))
            }
            None => {
                let (attributes, boxes, layout) = candidates[0];
                if attributes < 5 {
                    return Err(VisionError::Inference(format!(
                        "detector output shape {:?} has no class scores",
                        shape
                    )));
                }
                Ok(Self {
                    layout,
                    attributes,
                    boxes,
                    score: ScoreMode::ClassMax,
                })
            }
        }
    }

    pub fn num_classes(&self) -> usize {
        match self.score {
            ScoreMode::ClassMax => self.attributes - 4,
            ScoreMode::Fused => self.attributes - 5,
        }
    }

    #[inline]
    fn get(&self, data: &[f32], attribute: usize, index: usize) -> f32 {
        match self.layout {
            TensorLayout::AttributeMajor => data[attribute * self.boxes + index],
            TensorLayout::BoxMajor => data[index * self.attributes + attribute],
        }
    }
}

/// A box in source image pixels that passed the score threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub score: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Candidate {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Rounded `[x, y, width, height]`.
    pub fn to_region(&self) -> Region {
        let x = self.x1.round() as i32;
        let y = self.y1.round() as i32;
        let width = (self.x2 - self.x1).round() as i32;
        let height = (self.y2 - self.y1).round() as i32;
        Region::new(x, y, width, height)
    }
}

/// Decodes every box scoring strictly above `threshold`, mapped back through
/// the letterbox and clamped to the source image. Boxes that collapse after
/// clamping are dropped.
pub fn decode_candidates(
    data: &[f32],
    layout: &OutputLayout,
    threshold: f32,
    transform: &LetterboxTransform,
) -> Result<Vec<Candidate>, VisionError> {
    let needed = layout.attributes * layout.boxes;
    if data.len() < needed {
        return Err(VisionError::Inference(format!(
            "detector output has {} values, layout needs {}",
            data.len(),
            needed
        )));
    }
    let max_x = transform.source_width.saturating_sub(1) as f32;
    let max_y = transform.source_height.saturating_sub(1) as f32;
    let class_start = match layout.score {
        ScoreMode::ClassMax => 4,
        ScoreMode::Fused => 5,
    };

    let mut candidates = Vec::new();
    for i in 0..layout.boxes {
        let mut class_id = 0;
        let mut best = f32::NEG_INFINITY;
        for (c, attribute) in (class_start..layout.attributes).enumerate() {
            let p = layout.get(data, attribute, i);
            if p > best {
                best = p;
                class_id = c;
            }
        }
        let score = match layout.score {
            ScoreMode::ClassMax => best,
            ScoreMode::Fused => layout.get(data, 4, i),
        };
        if !(score > threshold) {
            continue;
        }

        let cx = layout.get(data, 0, i);
        let cy = layout.get(data, 1, i);
        let w = layout.get(data, 2, i);
        let h = layout.get(data, 3, i);
        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
            continue;
        }
        let (x1, y1) = transform.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = transform.to_source(cx + w / 2.0, cy + h / 2.0);
        let x1 = x1.clamp(0.0, max_x);
        let y1 = y1.clamp(0.0, max_y);
        let x2 = x2.clamp(0.0, max_x);
        let y2 = y2.clamp(0.0, max_y);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        candidates.push(Candidate {
            class_id,
            score,
            x1,
            y1,
            x2,
            y2,
        });
    }
    Ok(candidates)
}
