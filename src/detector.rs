//! UltraFace-slim face detector, used to pick the face-mesh region.

use anyhow::Result;
use image::imageops::{self, FilterType};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use crate::inference::build_session;
use crate::types::{Frame, Rect};

const INPUT_W: u32 = 320;
const INPUT_H: u32 = 240;
const SCORE_THRESHOLD: f32 = 0.7;
const CENTER_VARIANCE: f32 = 0.1;
const SIZE_VARIANCE: f32 = 0.2;

/// Prior box in normalised input coordinates: (cx, cy, w, h).
type Anchor = (f32, f32, f32, f32);

pub struct FaceDetector {
    session: Session,
    anchors: Vec<Anchor>,
}

impl FaceDetector {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = build_session(model_path)?;
        Ok(Self {
            session,
            anchors: generate_anchors(INPUT_W, INPUT_H),
        })
    }

    /// Highest-scoring face in frame pixel coordinates.
    pub fn detect(&mut self, frame: &Frame) -> Result<Option<Rect>> {
        let resized = imageops::resize(frame, INPUT_W, INPUT_H, FilterType::Triangle);

        // NCHW, (p - 127) / 128
        let plane = (INPUT_W * INPUT_H) as usize;
        let mut input = vec![0.0f32; plane * 3];
        for (i, px) in resized.pixels().enumerate() {
            for c in 0..3 {
                input[c * plane + i] = (px[c] as f32 - 127.0) / 128.0;
            }
        }

        let tensor = Tensor::from_array((vec![1, 3, 240, 320], input))?;
        let outputs = self.session.run(ort::inputs![tensor])?;
        let (_, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
        let (_, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;

        let Some(rect) = best_box(&self.anchors, scores, boxes, SCORE_THRESHOLD) else {
            return Ok(None);
        };
        let sx = frame.width() as f32 / INPUT_W as f32;
        let sy = frame.height() as f32 / INPUT_H as f32;
        Ok(Some(Rect::new(rect.x * sx, rect.y * sy, rect.width * sx, rect.height * sy)))
    }
}

/// Decodes the best anchor above `threshold` into input-pixel space.
/// `scores` is [background, face] per anchor, `boxes` is the encoded offset.
fn best_box(anchors: &[Anchor], scores: &[f32], boxes: &[f32], threshold: f32) -> Option<Rect> {
    let mut best: Option<(f32, Rect)> = None;
    for (i, &(ax, ay, aw, ah)) in anchors.iter().enumerate() {
        let Some(&score) = scores.get(i * 2 + 1) else {
            break;
        };
        if score <= threshold || best.is_some_and(|(s, _)| score <= s) {
            continue;
        }
        let Some(enc) = boxes.get(i * 4..i * 4 + 4) else {
            break;
        };
        let cx = enc[0] * CENTER_VARIANCE * aw + ax;
        let cy = enc[1] * CENTER_VARIANCE * ah + ay;
        let w = (enc[2] * SIZE_VARIANCE).exp() * aw;
        let h = (enc[3] * SIZE_VARIANCE).exp() * ah;
        let rect = Rect::new(
            (cx - w / 2.0) * INPUT_W as f32,
            (cy - h / 2.0) * INPUT_H as f32,
            w * INPUT_W as f32,
            h * INPUT_H as f32,
        );
        best = Some((score, rect));
    }
    best.map(|(_, r)| r)
}

fn generate_anchors(width: u32, height: u32) -> Vec<Anchor> {
    let strides = [8u32, 16, 32, 64];
    let min_boxes: [&[f32]; 4] = [&[10.0, 16.0, 24.0], &[32.0, 48.0], &[64.0, 96.0], &[128.0, 192.0, 256.0]];
    let (w, h) = (width as f32, height as f32);

    let mut anchors = Vec::new();
    for (stride, sizes) in strides.iter().zip(min_boxes) {
        let s = *stride as f32;
        let feature_w = (w / s).ceil() as u32;
        let feature_h = (h / s).ceil() as u32;
        for v in 0..feature_h {
            for u in 0..feature_w {
                let cx = (u as f32 * s + s / 2.0) / w;
                let cy = (v as f32 * s + s / 2.0) / h;
                for &size in sizes {
                    anchors.push((cx, cy, size / w, size / h));
                }
            }
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_count_matches_model() {
        assert_eq!(generate_anchors(320, 240).len(), 4420);
    }

    #[test]
    fn test_best_box_decodes_zero_offset_as_anchor() {
        let anchors = vec![(0.5, 0.5, 0.1, 0.1), (0.2, 0.2, 0.1, 0.1)];
        let scores = [0.1, 0.9, 0.8, 0.2];
        let boxes = [0.0; 8];
        let r = best_box(&anchors, &scores, &boxes, 0.7).expect("face");
        assert!((r.x - 144.0).abs() < 1e-3, "x {}", r.x);
        assert!((r.y - 108.0).abs() < 1e-3, "y {}", r.y);
        assert!((r.width - 32.0).abs() < 1e-3);
        assert!((r.height - 24.0).abs() < 1e-3);
    }

    #[test]
    fn test_best_box_picks_highest_score() {
        let anchors = vec![(0.2, 0.2, 0.1, 0.1), (0.8, 0.8, 0.1, 0.1)];
        let scores = [0.2, 0.75, 0.05, 0.95];
        let r = best_box(&anchors, &scores, &[0.0; 8], 0.7).expect("face");
        assert!(r.x > 160.0, "second anchor wins");
    }

    #[test]
    fn test_best_box_below_threshold() {
        let anchors = vec![(0.5, 0.5, 0.1, 0.1)];
        assert!(best_box(&anchors, &[0.5, 0.5], &[0.0; 4], 0.7).is_none());
    }
}
