use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::detector::FaceDetector;
use crate::error::MonitorError;
use crate::gaze::{
    LEFT_EYE_BOTTOM, LEFT_EYE_INNER, LEFT_EYE_OUTER, LEFT_EYE_TOP, RIGHT_EYE_BOTTOM,
    RIGHT_EYE_INNER, RIGHT_EYE_OUTER, RIGHT_EYE_TOP,
};
use crate::types::{Frame, Landmarks, Point3D, Rect};

const MESH_INPUT: u32 = 192;
const MESH_POINTS: usize = 468;
const REFINED_POINTS: usize = 478;

/// Produces normalised landmarks for the single most prominent face.
pub trait LandmarkDetector: Send {
    /// `Ok(None)` when no face is in view.
    fn detect(&mut self, frame: &Frame) -> Result<Option<Landmarks>>;
}

/// CPU session with full graph optimisation.
pub fn build_session(path: &Path) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .with_execution_providers([ort::execution_providers::CPUExecutionProvider::default().build()])?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load ONNX model {}", path.display()))?;
    Ok(session)
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|x| x / sum).collect()
}

/// MediaPipe-style face mesh on an UltraFace ROI.
pub struct FaceMesh {
    session: Session,
    detector: Option<FaceDetector>,
}

impl FaceMesh {
    /// Fails when the mesh model is missing. A missing detector degrades to
    /// running the mesh on the full frame.
    pub fn new(mesh_path: &Path, detector_path: &Path) -> Result<Self> {
        if !mesh_path.exists() {
            return Err(MonitorError::ModelUnavailable(format!("face mesh not found at {}", mesh_path.display())).into());
        }
        let detector = if detector_path.exists() {
            info!("Loading face detector from {}", detector_path.display());
            Some(FaceDetector::new(detector_path)?)
        } else {
            warn!("Face detector not found at {}. Accuracy will be poor.", detector_path.display());
            None
        };
        info!("Loading face mesh from {}", mesh_path.display());
        let session = build_session(mesh_path)?;
        Ok(Self { session, detector })
    }

    fn run_mesh(&mut self, crop: &Frame) -> Result<Vec<f32>> {
        let resized = imageops::resize(crop, MESH_INPUT, MESH_INPUT, FilterType::Triangle);
        let mut input = Vec::with_capacity((MESH_INPUT * MESH_INPUT * 3) as usize);
        for px in resized.pixels() {
            for c in px.0 {
                input.push(c as f32 / 127.5 - 1.0);
            }
        }
        let shape = vec![1, 192, 192, 3];
        let tensor = Tensor::from_array((shape, input))?;
        let outputs = self.session.run(ort::inputs![tensor])?;
        let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        Ok(data.to_vec())
    }
}

impl LandmarkDetector for FaceMesh {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Landmarks>> {
        let (fw, fh) = (frame.width() as f32, frame.height() as f32);
        if fw == 0.0 || fh == 0.0 {
            return Ok(None);
        }

        let roi = match &mut self.detector {
            Some(det) => match det.detect(frame)? {
                Some(rect) => expand_roi(rect, 0.25, fw, fh),
                None => return Ok(None),
            },
            None => Rect::new(0.0, 0.0, fw, fh),
        };
        if roi.width < 1.0 || roi.height < 1.0 {
            return Ok(None);
        }

        let crop = imageops::crop_imm(
            frame,
            roi.x as u32,
            roi.y as u32,
            roi.width as u32,
            roi.height as u32,
        )
        .to_image();
        let raw = self.run_mesh(&crop)?;

        let count = if raw.len() >= REFINED_POINTS * 3 {
            REFINED_POINTS
        } else if raw.len() >= MESH_POINTS * 3 {
            MESH_POINTS
        } else {
            debug!(len = raw.len(), "face mesh output too short");
            return Ok(None);
        };

        let sx = roi.width / MESH_INPUT as f32;
        let sy = roi.height / MESH_INPUT as f32;
        let points = (0..count)
            .map(|i| Point3D {
                x: (roi.x + raw[i * 3] * sx) / fw,
                y: (roi.y + raw[i * 3 + 1] * sy) / fh,
                z: raw[i * 3 + 2],
            })
            .collect();

        let mut landmarks = Landmarks::new(points);
        if count == MESH_POINTS {
            append_estimated_pupils(frame, &mut landmarks);
        }
        Ok(Some(landmarks))
    }
}

/// Pads a pixel rect by `ratio` of its size and clips it to the frame.
fn expand_roi(rect: Rect, ratio: f32, fw: f32, fh: f32) -> Rect {
    let x = (rect.x - rect.width * ratio / 2.0).max(0.0);
    let y = (rect.y - rect.height * ratio / 2.0).max(0.0);
    let w = (rect.width * (1.0 + ratio)).min(fw - x);
    let h = (rect.height * (1.0 + ratio)).min(fh - y);
    Rect::new(x, y, w.max(0.0), h.max(0.0))
}

/// Fills the ten iris slots (468..478) from a dark-blob search inside each
/// eye. Each iris ring collapses onto its estimated centre.
pub fn append_estimated_pupils(frame: &Frame, landmarks: &mut Landmarks) {
    let eyes = [
        [LEFT_EYE_INNER, LEFT_EYE_OUTER, LEFT_EYE_TOP, LEFT_EYE_BOTTOM],
        [RIGHT_EYE_INNER, RIGHT_EYE_OUTER, RIGHT_EYE_TOP, RIGHT_EYE_BOTTOM],
    ];
    let mut centres = Vec::with_capacity(2);
    for eye in eyes {
        let Some(corners) = eye
            .iter()
            .map(|&i| landmarks.get(i).copied())
            .collect::<Option<Vec<_>>>()
        else {
            return;
        };
        let Some(centre) = estimate_pupil(frame, &corners) else {
            return;
        };
        centres.push(centre);
    }
    landmarks.points.truncate(MESH_POINTS);
    for centre in centres {
        landmarks.points.extend(std::iter::repeat(centre).take(5));
    }
}

/// Darkness-weighted centroid of the pixels within 30 luma levels of the
/// darkest one, inside the box spanned by the eye's corner and lid points.
pub fn estimate_pupil(frame: &Frame, eye: &[Point3D]) -> Option<Point3D> {
    let (fw, fh) = (frame.width() as f32, frame.height() as f32);
    let min_x = eye.iter().map(|p| p.x).fold(f32::INFINITY, f32::min) * fw;
    let max_x = eye.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max) * fw;
    let min_y = eye.iter().map(|p| p.y).fold(f32::INFINITY, f32::min) * fh;
    let max_y = eye.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max) * fh;

    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil() as u32).min(frame.width());
    let y1 = (max_y.ceil() as u32).min(frame.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let luma = |x: u32, y: u32| {
        let px = frame.get_pixel(x, y);
        (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) as u8
    };

    let mut min_val = u8::MAX;
    for y in y0..y1 {
        for x in x0..x1 {
            min_val = min_val.min(luma(x, y));
        }
    }
    let threshold = min_val.saturating_add(30);

    let (mut sum_x, mut sum_y, mut weight) = (0.0f32, 0.0f32, 0.0f32);
    for y in y0..y1 {
        for x in x0..x1 {
            let l = luma(x, y);
            if l <= threshold {
                let w = (threshold - l) as f32 + 1.0;
                sum_x += (x as f32 + 0.5) * w;
                sum_y += (y as f32 + 0.5) * w;
                weight += w;
            }
        }
    }
    (weight > 0.0).then(|| Point3D::new(sum_x / weight / fw, sum_y / weight / fh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(p[2] > p[1] && p[1] > p[0]);
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn test_expand_roi_clips_to_frame() {
        let r = expand_roi(Rect::new(0.0, 0.0, 100.0, 80.0), 0.25, 110.0, 90.0);
        assert_eq!(r.x, 0.0);
        assert_eq!(r.y, 0.0);
        assert_eq!(r.width, 110.0);
        assert_eq!(r.height, 90.0);

        let r = expand_roi(Rect::new(40.0, 40.0, 40.0, 40.0), 0.5, 200.0, 200.0);
        assert_eq!(r, Rect::new(30.0, 30.0, 60.0, 60.0));
    }

    #[test]
    fn test_estimate_pupil_finds_dark_blob() {
        // Bright eye region 40..80 x 40..60 with a dark pupil near (70, 50)
        let mut frame = Frame::from_pixel(100, 100, Rgb([220, 220, 220]));
        for y in 47..53 {
            for x in 67..73 {
                frame.put_pixel(x, y, Rgb([10, 10, 10]));
            }
        }
        let eye = [
            Point3D::new(0.40, 0.50),
            Point3D::new(0.80, 0.50),
            Point3D::new(0.60, 0.40),
            Point3D::new(0.60, 0.60),
        ];
        let p = estimate_pupil(&frame, &eye).expect("pupil");
        assert!((p.x - 0.70).abs() < 0.01, "x {}", p.x);
        assert!((p.y - 0.50).abs() < 0.01, "y {}", p.y);
    }

    #[test]
    fn test_append_estimated_pupils_fills_iris_slots() {
        let frame = Frame::from_pixel(100, 100, Rgb([128, 128, 128]));
        let mut landmarks = crate::gaze::tests::face_with_ratios(0.5, 0.5);
        landmarks.points.truncate(MESH_POINTS);
        append_estimated_pupils(&frame, &mut landmarks);
        assert_eq!(landmarks.points.len(), REFINED_POINTS);
        // Uniform eye region: centroid is the box centre
        let left = landmarks.get(crate::gaze::LEFT_PUPIL).unwrap();
        assert!((left.x - 0.35).abs() < 0.01, "left x {}", left.x);
        let right = landmarks.get(crate::gaze::RIGHT_PUPIL).unwrap();
        assert!((right.x - 0.65).abs() < 0.01, "right x {}", right.x);
    }
}
