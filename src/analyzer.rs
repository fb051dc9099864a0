//! Per-frame pipeline: landmarks, face box, emotion, gaze, focus.

use image::imageops;
use tracing::{debug, warn};

use crate::emotion::{is_distracting, EmotionClassifier};
use crate::gaze::GazeClassifier;
use crate::inference::LandmarkDetector;
use crate::overlay;
use crate::types::{
    BoundingBox, CalibrationBaseline, FocusState, Frame, FrameAnalysis, FrameLabels, GazeLabel,
    Landmarks,
};

pub const UNKNOWN_EMOTION: &str = "Unknown";
const BOX_PADDING: f32 = 0.05;

/// Focus from an emotion/gaze pair. Eye Contact and Unknown gaze never force
/// Distracted on their own.
pub fn interpret_focus(emotion: &str, gaze: GazeLabel) -> FocusState {
    if is_distracting(emotion) || gaze.is_averted() {
        FocusState::Distracted
    } else {
        FocusState::Focused
    }
}

/// Pixel box around the landmark extrema, padded by `pad` of its size on each
/// side and clamped to the frame.
pub fn bbox_from_landmarks(landmarks: &Landmarks, width: u32, height: u32, pad: f32) -> Option<BoundingBox> {
    if landmarks.is_empty() || width == 0 || height == 0 {
        return None;
    }
    let (w, h) = (width as i64, height as i64);
    let xs = landmarks.points.iter().map(|p| p.x);
    let ys = landmarks.points.iter().map(|p| p.y);
    let min_x = xs.clone().fold(f32::INFINITY, f32::min);
    let max_x = xs.fold(f32::NEG_INFINITY, f32::max);
    let min_y = ys.clone().fold(f32::INFINITY, f32::min);
    let max_y = ys.fold(f32::NEG_INFINITY, f32::max);
    if ![min_x, max_x, min_y, max_y].iter().all(|v| v.is_finite()) {
        return None;
    }

    let mut x0 = ((min_x * width as f32) as i64).max(0);
    let mut x1 = ((max_x * width as f32) as i64).min(w - 1);
    let mut y0 = ((min_y * height as f32) as i64).max(0);
    let mut y1 = ((max_y * height as f32) as i64).min(h - 1);

    let dx = ((x1 - x0) as f32 * pad) as i64;
    let dy = ((y1 - y0) as f32 * pad) as i64;
    x0 = (x0 - dx).max(0);
    y0 = (y0 - dy).max(0);
    x1 = (x1 + dx).min(w - 1);
    y1 = (y1 + dy).min(h - 1);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(BoundingBox {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

pub struct FrameAnalyzer {
    landmarks: Box<dyn LandmarkDetector>,
    emotion: Option<Box<dyn EmotionClassifier>>,
    gaze: GazeClassifier,
    skip_emotion: bool,
    draw_overlay: bool,
}

impl FrameAnalyzer {
    pub fn new(landmarks: Box<dyn LandmarkDetector>, emotion: Option<Box<dyn EmotionClassifier>>) -> Self {
        Self {
            landmarks,
            emotion,
            gaze: GazeClassifier::default(),
            skip_emotion: false,
            draw_overlay: true,
        }
    }

    pub fn with_baseline(mut self, baseline: Option<CalibrationBaseline>) -> Self {
        self.gaze.set_baseline(baseline);
        self
    }

    pub fn with_overlay(mut self, enabled: bool) -> Self {
        self.draw_overlay = enabled;
        self
    }

    pub fn set_baseline(&mut self, baseline: Option<CalibrationBaseline>) {
        self.gaze.set_baseline(baseline);
    }

    pub fn baseline(&self) -> Option<&CalibrationBaseline> {
        self.gaze.baseline()
    }

    pub fn set_skip_emotion(&mut self, skip: bool) {
        self.skip_emotion = skip;
    }

    pub fn skip_emotion(&self) -> bool {
        self.skip_emotion
    }

    /// Raw landmark detection. Errors count as "no face".
    pub fn detect_landmarks(&mut self, frame: &Frame) -> Option<Landmarks> {
        match self.landmarks.detect(frame) {
            Ok(found) => found.filter(|l| !l.is_empty()),
            Err(e) => {
                debug!("Landmark detection failed: {:#}", e);
                None
            }
        }
    }

    /// Never fails: every internal error degrades to a sentinel label.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameAnalysis {
        let mut annotated = frame.clone();

        let Some(landmarks) = self.detect_landmarks(frame) else {
            let labels = FrameLabels {
                emotion: UNKNOWN_EMOTION.to_string(),
                gaze: GazeLabel::NoFace,
                focus: FocusState::Distracted,
            };
            if self.draw_overlay {
                overlay::annotate(&mut annotated, &labels, None);
            }
            return FrameAnalysis { frame: annotated, labels, face: None };
        };

        let face = bbox_from_landmarks(&landmarks, frame.width(), frame.height(), BOX_PADDING);
        let emotion = self.classify_emotion(frame, face);
        let gaze = self.gaze.classify(Some(&landmarks));
        let focus = interpret_focus(&emotion, gaze);

        let labels = FrameLabels { emotion, gaze, focus };
        if self.draw_overlay {
            overlay::annotate(&mut annotated, &labels, face);
        }
        FrameAnalysis { frame: annotated, labels, face }
    }

    fn classify_emotion(&mut self, frame: &Frame, face: Option<BoundingBox>) -> String {
        if self.skip_emotion {
            return UNKNOWN_EMOTION.to_string();
        }
        let (Some(classifier), Some(bbox)) = (self.emotion.as_mut(), face) else {
            return UNKNOWN_EMOTION.to_string();
        };
        let crop = imageops::crop_imm(frame, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
        match classifier.classify(&crop) {
            Ok(label) => label,
            Err(e) => {
                warn!("Emotion classification failed: {:#}", e);
                UNKNOWN_EMOTION.to_string()
            }
        }
    }
}
