use std::collections::BTreeMap;
use std::fmt;

use image::{ImageBuffer, Rgb};
use serde::{Deserialize, Serialize};

/// RGB8 camera frame, the unit every stage of the pipeline works on.
pub type Frame = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Represents a single landmark point.
/// `x`/`y` are normalised to the frame (0..1), `z` is model depth.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// Landmarks of one detected face, indexed the way the face mesh emits them
/// (468 mesh points, plus 10 iris points when refined).
#[derive(Debug, Clone, Default)]
pub struct Landmarks {
    pub points: Vec<Point3D>,
}

impl Landmarks {
    pub fn new(points: Vec<Point3D>) -> Self {
        Self { points }
    }

    pub fn get(&self, index: usize) -> Option<&Point3D> {
        self.points.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Pixel-space rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Pixel bounding box, always inside the frame it was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusState {
    Focused,
    Distracted,
}

impl FocusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Focused => "Focused",
            Self::Distracted => "Distracted",
        }
    }
}

impl fmt::Display for FocusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete gaze direction relative to the calibrated baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GazeLabel {
    Unknown,
    EyeContact,
    LookingLeft,
    LookingRight,
    LookingUp,
    LookingDown,
    /// No trackable face in the frame.
    NoFace,
}

impl GazeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::EyeContact => "Eye Contact",
            Self::LookingLeft => "Looking Left",
            Self::LookingRight => "Looking Right",
            Self::LookingUp => "Looking Up",
            Self::LookingDown => "Looking Down",
            Self::NoFace => "No Face",
        }
    }

    /// Whether this direction counts as looking away from the screen.
    pub fn is_averted(&self) -> bool {
        matches!(
            self,
            Self::LookingLeft | Self::LookingRight | Self::LookingUp | Self::LookingDown
        )
    }
}

impl fmt::Display for GazeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised pupil offset within the eye span, averaged over both eyes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    #[serde(rename = "v")]
    pub vertical: f32,
    #[serde(rename = "h")]
    pub horizontal: f32,
}

/// Zero-offset reference for gaze classification. Replaced wholesale on
/// recalibration, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBaseline {
    pub vertical: f32,
    pub horizontal: f32,
    /// Median sample per calibration point, keyed by point label.
    #[serde(default)]
    pub points: BTreeMap<String, GazeSample>,
}

impl CalibrationBaseline {
    pub fn new(vertical: f32, horizontal: f32) -> Self {
        Self {
            vertical,
            horizontal,
            points: BTreeMap::new(),
        }
    }
}

/// Outcome of the last completed intentional-action detection.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentionalActionResult {
    pub detected: bool,
    pub label: Option<String>,
    pub confidence: f32,
}

impl Default for IntentionalActionResult {
    fn default() -> Self {
        Self {
            detected: false,
            label: None,
            confidence: 0.0,
        }
    }
}

/// Labels produced for one analysed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLabels {
    pub emotion: String,
    pub gaze: GazeLabel,
    pub focus: FocusState,
}

/// Full per-frame result: the annotated image plus its labels.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub frame: Frame,
    pub labels: FrameLabels,
    pub face: Option<BoundingBox>,
}
