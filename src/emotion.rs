use anyhow::Result;
use image::imageops::{self, FilterType};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use tracing::info;

use crate::inference::{build_session, softmax};
use crate::types::Frame;

/// FER+ class order.
pub const EMOTIONS: [&str; 8] = [
    "neutral",
    "happiness",
    "surprise",
    "sadness",
    "anger",
    "disgust",
    "fear",
    "contempt",
];

/// Emotions that count as distraction on their own.
pub const DISTRACTED_EMOTIONS: [&str; 3] = ["bored", "tired", "disgust"];

/// Dominant-emotion classifier for a cropped face.
pub trait EmotionClassifier: Send {
    fn classify(&mut self, face: &Frame) -> Result<String>;
}

pub struct OnnxEmotionClassifier {
    session: Session,
}

impl OnnxEmotionClassifier {
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Loading emotion model from {}", model_path.display());
        Ok(Self {
            session: build_session(model_path)?,
        })
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn classify(&mut self, face: &Frame) -> Result<String> {
        let input = grayscale_input(face);
        let tensor = Tensor::from_array((vec![1, 1, 64, 64], input))?;
        let outputs = self.session.run(ort::inputs![tensor])?;
        let (_, logits) = outputs[0].try_extract_tensor::<f32>()?;
        Ok(dominant(&softmax(logits)).to_string())
    }
}

/// 64x64 luma in 0..255, row-major.
fn grayscale_input(face: &Frame) -> Vec<f32> {
    let gray = imageops::grayscale(face);
    let resized = imageops::resize(&gray, 64, 64, FilterType::Triangle);
    resized.pixels().map(|p| p[0] as f32).collect()
}

fn dominant(probs: &[f32]) -> &'static str {
    probs
        .iter()
        .take(EMOTIONS.len())
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| EMOTIONS[i])
        .unwrap_or("Unknown")
}

pub fn is_distracting(emotion: &str) -> bool {
    DISTRACTED_EMOTIONS
        .iter()
        .any(|e| e.eq_ignore_ascii_case(emotion.trim()))
}
