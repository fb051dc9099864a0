//! CLIP zero-shot scorer backing intentional-action detection.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Error, Result};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use image::imageops::{self, FilterType};
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;
use tracing::info;

use crate::inference::{build_session, softmax};
use crate::intentional::ActionScorer;
use crate::types::Frame;

const IMAGE_SIZE: u32 = 224;
const MAX_TOKENS: usize = 77;
const LOGIT_SCALE: f32 = 100.0;
const MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Where the CLIP files come from. Local paths win; anything left unset is
/// fetched from `repo` on the Hugging Face hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipFiles {
    pub repo: String,
    pub vision_model: Option<PathBuf>,
    pub text_model: Option<PathBuf>,
    pub tokenizer: Option<PathBuf>,
}

impl Default for ClipFiles {
    fn default() -> Self {
        Self {
            repo: "Xenova/clip-vit-base-patch32".to_string(),
            vision_model: None,
            text_model: None,
            tokenizer: None,
        }
    }
}

impl ClipFiles {
    fn resolve(&self) -> Result<(PathBuf, PathBuf, PathBuf)> {
        let all_local = self.vision_model.is_some() && self.text_model.is_some() && self.tokenizer.is_some();
        let repo = if all_local {
            None
        } else {
            info!("Fetching CLIP files from {}", self.repo);
            let api = Api::new()?;
            Some(api.repo(Repo::new(self.repo.clone(), RepoType::Model)))
        };
        let fetch = |local: &Option<PathBuf>, remote: &str| -> Result<PathBuf> {
            match (local, &repo) {
                (Some(path), _) => Ok(path.clone()),
                (None, Some(repo)) => repo
                    .get(remote)
                    .with_context(|| format!("Failed to fetch {} from hub", remote)),
                (None, None) => Err(anyhow!("no source for {}", remote)),
            }
        };
        Ok((
            fetch(&self.vision_model, "onnx/vision_model.onnx")?,
            fetch(&self.text_model, "onnx/text_model.onnx")?,
            fetch(&self.tokenizer, "tokenizer.json")?,
        ))
    }
}

pub struct ClipScorer {
    vision: Session,
    text: Session,
    tokenizer: Tokenizer,
    text_cache: Option<(Vec<String>, Vec<Vec<f32>>)>,
}

impl ClipScorer {
    pub fn load(files: &ClipFiles) -> Result<Self> {
        let (vision_path, text_path, tokenizer_path) = files.resolve()?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(Error::msg)?;
        Ok(Self {
            vision: build_session(&vision_path)?,
            text: build_session(&text_path)?,
            tokenizer,
            text_cache: None,
        })
    }

    fn image_embedding(&mut self, image: &Frame) -> Result<Vec<f32>> {
        let input = preprocess(image);
        let tensor = Tensor::from_array(([1usize, 3, IMAGE_SIZE as usize, IMAGE_SIZE as usize], input))?;
        let outputs = self.vision.run(ort::inputs!["pixel_values" => tensor])?;
        let (_, data) = outputs["image_embeds"].try_extract_tensor::<f32>()?;
        Ok(normalize(data.to_vec()))
    }

    fn text_embeddings(&mut self, labels: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some((cached, embeds)) = &self.text_cache {
            if cached.as_slice() == labels {
                return Ok(embeds.clone());
            }
        }

        let encodings = labels
            .iter()
            .map(|l| self.tokenizer.encode(l.as_str(), true).map_err(Error::msg))
            .collect::<Result<Vec<_>>>()?;
        let len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(MAX_TOKENS))
            .max()
            .unwrap_or(1)
            .max(1);

        let mut ids = vec![0i64; labels.len() * len];
        let mut mask = vec![0i64; labels.len() * len];
        for (row, enc) in encodings.iter().enumerate() {
            for (col, &id) in enc.get_ids().iter().take(len).enumerate() {
                ids[row * len + col] = id as i64;
                mask[row * len + col] = 1;
            }
        }

        let ids = Tensor::from_array(([labels.len(), len], ids))?;
        let mask = Tensor::from_array(([labels.len(), len], mask))?;
        let outputs = self.text.run(ort::inputs!["input_ids" => ids, "attention_mask" => mask])?;
        let (shape, data) = outputs["text_embeds"].try_extract_tensor::<f32>()?;
        let dim = shape.last().copied().unwrap_or(0) as usize;
        if dim == 0 || data.len() != dim * labels.len() {
            return Err(anyhow!("unexpected text embedding shape {:?}", shape));
        }
        let embeds: Vec<Vec<f32>> = data.chunks(dim).map(|c| normalize(c.to_vec())).collect();
        self.text_cache = Some((labels.to_vec(), embeds.clone()));
        Ok(embeds)
    }
}

impl ActionScorer for ClipScorer {
    fn score(&mut self, image: &Frame, labels: &[String]) -> Result<Vec<f32>> {
        let image_embed = self.image_embedding(image)?;
        let text_embeds = self.text_embeddings(labels)?;
        let logits: Vec<f32> = text_embeds
            .iter()
            .map(|t| LOGIT_SCALE * dot(&image_embed, t))
            .collect();
        Ok(softmax(&logits))
    }
}

/// Shortest side to 224, centre crop, CLIP mean/std, NCHW.
fn preprocess(image: &Frame) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let scale = IMAGE_SIZE as f32 / w.min(h).max(1) as f32;
    let nw = ((w as f32 * scale).round() as u32).max(IMAGE_SIZE);
    let nh = ((h as f32 * scale).round() as u32).max(IMAGE_SIZE);
    let resized = imageops::resize(image, nw, nh, FilterType::CatmullRom);
    let x0 = (nw - IMAGE_SIZE) / 2;
    let y0 = (nh - IMAGE_SIZE) / 2;
    let crop = imageops::crop_imm(&resized, x0, y0, IMAGE_SIZE, IMAGE_SIZE).to_image();

    let plane = (IMAGE_SIZE * IMAGE_SIZE) as usize;
    let mut out = vec![0.0f32; plane * 3];
    for (i, px) in crop.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + i] = (px[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    out
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_shape_and_normalisation() {
        let frame = Frame::from_pixel(640, 480, Rgb([255, 0, 128]));
        let input = preprocess(&frame);
        let plane = (IMAGE_SIZE * IMAGE_SIZE) as usize;
        assert_eq!(input.len(), plane * 3);
        assert!((input[0] - (1.0 - MEAN[0]) / STD[0]).abs() < 1e-3);
        assert!((input[plane] - (0.0 - MEAN[1]) / STD[1]).abs() < 1e-3);
    }

    #[test]
    fn test_normalize_and_dot() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((dot(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_default_files_point_at_hub() {
        let files = ClipFiles::default();
        assert_eq!(files.repo, "Xenova/clip-vit-base-patch32");
        assert!(files.vision_model.is_none());
    }
}
