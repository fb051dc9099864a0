use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::MonitorConfig;
use crate::alert::AlertConfig;
use crate::calibration::CalibrationConfig;
use crate::clip::ClipFiles;
use crate::intentional::IntentionalConfig;
use crate::settings::UserProfile;

pub const DEFAULT_PATH: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub models: ModelPaths,
    pub intentional: IntentionalConfig,
    pub alert: AlertConfig,
    pub calibration: CalibrationConfig,
    pub profile: UserProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub face_detection_path: PathBuf,
    pub face_mesh_path: PathBuf,
    /// Emotion labels are reported as unknown when this file is missing.
    pub emotion_model_path: PathBuf,
    pub clip: ClipFiles,
    pub skip_emotion: bool,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            face_detection_path: PathBuf::from("models/face_detection.onnx"),
            face_mesh_path: PathBuf::from("models/face_mesh.onnx"),
            emotion_model_path: PathBuf::from("models/emotion-ferplus-8.onnx"),
            clip: ClipFiles::default(),
            skip_emotion: false,
        }
    }
}

impl AppConfig {
    /// Loads `path`, falling back to defaults when it is missing or
    /// unparseable, then writes the result back so new fields show up in
    /// the file. An unparseable file is copied to `<path>.bak` and left in
    /// place; it holds the user profile.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(c) => {
                    info!("Loaded configuration from {}", path.display());
                    c
                }
                Err(e) => {
                    let backup = backup_path(path);
                    fs::copy(path, &backup)
                        .with_context(|| format!("Failed to back up {}", path.display()))?;
                    warn!(
                        "Error parsing config: {}. Loading defaults for this run; {} is unchanged (copy at {}).",
                        e,
                        path.display(),
                        backup.display()
                    );
                    return Ok(Self::default());
                }
            }
        } else {
            info!("Configuration file not found. Creating default at {}", path.display());
            Self::default()
        };

        config.save(path)?;
        Ok(config)
    }

    /// Like [`AppConfig::load`] but an unparseable file is an error. For
    /// callers that write the config back.
    pub fn load_strict(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CalibrationBaseline;

    #[test]
    fn test_missing_file_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.monitor, MonitorConfig::default());
        assert_eq!(config.intentional.threshold, 0.4);
        assert!((config.calibration.point_duration_secs - 2.0).abs() < f64::EPSILON);
        assert!(path.exists(), "defaults should be written back");
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "monitor": { "fps": 10 }, "profile": { "username": "alice", "settings": { "cam_brightness": 70 } } }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.monitor.fps, 10);
        assert_eq!(config.monitor.window_seconds, 5);
        assert_eq!(config.profile.username.as_deref(), Some("alice"));
        assert_eq!(config.profile.settings["cam_brightness"], 70);
        assert_eq!(config.alert, AlertConfig::default());

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"cooldown_seconds\""), "back-filled fields are saved");
    }

    #[test]
    fn test_invalid_json_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.models, ModelPaths::default());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_type_mismatch_keeps_profile_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let content = r#"{
            "monitor": { "fps": "ten" },
            "profile": {
                "username": "alice",
                "calibration": { "vertical": 0.42, "horizontal": 0.58 },
                "intentional_actions": ["drinking water"]
            }
        }"#;
        fs::write(&path, content).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert!(config.profile.calibration.is_none(), "defaults for this run");

        assert_eq!(fs::read_to_string(&path).unwrap(), content, "file must not be overwritten");
        let backup = dir.path().join("config.json.bak");
        assert_eq!(fs::read_to_string(&backup).unwrap(), content);
    }

    #[test]
    fn test_strict_load_refuses_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(AppConfig::load_strict(&path).unwrap().profile.calibration.is_none());

        fs::write(&path, r#"{ "monitor": { "fps": "ten" } }"#).unwrap();
        assert!(AppConfig::load_strict(&path).is_err());
    }

    #[test]
    fn test_calibration_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.profile.calibration = Some(CalibrationBaseline::new(0.42, 0.58));
        config.profile.intentional_actions = vec!["drinking water".into(), "stretching".into()];
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        let baseline = loaded.profile.calibration.expect("baseline");
        assert!((baseline.vertical - 0.42).abs() < 1e-6);
        assert_eq!(loaded.profile.intentional_actions.len(), 2);
    }
}
