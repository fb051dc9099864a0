//! Read side of the user-profile store.
//!
//! The monitor only consumes settings; persistence belongs to whoever
//! implements [`UserSettings`]. [`SettingsStore`] is the in-process
//! implementation seeded from the `profile` section of `config.json`.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adjust::{CameraAdjustments, NEUTRAL};
use crate::types::CalibrationBaseline;

pub const CAM_BRIGHTNESS: &str = "cam_brightness";
pub const CAM_CONTRAST: &str = "cam_contrast";
pub const CAM_EXPOSURE: &str = "cam_exposure";
pub const CAM_SATURATION: &str = "cam_saturation";

pub trait UserSettings: Send + Sync {
    /// Raw setting lookup; `None` when unset.
    fn get(&self, key: &str) -> Option<Value>;
    fn calibration_baseline(&self) -> Option<CalibrationBaseline>;
    /// Ordered, duplicates allowed.
    fn intentional_actions(&self) -> Vec<String>;
    fn username(&self) -> Option<String>;
}

/// Numeric setting with the neutral fallback (50) for missing, non-numeric or
/// non-finite values.
pub fn setting_or_neutral(settings: &dyn UserSettings, key: &str) -> f32 {
    settings
        .get(key)
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
        .map(|v| v as f32)
        .unwrap_or(NEUTRAL)
}

impl CameraAdjustments {
    pub fn from_settings(settings: &dyn UserSettings) -> Self {
        Self {
            brightness: setting_or_neutral(settings, CAM_BRIGHTNESS),
            contrast: setting_or_neutral(settings, CAM_CONTRAST),
            exposure: setting_or_neutral(settings, CAM_EXPOSURE),
            saturation: setting_or_neutral(settings, CAM_SATURATION),
        }
    }
}

/// Serialisable profile snapshot, the shape stored under `profile` in the
/// config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub username: Option<String>,
    pub settings: HashMap<String, Value>,
    pub calibration: Option<CalibrationBaseline>,
    pub intentional_actions: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SettingsStore {
    profile: RwLock<UserProfile>,
}

impl SettingsStore {
    pub fn new(profile: UserProfile) -> Self {
        Self {
            profile: RwLock::new(profile),
        }
    }

    pub fn snapshot(&self) -> UserProfile {
        match self.profile.read() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        self.write(|p| {
            p.settings.insert(key.to_string(), value);
        });
    }

    pub fn set_calibration(&self, baseline: CalibrationBaseline) {
        self.write(|p| p.calibration = Some(baseline));
    }

    pub fn add_intentional_action(&self, action: &str) {
        self.write(|p| p.intentional_actions.push(action.to_string()));
    }

    fn write(&self, f: impl FnOnce(&mut UserProfile)) {
        match self.profile.write() {
            Ok(mut p) => f(&mut p),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&UserProfile) -> T) -> T {
        match self.profile.read() {
            Ok(p) => f(&p),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl UserSettings for SettingsStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.read(|p| p.settings.get(key).cloned())
    }

    fn calibration_baseline(&self) -> Option<CalibrationBaseline> {
        self.read(|p| p.calibration.clone())
    }

    fn intentional_actions(&self) -> Vec<String> {
        self.read(|p| p.intentional_actions.clone())
    }

    fn username(&self) -> Option<String> {
        self.read(|p| p.username.clone())
    }
}
