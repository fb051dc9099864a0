//! Five-point gaze calibration.
//!
//! The user fixates each target in turn while gaze ratios are sampled for a
//! fixed window. Each point keeps the median of its samples; the centre
//! median becomes the live baseline. Cancelling is a normal outcome and
//! leaves any previous baseline alone.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Local};
use image::imageops;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::camera::FrameSource;
use crate::error::{CalibrationError, MonitorError};
use crate::gaze::extract_ratios;
use crate::inference::LandmarkDetector;
use crate::types::{CalibrationBaseline, GazeSample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Observation window per target.
    pub point_duration_secs: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            point_duration_secs: 2.0,
        }
    }
}

/// A screen position in normalised coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationTarget {
    pub label: &'static str,
    pub x: f32,
    pub y: f32,
}

pub const CENTER: &str = "center";

pub const TARGETS: [CalibrationTarget; 5] = [
    CalibrationTarget { label: "top_left", x: 0.05, y: 0.05 },
    CalibrationTarget { label: "top_right", x: 0.95, y: 0.05 },
    CalibrationTarget { label: "bottom_left", x: 0.05, y: 0.95 },
    CalibrationTarget { label: "bottom_right", x: 0.95, y: 0.95 },
    CalibrationTarget { label: CENTER, x: 0.5, y: 0.5 },
];

/// The interactive side of a calibration run.
pub trait CalibrationPrompt {
    /// Blocks until the user is ready to look at `target`; false cancels.
    fn ready(&mut self, target: &CalibrationTarget) -> bool;

    /// Checked between samples; true cancels.
    fn cancelled(&mut self) -> bool {
        false
    }

    fn point_done(&mut self, _target: &CalibrationTarget, _samples: usize, _median: GazeSample) {}
}

/// Line-based user input fed from another thread (usually a stdin reader).
/// Any line is "ready" except `q`, which cancels, also mid-point.
pub struct LineCommands {
    lines: Receiver<String>,
}

impl LineCommands {
    pub fn new(lines: Receiver<String>) -> Self {
        Self { lines }
    }

    /// Blocks for the next line. False on `q` or closed input.
    pub fn wait_ready(&mut self) -> bool {
        match self.lines.recv() {
            Ok(line) => !is_cancel(&line),
            Err(_) => false,
        }
    }

    /// Drains pending lines without blocking; true if one of them was `q`.
    pub fn cancel_requested(&mut self) -> bool {
        loop {
            match self.lines.try_recv() {
                Ok(line) if is_cancel(&line) => return true,
                Ok(_) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return false,
            }
        }
    }
}

fn is_cancel(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("q")
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    Completed(CalibrationBaseline),
    Cancelled,
}

/// Statistical median; the mean of the two middle values for even counts.
pub fn median(values: &[f32]) -> Option<f32> {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

pub struct Calibrator {
    point_duration: Duration,
    mirror: bool,
}

impl Calibrator {
    pub fn new(config: &CalibrationConfig, mirror: bool) -> Self {
        Self {
            point_duration: Duration::from_secs_f64(config.point_duration_secs.max(0.0)),
            mirror,
        }
    }

    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        detector: &mut dyn LandmarkDetector,
        prompt: &mut dyn CalibrationPrompt,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let mut points = BTreeMap::new();

        for target in &TARGETS {
            if !prompt.ready(target) {
                info!("Calibration cancelled before {}", target.label);
                return Ok(CalibrationOutcome::Cancelled);
            }
            let Some(samples) = self.collect(source, detector, prompt)? else {
                info!("Calibration cancelled during {}", target.label);
                return Ok(CalibrationOutcome::Cancelled);
            };

            let vertical: Vec<f32> = samples.iter().map(|s| s.vertical).collect();
            let horizontal: Vec<f32> = samples.iter().map(|s| s.horizontal).collect();
            let (Some(v), Some(h)) = (median(&vertical), median(&horizontal)) else {
                return Err(CalibrationError::NoSamples(target.label.to_string()));
            };
            let point = GazeSample { vertical: v, horizontal: h };
            debug!(target = target.label, samples = samples.len(), ?point, "calibration point done");
            prompt.point_done(target, samples.len(), point);
            points.insert(target.label.to_string(), point);
        }

        let center = points
            .get(CENTER)
            .copied()
            .ok_or_else(|| CalibrationError::NoSamples(CENTER.to_string()))?;
        info!("Calibration complete: v={:.4} h={:.4}", center.vertical, center.horizontal);
        Ok(CalibrationOutcome::Completed(CalibrationBaseline {
            vertical: center.vertical,
            horizontal: center.horizontal,
            points,
        }))
    }

    /// Samples for one observation window, at least one frame. `None` when
    /// the user cancels.
    fn collect(
        &self,
        source: &mut dyn FrameSource,
        detector: &mut dyn LandmarkDetector,
        prompt: &mut dyn CalibrationPrompt,
    ) -> Result<Option<Vec<GazeSample>>, CalibrationError> {
        let start = Instant::now();
        let mut samples = Vec::new();
        loop {
            if prompt.cancelled() {
                return Ok(None);
            }
            match source.capture() {
                Ok(mut frame) => {
                    if self.mirror {
                        imageops::flip_horizontal_in_place(&mut frame);
                    }
                    match detector.detect(&frame) {
                        Ok(Some(landmarks)) => samples.extend(extract_ratios(&landmarks)),
                        Ok(None) => {}
                        Err(e) => debug!("Landmark detection failed during calibration: {:#}", e),
                    }
                }
                Err(MonitorError::Capture(e)) => debug!("Skipping frame: {}", e),
                Err(e) => return Err(e.into()),
            }
            if start.elapsed() >= self.point_duration {
                return Ok(Some(samples));
            }
        }
    }
}

/// One entry of `calibration_history.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRun {
    pub run_id: String,
    pub timestamp: DateTime<Local>,
    pub username: Option<String>,
    pub baseline: CalibrationBaseline,
}

impl CalibrationRun {
    pub fn new(username: Option<String>, baseline: CalibrationBaseline) -> Self {
        let now = Local::now();
        Self {
            run_id: now.format("%Y%m%d_%H%M%S").to_string(),
            timestamp: now,
            username,
            baseline,
        }
    }
}

/// Appends `run` to the JSON history at `path`, creating parent folders.
/// An unreadable history is started over. Returns the new entry count.
pub fn append_history(path: &Path, run: CalibrationRun) -> anyhow::Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut history: Vec<CalibrationRun> = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Discarding unreadable calibration history {}: {}", path.display(), e);
            Vec::new()
        })
    } else {
        Vec::new()
    };
    history.push(run);
    fs::write(path, serde_json::to_string_pretty(&history)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(history.len())
}
