//! Rolling focus window, cooldown-gated alerting and the distraction streak.
//!
//! [`FocusAggregator::update`] must only ever be called from one thread; the
//! monitoring loop owns the aggregator outright and applies reconfiguration
//! between iterations, so the cooldown read-compare-write is never raced.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::FocusState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub window_seconds: u32,
    pub fps: u32,
    /// Distraction ratio in [0, 1] at or above which an alert fires.
    pub threshold: f32,
    pub cooldown_seconds: f64,
    /// Run the frame analyzer on every n-th captured frame.
    pub analysis_stride: u32,
    /// Secondary-model stride preset, re-derived from fps.
    pub ia_stride: u32,
    /// Flip frames horizontally before processing.
    pub mirror: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_seconds: 5,
            fps: 4,
            threshold: 0.6,
            cooldown_seconds: 15.0,
            analysis_stride: 2,
            ia_stride: 10,
            mirror: true,
        }
    }
}

impl MonitorConfig {
    pub fn capacity(&self) -> usize {
        (self.window_seconds as usize * self.fps as usize).max(1)
    }

    /// Replaces an out-of-range threshold or cooldown with its default.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !valid_threshold(self.threshold) {
            warn!("Distraction threshold {} outside [0, 1], using {}", self.threshold, defaults.threshold);
            self.threshold = defaults.threshold;
        }
        if !valid_cooldown(self.cooldown_seconds) {
            warn!("Invalid alert cooldown {}, using {}", self.cooldown_seconds, defaults.cooldown_seconds);
            self.cooldown_seconds = defaults.cooldown_seconds;
        }
        self
    }
}

fn valid_threshold(threshold: f32) -> bool {
    (0.0..=1.0).contains(&threshold)
}

fn valid_cooldown(cooldown: f64) -> bool {
    cooldown.is_finite() && cooldown >= 0.0
}

/// Decimation presets as a function of fps: (analysis_stride, ia_stride).
pub fn stride_presets(fps: u32) -> (u32, u32) {
    if fps >= 8 {
        (2, 10)
    } else if fps >= 5 {
        (2, 5)
    } else {
        (1, 3)
    }
}

/// Runtime parameter change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconfigure {
    pub threshold: Option<f32>,
    pub cooldown_seconds: Option<f64>,
    pub fps: Option<u32>,
    pub window_seconds: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusSample {
    pub timestamp: f64,
    pub state: FocusState,
}

/// Emitted when the window crosses the threshold outside the cooldown.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub ratio: f32,
    pub window_seconds: u32,
    /// Seconds since the aggregator was created.
    pub at: f64,
    /// Recommended clip to play; filled in by the monitor from the user.
    pub audio_file: Option<PathBuf>,
}

pub struct FocusAggregator {
    config: MonitorConfig,
    capacity: usize,
    history: VecDeque<FocusSample>,
    last_alert: Option<f64>,
    epoch: Instant,
}

impl FocusAggregator {
    pub fn new(config: MonitorConfig) -> Self {
        let config = config.sanitized();
        let capacity = config.capacity();
        Self {
            config,
            capacity,
            history: VecDeque::with_capacity(capacity),
            last_alert: None,
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &FocusSample> {
        self.history.iter()
    }

    /// Seconds since creation on the aggregator's monotonic clock.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn update(&mut self, state: FocusState, repeat: u32) -> Option<AlertEvent> {
        let now = self.now();
        self.update_at(state, repeat, now)
    }

    /// Appends `repeat` copies of the sample, then evaluates the alert.
    pub fn update_at(&mut self, state: FocusState, repeat: u32, now: f64) -> Option<AlertEvent> {
        for _ in 0..repeat {
            self.history.push_back(FocusSample { timestamp: now, state });
            if self.history.len() > self.capacity {
                self.history.pop_front();
            }
        }
        self.check_focus(now)
    }

    /// Fraction of Distracted samples, only defined once the window is full.
    pub fn distraction_ratio(&self) -> Option<f32> {
        if self.history.len() < self.capacity {
            return None;
        }
        let distracted = self
            .history
            .iter()
            .filter(|s| s.state == FocusState::Distracted)
            .count();
        Some(distracted as f32 / self.capacity as f32)
    }

    fn check_focus(&mut self, now: f64) -> Option<AlertEvent> {
        let ratio = self.distraction_ratio()?;
        if ratio < self.config.threshold {
            return None;
        }
        let cooled = match self.last_alert {
            Some(last) => now - last > self.config.cooldown_seconds,
            None => true,
        };
        if !cooled {
            debug!(ratio, "distraction above threshold, alert cooling down");
            return None;
        }
        self.last_alert = Some(now);
        debug!(
            "Distracted for {}% of the last {} seconds",
            (ratio * 100.0) as u32,
            self.config.window_seconds
        );
        Some(AlertEvent {
            ratio,
            window_seconds: self.config.window_seconds,
            at: now,
            audio_file: None,
        })
    }

    /// Applies a runtime change. Returns true if anything changed.
    pub fn reconfigure(&mut self, change: &Reconfigure) -> bool {
        let mut changed = false;

        match change.threshold {
            Some(threshold) if valid_threshold(threshold) => {
                self.config.threshold = threshold;
                changed = true;
            }
            Some(threshold) => warn!("Ignoring distraction threshold {} outside [0, 1]", threshold),
            None => {}
        }
        match change.cooldown_seconds {
            Some(cooldown) if valid_cooldown(cooldown) => {
                self.config.cooldown_seconds = cooldown;
                changed = true;
            }
            Some(cooldown) => warn!("Ignoring invalid alert cooldown {}", cooldown),
            None => {}
        }

        let new_window = change.window_seconds.unwrap_or(self.config.window_seconds);
        let new_fps = change.fps.unwrap_or(self.config.fps).max(1);

        if new_window != self.config.window_seconds || new_fps != self.config.fps {
            self.config.window_seconds = new_window;
            self.config.fps = new_fps;
            self.resize(self.config.capacity());
            changed = true;
        }

        let (analysis_stride, ia_stride) = stride_presets(new_fps);
        self.config.analysis_stride = analysis_stride;
        self.config.ia_stride = ia_stride;

        if changed {
            info!(
                threshold = self.config.threshold,
                cooldown = self.config.cooldown_seconds,
                window = self.config.window_seconds,
                max_samples = self.capacity,
                "Reconfigured focus window"
            );
        }
        changed
    }

    /// Keeps the most recent `capacity` samples; never backfills.
    fn resize(&mut self, capacity: usize) {
        while self.history.len() > capacity {
            self.history.pop_front();
        }
        self.capacity = capacity;
    }
}

/// Counts consecutive Distracted analyses and tracks whether an
/// intentional-action detection is awaited.
#[derive(Debug, Clone)]
pub struct DistractionStreak {
    count: u32,
    threshold: u32,
    awaiting: bool,
}

impl DistractionStreak {
    pub const DEFAULT_THRESHOLD: u32 = 5;

    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
            awaiting: false,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn awaiting(&self) -> bool {
        self.awaiting
    }

    pub fn record_distracted(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    pub fn should_trigger(&self, detector_ready: bool) -> bool {
        self.count >= self.threshold && detector_ready && !self.awaiting
    }

    pub fn mark_triggered(&mut self) {
        self.awaiting = true;
    }

    /// Focused sample or a successful override.
    pub fn reset(&mut self) {
        self.count = 0;
        self.awaiting = false;
    }
}

impl Default for DistractionStreak {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}
