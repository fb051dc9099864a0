//! Intentional-action detection: scores one frame against the user's action
//! descriptions plus a neutral baseline, off the monitoring thread.
//!
//! Single flight: while a job runs, further triggers are ignored. Results
//! come back over a channel and [`IntentionalActionDetector::poll`] always
//! returns the latest completed one, possibly stale.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{Frame, IntentionalActionResult};

/// Joint image/text model returning one probability per label.
pub trait ActionScorer: Send {
    fn score(&mut self, image: &Frame, labels: &[String]) -> Result<Vec<f32>>;
}

/// Deferred model construction, attempted at most once per session.
pub type ScorerLoader = Box<dyn FnOnce() -> Result<Box<dyn ActionScorer>> + Send>;

type SharedScorer = Arc<Mutex<Box<dyn ActionScorer>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentionalConfig {
    /// Minimum softmax probability for a non-neutral label to count.
    pub threshold: f32,
    pub neutral_action: String,
    /// Consecutive Distracted analyses before a detection is started.
    pub streak_threshold: u32,
}

impl Default for IntentionalConfig {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            neutral_action: "sitting and working".to_string(),
            streak_threshold: 5,
        }
    }
}

enum ModelState {
    Unloaded(ScorerLoader),
    Loaded(SharedScorer),
    Unavailable,
}

/// The part of the detector the monitoring loop drives.
pub trait ActionGate {
    /// A model is loaded and at least one action is defined.
    fn is_ready(&self) -> bool;
    /// Starts a background detection; returns false if nothing was started.
    fn trigger_async(&mut self, frame: &Frame) -> bool;
    /// Latest completed result, non-blocking.
    fn poll(&mut self) -> IntentionalActionResult;
}

pub struct IntentionalActionDetector {
    config: IntentionalConfig,
    actions: Vec<String>,
    model: ModelState,
    job: Option<JoinHandle<()>>,
    results_tx: Sender<IntentionalActionResult>,
    results_rx: Receiver<IntentionalActionResult>,
    last: IntentionalActionResult,
}

impl IntentionalActionDetector {
    pub fn new(config: IntentionalConfig, loader: ScorerLoader) -> Self {
        Self::with_state(config, ModelState::Unloaded(loader))
    }

    /// Detector whose model is already constructed.
    pub fn with_scorer(config: IntentionalConfig, scorer: Box<dyn ActionScorer>) -> Self {
        Self::with_state(config, ModelState::Loaded(Arc::new(Mutex::new(scorer))))
    }

    /// Detector with no model; every trigger is a no-op.
    pub fn disabled(config: IntentionalConfig) -> Self {
        Self::with_state(config, ModelState::Unavailable)
    }

    fn with_state(config: IntentionalConfig, model: ModelState) -> Self {
        let (results_tx, results_rx) = mpsc::channel();
        Self {
            config,
            actions: Vec::new(),
            model,
            job: None,
            results_tx,
            results_rx,
            last: IntentionalActionResult::default(),
        }
    }

    pub fn config(&self) -> &IntentionalConfig {
        &self.config
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Replaces the action set. A non-empty set loads the model on first use;
    /// an empty one disables triggering.
    pub fn set_actions(&mut self, actions: Vec<String>) {
        info!(?actions, "Set defined actions");
        self.actions = actions;
        if !self.actions.is_empty() {
            self.ensure_loaded();
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.model, ModelState::Loaded(_))
    }

    pub fn in_flight(&self) -> bool {
        self.job.as_ref().is_some_and(|job| !job.is_finished())
    }

    fn ensure_loaded(&mut self) {
        if !matches!(self.model, ModelState::Unloaded(_)) {
            return;
        }
        let ModelState::Unloaded(loader) = std::mem::replace(&mut self.model, ModelState::Unavailable)
        else {
            return;
        };
        match loader() {
            Ok(scorer) => {
                info!("Intentional-action model loaded and ready");
                self.model = ModelState::Loaded(Arc::new(Mutex::new(scorer)));
            }
            Err(e) => {
                // Stays Unavailable for the rest of the session.
                warn!("Intentional-action model unavailable: {:#}", e);
            }
        }
    }

    fn candidate_labels(&self) -> Vec<String> {
        let mut labels = self.actions.clone();
        labels.push(self.config.neutral_action.clone());
        labels
    }

    /// Runs a detection on the calling thread.
    pub fn detect_blocking(&mut self, frame: &Frame) -> Result<IntentionalActionResult> {
        if self.actions.is_empty() {
            return Ok(IntentionalActionResult::default());
        }
        self.ensure_loaded();
        let ModelState::Loaded(scorer) = &self.model else {
            return Err(anyhow!("intentional-action model is unavailable"));
        };
        let labels = self.candidate_labels();
        run_detection(scorer, frame, &labels, &self.config)
    }
}

impl ActionGate for IntentionalActionDetector {
    fn is_ready(&self) -> bool {
        self.is_available() && !self.actions.is_empty()
    }

    fn trigger_async(&mut self, frame: &Frame) -> bool {
        if !self.is_ready() || self.in_flight() {
            return false;
        }
        let ModelState::Loaded(scorer) = &self.model else {
            return false;
        };

        let scorer = Arc::clone(scorer);
        let labels = self.candidate_labels();
        let config = self.config.clone();
        let frame = frame.clone();
        let tx = self.results_tx.clone();

        let spawned = thread::Builder::new()
            .name("intentional-action".to_string())
            .spawn(move || match run_detection(&scorer, &frame, &labels, &config) {
                Ok(result) => {
                    debug!(?result, "intentional-action detection finished");
                    // Receiver gone means the detector was dropped; nothing to do.
                    let _ = tx.send(result);
                }
                Err(e) => warn!("Intentional-action detection failed: {:#}", e),
            });

        match spawned {
            Ok(handle) => {
                self.job = Some(handle);
                true
            }
            Err(e) => {
                warn!("Could not spawn intentional-action worker: {}", e);
                false
            }
        }
    }

    fn poll(&mut self) -> IntentionalActionResult {
        while let Ok(result) = self.results_rx.try_recv() {
            self.last = result;
        }
        self.last.clone()
    }
}

fn run_detection(
    scorer: &SharedScorer,
    frame: &Frame,
    labels: &[String],
    config: &IntentionalConfig,
) -> Result<IntentionalActionResult> {
    let mut scorer = scorer
        .lock()
        .map_err(|_| anyhow!("intentional-action model lock poisoned"))?;
    let probs = scorer.score(frame, labels)?;
    decide(labels, &probs, &config.neutral_action, config.threshold)
}

/// Picks the most probable label. Only a non-neutral winner at or above the
/// threshold counts as detected.
pub fn decide(
    labels: &[String],
    probs: &[f32],
    neutral_action: &str,
    threshold: f32,
) -> Result<IntentionalActionResult> {
    if labels.len() != probs.len() {
        return Err(anyhow!(
            "scorer returned {} probabilities for {} labels",
            probs.len(),
            labels.len()
        ));
    }
    let Some((best, &confidence)) = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
    else {
        return Ok(IntentionalActionResult::default());
    };
    let label = labels[best].clone();
    let detected = label != neutral_action && confidence >= threshold;
    Ok(IntentionalActionResult {
        detected,
        label: Some(label),
        confidence,
    })
}
