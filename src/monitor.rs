//! Real-time monitoring loop.
//!
//! One background thread owns the aggregator, the streak and the
//! intentional-action detector for the whole run. The control side talks to
//! it only through a command channel, so every mutation of monitor state
//! happens on the loop thread between frames.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::imageops;
use tracing::{debug, info, warn};

use crate::adjust::CameraAdjustments;
use crate::aggregator::{DistractionStreak, FocusAggregator, MonitorConfig, Reconfigure};
use crate::alert::{alert_audio_filename, AlertSink, LogAlertSink};
use crate::analyzer::FrameAnalyzer;
use crate::camera::FrameSource;
use crate::error::MonitorError;
use crate::intentional::{ActionGate, IntentionalActionDetector, IntentionalConfig};
use crate::settings::UserSettings;
use crate::types::{CalibrationBaseline, FocusState, Frame, FrameLabels};

/// Upper bound on how long `stop` waits for the loop to wind down.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Runtime changes, applied on the loop thread before the next frame.
#[derive(Debug, Clone)]
pub enum MonitorCommand {
    Reconfigure(Reconfigure),
    SetIntentionalActions(Vec<String>),
    SetBaseline(Option<CalibrationBaseline>),
    SkipEmotion(bool),
}

enum Control {
    Command(MonitorCommand),
    Stop,
}

/// What the presentation side receives every iteration.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub frame: Frame,
    /// Labels of the most recent analysis, with any override applied.
    pub labels: Option<FrameLabels>,
    /// True when this iteration ran the analyzer.
    pub analyzed: bool,
    pub frame_index: u64,
    pub distraction_ratio: Option<f32>,
    pub streak: u32,
}

pub type FrameCallback = Box<dyn FnMut(&PublishedFrame) + Send>;

/// Applies the streak rules to one analysed focus state and returns the state
/// to record. A detection already resolved as detected forces Focused.
pub fn resolve_focus(
    streak: &mut DistractionStreak,
    gate: &mut dyn ActionGate,
    focus: FocusState,
    frame: &Frame,
) -> FocusState {
    if focus == FocusState::Focused {
        streak.reset();
        return FocusState::Focused;
    }

    streak.record_distracted();
    if streak.should_trigger(gate.is_ready()) {
        info!("Triggering intentional-action detection after {} distracted frames", streak.count());
        if gate.trigger_async(frame) {
            streak.mark_triggered();
        }
    }

    if streak.awaiting() {
        let result = gate.poll();
        debug!(?result, "intentional-action poll");
        if result.detected {
            info!(
                "Suppressed: intentional action detected: {} ({:.2})",
                result.label.as_deref().unwrap_or("?"),
                result.confidence
            );
            streak.reset();
            return FocusState::Focused;
        }
    }
    FocusState::Distracted
}

/// Monitor state that survives across runs. Locked by the loop thread for
/// the duration of a run.
struct LoopParts {
    aggregator: FocusAggregator,
    streak: DistractionStreak,
    detector: IntentionalActionDetector,
    settings: Arc<dyn UserSettings>,
    alerts: Box<dyn AlertSink>,
    alert_folder: PathBuf,
    pending_baseline: Option<Option<CalibrationBaseline>>,
    pending_skip_emotion: Option<bool>,
}

impl LoopParts {
    /// Returns true when the pacing rate changed.
    fn apply(&mut self, command: MonitorCommand, analyzer: Option<&mut FrameAnalyzer>) -> bool {
        match command {
            MonitorCommand::Reconfigure(change) => {
                let fps = self.aggregator.config().fps;
                self.aggregator.reconfigure(&change);
                self.aggregator.config().fps != fps
            }
            MonitorCommand::SetIntentionalActions(actions) => {
                self.detector.set_actions(actions);
                false
            }
            MonitorCommand::SetBaseline(baseline) => {
                match analyzer {
                    Some(analyzer) => analyzer.set_baseline(baseline),
                    None => self.pending_baseline = Some(baseline),
                }
                false
            }
            MonitorCommand::SkipEmotion(skip) => {
                match analyzer {
                    Some(analyzer) => analyzer.set_skip_emotion(skip),
                    None => self.pending_skip_emotion = Some(skip),
                }
                false
            }
        }
    }

    fn take_pending(&mut self, analyzer: &mut FrameAnalyzer) {
        if let Some(baseline) = self.pending_baseline.take() {
            analyzer.set_baseline(baseline);
        }
        if let Some(skip) = self.pending_skip_emotion.take() {
            analyzer.set_skip_emotion(skip);
        }
    }
}

struct RunHandle {
    running: Arc<AtomicBool>,
    control: Sender<Control>,
    done: Receiver<()>,
    thread: JoinHandle<()>,
}

pub struct FocusMonitor {
    parts: Arc<Mutex<LoopParts>>,
    /// Commands sent while a detached loop still holds `parts`; the next
    /// run applies them before its first frame.
    queued: Arc<Mutex<Vec<MonitorCommand>>>,
    latest: Arc<Mutex<Option<PublishedFrame>>>,
    run: Option<RunHandle>,
}

impl FocusMonitor {
    pub fn new(config: MonitorConfig, settings: Arc<dyn UserSettings>) -> Self {
        let intentional = IntentionalConfig::default();
        let streak = DistractionStreak::new(intentional.streak_threshold);
        let parts = LoopParts {
            aggregator: FocusAggregator::new(config),
            streak,
            detector: IntentionalActionDetector::disabled(intentional),
            settings,
            alerts: Box::new(LogAlertSink),
            alert_folder: PathBuf::from("alerts"),
            pending_baseline: None,
            pending_skip_emotion: None,
        };
        Self {
            parts: Arc::new(Mutex::new(parts)),
            queued: Arc::new(Mutex::new(Vec::new())),
            latest: Arc::new(Mutex::new(None)),
            run: None,
        }
    }

    pub fn with_intentional(self, detector: IntentionalActionDetector) -> Self {
        {
            let mut parts = lock(&self.parts);
            parts.streak = DistractionStreak::new(detector.config().streak_threshold);
            parts.detector = detector;
        }
        self
    }

    pub fn with_alerts(self, sink: Box<dyn AlertSink>, folder: PathBuf) -> Self {
        {
            let mut parts = lock(&self.parts);
            parts.alerts = sink;
            parts.alert_folder = folder;
        }
        self
    }

    pub fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|r| r.running.load(Ordering::Acquire) && !r.thread.is_finished())
    }

    /// Starts the loop on a background thread. Calling it while a loop is
    /// running logs and returns without doing anything. Without explicit
    /// `intentional_actions` the user's stored actions are used.
    pub fn start(
        &mut self,
        mut source: Box<dyn FrameSource>,
        mut analyzer: FrameAnalyzer,
        frame_callback: Option<FrameCallback>,
        intentional_actions: Option<Vec<String>>,
    ) -> Result<(), MonitorError> {
        if self.is_running() {
            warn!("Monitoring already running");
            return Ok(());
        }
        if let Some(previous) = self.run.take() {
            // Loop ended on its own (capture failure); reap it.
            let _ = previous.thread.join();
        }
        if !source.is_available() {
            source.release();
            return Err(MonitorError::SourceUnavailable);
        }

        let running = Arc::new(AtomicBool::new(true));
        let (control_tx, control_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let parts = Arc::clone(&self.parts);
        let queued = Arc::clone(&self.queued);
        let latest = Arc::clone(&self.latest);
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("focus-monitor".to_string())
            .spawn(move || {
                {
                    let mut parts = lock(&parts);
                    for command in lock(&queued).drain(..) {
                        parts.apply(command, Some(&mut analyzer));
                    }
                    parts.take_pending(&mut analyzer);
                    let actions = intentional_actions.unwrap_or_else(|| parts.settings.intentional_actions());
                    if !actions.is_empty() {
                        parts.detector.set_actions(actions);
                    }
                    let mut ctx = LoopContext {
                        parts: &mut *parts,
                        source: source.as_mut(),
                        analyzer: &mut analyzer,
                        callback: frame_callback,
                        control: control_rx,
                        running: &flag,
                        latest: &latest,
                    };
                    ctx.run();
                }
                source.release();
                flag.store(false, Ordering::Release);
                info!("Monitoring loop ended");
                let _ = done_tx.send(());
            })?;

        info!("Monitoring started");
        self.run = Some(RunHandle {
            running,
            control: control_tx,
            done: done_rx,
            thread,
        });
        Ok(())
    }

    /// Signals the loop to exit and waits up to [`STOP_TIMEOUT`] for it.
    pub fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        run.running.store(false, Ordering::Release);
        let _ = run.control.send(Control::Stop);
        match run.done.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if run.thread.join().is_err() {
                    warn!("Monitoring thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Monitoring loop did not stop within {:?}; detaching", STOP_TIMEOUT);
            }
        }
        info!("Monitoring stopped");
    }

    /// Queues a command for the loop, or applies it directly when idle.
    /// Never waits on the loop: if a detached loop still owns the state,
    /// the command is held for the next run.
    pub fn send(&self, command: MonitorCommand) {
        let command = match self.run.as_ref().filter(|_| self.is_running()) {
            Some(run) => match run.control.send(Control::Command(command)) {
                Ok(()) => return,
                Err(mpsc::SendError(Control::Command(command))) => command,
                Err(_) => return,
            },
            None => command,
        };
        match self.parts.try_lock() {
            Ok(mut parts) => {
                parts.apply(command, None);
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().apply(command, None);
            }
            Err(TryLockError::WouldBlock) => {
                debug!("Monitor state busy, holding {:?} for the next run", command);
                lock(&self.queued).push(command);
            }
        }
    }

    pub fn reconfigure(&self, change: Reconfigure) {
        self.send(MonitorCommand::Reconfigure(change));
    }

    pub fn set_intentional_actions(&self, actions: Vec<String>) {
        self.send(MonitorCommand::SetIntentionalActions(actions));
    }

    pub fn set_baseline(&self, baseline: Option<CalibrationBaseline>) {
        self.send(MonitorCommand::SetBaseline(baseline));
    }

    pub fn set_skip_emotion(&self, skip: bool) {
        self.send(MonitorCommand::SkipEmotion(skip));
    }

    /// Most recently published frame, if any.
    pub fn latest(&self) -> Option<PublishedFrame> {
        lock(&self.latest).clone()
    }

    /// Current configuration; `None` while a loop owns the monitor state.
    pub fn config(&self) -> Option<MonitorConfig> {
        match self.parts.try_lock() {
            Ok(parts) => Some(parts.aggregator.config().clone()),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().aggregator.config().clone()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

impl Drop for FocusMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Absolute-deadline pacing. Falling more than one period behind re-anchors
/// on the current time instead of bursting to catch up.
struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    fn new(fps: u32) -> Self {
        Self {
            period: period_for(fps),
            next: Instant::now(),
        }
    }

    fn set_fps(&mut self, fps: u32) {
        self.period = period_for(fps);
    }

    /// Time left until the current deadline; advances the deadline.
    fn advance(&mut self) -> Duration {
        let now = Instant::now();
        if now > self.next + self.period {
            self.next = now;
        }
        let wait = self.next.saturating_duration_since(now);
        self.next += self.period;
        wait
    }
}

fn period_for(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}

struct LoopContext<'a> {
    parts: &'a mut LoopParts,
    source: &'a mut dyn FrameSource,
    analyzer: &'a mut FrameAnalyzer,
    callback: Option<FrameCallback>,
    control: Receiver<Control>,
    running: &'a AtomicBool,
    latest: &'a Mutex<Option<PublishedFrame>>,
}

impl LoopContext<'_> {
    fn run(&mut self) {
        let mut pacer = Pacer::new(self.parts.aggregator.config().fps);
        let mut frame_index: u64 = 0;
        let mut last_processed: Option<Frame> = None;
        let mut last_labels: Option<FrameLabels> = None;

        while self.running.load(Ordering::Acquire) {
            let wait = pacer.advance();
            if !self.wait_and_apply(wait, &mut pacer) {
                break;
            }

            let mut frame = match self.source.capture() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Frame capture failed, ending loop: {}", e);
                    break;
                }
            };
            if self.parts.aggregator.config().mirror {
                imageops::flip_horizontal_in_place(&mut frame);
            }
            CameraAdjustments::from_settings(self.parts.settings.as_ref()).apply(&mut frame);
            frame_index += 1;

            let stride = self.parts.aggregator.config().analysis_stride.max(1);
            let analyzed = frame_index % stride as u64 == 0;
            let shown = if analyzed {
                let analysis = self.analyzer.process_frame(&frame);
                let focus = resolve_focus(
                    &mut self.parts.streak,
                    &mut self.parts.detector,
                    analysis.labels.focus,
                    &frame,
                );
                self.record(focus, stride);

                let mut labels = analysis.labels;
                labels.focus = focus;
                debug!(frame_index, emotion = %labels.emotion, gaze = %labels.gaze, focus = %focus, "analysed frame");
                last_labels = Some(labels);
                last_processed = Some(analysis.frame.clone());
                analysis.frame
            } else {
                last_processed.clone().unwrap_or(frame)
            };

            let published = PublishedFrame {
                frame: shown,
                labels: last_labels.clone(),
                analyzed,
                frame_index,
                distraction_ratio: self.parts.aggregator.distraction_ratio(),
                streak: self.parts.streak.count(),
            };
            if let Some(callback) = self.callback.as_mut() {
                callback(&published);
            }
            *lock(self.latest) = Some(published);
        }
    }

    fn record(&mut self, focus: FocusState, stride: u32) {
        let Some(mut event) = self.parts.aggregator.update(focus, stride) else {
            return;
        };
        let username = self.parts.settings.username();
        event.audio_file = Some(alert_audio_filename(username.as_deref(), &self.parts.alert_folder));
        self.parts.alerts.alert(&event);
    }

    /// Sleeps until the pacing deadline, applying commands as they arrive.
    /// Returns false once a stop has been requested.
    fn wait_and_apply(&mut self, wait: Duration, pacer: &mut Pacer) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let control = if remaining.is_zero() {
                match self.control.try_recv() {
                    Ok(control) => control,
                    Err(_) => return true,
                }
            } else {
                match self.control.recv_timeout(remaining) {
                    Ok(control) => control,
                    Err(RecvTimeoutError::Timeout) => return true,
                    Err(RecvTimeoutError::Disconnected) => {
                        thread::sleep(remaining);
                        return true;
                    }
                }
            };
            match control {
                Control::Stop => return false,
                Control::Command(command) => {
                    if self.parts.apply(command, Some(&mut *self.analyzer)) {
                        pacer.set_fps(self.parts.aggregator.config().fps);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntentionalActionResult;

    #[derive(Default)]
    struct MockGate {
        ready: bool,
        triggers: usize,
        result: IntentionalActionResult,
    }

    impl ActionGate for MockGate {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn trigger_async(&mut self, _frame: &Frame) -> bool {
            self.triggers += 1;
            true
        }

        fn poll(&mut self) -> IntentionalActionResult {
            self.result.clone()
        }
    }

    fn frame() -> Frame {
        Frame::new(2, 2)
    }

    #[test]
    fn test_five_distracted_trigger_once() {
        let mut streak = DistractionStreak::new(5);
        let mut gate = MockGate { ready: true, ..Default::default() };
        for i in 1..=4 {
            resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
            assert_eq!(gate.triggers, 0, "no trigger after {} frames", i);
        }
        resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
        assert_eq!(gate.triggers, 1);
        for _ in 0..10 {
            resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
        }
        assert_eq!(gate.triggers, 1, "in flight, no further triggers");
    }

    #[test]
    fn test_focused_resets_and_retriggers() {
        let mut streak = DistractionStreak::new(5);
        let mut gate = MockGate { ready: true, ..Default::default() };
        for _ in 0..3 {
            resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
        }
        assert_eq!(resolve_focus(&mut streak, &mut gate, FocusState::Focused, &frame()), FocusState::Focused);
        assert_eq!(streak.count(), 0);
        for _ in 0..4 {
            resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
        }
        assert_eq!(gate.triggers, 0);
        resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
        assert_eq!(gate.triggers, 1);

        resolve_focus(&mut streak, &mut gate, FocusState::Focused, &frame());
        assert!(!streak.awaiting(), "focused clears the in-flight flag");
        for _ in 0..5 {
            resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
        }
        assert_eq!(gate.triggers, 2);
    }

    #[test]
    fn test_not_ready_never_triggers() {
        let mut streak = DistractionStreak::new(5);
        let mut gate = MockGate::default();
        for _ in 0..20 {
            let focus = resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
            assert_eq!(focus, FocusState::Distracted);
        }
        assert_eq!(gate.triggers, 0);
        assert_eq!(streak.count(), 20);
    }

    #[test]
    fn test_detected_action_overrides_to_focused() {
        let mut streak = DistractionStreak::new(5);
        let mut gate = MockGate { ready: true, ..Default::default() };
        for _ in 0..4 {
            resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
        }
        gate.result = IntentionalActionResult {
            detected: true,
            label: Some("stretching".into()),
            confidence: 0.9,
        };
        let focus = resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame());
        assert_eq!(focus, FocusState::Focused);
        assert_eq!(streak.count(), 0);
        assert!(!streak.awaiting());
    }

    #[test]
    fn test_undetected_result_keeps_distracted() {
        let mut streak = DistractionStreak::new(5);
        let mut gate = MockGate { ready: true, ..Default::default() };
        gate.result = IntentionalActionResult {
            detected: false,
            label: Some("sitting and working".into()),
            confidence: 0.8,
        };
        for _ in 0..6 {
            assert_eq!(
                resolve_focus(&mut streak, &mut gate, FocusState::Distracted, &frame()),
                FocusState::Distracted
            );
        }
        assert!(streak.awaiting());
    }

    #[test]
    fn test_pacer_deadlines() {
        let mut pacer = Pacer::new(10);
        let first = pacer.advance();
        assert!(first <= Duration::from_millis(1), "first tick is immediate");
        let second = pacer.advance();
        assert!(second > Duration::from_millis(50) && second <= Duration::from_millis(100));

        // Far behind: re-anchor instead of returning a string of zero waits
        pacer.next = Instant::now() - Duration::from_secs(5);
        assert!(pacer.advance().is_zero());
        assert!(pacer.advance() > Duration::from_millis(50));
    }
}
