use std::io::{self, BufRead};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use donot::alert::{AlertSink, CommandAlertPlayer, LogAlertSink};
use donot::analyzer::FrameAnalyzer;
use donot::args::Args;
use donot::camera::{list_cameras, CameraSource};
use donot::clip::ClipScorer;
use donot::config::AppConfig;
use donot::emotion::{EmotionClassifier, OnnxEmotionClassifier};
use donot::inference::FaceMesh;
use donot::intentional::{ActionScorer, IntentionalActionDetector};
use donot::monitor::{FocusMonitor, FrameCallback};
use donot::settings::SettingsStore;

fn init_logging(verbose: bool) {
    let default = if verbose { "donot=debug" } else { "donot=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn load_emotion(config: &AppConfig) -> Option<Box<dyn EmotionClassifier>> {
    let path = &config.models.emotion_model_path;
    if !path.exists() {
        warn!("Emotion model {} not found; emotions will read Unknown", path.display());
        return None;
    }
    match OnnxEmotionClassifier::new(path) {
        Ok(classifier) => Some(Box::new(classifier)),
        Err(e) => {
            warn!("Emotion model unavailable: {:#}", e);
            None
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list {
        return list_cameras();
    }

    println!("{}", "donot - focus monitor".green().bold());

    let config = AppConfig::load(&args.config)?;
    let settings = Arc::new(SettingsStore::new(config.profile.clone()));

    let mesh = FaceMesh::new(&config.models.face_mesh_path, &config.models.face_detection_path)
        .context("Failed to load face mesh")?;
    let mut analyzer = FrameAnalyzer::new(Box::new(mesh), load_emotion(&config))
        .with_baseline(config.profile.calibration.clone());
    analyzer.set_skip_emotion(config.models.skip_emotion);
    if config.profile.calibration.is_none() {
        println!("{}", "No calibration found; run `calibrate` for accurate gaze.".yellow());
    }

    let clip = config.models.clip.clone();
    let detector = IntentionalActionDetector::new(
        config.intentional.clone(),
        Box::new(move || Ok(Box::new(ClipScorer::load(&clip)?) as Box<dyn ActionScorer>)),
    );

    config.alert.ensure_folder();
    let mut sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(LogAlertSink)];
    if let Some(player) = CommandAlertPlayer::from_config(&config.alert) {
        sinks.push(Box::new(player));
    }

    let mut monitor = FocusMonitor::new(config.monitor.clone(), settings)
        .with_intentional(detector)
        .with_alerts(Box::new(sinks), config.alert.folder.clone());

    let source = CameraSource::new(args.cam_index).context("Failed to open camera")?;
    println!("Camera: {} ({}x{})", source.name(), source.width(), source.height());

    let (quit_tx, quit_rx) = mpsc::channel::<()>();
    let frame_limit = args.frames;
    let frame_quit = quit_tx.clone();
    let callback: FrameCallback = Box::new(move |published| {
        if let (true, Some(labels)) = (published.analyzed, &published.labels) {
            debug!(
                frame = published.frame_index,
                ratio = ?published.distraction_ratio,
                "{} / {} / {}",
                labels.emotion,
                labels.gaze,
                labels.focus
            );
        }
        if frame_limit.is_some_and(|n| published.frame_index >= n) {
            let _ = frame_quit.send(());
        }
    });

    monitor.start(
        Box::new(source),
        analyzer,
        Some(callback),
        Some(config.profile.intentional_actions.clone()),
    )?;

    if frame_limit.is_none() {
        println!("Monitoring. Press Enter to stop.");
        thread::spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().lock().read_line(&mut line);
            let _ = quit_tx.send(());
        });
    }

    loop {
        match quit_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) if !monitor.is_running() => {
                warn!("Monitoring loop stopped on its own");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let last = monitor.latest();
    monitor.stop();

    if let (Some(path), Some(published)) = (&args.snapshot, last) {
        published
            .frame
            .save(path)
            .with_context(|| format!("Failed to save snapshot {}", path.display()))?;
        info!("Saved snapshot to {}", path.display());
    }

    Ok(())
}
