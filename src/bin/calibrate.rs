//! Terminal-guided five-point gaze calibration.
//!
//! Look at the named corner of the screen, press Enter, and hold still while
//! the camera samples. `q` then Enter cancels, also while a point is being
//! sampled, without touching the saved baseline.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use donot::calibration::{
    append_history, CalibrationOutcome, CalibrationPrompt, CalibrationRun, CalibrationTarget, Calibrator,
    LineCommands,
};
use donot::camera::CameraSource;
use donot::config::{AppConfig, DEFAULT_PATH};
use donot::inference::FaceMesh;
use donot::types::GazeSample;

#[derive(Parser, Debug)]
#[command(author, version, about = "Five-point gaze calibration", long_about = None)]
struct Args {
    /// Camera Index (default 0)
    #[arg(short, long, default_value_t = 0)]
    cam_index: u32,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_PATH)]
    config: PathBuf,

    /// Seconds to sample each point (overrides the config)
    #[arg(long)]
    duration: Option<f64>,
}

struct TerminalPrompt {
    commands: LineCommands,
}

impl TerminalPrompt {
    fn from_stdin() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { commands: LineCommands::new(rx) }
    }
}

fn describe(target: &CalibrationTarget) -> String {
    target.label.replace('_', " ").to_uppercase()
}

impl CalibrationPrompt for TerminalPrompt {
    fn ready(&mut self, target: &CalibrationTarget) -> bool {
        print!(
            "Look at the {} of the screen and press Enter ({} to cancel): ",
            describe(target).cyan().bold(),
            "q".yellow()
        );
        io::stdout().flush().ok();
        self.commands.wait_ready()
    }

    fn cancelled(&mut self) -> bool {
        self.commands.cancel_requested()
    }

    fn point_done(&mut self, _target: &CalibrationTarget, samples: usize, median: GazeSample) {
        println!(
            "  {} {} samples, v={:.3} h={:.3}",
            "ok".green(),
            samples,
            median.vertical,
            median.horizontal
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("donot=info")))
        .init();

    let mut config = AppConfig::load_strict(&args.config)?;
    if let Some(duration) = args.duration {
        if !duration.is_finite() || duration <= 0.0 {
            bail!("--duration must be a positive number of seconds");
        }
        config.calibration.point_duration_secs = duration;
    }

    let mut mesh = FaceMesh::new(&config.models.face_mesh_path, &config.models.face_detection_path)
        .context("Failed to load face mesh")?;
    let mut camera = CameraSource::new(args.cam_index).context("Failed to open camera")?;

    println!("{}", "Gaze calibration".green().bold());
    println!("Camera: {} ({}x{})", camera.name(), camera.width(), camera.height());
    let calibrator = Calibrator::new(&config.calibration, config.monitor.mirror);
    let outcome = calibrator.run(&mut camera, &mut mesh, &mut TerminalPrompt::from_stdin())?;

    let baseline = match outcome {
        CalibrationOutcome::Completed(baseline) => baseline,
        CalibrationOutcome::Cancelled => {
            println!("{}", "Calibration cancelled; previous baseline kept.".yellow());
            return Ok(());
        }
    };

    config.profile.calibration = Some(baseline.clone());
    config.save(&args.config)?;

    let history = Path::new("calibration_data").join("calibration_history.json");
    let run = CalibrationRun::new(config.profile.username.clone(), baseline.clone());
    let run_id = run.run_id.clone();
    let entries = append_history(&history, run)?;

    println!(
        "Saved baseline v={:.3} h={:.3} (run {}, {} in history)",
        baseline.vertical, baseline.horizontal, run_id, entries
    );
    Ok(())
}
