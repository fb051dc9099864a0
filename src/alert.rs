//! Alert emission. The monitor decides when; sinks decide what happens.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;

use colored::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregator::AlertEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Holds the per-user clips, `alert_<user>.wav`.
    pub folder: PathBuf,
    /// Played when the per-user clip is missing.
    pub default_file: PathBuf,
    /// Player program and leading arguments; the clip path is appended.
    pub player: Option<Vec<String>>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("alerts"),
            default_file: PathBuf::from("alert.wav"),
            player: None,
        }
    }
}

impl AlertConfig {
    /// Creates `folder` if needed so per-user clips have a home. Failure is
    /// logged; alerts then fall back to `default_file`.
    pub fn ensure_folder(&self) -> bool {
        match fs::create_dir_all(&self.folder) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not create alerts folder {}: {}", self.folder.display(), e);
                false
            }
        }
    }
}

pub trait AlertSink: Send {
    fn alert(&mut self, event: &AlertEvent);
}

impl AlertSink for Vec<Box<dyn AlertSink>> {
    fn alert(&mut self, event: &AlertEvent) {
        for sink in self.iter_mut() {
            sink.alert(event);
        }
    }
}

pub fn alert_message(event: &AlertEvent) -> String {
    format!(
        "Distracted for {}% of the last {} seconds!",
        percent(event.ratio),
        event.window_seconds
    )
}

/// Whole percent, truncated. The epsilon absorbs f32 error on exact k/n ratios.
fn percent(ratio: f32) -> u32 {
    (ratio * 100.0 + 1e-3).floor().max(0.0) as u32
}

/// `<folder>/alert_<user>.wav`, with the username reduced to filename-safe
/// characters. A missing or empty name maps to `default`.
pub fn alert_audio_filename(username: Option<&str>, folder: &Path) -> PathBuf {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_\-]+").expect("static regex"));
    let name = username.map(str::trim).filter(|n| !n.is_empty()).unwrap_or("default");
    let safe = unsafe_chars.replace_all(name, "_");
    folder.join(format!("alert_{}.wav", safe))
}

/// The requested clip if it exists, the default clip otherwise.
pub fn resolve_audio(requested: Option<&Path>, default_file: &Path) -> PathBuf {
    match requested {
        Some(path) if path.exists() => path.to_path_buf(),
        _ => default_file.to_path_buf(),
    }
}

/// Writes the alert line to the log and the terminal.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&mut self, event: &AlertEvent) {
        let message = alert_message(event);
        info!(ratio = event.ratio, audio = ?event.audio_file, "{}", message);
        println!("{}", message.red().bold());
    }
}

/// Plays the clip through an external program on a detached thread.
/// Playback failures are logged and otherwise ignored.
pub struct CommandAlertPlayer {
    program: String,
    args: Vec<String>,
    default_file: PathBuf,
}

impl CommandAlertPlayer {
    /// `None` when no player command is configured.
    pub fn from_config(config: &AlertConfig) -> Option<Self> {
        let (program, args) = config.player.as_ref()?.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            default_file: config.default_file.clone(),
        })
    }
}

impl AlertSink for CommandAlertPlayer {
    fn alert(&mut self, event: &AlertEvent) {
        let file = resolve_audio(event.audio_file.as_deref(), &self.default_file);
        let program = self.program.clone();
        let args = self.args.clone();
        let spawned = thread::Builder::new()
            .name("alert-playback".to_string())
            .spawn(move || {
                debug!("Playing {} with {}", file.display(), program);
                let status = Command::new(&program)
                    .args(&args)
                    .arg(&file)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                match status {
                    Ok(s) if s.success() => {}
                    Ok(s) => warn!("Alert player exited with {}", s),
                    Err(e) => warn!("Alert playback failed: {}", e),
                }
            });
        if let Err(e) = spawned {
            warn!("Could not start alert playback: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn event(ratio: f32) -> AlertEvent {
        AlertEvent {
            ratio,
            window_seconds: 5,
            at: 12.0,
            audio_file: None,
        }
    }

    #[test]
    fn test_alert_message_truncates_percent() {
        assert_eq!(alert_message(&event(0.65)), "Distracted for 65% of the last 5 seconds!");
        assert_eq!(alert_message(&event(1.0)), "Distracted for 100% of the last 5 seconds!");
        assert_eq!(alert_message(&event(13.0 / 20.0)), "Distracted for 65% of the last 5 seconds!");
        assert_eq!(alert_message(&event(0.659)), "Distracted for 65% of the last 5 seconds!");
    }

    #[test]
    fn test_alert_audio_filename() {
        let folder = Path::new("alerts");
        assert_eq!(alert_audio_filename(Some("alice"), folder), PathBuf::from("alerts/alert_alice.wav"));
        assert_eq!(alert_audio_filename(None, folder), PathBuf::from("alerts/alert_default.wav"));
        assert_eq!(alert_audio_filename(Some("  "), folder), PathBuf::from("alerts/alert_default.wav"));
        assert_eq!(
            alert_audio_filename(Some("../evil name"), folder),
            PathBuf::from("alerts/alert__evil_name.wav")
        );
    }

    #[test]
    fn test_resolve_audio_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("alert_bob.wav");
        std::fs::write(&present, b"RIFF").unwrap();
        let default = Path::new("alert.wav");

        assert_eq!(resolve_audio(Some(&present), default), present);
        assert_eq!(resolve_audio(Some(&dir.path().join("missing.wav")), default), default);
        assert_eq!(resolve_audio(None, default), default);
    }

    #[test]
    fn test_player_requires_command() {
        assert!(CommandAlertPlayer::from_config(&AlertConfig::default()).is_none());
        let config = AlertConfig {
            player: Some(vec!["aplay".into(), "-q".into()]),
            ..AlertConfig::default()
        };
        let player = CommandAlertPlayer::from_config(&config).unwrap();
        assert_eq!(player.program, "aplay");
        assert_eq!(player.args, vec!["-q"]);
    }

    #[test]
    fn test_ensure_folder_creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = AlertConfig {
            folder: dir.path().join("sounds").join("alerts"),
            ..AlertConfig::default()
        };
        assert!(config.ensure_folder());
        assert!(config.folder.is_dir());
        assert!(config.ensure_folder(), "existing folder is fine");

        let blocked = dir.path().join("file");
        std::fs::write(&blocked, b"x").unwrap();
        let config = AlertConfig {
            folder: blocked.join("alerts"),
            ..AlertConfig::default()
        };
        assert!(!config.ensure_folder());
    }

    struct Recording(Arc<Mutex<Vec<f32>>>);

    impl AlertSink for Recording {
        fn alert(&mut self, event: &AlertEvent) {
            self.0.lock().unwrap().push(event.ratio);
        }
    }

    #[test]
    fn test_sink_fanout() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sinks: Vec<Box<dyn AlertSink>> = vec![
            Box::new(Recording(seen.clone())),
            Box::new(LogAlertSink),
            Box::new(Recording(seen.clone())),
        ];
        sinks.alert(&event(0.7));
        assert_eq!(*seen.lock().unwrap(), vec![0.7, 0.7]);
    }
}
