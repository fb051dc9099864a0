//! Webcam focus monitor.
//!
//! Frames flow from a [`camera::FrameSource`] through the
//! [`analyzer::FrameAnalyzer`] (landmarks, gaze, emotion) into the
//! [`monitor::FocusMonitor`] loop, which keeps a rolling distraction ratio
//! and raises cooldown-gated alerts.

pub mod adjust;
pub mod aggregator;
pub mod alert;
pub mod analyzer;
pub mod args;
pub mod calibration;
pub mod camera;
pub mod clip;
pub mod config;
pub mod detector;
pub mod emotion;
pub mod error;
pub mod font;
pub mod gaze;
pub mod inference;
pub mod intentional;
pub mod monitor;
pub mod overlay;
pub mod settings;
pub mod types;
