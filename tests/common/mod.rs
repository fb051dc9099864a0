#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use donot::aggregator::AlertEvent;
use donot::alert::AlertSink;
use donot::camera::FrameSource;
use donot::error::MonitorError;
use donot::gaze::*;
use donot::inference::LandmarkDetector;
use donot::types::{Frame, Landmarks, Point3D};

/// 478-point face whose pupils sit at the given eye ratios.
pub fn face_with_ratios(vertical: f32, horizontal: f32) -> Landmarks {
    let mut points = vec![Point3D::new(0.5, 0.5); 478];
    points[LEFT_EYE_INNER] = Point3D::new(0.30, 0.42);
    points[LEFT_EYE_OUTER] = Point3D::new(0.40, 0.42);
    points[LEFT_EYE_TOP] = Point3D::new(0.35, 0.40);
    points[LEFT_EYE_BOTTOM] = Point3D::new(0.35, 0.44);
    points[LEFT_PUPIL] = Point3D::new(0.30 + 0.10 * horizontal, 0.40 + 0.04 * vertical);
    points[RIGHT_EYE_INNER] = Point3D::new(0.60, 0.42);
    points[RIGHT_EYE_OUTER] = Point3D::new(0.70, 0.42);
    points[RIGHT_EYE_TOP] = Point3D::new(0.65, 0.40);
    points[RIGHT_EYE_BOTTOM] = Point3D::new(0.65, 0.44);
    points[RIGHT_PUPIL] = Point3D::new(0.60 + 0.10 * horizontal, 0.40 + 0.04 * vertical);
    Landmarks::new(points)
}

/// Counts captures; fails with a capture error once `fail_after` frames
/// have been handed out.
pub struct FakeSource {
    pub captured: Arc<AtomicUsize>,
    pub released: Arc<AtomicBool>,
    pub available: bool,
    pub fail_after: Option<usize>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            captured: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
            available: true,
            fail_after: None,
        }
    }
}

impl FrameSource for FakeSource {
    fn capture(&mut self) -> Result<Frame, MonitorError> {
        let n = self.captured.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            return Err(MonitorError::Capture("end of stream".to_string()));
        }
        Ok(Frame::from_pixel(64, 48, image::Rgb([90, 90, 90])))
    }

    fn is_available(&self) -> bool {
        self.available && !self.released.load(Ordering::SeqCst)
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Always reports the same detection.
pub struct FixedLandmarks(pub Option<Landmarks>);

impl LandmarkDetector for FixedLandmarks {
    fn detect(&mut self, _frame: &Frame) -> Result<Option<Landmarks>> {
        Ok(self.0.clone())
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<Vec<AlertEvent>>>);

impl RecordingSink {
    pub fn events(&self) -> Vec<AlertEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingSink {
    fn alert(&mut self, event: &AlertEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
