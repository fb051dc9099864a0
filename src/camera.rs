use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use colored::*;
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
    Camera,
};
use tracing::{debug, info, warn};

use crate::error::MonitorError;
use crate::types::Frame;

/// Anything that hands out frames on demand.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Frame, MonitorError>;
    fn is_available(&self) -> bool;
    /// Idempotent.
    fn release(&mut self);
}

enum Request {
    Capture,
    Release,
}

/// Camera details reported once the stream is open.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// nokhwa camera owned by a dedicated capture thread; frames are requested
/// over a channel so the handle itself can move between threads.
pub struct CameraSource {
    requests: Sender<Request>,
    frames: Receiver<Result<Frame, MonitorError>>,
    worker: Option<JoinHandle<()>>,
    info: CameraInfo,
    open: bool,
}

impl CameraSource {
    pub fn new(index: u32) -> Result<Self, MonitorError> {
        let (req_tx, req_rx) = mpsc::channel::<Request>();
        let (frame_tx, frame_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name(format!("camera-{}", index))
            .spawn(move || {
                let mut camera = match open_camera(index) {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let info = CameraInfo {
                    name: camera.info().human_name(),
                    width: camera.resolution().width(),
                    height: camera.resolution().height(),
                };
                if ready_tx.send(Ok(info)).is_err() {
                    return;
                }
                while let Ok(Request::Capture) = req_rx.recv() {
                    if frame_tx.send(grab(&mut camera)).is_err() {
                        break;
                    }
                }
                if let Err(e) = camera.stop_stream() {
                    warn!("Failed to stop camera stream: {}", e);
                }
                debug!("camera thread exiting");
            })?;

        let info = ready_rx
            .recv()
            .map_err(|_| MonitorError::CameraOpen("camera thread exited".to_string()))??;
        info!("Opened camera: {} ({}x{})", info.name, info.width, info.height);

        Ok(Self {
            requests: req_tx,
            frames: frame_rx,
            worker: Some(worker),
            info,
            open: true,
        })
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}

fn open_camera(index: u32) -> Result<Camera, MonitorError> {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = Camera::new(CameraIndex::Index(index), requested)
        .map_err(|e| MonitorError::CameraOpen(e.to_string()))?;
    camera
        .open_stream()
        .map_err(|e| MonitorError::CameraOpen(e.to_string()))?;
    Ok(camera)
}

fn grab(camera: &mut Camera) -> Result<Frame, MonitorError> {
    let buffer = camera
        .frame()
        .map_err(|e| MonitorError::Capture(e.to_string()))?;
    buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| MonitorError::Capture(e.to_string()))
}

impl FrameSource for CameraSource {
    fn capture(&mut self) -> Result<Frame, MonitorError> {
        if !self.open {
            return Err(MonitorError::SourceUnavailable);
        }
        self.requests
            .send(Request::Capture)
            .map_err(|_| MonitorError::SourceUnavailable)?;
        self.frames
            .recv()
            .map_err(|_| MonitorError::SourceUnavailable)?
    }

    fn is_available(&self) -> bool {
        self.open && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let _ = self.requests.send(Request::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Camera thread panicked");
            }
        }
        info!("Released camera {}", self.info.name);
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Prints the cameras the platform backend can see.
pub fn list_cameras() -> Result<()> {
    let cameras = query(ApiBackend::Auto)
        .map_err(|e| anyhow!(e))
        .context("Failed to query cameras")?;
    if cameras.is_empty() {
        println!("{}", "No cameras found".yellow());
        return Ok(());
    }
    println!("{}", "Available cameras:".green().bold());
    for cam in cameras {
        println!("  [{}] {} - {}", cam.index(), cam.human_name().cyan(), cam.description());
    }
    Ok(())
}
