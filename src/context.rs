//! Shared application context threaded through the tasks and handlers.

use std::time::Instant;

use tokio::sync::Mutex;

use crate::camera::CameraHandle;
use crate::command::EventHub;
use crate::config::Config;
use crate::gallery::Gallery;
use crate::record::{Recorder, RecorderConfig};
use crate::state::DeviceState;

/// Everything the sessions, tasks and web handlers share.
///
/// `camera` is `None` when the sensor failed to initialize at startup;
/// capture, recording and streaming stay unavailable for the run while the
/// gallery and web surfaces continue to serve.
pub struct AppContext {
    pub config: Config,
    pub camera: Option<CameraHandle>,
    pub recorder: Mutex<Recorder>,
    pub gallery: Gallery,
    pub state: DeviceState,
    pub events: EventHub,
    pub started_at: Instant,
}

impl AppContext {
    pub fn new(config: Config, camera: Option<CameraHandle>) -> Self {
        let recorder = Recorder::new(RecorderConfig {
            root: config.storage_root.clone(),
            fps: config.target_fps,
            flush_every: config.flush_every,
        });
        let gallery = Gallery::new(config.storage_root.clone());

        Self {
            camera,
            recorder: Mutex::new(recorder),
            gallery,
            state: DeviceState::new(),
            events: EventHub::default(),
            started_at: Instant::now(),
            config,
        }
    }
}
