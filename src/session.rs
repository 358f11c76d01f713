//! Pipeline bring-up.
//!
//! A session acquires the detection model, then the camera, and starts the
//! detection loop once both are up. An acquisition failure ends the session's
//! pipeline for good: the status message says what failed and nothing is
//! retried.

use anyhow::Result;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::detect::DetectorAdapter;
use crate::ingest::{open_source, FrameSource};
use crate::scheduler::{
    DetectionLoop, LatestPredictions, LoopConfig, LoopHandle, LoopStats, OverlaySink,
    PipelineStatus,
};

pub const LOADING_MODEL: &str = "Loading detection model...";
pub const ACTIVATING_CAMERA: &str = "Activating camera...";
pub const MODEL_FAILED: &str = "Failed to load the model.";
pub const CAMERA_FAILED: &str = "Camera access error.";
pub const READY: &str = "Ready.";

/// Progress of the acquisition stages, for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageEvent {
    Started(&'static str),
    Done,
    Failed(&'static str),
}

pub struct Session {
    status: PipelineStatus,
    predictions: LatestPredictions,
    handle: Option<LoopHandle>,
}

impl Session {
    /// Bring up the pipeline described by `cfg`.
    pub fn start(
        cfg: &ClientConfig,
        sink: Box<dyn OverlaySink>,
        on_stage: impl FnMut(StageEvent),
    ) -> Self {
        let loop_cfg = LoopConfig {
            tick_interval: cfg.tick_interval,
            ..LoopConfig::default()
        };
        Self::start_with(
            || DetectorAdapter::load(&cfg.detector, cfg.capture.width, cfg.capture.height),
            || open_source(&cfg.capture),
            sink,
            loop_cfg,
            on_stage,
        )
    }

    /// Bring up a pipeline from explicit parts.
    pub fn start_with(
        load_model: impl FnOnce() -> Result<DetectorAdapter>,
        open_camera: impl FnOnce() -> Result<Box<dyn FrameSource>>,
        sink: Box<dyn OverlaySink>,
        loop_cfg: LoopConfig,
        mut on_stage: impl FnMut(StageEvent),
    ) -> Self {
        let mut session = Self {
            status: PipelineStatus::new(),
            predictions: LatestPredictions::new(),
            handle: None,
        };

        session.status.set_stage(LOADING_MODEL);
        on_stage(StageEvent::Started(LOADING_MODEL));
        let detector = match load_model() {
            Ok(detector) => Arc::new(detector),
            Err(err) => {
                log::error!("model load failed: {:#}", err);
                session.fail(MODEL_FAILED, &mut on_stage);
                return session;
            }
        };
        session.status.mark_model_ready();
        on_stage(StageEvent::Done);

        session.status.set_stage(ACTIVATING_CAMERA);
        on_stage(StageEvent::Started(ACTIVATING_CAMERA));
        let source = match open_camera().and_then(|mut source| {
            source.connect()?;
            Ok(source)
        }) {
            Ok(source) => source,
            Err(err) => {
                log::error!("camera acquisition failed: {:#}", err);
                session.fail(CAMERA_FAILED, &mut on_stage);
                return session;
            }
        };
        session.status.mark_capture_ready();
        on_stage(StageEvent::Done);

        let detection_loop = DetectionLoop::new(
            source,
            detector,
            sink,
            session.status.clone(),
            session.predictions.clone(),
        );
        match detection_loop.spawn(loop_cfg) {
            Ok(handle) => {
                session.status.set_stage(READY);
                session.handle = Some(handle);
            }
            Err(err) => {
                log::error!("failed to start detection loop: {:#}", err);
                session.status.fail(format!("Detection loop failed to start: {err}"));
            }
        }
        session
    }

    fn fail(&self, message: &'static str, on_stage: &mut impl FnMut(StageEvent)) {
        self.status.fail(message);
        on_stage(StageEvent::Failed(message));
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    pub fn predictions(&self) -> &LatestPredictions {
        &self.predictions
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(LoopHandle::is_running)
            .unwrap_or(false)
    }

    pub fn stats(&self) -> LoopStats {
        self.handle
            .as_ref()
            .map(LoopHandle::stats)
            .unwrap_or_default()
    }

    /// Tear the pipeline down and wait for the loop to exit.
    pub fn stop(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.stop(),
            None => Ok(()),
        }
    }
}
