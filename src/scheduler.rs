//! Detection loop scheduler.
//!
//! The loop runs on its own worker thread. Each tick pulls the current frame,
//! submits it to the detector adapter and, once the call has resolved, publishes
//! the prediction list, then hands it to the overlay sink. The next tick is only
//! scheduled after the previous one has finished, so inference never queues up
//! behind a slow model; the adapter's single-flight slot enforces the same bound
//! for any other caller.
//!
//! A tick that fails (frame error, inference error, even a panic) is logged and
//! the loop carries on. The loop stops only when its `LoopHandle` is stopped or
//! dropped.

use anyhow::{anyhow, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{prediction_labels, DetectorAdapter, Prediction};
use crate::frame::Frame;
use crate::ingest::FrameSource;

/// Readiness of the pipeline and the message shown to the user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopState {
    pub model_ready: bool,
    pub capture_ready: bool,
    pub status_message: String,
}

impl LoopState {
    /// Inference may run only once both the model and the camera are up.
    pub fn can_run(&self) -> bool {
        self.model_ready && self.capture_ready
    }
}

/// Shared handle to the pipeline's `LoopState`.
///
/// Written by the session while acquiring the camera and model; read by the
/// loop and the UI.
#[derive(Clone, Debug, Default)]
pub struct PipelineStatus {
    inner: Arc<RwLock<LoopState>>,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stage(&self, message: impl Into<String>) {
        self.update(|state| state.status_message = message.into());
    }

    pub fn mark_model_ready(&self) {
        self.update(|state| state.model_ready = true);
    }

    pub fn mark_capture_ready(&self) {
        self.update(|state| state.capture_ready = true);
    }

    /// Record an acquisition failure. The message persists for the session.
    pub fn fail(&self, message: impl Into<String>) {
        self.update(|state| state.status_message = message.into());
    }

    pub fn snapshot(&self) -> LoopState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut LoopState)) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}

/// The most recently completed prediction list.
///
/// Only the detection loop publishes; everyone else reads a snapshot. Each
/// publish replaces the whole list.
#[derive(Clone, Debug, Default)]
pub struct LatestPredictions {
    inner: Arc<RwLock<Arc<Vec<Prediction>>>>,
}

impl LatestPredictions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Arc<Vec<Prediction>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Class labels of the current predictions, in detector order.
    pub fn labels(&self) -> Vec<String> {
        prediction_labels(&self.get())
    }

    pub(crate) fn publish(&self, predictions: Vec<Prediction>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(predictions);
    }
}

/// Receives every completed inference together with the frame it ran on.
pub trait OverlaySink: Send {
    fn present(&mut self, frame: &Frame, predictions: &[Prediction]) -> Result<()>;
}

/// Sink that discards its input.
#[derive(Debug, Default)]
pub struct NullSink;

impl OverlaySink for NullSink {
    fn present(&mut self, _frame: &Frame, _predictions: &[Prediction]) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Minimum spacing between tick starts.
    pub tick_interval: Duration,
    pub health_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(16),
            health_interval: Duration::from_secs(5),
        }
    }
}

/// What one tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Model or camera not ready; nothing was attempted.
    NotReady,
    /// No decodable frame yet.
    Skipped,
    /// Another inference held the detector slot.
    Busy,
    Published { count: usize },
    Failed,
}

/// Counters since the loop was created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub published: u64,
    pub skipped: u64,
    pub busy: u64,
    pub not_ready: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    published: AtomicU64,
    skipped: AtomicU64,
    busy: AtomicU64,
    not_ready: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: TickOutcome) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            TickOutcome::NotReady => &self.not_ready,
            TickOutcome::Skipped => &self.skipped,
            TickOutcome::Busy => &self.busy,
            TickOutcome::Published { .. } => &self.published,
            TickOutcome::Failed => &self.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LoopStats {
        LoopStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            not_ready: self.not_ready.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

pub struct DetectionLoop {
    source: Box<dyn FrameSource>,
    detector: Arc<DetectorAdapter>,
    sink: Box<dyn OverlaySink>,
    status: PipelineStatus,
    predictions: LatestPredictions,
    counters: Arc<Counters>,
}

impl DetectionLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Arc<DetectorAdapter>,
        sink: Box<dyn OverlaySink>,
        status: PipelineStatus,
        predictions: LatestPredictions,
    ) -> Self {
        Self {
            source,
            detector,
            sink,
            status,
            predictions,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn predictions(&self) -> &LatestPredictions {
        &self.predictions
    }

    pub fn stats(&self) -> LoopStats {
        self.counters.snapshot()
    }

    /// Run one unit of work synchronously.
    pub fn tick(&mut self) -> TickOutcome {
        let outcome = self.step();
        self.counters.record(outcome);
        outcome
    }

    fn step(&mut self) -> TickOutcome {
        if !self.status.snapshot().can_run() {
            return TickOutcome::NotReady;
        }

        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::Skipped,
            Err(err) => {
                log::warn!("frame read failed: {:#}", err);
                return TickOutcome::Failed;
            }
        };

        match self.detector.try_detect(&frame) {
            None => TickOutcome::Busy,
            Some(Err(err)) => {
                log::warn!("inference failed on frame {}: {:#}", frame.sequence, err);
                TickOutcome::Failed
            }
            Some(Ok(predictions)) => {
                let count = predictions.len();
                self.predictions.publish(predictions.clone());
                if let Err(err) = self.sink.present(&frame, &predictions) {
                    log::warn!("overlay render failed: {:#}", err);
                }
                TickOutcome::Published { count }
            }
        }
    }

    /// Move the loop onto a worker thread.
    pub fn spawn(self, cfg: LoopConfig) -> Result<LoopHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let counters = self.counters.clone();
        let predictions = self.predictions.clone();
        let join = std::thread::Builder::new()
            .name("detection-loop".to_string())
            .spawn(move || self.run(cfg, shutdown_thread))?;

        Ok(LoopHandle {
            shutdown,
            join: Some(join),
            counters,
            predictions,
        })
    }

    fn run(mut self, cfg: LoopConfig, shutdown: Arc<AtomicBool>) {
        log::info!(
            "detection loop started (detector={}, tick={:?})",
            self.detector.name(),
            cfg.tick_interval
        );
        let mut last_health_log = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.step())) {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::error!("detection tick panicked; continuing");
                    TickOutcome::Failed
                }
            };
            self.counters.record(outcome);

            if last_health_log.elapsed() >= cfg.health_interval {
                let stats = self.counters.snapshot();
                let source = self.source.stats();
                log::info!(
                    "detection loop ticks={} published={} skipped={} failures={} frames={} source={}",
                    stats.ticks,
                    stats.published,
                    stats.skipped,
                    stats.failures,
                    source.frames_captured,
                    source.source
                );
                last_health_log = Instant::now();
            }

            let pause = cfg.tick_interval.saturating_sub(started.elapsed());
            if !pause.is_zero() {
                std::thread::sleep(pause);
            }
        }
        log::info!("detection loop stopped");
    }
}

/// Owner of a running detection loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct LoopHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
    predictions: LatestPredictions,
}

impl LoopHandle {
    pub fn stats(&self) -> LoopStats {
        self.counters.snapshot()
    }

    pub fn predictions(&self) -> &LatestPredictions {
        &self.predictions
    }

    pub fn is_running(&self) -> bool {
        self.join
            .as_ref()
            .map(|join| !join.is_finished())
            .unwrap_or(false)
    }

    /// Signal teardown and wait for the worker to exit.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("detection loop thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_and_join() {
            log::error!("{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorBackend, StubBackend};
    use crate::ingest::SourceStats;
    use anyhow::anyhow;

    /// Serves a fixed script of frame results, then repeats the last one.
    struct ScriptedSource {
        script: Vec<Option<()>>,
        served: usize,
    }

    impl FrameSource for ScriptedSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let idx = self.served.min(self.script.len() - 1);
            self.served += 1;
            match self.script[idx] {
                Some(()) => {
                    let mut data = vec![0u8; 32 * 32 * 3];
                    for px in data.chunks_exact_mut(3).take(32 * 8) {
                        px.copy_from_slice(&[255, 255, 255]);
                    }
                    Frame::from_rgb(data, 32, 32, self.served as u64).map(Some)
                }
                None => Ok(None),
            }
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Prediction>> {
            Err(anyhow!("accelerator lost"))
        }
    }

    fn ready_status() -> PipelineStatus {
        let status = PipelineStatus::new();
        status.mark_model_ready();
        status.mark_capture_ready();
        status
    }

    fn detection_loop(script: Vec<Option<()>>, backend: Box<dyn DetectorBackend>) -> DetectionLoop {
        DetectionLoop::new(
            Box::new(ScriptedSource { script, served: 0 }),
            Arc::new(DetectorAdapter::new(backend)),
            Box::new(NullSink),
            ready_status(),
            LatestPredictions::new(),
        )
    }

    #[test]
    fn not_ready_until_model_and_camera_are_up() {
        let status = PipelineStatus::new();
        let mut dl = DetectionLoop::new(
            Box::new(ScriptedSource {
                script: vec![Some(())],
                served: 0,
            }),
            Arc::new(DetectorAdapter::new(Box::new(StubBackend::new()))),
            Box::new(NullSink),
            status.clone(),
            LatestPredictions::new(),
        );
        assert_eq!(dl.tick(), TickOutcome::NotReady);
        status.mark_model_ready();
        assert_eq!(dl.tick(), TickOutcome::NotReady);
        status.mark_capture_ready();
        assert_eq!(dl.tick(), TickOutcome::Published { count: 1 });
    }

    #[test]
    fn undecodable_frame_skips_and_keeps_previous_predictions() {
        let mut dl = detection_loop(vec![Some(()), None], Box::new(StubBackend::new()));
        assert_eq!(dl.tick(), TickOutcome::Published { count: 1 });
        assert_eq!(dl.tick(), TickOutcome::Skipped);
        assert_eq!(dl.predictions().labels(), vec!["person".to_string()]);

        let stats = dl.stats();
        assert_eq!((stats.ticks, stats.published, stats.skipped), (2, 1, 1));
    }

    #[test]
    fn inference_failure_is_contained() {
        let mut dl = detection_loop(vec![Some(())], Box::new(FailingBackend));
        assert_eq!(dl.tick(), TickOutcome::Failed);
        assert_eq!(dl.tick(), TickOutcome::Failed);
        assert!(dl.predictions().get().is_empty());
        assert_eq!(dl.stats().failures, 2);
    }

    #[test]
    fn failed_status_persists() {
        let status = PipelineStatus::new();
        status.set_stage("Activating camera...");
        status.mark_model_ready();
        status.fail("Camera access error.");
        let state = status.snapshot();
        assert_eq!(state.status_message, "Camera access error.");
        assert!(!state.can_run());
    }
}
