use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::backends::StubBackend;
use crate::detect::result::Prediction;
use crate::flight::SingleFlight;
use crate::frame::Frame;

/// Sole owner of the loaded model.
///
/// The adapter exposes `try_detect` and nothing else that touches the backend.
/// Inference is wrapped in a capacity-one slot: while one call is in flight,
/// further calls are refused instead of queueing accelerator work.
pub struct DetectorAdapter {
    backend: Mutex<Box<dyn DetectorBackend>>,
    name: &'static str,
    slot: SingleFlight,
    min_score: f32,
    max_detections: usize,
}

impl DetectorAdapter {
    pub fn new(backend: Box<dyn DetectorBackend>) -> Self {
        let defaults = DetectorSettings::default();
        let name = backend.name();
        Self {
            backend: Mutex::new(backend),
            name,
            slot: SingleFlight::new(),
            min_score: defaults.min_score,
            max_detections: defaults.max_detections,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_max_detections(mut self, max_detections: usize) -> Self {
        self.max_detections = max_detections;
        self
    }

    /// Select, load and warm up the configured backend.
    pub fn load(settings: &DetectorSettings, input_width: u32, input_height: u32) -> Result<Self> {
        let mut backend = select_backend(settings, input_width, input_height)?;
        backend.warm_up()?;
        log::info!("detector backend '{}' loaded", backend.name());
        Ok(Self::new(backend)
            .with_min_score(settings.min_score)
            .with_max_detections(settings.max_detections))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True while an inference call holds the slot.
    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Run one inference, or return `None` if another one is still in flight.
    ///
    /// Returned predictions satisfy `Prediction::is_valid`, are at or above the
    /// configured minimum score, and are capped at `max_detections`.
    pub fn try_detect(&self, frame: &Frame) -> Option<Result<Vec<Prediction>>> {
        let _permit = self.slot.try_acquire()?;
        // Backends keep no cross-call state; a poisoned lock is safe to reuse.
        let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        Some(
            backend
                .detect(frame)
                .map(|raw| sanitize_predictions(raw, self.min_score, self.max_detections)),
        )
    }
}

/// Drop invalid or low-confidence predictions, best first, at most `max`.
///
/// Scores slightly outside `[0, 1]` are clamped; non-finite scores or boxes are
/// discarded.
pub fn sanitize_predictions(raw: Vec<Prediction>, min_score: f32, max: usize) -> Vec<Prediction> {
    let mut kept: Vec<Prediction> = raw
        .into_iter()
        .filter(|p| p.score.is_finite() && p.bbox.is_finite())
        .map(|mut p| {
            p.score = p.score.clamp(0.0, 1.0);
            p
        })
        .filter(|p| p.score >= min_score)
        .collect();
    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.truncate(max);
    kept
}

/// Build the backend named in the settings.
pub fn select_backend(
    settings: &DetectorSettings,
    input_width: u32,
    input_height: u32,
) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::new())),
        "tract" => {
            let model_path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
            #[cfg(feature = "backend-tract")]
            {
                Ok(Box::new(crate::detect::backends::TractBackend::new(
                    model_path,
                    input_width,
                    input_height,
                )?))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                let _ = (model_path, input_width, input_height);
                Err(anyhow!("tract backend requires the backend-tract feature"))
            }
        }
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;

    struct FixedBackend(Vec<Prediction>);

    impl DetectorBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Prediction>> {
            Ok(self.0.clone())
        }
    }

    /// Signals when it starts and waits for permission to finish.
    struct GatedBackend {
        started: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
    }

    impl DetectorBackend for GatedBackend {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Prediction>> {
            self.started.send(()).ok();
            self.release.recv().ok();
            Ok(Vec::new())
        }
    }

    fn blank_frame() -> Frame {
        Frame::from_rgb(vec![0u8; 4 * 4 * 3], 4, 4, 1).unwrap()
    }

    #[test]
    fn sanitize_drops_invalid_and_caps_count() {
        let raw = vec![
            Prediction::new("low", 0.2, [0.0; 4]),
            Prediction::new("nan", f32::NAN, [0.0; 4]),
            Prediction::new("inf_box", 0.9, [f32::INFINITY, 0.0, 1.0, 1.0]),
            Prediction::new("over", 1.3, [0.0; 4]),
            Prediction::new("mid", 0.7, [0.0; 4]),
            Prediction::new("high", 0.9, [0.0; 4]),
        ];
        let kept = sanitize_predictions(raw, 0.5, 2);
        let classes: Vec<&str> = kept.iter().map(|p| p.class.as_str()).collect();
        assert_eq!(classes, vec!["over", "high"]);
        assert_eq!(kept[0].score, 1.0);
        assert!(kept.iter().all(Prediction::is_valid));
    }

    #[test]
    fn adapter_applies_min_score() {
        let adapter = DetectorAdapter::new(Box::new(FixedBackend(vec![
            Prediction::new("person", 0.92, [10.0, 10.0, 100.0, 200.0]),
            Prediction::new("cup", 0.3, [0.0, 0.0, 5.0, 5.0]),
        ])));
        let preds = adapter.try_detect(&blank_frame()).unwrap().unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].class, "person");
        assert!(!adapter.is_busy());
    }

    #[test]
    fn adapter_refuses_second_inference_in_flight() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let adapter = Arc::new(DetectorAdapter::new(Box::new(GatedBackend {
            started: started_tx,
            release: release_rx,
        })));

        let worker = {
            let adapter = adapter.clone();
            std::thread::spawn(move || adapter.try_detect(&blank_frame()).is_some())
        };
        started_rx.recv().unwrap();

        assert!(adapter.is_busy());
        assert!(adapter.try_detect(&blank_frame()).is_none());

        release_tx.send(()).unwrap();
        assert!(worker.join().unwrap());
        assert!(!adapter.is_busy());
    }

    #[test]
    fn select_backend_rejects_unknown_names() {
        let settings = DetectorSettings {
            backend: "yolo9000".to_string(),
            ..DetectorSettings::default()
        };
        let err = select_backend(&settings, 640, 480).err().unwrap();
        assert!(err.to_string().contains("unknown detector backend"));
    }

    #[test]
    fn tract_backend_needs_model_path() {
        let settings = DetectorSettings {
            backend: "tract".to_string(),
            ..DetectorSettings::default()
        };
        assert!(select_backend(&settings, 640, 480).is_err());
    }
}
