use anyhow::Result;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Prediction;
use crate::frame::{Frame, RGB_CHANNELS};

const DEFAULT_LABEL: &str = "person";
const DEFAULT_BRIGHTNESS: u8 = 200;
const MIN_REGION_PIXELS: usize = 16;

/// Stub backend for testing and the synthetic camera.
///
/// Reports the bounding box of all bright pixels (every channel at or above the
/// threshold) as a single object. The score grows with how densely the box is
/// filled, so a solid block scores 0.95.
pub struct StubBackend {
    label: String,
    threshold: u8,
    latency: Duration,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            threshold: DEFAULT_BRIGHTNESS,
            latency: Duration::ZERO,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Simulated inference latency, to exercise a slow accelerator.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Prediction>> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let width = frame.width as usize;
        let mut bright = 0usize;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        for (idx, px) in frame.pixels().chunks_exact(RGB_CHANNELS).enumerate() {
            if px.iter().all(|&c| c >= self.threshold) {
                let (x, y) = (idx % width, idx / width);
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                bright += 1;
            }
        }

        if bright < MIN_REGION_PIXELS {
            return Ok(Vec::new());
        }

        let box_w = (max_x - min_x + 1) as f32;
        let box_h = (max_y - min_y + 1) as f32;
        let fill = bright as f32 / (box_w * box_h);
        let score = 0.5 + 0.45 * fill;

        Ok(vec![Prediction::new(
            self.label.clone(),
            score,
            [min_x as f32, min_y as f32, box_w, box_h],
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_block(x0: u32, y0: u32, w: u32, h: u32) -> Frame {
        let (fw, fh) = (64u32, 48u32);
        let mut data = vec![40u8; (fw * fh) as usize * RGB_CHANNELS];
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                let idx = ((y * fw + x) as usize) * RGB_CHANNELS;
                data[idx..idx + RGB_CHANNELS].copy_from_slice(&[255, 255, 255]);
            }
        }
        Frame::from_rgb(data, fw, fh, 1).unwrap()
    }

    #[test]
    fn stub_backend_boxes_bright_block() {
        let mut backend = StubBackend::new();
        let preds = backend.detect(&frame_with_block(10, 5, 20, 12)).unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].class, "person");
        assert_eq!(preds[0].bbox.as_array(), [10.0, 5.0, 20.0, 12.0]);
        assert!((preds[0].score - 0.95).abs() < 1e-6);
    }

    #[test]
    fn stub_backend_ignores_dark_frames() {
        let mut backend = StubBackend::new().with_label("cup");
        let preds = backend.detect(&frame_with_block(0, 0, 2, 2)).unwrap();
        assert!(preds.is_empty());
    }
}
