//! Synthetic camera (`stub://`).
//!
//! Renders a dark gradient background with one bright block sweeping left and
//! right, which the stub detector reports as an object. The first few frames
//! after connecting are not decodable, like a webcam that is still starting.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::config::CaptureSettings;
use crate::frame::{Frame, RGB_CHANNELS};

const WARMUP_FRAMES: u64 = 3;
const BLOCK_WIDTH_DIVISOR: u32 = 5;
const BLOCK_HEIGHT_DIVISOR: u32 = 3;
const SWEEP_STEP_PX: u32 = 8;

pub struct SyntheticSource {
    config: CaptureSettings,
    connected: bool,
    warmup_remaining: u64,
    frame_count: u64,
    pending_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: CaptureSettings) -> Self {
        Self {
            config,
            connected: false,
            warmup_remaining: WARMUP_FRAMES,
            frame_count: 0,
            pending_count: 0,
            last_frame_at: None,
        }
    }

    /// Number of undecodable frames served right after `connect`.
    pub fn with_warmup(mut self, frames: u64) -> Self {
        self.warmup_remaining = frames;
        self
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.target_fps.max(1) as f64)
    }

    /// Horizontal block position for the current frame, bouncing at the edges.
    fn block_x(&self, block_w: u32) -> u32 {
        let travel = self.config.width.saturating_sub(block_w).max(1);
        let step = (self.frame_count as u32).wrapping_mul(SWEEP_STEP_PX) % (2 * travel);
        if step < travel {
            step
        } else {
            2 * travel - step
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let block_w = (w / BLOCK_WIDTH_DIVISOR).max(4);
        let block_h = (h / BLOCK_HEIGHT_DIVISOR).max(4);
        let block_x = self.block_x(block_w);
        let block_y = (h - block_h.min(h)) / 2;

        let mut pixels = vec![0u8; w as usize * h as usize * RGB_CHANNELS];
        for (idx, px) in pixels.chunks_exact_mut(RGB_CHANNELS).enumerate() {
            let x = (idx % w as usize) as u32;
            let y = (idx / w as usize) as u32;
            let inside = x >= block_x && x < block_x + block_w && y >= block_y && y < block_y + block_h;
            if inside {
                px.copy_from_slice(&[250, 250, 250]);
            } else {
                // Background stays well below the stub detector's threshold.
                let shade = ((x * 120) / w.max(1)) as u8;
                px.copy_from_slice(&[shade, shade / 2, ((y * 90) / h.max(1)) as u8]);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {} (synthetic)", self.config.source);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            self.pending_count += 1;
            return Ok(None);
        }

        // Decimate to the target frame rate: a caller faster than the camera
        // sees "no new frame yet".
        let now = Instant::now();
        if let Some(last) = self.last_frame_at {
            if now.duration_since(last) < self.frame_interval() {
                self.pending_count += 1;
                return Ok(None);
            }
        }

        self.frame_count += 1;
        self.last_frame_at = Some(now);
        let pixels = self.render();
        Frame::from_rgb(pixels, self.config.width, self.config.height, self.frame_count).map(Some)
    }

    fn is_ready(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_pending: self.pending_count,
            source: self.config.source.clone(),
        }
    }
}
