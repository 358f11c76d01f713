//! Frame sources.
//!
//! This module provides the camera side of the pipeline:
//! - Synthetic camera (`stub://...`) for demos and tests
//! - Local directory of still images, played back in a loop
//!
//! A source owns its device handle. Callers get readiness, statistics and
//! `next_frame`; nothing else reaches the device.
//!
//! `next_frame` returns `Ok(None)` while the stream is connected but has no
//! decodable frame yet (camera warm-up, a frame still being decoded). The
//! detection loop treats that as a skipped tick, not as a failure.

pub mod image_dir;
pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::config::CaptureSettings;
use crate::frame::Frame;

pub use image_dir::ImageDirSource;
pub use synthetic::SyntheticSource;

pub trait FrameSource: Send {
    /// Acquire the device. Failure here is an acquisition failure.
    fn connect(&mut self) -> Result<()>;

    /// Next decodable frame, or `None` if none is available yet.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// True once connected and producing frames.
    fn is_ready(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    /// Calls to `next_frame` that had nothing decodable.
    pub frames_pending: u64,
    pub source: String,
}

/// Open the source described by the capture settings (not yet connected).
pub fn open_source(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    let source = settings.source.trim();
    if source.is_empty() {
        return Err(anyhow!("capture source must not be empty"));
    }
    if source.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    if source.contains("://") {
        return Err(anyhow!(
            "unsupported capture source '{}'; expected stub://<name> or a local directory",
            source
        ));
    }
    Ok(Box::new(ImageDirSource::new(source, settings.target_fps)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_source_picks_backend_by_scheme() {
        let stub = CaptureSettings::default();
        let source = open_source(&stub).unwrap();
        assert_eq!(source.stats().source, "stub://webcam");
        assert!(!source.is_ready());

        let remote = CaptureSettings {
            source: "rtsp://camera-1/stream".to_string(),
            ..CaptureSettings::default()
        };
        assert!(open_source(&remote).is_err());

        let dir = CaptureSettings {
            source: "/var/lib/visionclerk/frames".to_string(),
            ..CaptureSettings::default()
        };
        assert!(open_source(&dir).is_ok());
    }
}
