use anyhow::Result;

use crate::detect::result::Prediction;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps one pretrained model. It is owned by exactly one
/// `DetectorAdapter`; callers never see the model handle itself.
///
/// Backends must not keep per-frame state between `detect` calls: every call
/// produces a complete prediction list for that frame alone.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Boxes are reported in frame pixel coordinates. The adapter filters and
    /// validates the output, so backends may return raw model results.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Prediction>>;

    /// Optional warm-up hook, run once while the model is loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
