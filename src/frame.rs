//! Captured video frames.
//!
//! - `Frame`: owned RGB pixel buffer produced by a frame source.
//! - `FrameGeometry`: the dimensions renderers and detectors reason about.
//!
//! Frames are handed to the detector and the overlay renderer by reference.
//! `Frame` is not `Clone`.

use anyhow::{anyhow, Result};
use image::{Rgba, RgbaImage};

/// Bytes per pixel of the packed RGB layout used by every source.
pub const RGB_CHANNELS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture sequence number assigned by the source.
    pub sequence: u64,
}

impl Frame {
    /// Wrap a packed RGB buffer. The buffer length must match the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected_len,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry {
            width: self.width,
            height: self.height,
        }
    }

    /// Opaque RGBA copy of the frame, used as the base layer for annotated output.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut img = RgbaImage::new(self.width, self.height);
        for (dst, src) in img.pixels_mut().zip(self.data.chunks_exact(RGB_CHANNELS)) {
            *dst = Rgba([src[0], src[1], src[2], 255]);
        }
        img
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer_length() {
        let err = Frame::from_rgb(vec![0u8; 10], 4, 4, 1).unwrap_err();
        assert!(err.to_string().contains("expected 48 RGB bytes"));
    }

    #[test]
    fn rejects_empty_dimensions() {
        assert!(Frame::from_rgb(Vec::new(), 0, 480, 1).is_err());
    }

    #[test]
    fn rgba_copy_is_opaque_and_keeps_colors() {
        let frame = Frame::from_rgb(vec![10, 20, 30, 40, 50, 60], 2, 1, 7).unwrap();
        let img = frame.to_rgba_image();
        assert_eq!(img.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
        assert_eq!(img.get_pixel(1, 0), &Rgba([40, 50, 60, 255]));
        assert_eq!(frame.geometry(), FrameGeometry { width: 2, height: 1 });
        assert_eq!(frame.sequence, 7);
    }
}
