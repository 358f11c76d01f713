//! Local still-image source.
//!
//! Plays back the JPEG/PNG files of one local directory in name order, looping
//! forever. Useful for running the detector against recorded scenes without a
//! camera attached.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct ImageDirSource {
    dir: PathBuf,
    target_fps: u32,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    pending_count: u64,
    last_frame_at: Option<Instant>,
}

impl ImageDirSource {
    pub fn new<P: AsRef<Path>>(dir: P, target_fps: u32) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            target_fps,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            pending_count: 0,
            last_frame_at: None,
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to open image directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!(
                "no .jpg/.jpeg/.png images found in {}",
                self.dir.display()
            ));
        }
        files.sort();
        log::info!(
            "ImageDirSource: connected to {} ({} images)",
            self.dir.display(),
            files.len()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.files.is_empty() {
            return Err(anyhow!("image directory source not connected; call connect() first"));
        }
        let now = Instant::now();
        if let Some(last) = self.last_frame_at {
            if now.duration_since(last) < self.frame_interval() {
                self.pending_count += 1;
                return Ok(None);
            }
        }

        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();
        let rgb = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = rgb.dimensions();

        self.frame_count += 1;
        self.last_frame_at = Some(now);
        Frame::from_rgb(rgb.into_raw(), width, height, self.frame_count).map(Some)
    }

    fn is_ready(&self) -> bool {
        !self.files.is_empty()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_pending: self.pending_count,
            source: self.dir.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn empty_directory_is_an_acquisition_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();
        let mut source = ImageDirSource::new(dir.path(), 30);
        assert!(source.connect().is_err());
        assert!(!source.is_ready());
    }

    #[test]
    fn plays_images_in_name_order_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(4, 3, Rgb([255, 0, 0]))
            .save(dir.path().join("a.png"))
            .unwrap();
        RgbImage::from_pixel(6, 2, Rgb([0, 255, 0]))
            .save(dir.path().join("b.png"))
            .unwrap();

        // High fps so decimation never withholds a frame in this test.
        let mut source = ImageDirSource::new(dir.path(), 1_000_000);
        source.connect().unwrap();

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.height), (4, 3));
        assert_eq!(&first.pixels()[..3], &[255, 0, 0]);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!((second.width, second.height), (6, 2));

        let third = source.next_frame().unwrap().unwrap();
        assert_eq!((third.width, third.height), (4, 3));
        assert_eq!(source.stats().frames_captured, 3);
    }
}
