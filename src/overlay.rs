//! Bounding-box overlay rendering.
//!
//! `render_overlay` is a pure function of the prediction list and the surface:
//! it clears the surface, then draws one outlined box per prediction and a
//! label `"<class> (<percent>%)"` on a filled background sized to the label
//! text. Boxes are clipped to the surface; boxes entirely off it are skipped.
//! Rendering the same input twice yields identical pixels.
//!
//! Text uses a built-in 5x7 bitmap font scaled 2x (uppercase only).

use anyhow::{Context, Result};
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::detect::Prediction;
use crate::frame::{Frame, FrameGeometry};
use crate::scheduler::OverlaySink;

pub const BOX_COLOR: Rgba<u8> = Rgba([0x48, 0xBB, 0x78, 0xFF]);
pub const TEXT_COLOR: Rgba<u8> = Rgba([0xFF, 0xFF, 0xFF, 0xFF]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

const LINE_WIDTH: u32 = 2;
const LABEL_HEIGHT: u32 = 24;
const LABEL_PADDING: u32 = 8;
const TEXT_INSET_X: i32 = 4;
const GLYPH_SCALE: u32 = 2;
const GLYPH_COLS: u32 = 5;
const GLYPH_ROWS: u32 = 7;
const GLYPH_ADVANCE: u32 = (GLYPH_COLS + 1) * GLYPH_SCALE;
const TEXT_INSET_Y: i32 = ((LABEL_HEIGHT - GLYPH_ROWS * GLYPH_SCALE) / 2) as i32;

/// Label shown above a prediction's box.
pub fn label_text(prediction: &Prediction) -> String {
    format!("{} ({}%)", prediction.class, prediction.percent())
}

/// Rendered width of `text` in pixels, measured on the uppercased glyph run.
pub fn text_width(text: &str) -> u32 {
    let chars = u32::try_from(text.to_uppercase().chars().count()).unwrap_or(u32::MAX);
    chars.saturating_mul(GLYPH_ADVANCE).saturating_sub(GLYPH_SCALE)
}

/// Label background rectangle `(x, y, width, height)` for a prediction on a
/// `width` x `height` surface, or `None` when the box lies off the surface.
pub fn label_box(
    prediction: &Prediction,
    width: u32,
    height: u32,
) -> Option<(i32, i32, u32, u32)> {
    let (x, y, _, _) = pixel_box(prediction, width, height)?;
    let label_width = text_width(&label_text(prediction))
        .saturating_add(LABEL_PADDING)
        .min(width - x as u32);
    let label_height = LABEL_HEIGHT.min(height - y as u32);
    Some((x, y, label_width, label_height))
}

/// Clear `surface` and draw every prediction on it.
pub fn render_overlay(surface: &mut RgbaImage, predictions: &[Prediction]) {
    for px in surface.pixels_mut() {
        *px = CLEAR;
    }
    for prediction in predictions {
        draw_prediction(surface, prediction);
    }
}

/// Prediction box in surface pixels, clipped to `width` x `height`.
fn pixel_box(
    prediction: &Prediction,
    width: u32,
    height: u32,
) -> Option<(i32, i32, u32, u32)> {
    let b = prediction.bbox;
    let (sw, sh) = (f64::from(width), f64::from(height));
    let left = f64::from(b.x).round().max(0.0);
    let top = f64::from(b.y).round().max(0.0);
    let right = (f64::from(b.x) + f64::from(b.width)).round().min(sw);
    let bottom = (f64::from(b.y) + f64::from(b.height)).round().min(sh);
    if left >= sw || top >= sh || right <= 0.0 || bottom <= 0.0 {
        return None;
    }
    Some((
        left as i32,
        top as i32,
        (right - left).max(1.0) as u32,
        (bottom - top).max(1.0) as u32,
    ))
}

fn draw_prediction(img: &mut RgbaImage, prediction: &Prediction) {
    let (width, height) = img.dimensions();
    let Some((x, y, w, h)) = pixel_box(prediction, width, height) else {
        return;
    };
    for inset in 0..LINE_WIDTH {
        let (iw, ih) = (w.saturating_sub(2 * inset), h.saturating_sub(2 * inset));
        if iw == 0 || ih == 0 {
            break;
        }
        let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(iw, ih);
        draw_hollow_rect_mut(img, rect, BOX_COLOR);
    }

    if let Some((lx, ly, lw, lh)) = label_box(prediction, width, height) {
        draw_filled_rect_mut(img, Rect::at(lx, ly).of_size(lw, lh), BOX_COLOR);
        let text = label_text(prediction).to_uppercase();
        draw_text(img, &text, lx + TEXT_INSET_X, ly + TEXT_INSET_Y, TEXT_COLOR);
    }
}

fn draw_text(img: &mut RgbaImage, text: &str, x: i32, y: i32, color: Rgba<u8>) {
    let (img_w, img_h) = (img.width() as i32, img.height() as i32);
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + (i as u32 * GLYPH_ADVANCE) as i32;
        if origin_x >= img_w {
            break;
        }
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_COLS {
                if (bits >> (GLYPH_COLS - 1 - col)) & 1 == 0 {
                    continue;
                }
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        let px = origin_x + (col * GLYPH_SCALE + dx) as i32;
                        let py = y + (row as u32 * GLYPH_SCALE + dy) as i32;
                        if px >= 0 && py >= 0 && px < img_w && py < img_h {
                            img.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '%' => [0x19, 0x1A, 0x02, 0x04, 0x08, 0x0B, 0x13],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        ' ' => [0x00; 7],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}

/// Overlay sink that redraws its overlay surface on every published prediction
/// list.
///
/// The surface follows the frame size. With an output path, the frame with the
/// overlay composited on top is also written to disk, at most once per
/// `write_interval`.
pub struct CanvasSink {
    surface: RgbaImage,
    output: Option<PathBuf>,
    write_interval: Duration,
    last_write: Option<Instant>,
    frames_rendered: u64,
}

impl CanvasSink {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            surface: RgbaImage::new(0, 0),
            output,
            write_interval: Duration::from_millis(200),
            last_write: None,
            frames_rendered: 0,
        }
    }

    pub fn with_write_interval(mut self, interval: Duration) -> Self {
        self.write_interval = interval;
        self
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// The overlay as of the last presented frame.
    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }
}

impl OverlaySink for CanvasSink {
    fn present(&mut self, frame: &Frame, predictions: &[Prediction]) -> Result<()> {
        let FrameGeometry { width, height } = frame.geometry();
        if self.surface.dimensions() != (width, height) {
            self.surface = RgbaImage::new(width, height);
        }
        render_overlay(&mut self.surface, predictions);
        self.frames_rendered += 1;

        let Some(path) = &self.output else {
            return Ok(());
        };
        let due = self
            .last_write
            .map_or(true, |at| at.elapsed() >= self.write_interval);
        if due {
            let mut annotated = frame.to_rgba_image();
            imageops::overlay(&mut annotated, &self.surface, 0, 0);
            DynamicImage::ImageRgba8(annotated)
                .to_rgb8()
                .save(path)
                .with_context(|| format!("failed to write overlay to {}", path.display()))?;
            self.last_write = Some(Instant::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Prediction {
        Prediction::new("person", 0.92, [10.0, 10.0, 100.0, 200.0])
    }

    #[test]
    fn label_reads_class_and_rounded_percent() {
        assert_eq!(label_text(&person()), "person (92%)");
        assert_eq!(text_width("ab"), 22);
        assert_eq!(
            label_box(&person(), 200, 240),
            Some((10, 10, text_width("person (92%)") + 8, 24))
        );
    }

    #[test]
    fn overlay_draws_box_outline_and_label_background() {
        let mut surface = RgbaImage::new(200, 240);
        render_overlay(&mut surface, &[person()]);

        // Bottom-right corner of the box outline, away from the label.
        assert_eq!(surface.get_pixel(109, 209), &BOX_COLOR);
        assert_eq!(surface.get_pixel(108, 208), &BOX_COLOR);
        // Inside the box, below the label, stays transparent.
        assert_eq!(surface.get_pixel(60, 120), &CLEAR);
        // Label background starts at the box corner.
        let (lx, ly, lw, _) = label_box(&person(), 200, 240).unwrap();
        let right_edge = (lx + lw as i32 - 1) as u32;
        assert_eq!(surface.get_pixel(right_edge, ly as u32 + 1), &BOX_COLOR);
    }

    #[test]
    fn overlay_is_idempotent_and_clears_previous_output() {
        let mut first = RgbaImage::new(200, 240);
        render_overlay(&mut first, &[person()]);
        let mut second = first.clone();
        render_overlay(&mut second, &[person()]);
        assert_eq!(first, second);

        render_overlay(&mut second, &[]);
        assert!(second.pixels().all(|px| *px == CLEAR));
    }

    #[test]
    fn boxes_off_surface_are_clipped() {
        let mut surface = RgbaImage::new(20, 20);
        let preds = [Prediction::new("cup", 0.5, [-30.0, 15.0, 100.0, 100.0])];
        render_overlay(&mut surface, &preds);
        assert_eq!(surface.dimensions(), (20, 20));
    }

    #[test]
    fn huge_finite_box_is_clipped_instead_of_overflowing() {
        let mut surface = RgbaImage::new(64, 64);
        let far_right = Prediction::new("person", 0.9, [3.0e9, 10.0, 20.0, 20.0]);
        render_overlay(&mut surface, &[far_right.clone()]);
        assert!(surface.pixels().all(|px| *px == CLEAR));
        assert_eq!(label_box(&far_right, 64, 64), None);

        let covering = Prediction::new("person", 0.9, [-3.0e9, -3.0e9, 6.0e9, 6.0e9]);
        render_overlay(&mut surface, &[covering.clone()]);
        assert_eq!(surface.get_pixel(63, 63), &BOX_COLOR);
        assert_eq!(label_box(&covering, 64, 64), Some((0, 0, 64, 24)));
    }

    #[test]
    fn label_width_follows_the_drawn_glyphs() {
        // 'ß' uppercases to "SS".
        assert_eq!(text_width("ß"), text_width("SS"));
        let pred = Prediction::new("straße", 0.5, [0.0, 0.0, 10.0, 10.0]);
        let (_, _, width, _) = label_box(&pred, 400, 100).unwrap();
        assert_eq!(width, text_width("STRASSE (50%)") + 8);
    }

    #[test]
    fn canvas_sink_redraws_its_surface_each_frame() {
        let frame = Frame::from_rgb(vec![0u8; 200 * 240 * 3], 200, 240, 1).unwrap();
        let mut sink = CanvasSink::new(None);
        sink.present(&frame, &[person()]).unwrap();

        let mut expected = RgbaImage::new(200, 240);
        render_overlay(&mut expected, &[person()]);
        assert_eq!(sink.surface(), &expected);

        sink.present(&frame, &[]).unwrap();
        assert!(sink.surface().pixels().all(|px| *px == CLEAR));
        assert_eq!(sink.frames_rendered(), 2);
    }

    #[test]
    fn canvas_sink_writes_annotated_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.jpg");
        let frame = Frame::from_rgb(vec![0u8; 200 * 240 * 3], 200, 240, 1).unwrap();
        let mut sink = CanvasSink::new(Some(path.clone()));
        sink.present(&frame, &[person()]).unwrap();
        assert_eq!(sink.frames_rendered(), 1);
        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (200, 240));
        // Box outline drawn over the black frame (JPEG is lossy).
        assert!(written.get_pixel(108, 150)[1] > 60);
        assert!(written.get_pixel(60, 150)[1] < 30);
    }
}
