/// Axis-aligned box in frame pixel coordinates: top-left corner plus size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

impl From<[f32; 4]> for BBox {
    fn from([x, y, width, height]: [f32; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

/// One detected object instance on a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub bbox: BBox,
    pub class: String,
    /// Confidence in `[0, 1]`.
    pub score: f32,
}

impl Prediction {
    pub fn new(class: impl Into<String>, score: f32, bbox: impl Into<BBox>) -> Self {
        Self {
            bbox: bbox.into(),
            class: class.into(),
            score,
        }
    }

    /// Score as a whole percentage, rounded half away from zero.
    pub fn percent(&self) -> u32 {
        (self.score * 100.0).round().clamp(0.0, 100.0) as u32
    }

    pub fn is_valid(&self) -> bool {
        self.score.is_finite() && (0.0..=1.0).contains(&self.score) && self.bbox.is_finite()
    }
}

/// Object class labels in prediction order, duplicates kept.
pub fn prediction_labels(predictions: &[Prediction]) -> Vec<String> {
    predictions.iter().map(|p| p.class.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_score() {
        assert_eq!(Prediction::new("person", 0.92, [0.0; 4]).percent(), 92);
        assert_eq!(Prediction::new("cup", 0.875, [0.0; 4]).percent(), 88);
        assert_eq!(Prediction::new("cup", 1.0, [0.0; 4]).percent(), 100);
    }

    #[test]
    fn validity_requires_unit_score_and_finite_box() {
        assert!(Prediction::new("person", 0.5, [1.0, 2.0, 3.0, 4.0]).is_valid());
        assert!(!Prediction::new("person", 1.2, [1.0, 2.0, 3.0, 4.0]).is_valid());
        assert!(!Prediction::new("person", f32::NAN, [1.0, 2.0, 3.0, 4.0]).is_valid());
        assert!(!Prediction::new("person", 0.5, [f32::INFINITY, 2.0, 3.0, 4.0]).is_valid());
    }

    #[test]
    fn labels_keep_order_and_duplicates() {
        let preds = vec![
            Prediction::new("person", 0.9, [0.0; 4]),
            Prediction::new("cup", 0.8, [0.0; 4]),
            Prediction::new("person", 0.7, [0.0; 4]),
        ];
        assert_eq!(prediction_labels(&preds), vec!["person", "cup", "person"]);
    }
}
