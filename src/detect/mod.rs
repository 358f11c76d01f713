mod adapter;
mod backend;
pub mod backends;
mod result;

pub use adapter::{sanitize_predictions, select_backend, DetectorAdapter};
pub use backend::DetectorBackend;
pub use backends::StubBackend;
pub use result::{prediction_labels, BBox, Prediction};
