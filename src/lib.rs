//! VisionClerk
//!
//! Live object detection with bounding-box overlays and a persisted history of
//! detection snapshots.
//!
//! # Architecture
//!
//! The pipeline keeps two properties by construction:
//!
//! 1. **One inference in flight**: the detection loop schedules the next tick
//!    only after the previous inference resolved, and the detector adapter
//!    refuses overlapping calls.
//! 2. **One save in flight**: the history synchronizer's write path is guarded
//!    by a single-slot marker that is cleared on every exit path.
//!
//! # Module Structure
//!
//! - `frame`: captured RGB frames
//! - `ingest`: frame sources (synthetic camera, image directory)
//! - `detect`: detector backends and the adapter that owns the model
//! - `scheduler`: detection loop, loop state and latest predictions
//! - `overlay`: bounding-box rendering
//! - `history`: save/refresh against the detection store
//! - `session`: model and camera acquisition
//! - `store`, `api`: the detection store server
//! - Core types: `DetectionSnapshot`, `NewDetection`, `ErrorBody`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod api;
pub mod config;
pub mod detect;
pub mod flight;
pub mod frame;
pub mod history;
pub mod ingest;
pub mod overlay;
pub mod scheduler;
pub mod session;
pub mod store;

pub use detect::{BBox, DetectorAdapter, DetectorBackend, Prediction, StubBackend};
pub use flight::{FlightGuard, SingleFlight};
pub use frame::{Frame, FrameGeometry};
pub use history::{
    HistorySynchronizer, HttpPersistenceClient, PersistenceClient, RefreshOutcome, SaveOutcome,
};
pub use ingest::{FrameSource, ImageDirSource, SyntheticSource};
pub use scheduler::{
    DetectionLoop, LatestPredictions, LoopConfig, LoopHandle, LoopState, NullSink, OverlaySink,
    PipelineStatus, TickOutcome,
};
pub use session::{Session, StageEvent};
pub use store::{DetectionStore, InMemoryDetectionStore, SqliteDetectionStore};

// -------------------- Wire Types --------------------

/// A persisted set of object labels.
///
/// `id` and `created_at` are assigned by the store. Snapshots are immutable
/// once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSnapshot {
    pub id: String,
    /// Class labels in detector order; duplicates are kept.
    pub objects: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /detections`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDetection {
    pub objects: Vec<String>,
}

/// Error body returned by the store on failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
