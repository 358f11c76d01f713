//! History synchronizer.
//!
//! Owns the write path (save) and the read path (refresh) against the
//! persistence store, the locally cached history and the in-flight-save guard.
//!
//! - `save` sends the current labels, then re-reads the store instead of
//!   appending locally, so the cache always mirrors the store's own ordering.
//! - `refresh` replaces the cache wholesale. On failure the cache is left
//!   untouched. Every refresh takes a ticket from a monotonic counter and a
//!   response is applied only if no later-issued refresh has been applied
//!   already, so overlapping refreshes cannot roll the cache back.

pub mod client;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::flight::SingleFlight;
use crate::DetectionSnapshot;

pub use client::{HttpPersistenceClient, PersistenceClient};

/// Result of `HistorySynchronizer::save`.
#[derive(Debug)]
pub enum SaveOutcome {
    Saved(DetectionSnapshot),
    /// Nothing detected; no request was sent.
    Empty,
    /// Another save is still in flight; no request was sent.
    Busy,
    Failed(anyhow::Error),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved(_))
    }
}

/// Result of `HistorySynchronizer::refresh`.
#[derive(Debug)]
pub enum RefreshOutcome {
    Applied { entries: usize },
    /// A later refresh was applied first; this response was discarded.
    Superseded,
    Failed(anyhow::Error),
}

#[derive(Debug, Default)]
struct HistoryCache {
    entries: Arc<Vec<DetectionSnapshot>>,
    applied_ticket: u64,
}

pub struct HistorySynchronizer {
    client: Arc<dyn PersistenceClient>,
    saving: SingleFlight,
    cache: Mutex<HistoryCache>,
    next_ticket: AtomicU64,
}

impl HistorySynchronizer {
    pub fn new(client: Arc<dyn PersistenceClient>) -> Self {
        Self {
            client,
            saving: SingleFlight::new(),
            cache: Mutex::new(HistoryCache::default()),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Persist `labels` as a new snapshot and refresh the history.
    ///
    /// Sends nothing when `labels` is empty or when a save is already in
    /// flight. A failed write is logged and returned; the guard is cleared
    /// either way so the user can retry.
    pub fn save(&self, labels: &[String]) -> SaveOutcome {
        if labels.is_empty() {
            return SaveOutcome::Empty;
        }
        let Some(_saving) = self.saving.try_acquire() else {
            log::debug!("save ignored: another save is in flight");
            return SaveOutcome::Busy;
        };

        match self.client.create(labels) {
            Ok(snapshot) => {
                log::info!(
                    "saved detection {} ({} objects)",
                    snapshot.id,
                    snapshot.objects.len()
                );
                // A failed read-back only leaves the cache stale.
                self.refresh();
                SaveOutcome::Saved(snapshot)
            }
            Err(err) => {
                log::error!("error saving detection: {:#}", err);
                SaveOutcome::Failed(err)
            }
        }
    }

    /// Replace the cached history with the store's current collection.
    pub fn refresh(&self) -> RefreshOutcome {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let entries = match self.client.list() {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("error fetching detections: {:#}", err);
                return RefreshOutcome::Failed(err);
            }
        };
        if !is_newest_first(&entries) {
            log::warn!("detection history from store is not ordered newest first");
        }

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if ticket < cache.applied_ticket {
            log::debug!(
                "discarding refresh #{} (#{} already applied)",
                ticket,
                cache.applied_ticket
            );
            return RefreshOutcome::Superseded;
        }
        let count = entries.len();
        cache.entries = Arc::new(entries);
        cache.applied_ticket = ticket;
        RefreshOutcome::Applied { entries: count }
    }

    /// Snapshot of the cached history, newest first.
    pub fn history(&self) -> Arc<Vec<DetectionSnapshot>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    pub fn is_saving(&self) -> bool {
        self.saving.is_busy()
    }
}

fn is_newest_first(entries: &[DetectionSnapshot]) -> bool {
    entries
        .windows(2)
        .all(|pair| pair[0].created_at >= pair[1].created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use chrono::{TimeZone, Utc};
    use std::sync::mpsc;

    fn snapshot(id: &str, objects: &[&str], secs: i64) -> DetectionSnapshot {
        DetectionSnapshot {
            id: id.to_string(),
            objects: objects.iter().map(|s| s.to_string()).collect(),
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    /// Each `list` call waits on its own response channel, in call order.
    struct ControlledClient {
        pending: Mutex<std::collections::VecDeque<mpsc::Receiver<Vec<DetectionSnapshot>>>>,
        issued: mpsc::Sender<()>,
    }

    impl PersistenceClient for ControlledClient {
        fn create(&self, _objects: &[String]) -> Result<DetectionSnapshot> {
            Err(anyhow!("read-only"))
        }

        fn list(&self) -> Result<Vec<DetectionSnapshot>> {
            let rx = self
                .pending
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("unexpected list call"))?;
            self.issued.send(()).ok();
            rx.recv().map_err(|_| anyhow!("closed"))
        }
    }

    #[test]
    fn newest_first_check() {
        assert!(is_newest_first(&[]));
        assert!(is_newest_first(&[snapshot("b", &[], 2), snapshot("a", &[], 1)]));
        assert!(!is_newest_first(&[snapshot("a", &[], 1), snapshot("b", &[], 2)]));
    }

    #[test]
    fn late_response_of_earlier_refresh_is_discarded() {
        let (first_tx, first_rx) = mpsc::channel();
        let (second_tx, second_rx) = mpsc::channel();
        let (issued_tx, issued_rx) = mpsc::channel();
        let sync = Arc::new(HistorySynchronizer::new(Arc::new(ControlledClient {
            pending: Mutex::new(vec![first_rx, second_rx].into()),
            issued: issued_tx,
        })));

        let first = {
            let sync = sync.clone();
            std::thread::spawn(move || sync.refresh())
        };
        issued_rx.recv().unwrap();
        let second = {
            let sync = sync.clone();
            std::thread::spawn(move || sync.refresh())
        };
        issued_rx.recv().unwrap();

        let fresh = vec![snapshot("2", &["cup"], 2), snapshot("1", &["person"], 1)];
        second_tx.send(fresh.clone()).unwrap();
        assert!(matches!(
            second.join().unwrap(),
            RefreshOutcome::Applied { entries: 2 }
        ));

        first_tx.send(vec![snapshot("1", &["person"], 1)]).unwrap();
        assert!(matches!(first.join().unwrap(), RefreshOutcome::Superseded));
        assert_eq!(*sync.history(), fresh);
    }

    #[test]
    fn in_order_responses_are_all_applied() {
        let (tx, rx) = mpsc::channel();
        let (issued_tx, _issued_rx) = mpsc::channel();
        let sync = HistorySynchronizer::new(Arc::new(ControlledClient {
            pending: Mutex::new(vec![rx].into()),
            issued: issued_tx,
        }));
        tx.send(vec![snapshot("1", &["person"], 1)]).unwrap();
        assert!(matches!(sync.refresh(), RefreshOutcome::Applied { entries: 1 }));
        assert_eq!(sync.history()[0].id, "1");
        assert!(!sync.is_saving());
    }
}
