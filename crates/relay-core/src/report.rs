//! Broadcast + history store for delivery reports.

use std::{
    collections::VecDeque,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::outcome::{CorrelationId, DeliveryOutcome};

/// Default number of reports kept in history.
const HISTORY_LEN: usize = 256;

/// Outcome of one candidate event, as recorded for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReport {
    pub message_id: String,
    pub correlation_id: CorrelationId,
    pub outcome: DeliveryOutcome,
    /// Unix epoch seconds.
    pub at: i64,
}

impl RelayReport {
    /// Create a report stamped with the current time.
    #[must_use]
    pub fn now(message_id: &str, outcome: DeliveryOutcome) -> Self {
        Self {
            message_id: message_id.to_string(),
            correlation_id: CorrelationId::from_message_id(message_id),
            outcome,
            at: now(),
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Report store with broadcast and bounded history.
///
/// Late subscribers receive history first, then live reports.
pub struct ReportStore {
    history: RwLock<VecDeque<RelayReport>>,
    capacity: usize,
    sender: broadcast::Sender<RelayReport>,
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportStore {
    /// Create a store keeping the default history length.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_LEN)
    }

    /// Create a store keeping at most `capacity` reports.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(32))),
            capacity,
            sender,
        }
    }

    /// Push a report to both live listeners and history.
    pub fn push(&self, report: RelayReport) {
        let _ = self.sender.send(report.clone()); // live listeners

        let mut history = self
            .history
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while history.len() >= self.capacity.max(1) {
            history.pop_front();
        }
        history.push_back(report);
    }

    /// Get a receiver for live reports.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<RelayReport> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history, oldest first.
    #[must_use]
    pub fn get_history(&self) -> Vec<RelayReport> {
        self.history
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live reports.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, RelayReport> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let store = ReportStore::with_capacity(2);
        for id in ["a", "b", "c"] {
            store.push(RelayReport::now(id, DeliveryOutcome::DeliveredPrimary));
        }
        let ids: Vec<_> = store
            .get_history()
            .into_iter()
            .map(|r| r.message_id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let store = ReportStore::new();
        store.push(RelayReport::now("old", DeliveryOutcome::DeliveredPrimary));

        let mut stream = store.history_plus_stream();
        store.push(RelayReport::now(
            "new",
            DeliveryOutcome::DeliveredFallback {
                primary_error: "no session".into(),
            },
        ));

        assert_eq!(stream.next().await.unwrap().message_id, "old");
        let live = stream.next().await.unwrap();
        assert_eq!(live.message_id, "new");
        assert_eq!(live.correlation_id.as_str(), "new");
    }
}
