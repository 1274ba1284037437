use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mapsync_shared::{FeatureInfoEntry, LayerData, LayerPath, MapId, QueryStatus};
use tracing::debug;

use crate::layer::BoxFuture;
use crate::state::ObservabilityCounters;

/// Item of a batched array: something with a layer path and a query status.
pub trait BatchItem: Clone + Send + Sync + 'static {
    fn layer_path(&self) -> &LayerPath;
    fn query_status(&self) -> QueryStatus;
}

impl BatchItem for LayerData<FeatureInfoEntry> {
    fn layer_path(&self) -> &LayerPath {
        &self.layer_path
    }

    fn query_status(&self) -> QueryStatus {
        self.entry.query.query_status()
    }
}

/// Skip the delay once `layer_path` reaches a terminal query state.
///
/// `on_consumed` runs when the bypass fires and is expected to disarm it
/// (for the store-backed bypass: clear the stored layer path).
pub struct Bypass<'a> {
    pub layer_path: &'a LayerPath,
    pub on_consumed: Option<&'a dyn Fn()>,
}

/// Per-map buffer of snapshots. Only the newest snapshot present when the
/// delay expires is flushed.
pub struct BatchPropagator<T> {
    buffers: Arc<DashMap<MapId, Vec<Vec<T>>>>,
    observability: Arc<ObservabilityCounters>,
}

impl<T: BatchItem> BatchPropagator<T> {
    pub fn new(observability: Arc<ObservabilityCounters>) -> Self {
        Self {
            buffers: Arc::new(DashMap::new()),
            observability,
        }
    }

    /// Snapshots waiting for a flush on `map_id`.
    pub fn pending(&self, map_id: &MapId) -> usize {
        self.buffers.get(map_id).map_or(0, |pending| pending.len())
    }

    /// Append `snapshot` to the map's buffer and return the future that flushes it.
    ///
    /// Appending and the bypass check happen right away; only the wait and the
    /// flush live in the returned future. The flush hands `flush` the most
    /// recent snapshot in the buffer and empties it, so a caller's own snapshot
    /// may never be flushed individually. Resolves to whether this call flushed.
    pub fn propagate<F>(
        &self,
        map_id: &MapId,
        snapshot: Vec<T>,
        delay: Duration,
        bypass: Option<Bypass<'_>>,
        flush: F,
    ) -> BoxFuture<'static, bool>
    where
        F: FnOnce(Vec<T>) + Send + 'static,
    {
        let bypassing = bypass.is_some_and(|bypass| {
            let reached_terminal = snapshot.iter().any(|item| {
                item.layer_path() == bypass.layer_path && item.query_status().is_terminal()
            });
            if reached_terminal {
                debug!(map_id = %map_id, layer_path = %bypass.layer_path, "batch delay bypassed");
                if let Some(on_consumed) = bypass.on_consumed {
                    on_consumed();
                }
            }
            reached_terminal
        });

        self.buffers
            .entry(map_id.clone())
            .or_default()
            .push(snapshot);

        let buffers = Arc::clone(&self.buffers);
        let observability = Arc::clone(&self.observability);
        let map_id = map_id.clone();
        Box::pin(async move {
            if !bypassing {
                tokio::time::sleep(delay).await;
            }

            let latest = buffers.get_mut(&map_id).and_then(|mut pending| {
                let latest = pending.pop();
                pending.clear();
                latest
            });
            buffers.remove_if(&map_id, |_, pending| pending.is_empty());

            let Some(latest) = latest else {
                return false;
            };
            flush(latest);
            observability.record_batch_flush(bypassing);
            true
        })
    }
}
