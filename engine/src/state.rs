use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mapsync_shared::{LayerPath, MapId};
use serde::Serialize;
use tracing::debug;

use crate::config::LayerSetConfig;
use crate::error::LayerSetError;
use crate::layer::{LayerOrder, MapLayer};
use crate::layer_sets::{
    AllFeatureInfoLayerSet, FeatureInfoLayerSet, HoverFeatureInfoLayerSet, LegendsLayerSet,
};
use crate::services::map_events::MapEvent;
use crate::store::LayerSetStore;

/// The four layer sets of one map instance.
#[derive(Clone)]
pub struct MapLayerSets {
    pub map_id: MapId,
    pub config: LayerSetConfig,
    pub store: Arc<dyn LayerSetStore>,
    /// Click queries.
    pub feature_info: FeatureInfoLayerSet,
    /// Pointer-stop queries, topmost hit wins.
    pub hover_feature_info: HoverFeatureInfoLayerSet,
    /// Explicit whole-table loads.
    pub all_feature_info: AllFeatureInfoLayerSet,
    pub legends: LegendsLayerSet,
    pub observability: Arc<ObservabilityCounters>,
}

#[derive(Debug, Default)]
pub struct ObservabilityCounters {
    queries_started_total: AtomicU64,
    queries_settled_total: AtomicU64,
    queries_failed_total: AtomicU64,
    queries_cancelled_total: AtomicU64,
    batch_flushes_total: AtomicU64,
    bypassed_flushes_total: AtomicU64,
    legend_fetches_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObservabilitySnapshot {
    pub queries_started_total: u64,
    pub queries_settled_total: u64,
    pub queries_failed_total: u64,
    pub queries_cancelled_total: u64,
    pub batch_flushes_total: u64,
    pub bypassed_flushes_total: u64,
    pub legend_fetches_total: u64,
}

impl ObservabilityCounters {
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            queries_started_total: self.queries_started_total.load(Ordering::Relaxed),
            queries_settled_total: self.queries_settled_total.load(Ordering::Relaxed),
            queries_failed_total: self.queries_failed_total.load(Ordering::Relaxed),
            queries_cancelled_total: self.queries_cancelled_total.load(Ordering::Relaxed),
            batch_flushes_total: self.batch_flushes_total.load(Ordering::Relaxed),
            bypassed_flushes_total: self.bypassed_flushes_total.load(Ordering::Relaxed),
            legend_fetches_total: self.legend_fetches_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_query_started(&self) {
        self.queries_started_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_settled(&self) {
        self.queries_settled_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_failed(&self) {
        self.queries_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A superseded query whose result was dropped.
    pub fn record_query_cancelled(&self) {
        self.queries_cancelled_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_flush(&self, bypassed: bool) {
        self.batch_flushes_total.fetch_add(1, Ordering::Relaxed);
        if bypassed {
            self.bypassed_flushes_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_legend_fetch(&self) {
        self.legend_fetches_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl MapLayerSets {
    pub fn new(
        map_id: MapId,
        store: Arc<dyn LayerSetStore>,
        order: Arc<dyn LayerOrder>,
        config: LayerSetConfig,
    ) -> Self {
        let observability = Arc::new(ObservabilityCounters::default());
        Self {
            feature_info: FeatureInfoLayerSet::new(
                map_id.clone(),
                Arc::clone(&store),
                config,
                Arc::clone(&observability),
            ),
            hover_feature_info: HoverFeatureInfoLayerSet::new(
                map_id.clone(),
                Arc::clone(&store),
                order,
                config,
                Arc::clone(&observability),
            ),
            all_feature_info: AllFeatureInfoLayerSet::new(
                map_id.clone(),
                Arc::clone(&store),
                config,
                Arc::clone(&observability),
            ),
            legends: LegendsLayerSet::new(
                map_id.clone(),
                Arc::clone(&store),
                config,
                Arc::clone(&observability),
            ),
            map_id,
            config,
            store,
            observability,
        }
    }

    /// Offer `layer` to every set. Returns how many sets track it.
    pub fn add_layer(&self, layer: Arc<dyn MapLayer>) -> usize {
        let tracked = [
            self.feature_info.registry().register_layer(Arc::clone(&layer)),
            self.hover_feature_info
                .registry()
                .register_layer(Arc::clone(&layer)),
            self.all_feature_info
                .registry()
                .register_layer(Arc::clone(&layer)),
            self.legends.registry().register_layer(layer),
        ]
        .into_iter()
        .filter(|registered| *registered)
        .count();
        debug!(map_id = %self.map_id, tracked, "layer added to layer sets");
        tracked
    }

    /// Remove a layer from every set that tracks it. Returns how many did.
    pub fn remove_layer(&self, layer_path: &LayerPath) -> usize {
        [
            self.feature_info.registry().unregister_layer(layer_path),
            self.hover_feature_info
                .registry()
                .unregister_layer(layer_path),
            self.all_feature_info.registry().unregister_layer(layer_path),
            self.legends.registry().unregister_layer(layer_path),
        ]
        .into_iter()
        .filter(|removed| *removed)
        .count()
    }

    /// Health summary: tracked layers per set plus the counters.
    pub fn status_report(&self) -> serde_json::Value {
        serde_json::json!({
            "map_id": self.map_id,
            "layers": {
                "feature_info": self.feature_info.registry().len(),
                "hover_feature_info": self.hover_feature_info.registry().len(),
                "all_feature_info": self.all_feature_info.registry().len(),
                "legends": self.legends.registry().len(),
            },
            "batch_delay_ms": self.config.batch_delay.as_millis() as u64,
            "observability": self.observability.snapshot(),
        })
    }

    /// Route one map event to the sets it concerns.
    ///
    /// Queries started here run on their own tasks; only an unsupported query
    /// kind is reported back.
    pub fn handle_map_event(&self, event: MapEvent) -> Result<(), LayerSetError> {
        match event {
            MapEvent::LayerAdded(layer) => {
                self.add_layer(layer);
            }
            MapEvent::LayerRemoved(layer_path) => {
                if self.remove_layer(&layer_path) == 0 {
                    debug!(map_id = %self.map_id, layer_path = %layer_path, "removed layer was not tracked");
                }
            }
            MapEvent::PointerMoved => self.hover_feature_info.pointer_moved(),
            MapEvent::PointerStopped(pixel) => {
                self.hover_feature_info.pointer_stopped(pixel)?;
            }
            MapEvent::SingleClick(coordinate) => {
                self.feature_info.query_at(coordinate)?;
            }
        }
        Ok(())
    }
}
