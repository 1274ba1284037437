use std::sync::Arc;

use futures::future::join_all;
use mapsync_shared::{
    FeatureInfoEntry, FeatureQuery, LayerData, LayerPath, LayerStatus, LonLat, MapId, QueryTrigger,
    QueryType, ResultSet,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::batch::{BatchPropagator, Bypass};
use crate::config::LayerSetConfig;
use crate::error::{LayerSetError, QueryError};
use crate::layer::MapLayer;
use crate::registry::{Generation, LayerSetHooks, Registry};
use crate::state::ObservabilityCounters;
use crate::store::{ClickLayerData, LayerSetStore};

/// Resolves to the result set once every layer of one click has settled.
pub type ClickQuery = JoinHandle<ResultSet<FeatureInfoEntry>>;

pub struct FeatureInfoHooks {
    store: Arc<dyn LayerSetStore>,
}

impl LayerSetHooks for FeatureInfoHooks {
    type Entry = FeatureInfoEntry;
    const NAME: &'static str = "feature_info";

    fn accepts(&self, layer: &dyn MapLayer) -> bool {
        layer.kind().supports_feature_info()
    }

    fn new_entry(&self, layer: &dyn MapLayer) -> FeatureInfoEntry {
        FeatureInfoEntry::new(layer.layer_name(), layer.layer_status())
    }

    fn on_unregister(&self, registry: &Registry<Self>, layer_path: &LayerPath) {
        self.store
            .remove_click_layer_result(registry.map_id(), layer_path);
    }

    fn on_status_changed(
        &self,
        registry: &Registry<Self>,
        layer_path: &LayerPath,
        status: LayerStatus,
    ) -> Result<(), LayerSetError> {
        if status.is_error() {
            registry.unregister_layer(layer_path);
        }
        Ok(())
    }
}

/// Click queries. Layers race each other and each one writes its own result
/// to the store the moment it settles.
#[derive(Clone)]
pub struct FeatureInfoLayerSet {
    registry: Registry<FeatureInfoHooks>,
    batch: Arc<BatchPropagator<ClickLayerData>>,
    config: LayerSetConfig,
    observability: Arc<ObservabilityCounters>,
}

impl FeatureInfoLayerSet {
    pub fn new(
        map_id: MapId,
        store: Arc<dyn LayerSetStore>,
        config: LayerSetConfig,
        observability: Arc<ObservabilityCounters>,
    ) -> Self {
        Self {
            registry: Registry::new(map_id, FeatureInfoHooks { store }, config.event_buffer),
            batch: Arc::new(BatchPropagator::new(Arc::clone(&observability))),
            config,
            observability,
        }
    }

    pub fn registry(&self) -> &Registry<FeatureInfoHooks> {
        &self.registry
    }

    fn store(&self) -> &Arc<dyn LayerSetStore> {
        &self.registry.hooks().store
    }

    pub fn enable_listener(&self, layer_path: &LayerPath) -> bool {
        self.set_listener(layer_path, true)
    }

    /// Exclude a layer from click queries without unregistering it.
    pub fn disable_listener(&self, layer_path: &LayerPath) -> bool {
        self.set_listener(layer_path, false)
    }

    fn set_listener(&self, layer_path: &LayerPath, enabled: bool) -> bool {
        self.registry
            .update_entry(layer_path, |entry| entry.event_listener_enabled = enabled)
            .is_some()
    }

    pub fn is_listener_enabled(&self, layer_path: &LayerPath) -> Option<bool> {
        self.registry
            .entry(layer_path)
            .map(|entry| entry.event_listener_enabled)
    }

    /// Query every enabled, queryable layer at `coordinate`.
    ///
    /// Entries move to `processing` (or straight to `error` for layers that are
    /// not loaded) before this returns. The queries themselves run on a spawned
    /// task; the returned handle resolves after all of them settled and the
    /// query-ended event went out. Overlapping clicks are not serialized.
    pub fn query_at(&self, coordinate: LonLat) -> Result<ClickQuery, LayerSetError> {
        let targets: Vec<_> = self
            .registry
            .layers()
            .into_iter()
            .filter(|(_, layer, entry)| entry.event_listener_enabled && layer.is_queryable())
            .map(|(path, layer, _)| (path, layer))
            .collect();

        if let Some((layer_path, _)) = targets
            .iter()
            .find(|(_, layer)| !layer.supports_query(QueryType::AtLonLat))
        {
            error!(layer_path = %layer_path, "click query issued against a layer that cannot answer it");
            return Err(LayerSetError::UnsupportedQuery {
                layer_path: layer_path.clone(),
                query_type: QueryType::AtLonLat,
            });
        }

        let query = FeatureQuery::AtLonLat { coordinate };
        let mut pending = Vec::with_capacity(targets.len());
        for (layer_path, layer) in targets {
            if layer.layer_status().is_loaded() {
                let Some((generation, ())) = self
                    .registry
                    .update_entry_tracked(&layer_path, |entry| entry.query.begin())
                else {
                    continue;
                };
                self.observability.record_query_started();
                pending.push(
                    self.clone()
                        .query_layer(layer_path, generation, layer, query),
                );
            } else {
                debug!(layer_path = %layer_path, "layer not loaded; click result marked as error");
                self.registry
                    .update_entry(&layer_path, |entry| entry.query.fail());
                self.propagate_layer(&layer_path);
            }
        }

        let set = self.clone();
        Ok(tokio::spawn(async move {
            join_all(pending).await;
            set.registry
                .emit_query_ended(QueryTrigger::Click { coordinate }, None);
            set.registry.result_set()
        }))
    }

    async fn query_layer(
        self,
        layer_path: LayerPath,
        generation: Generation,
        layer: Arc<dyn MapLayer>,
        query: FeatureQuery,
    ) {
        let outcome = layer.query_features(query, true, None).await;
        let recorded = match outcome {
            Ok(features) => {
                self.observability.record_query_settled();
                self.registry.update_entry_at(&layer_path, generation, |entry| {
                    entry.query.resolve(features)
                })
            }
            Err(e) => {
                self.observability.record_query_failed();
                match e {
                    QueryError::Unsupported(_) => {
                        error!(layer_path = %layer_path, error = %e, "click query unsupported by layer");
                    }
                    _ => warn!(layer_path = %layer_path, error = %e, "click query failed"),
                }
                self.registry
                    .update_entry_at(&layer_path, generation, |entry| entry.query.fail())
            }
        };

        if recorded.is_none() {
            debug!(layer_path = %layer_path, "layer unregistered while its click query ran; result dropped");
            return;
        }
        self.propagate_layer(&layer_path);
    }

    /// Reset one layer (or all of them) to `init` and publish the cleared entries.
    pub fn clear_results(&self, layer_path: Option<&LayerPath>) {
        let cleared: Vec<LayerPath> = match layer_path {
            Some(layer_path) => self
                .registry
                .update_entry(layer_path, |entry| entry.query.reset())
                .map(|()| vec![layer_path.clone()])
                .unwrap_or_default(),
            None => {
                let mut cleared = Vec::new();
                self.registry.update_entries(|path, entry| {
                    entry.query.reset();
                    cleared.push(path.clone());
                });
                cleared
            }
        };
        for layer_path in &cleared {
            self.propagate_layer(layer_path);
        }
    }

    fn propagate_layer(&self, layer_path: &LayerPath) {
        let Some(entry) = self.registry.entry(layer_path) else {
            return;
        };
        let map_id = self.registry.map_id();
        self.store()
            .set_click_layer_result(map_id, LayerData::new(layer_path, &entry));
        self.schedule_batch();
    }

    /// Feed the current result set to the details batch.
    fn schedule_batch(&self) {
        let map_id = self.registry.map_id().clone();
        let snapshot = LayerData::collect(&self.registry.result_set());

        let armed = self.store().click_batch_bypass(&map_id);
        let disarm = {
            let store = Arc::clone(self.store());
            let map_id = map_id.clone();
            move || store.set_click_batch_bypass(&map_id, None)
        };
        let bypass = armed.as_ref().map(|layer_path| Bypass {
            layer_path,
            on_consumed: Some(&disarm),
        });

        let store = Arc::clone(self.store());
        let flush_map_id = map_id.clone();
        let flush = self.batch.propagate(
            &map_id,
            snapshot,
            self.config.batch_delay,
            bypass,
            move |latest| store.set_click_results_batch(&flush_map_id, latest),
        );
        tokio::spawn(flush);
    }
}
