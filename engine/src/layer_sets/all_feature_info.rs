use std::sync::Arc;

use mapsync_shared::{
    AllFeatureInfoEntry, FeatureQuery, LayerData, LayerPath, MapId, QueryTrigger, ResultSet,
};
use tracing::{debug, error, warn};

use crate::config::LayerSetConfig;
use crate::error::LayerSetError;
use crate::layer::MapLayer;
use crate::registry::{LayerSetHooks, Registry};
use crate::state::ObservabilityCounters;
use crate::store::LayerSetStore;

pub struct AllFeatureInfoHooks {
    store: Arc<dyn LayerSetStore>,
}

impl AllFeatureInfoHooks {
    fn propagate(&self, registry: &Registry<Self>, excluding: Option<&LayerPath>) {
        let data: Vec<_> = registry.read(|result_set| {
            result_set
                .iter()
                .filter(|(path, _)| Some(*path) != excluding)
                .map(|(path, entry)| LayerData::new(path, entry))
                .collect()
        });
        self.store.set_all_feature_results(registry.map_id(), data);
    }
}

impl LayerSetHooks for AllFeatureInfoHooks {
    type Entry = AllFeatureInfoEntry;
    const NAME: &'static str = "all_feature_info";

    fn accepts(&self, layer: &dyn MapLayer) -> bool {
        layer.kind().supports_tabular_export()
    }

    fn new_entry(&self, layer: &dyn MapLayer) -> AllFeatureInfoEntry {
        AllFeatureInfoEntry::new(layer.layer_name(), layer.layer_status())
    }

    fn on_register(&self, registry: &Registry<Self>, _layer_path: &LayerPath) {
        self.propagate(registry, None);
    }

    fn on_unregister(&self, registry: &Registry<Self>, layer_path: &LayerPath) {
        self.propagate(registry, Some(layer_path));
    }
}

#[derive(Clone)]
pub struct AllFeatureInfoLayerSet {
    registry: Registry<AllFeatureInfoHooks>,
    observability: Arc<ObservabilityCounters>,
}

impl AllFeatureInfoLayerSet {
    pub fn new(
        map_id: MapId,
        store: Arc<dyn LayerSetStore>,
        config: LayerSetConfig,
        observability: Arc<ObservabilityCounters>,
    ) -> Self {
        Self {
            registry: Registry::new(map_id, AllFeatureInfoHooks { store }, config.event_buffer),
            observability,
        }
    }

    pub fn registry(&self) -> &Registry<AllFeatureInfoHooks> {
        &self.registry
    }

    /// Load every feature of `layer_path`.
    pub async fn query_layer(
        &self,
        layer_path: &LayerPath,
    ) -> Result<Option<ResultSet<AllFeatureInfoEntry>>, LayerSetError> {
        self.query_layer_with(layer_path, FeatureQuery::All).await
    }

    /// Run `query` against one registered layer and publish the whole result set.
    ///
    /// `Ok(None)` when the layer is not registered; nothing is mutated then.
    /// A layer that is not loaded is recorded as `error` without being queried.
    pub async fn query_layer_with(
        &self,
        layer_path: &LayerPath,
        query: FeatureQuery,
    ) -> Result<Option<ResultSet<AllFeatureInfoEntry>>, LayerSetError> {
        let Some(layer) = self.registry.layer(layer_path) else {
            warn!(layer_path = %layer_path, "bulk query for a layer that is not registered");
            return Ok(None);
        };

        let query_type = query.query_type();
        if !layer.supports_query(query_type) {
            error!(layer_path = %layer_path, %query_type, "bulk query unsupported by layer");
            return Err(LayerSetError::UnsupportedQuery {
                layer_path: layer_path.clone(),
                query_type,
            });
        }

        if layer.layer_status().is_loaded() {
            let Some((generation, ())) = self
                .registry
                .update_entry_tracked(layer_path, |entry| entry.query.begin())
            else {
                return Ok(None);
            };
            self.observability.record_query_started();

            let recorded = match layer.query_features(query, true, None).await {
                Ok(features) => {
                    self.observability.record_query_settled();
                    debug!(layer_path = %layer_path, count = features.len(), "bulk query settled");
                    self.registry.update_entry_at(layer_path, generation, |entry| {
                        entry.query.resolve(features)
                    })
                }
                Err(e) => {
                    self.observability.record_query_failed();
                    warn!(layer_path = %layer_path, error = %e, "bulk query failed");
                    self.registry
                        .update_entry_at(layer_path, generation, |entry| entry.query.fail())
                }
            };
            if recorded.is_none() {
                debug!(layer_path = %layer_path, "layer unregistered while its bulk query ran; result dropped");
            }
        } else {
            debug!(layer_path = %layer_path, "layer not loaded; bulk result marked as error");
            self.registry
                .update_entry(layer_path, |entry| entry.query.fail());
        }

        self.registry.hooks().propagate(&self.registry, None);
        self.registry
            .emit_query_ended(QueryTrigger::All, Some(layer_path.clone()));
        Ok(Some(self.registry.result_set()))
    }

    /// Drop the loaded features of one layer and publish the reset entry.
    pub fn clear_layer_features(&self, layer_path: &LayerPath) -> bool {
        let cleared = self
            .registry
            .update_entry(layer_path, |entry| entry.query.reset())
            .is_some();
        if cleared {
            self.registry.hooks().propagate(&self.registry, None);
        }
        cleared
    }
}
