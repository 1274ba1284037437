use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mapsync_shared::{
    FeatureQuery, HoverEntry, HoverFeature, LayerPath, LayerStatus, MapId, QueryStatus,
    QueryTrigger, QueryType, ResultSet, ScreenPixel,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::LayerSetConfig;
use crate::error::{LayerSetError, QueryError};
use crate::layer::{LayerOrder, MapLayer};
use crate::registry::{LayerSetHooks, Registry};
use crate::state::ObservabilityCounters;
use crate::store::LayerSetStore;

pub struct HoverHooks {
    store: Arc<dyn LayerSetStore>,
    tokens: Mutex<HashMap<LayerPath, CancellationToken>>,
}

impl HoverHooks {
    fn tokens(&self) -> MutexGuard<'_, HashMap<LayerPath, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `token` as the live token of `layer_path`, cancelling the previous one.
    fn supersede(&self, layer_path: &LayerPath, token: Option<CancellationToken>) {
        let mut tokens = self.tokens();
        let previous = match token {
            Some(token) => tokens.insert(layer_path.clone(), token),
            None => tokens.remove(layer_path),
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
    }
}

impl LayerSetHooks for HoverHooks {
    type Entry = HoverEntry;
    const NAME: &'static str = "hover_feature_info";

    fn accepts(&self, layer: &dyn MapLayer) -> bool {
        layer.kind().supports_feature_info()
    }

    fn new_entry(&self, layer: &dyn MapLayer) -> HoverEntry {
        HoverEntry::new(layer.layer_name(), layer.layer_status())
    }

    fn on_unregister(&self, _registry: &Registry<Self>, layer_path: &LayerPath) {
        self.supersede(layer_path, None);
    }

    fn on_status_changed(
        &self,
        registry: &Registry<Self>,
        layer_path: &LayerPath,
        status: LayerStatus,
    ) -> Result<(), LayerSetError> {
        if !status.is_error() {
            return Ok(());
        }
        registry.update_entry(layer_path, |entry| {
            self.supersede(layer_path, None);
            entry.query_status = QueryStatus::Error;
            entry.feature = None;
        });
        Ok(())
    }
}

#[derive(Clone)]
pub struct HoverFeatureInfoLayerSet {
    registry: Registry<HoverHooks>,
    order: Arc<dyn LayerOrder>,
    observability: Arc<ObservabilityCounters>,
}

impl HoverFeatureInfoLayerSet {
    pub fn new(
        map_id: MapId,
        store: Arc<dyn LayerSetStore>,
        order: Arc<dyn LayerOrder>,
        config: LayerSetConfig,
        observability: Arc<ObservabilityCounters>,
    ) -> Self {
        let hooks = HoverHooks {
            store,
            tokens: Mutex::new(HashMap::new()),
        };
        Self {
            registry: Registry::new(map_id, hooks, config.event_buffer),
            order,
            observability,
        }
    }

    pub fn registry(&self) -> &Registry<HoverHooks> {
        &self.registry
    }

    pub fn enable_listener(&self, layer_path: &LayerPath) -> bool {
        self.set_listener(layer_path, true)
    }

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

    /// Clear the displayed hover feature. Runs synchronously on every move.
    pub fn pointer_moved(&self) {
        self.registry
            .hooks()
            .store
            .set_hover_feature(self.registry.map_id(), None);
    }

    /// Query the hoverable layers under `pixel`, topmost first.
    ///
    /// Every previous hover query of this set is superseded. Returns one handle
    /// per queried layer; each resolves once that layer's result was applied
    /// (or dropped because a newer query took over).
    pub fn pointer_stopped(
        &self,
        pixel: ScreenPixel,
    ) -> Result<Vec<JoinHandle<()>>, LayerSetError> {
        let mut candidates: HashMap<LayerPath, Arc<dyn MapLayer>> = self
            .registry
            .layers()
            .into_iter()
            .filter(|(_, layer, entry)| {
                entry.event_listener_enabled && layer.is_hoverable() && layer.in_visible_range()
            })
            .map(|(path, layer, _)| (path, layer))
            .collect();
        let targets: Vec<(LayerPath, Arc<dyn MapLayer>)> = self
            .order
            .ordered_layer_paths()
            .into_iter()
            .filter_map(|path| candidates.remove(&path).map(|layer| (path, layer)))
            .collect();

        if let Some((layer_path, _)) = targets
            .iter()
            .find(|(_, layer)| !layer.supports_query(QueryType::AtPixel))
        {
            error!(layer_path = %layer_path, "hover query issued against a layer that cannot answer it");
            return Err(LayerSetError::UnsupportedQuery {
                layer_path: layer_path.clone(),
                query_type: QueryType::AtPixel,
            });
        }

        let hooks = self.registry.hooks();
        // Layers left out of this round keep no stale hit that could block the
        // ones that are queried.
        self.registry.update_entries(|path, entry| {
            if !targets.iter().any(|(target, _)| target == path) {
                hooks.supersede(path, None);
                entry.query_status = QueryStatus::Init;
                entry.feature = None;
            }
        });

        let query = FeatureQuery::AtPixel { pixel };
        let mut handles = Vec::with_capacity(targets.len());
        for (layer_path, layer) in targets {
            let token = CancellationToken::new();
            let armed = self.registry.update_entry(&layer_path, |entry| {
                hooks.supersede(&layer_path, Some(token.clone()));
                entry.feature = None;
                entry.query_status = QueryStatus::Init;
            });
            if armed.is_none() {
                continue;
            }
            self.observability.record_query_started();
            handles.push(tokio::spawn(self.clone().query_layer(
                layer_path, layer, query, pixel, token,
            )));
        }
        Ok(handles)
    }

    async fn query_layer(
        self,
        layer_path: LayerPath,
        layer: Arc<dyn MapLayer>,
        query: FeatureQuery,
        pixel: ScreenPixel,
        token: CancellationToken,
    ) {
        let outcome = layer
            .query_features(query, false, Some(token.clone()))
            .await;

        // The token check and the write share the registry lock, so a newer
        // pointer stop either ran entirely before or entirely after this.
        let applied = self.registry.update_entry(&layer_path, |entry| {
            if token.is_cancelled() {
                return false;
            }
            match &outcome {
                Ok(features) => {
                    entry.query_status = QueryStatus::Processed;
                    entry.feature = features
                        .first()
                        .map(|feature| HoverFeature::from_feature(&layer_path, feature));
                }
                Err(_) => {
                    entry.query_status = QueryStatus::Error;
                    entry.feature = None;
                }
            }
            true
        });

        match applied {
            Some(true) => {}
            Some(false) | None => {
                self.observability.record_query_cancelled();
                debug!(layer_path = %layer_path, "hover query superseded; result dropped");
                return;
            }
        }

        match &outcome {
            Ok(_) => self.observability.record_query_settled(),
            Err(e) => {
                self.observability.record_query_failed();
                match e {
                    QueryError::Unsupported(_) => {
                        error!(layer_path = %layer_path, error = %e, "hover query unsupported by layer");
                    }
                    _ => warn!(layer_path = %layer_path, error = %e, "hover query failed"),
                }
            }
        }

        self.propagate_if_topmost(&layer_path);
        self.registry
            .emit_query_ended(QueryTrigger::Hover { pixel }, Some(layer_path));
    }

    /// Show `layer_path`'s result unless a layer above it already holds a hit.
    /// A layer above that is still running does not block; it overwrites the
    /// shown result later if it resolves. A processed layer without a hit
    /// still clears what a lower layer showed. A failed layer shows nothing
    /// and clears nothing.
    ///
    /// The store write happens under the registry lock so concurrent
    /// resolutions are applied in the order they were decided.
    fn propagate_if_topmost(&self, layer_path: &LayerPath) -> bool {
        let order = self.order.ordered_layer_paths();
        let store = &self.registry.hooks().store;
        let map_id = self.registry.map_id();

        self.registry.read(|result_set| {
            let Some(entry) = result_set.get(layer_path) else {
                return false;
            };
            if entry.query_status != QueryStatus::Processed {
                return false;
            }
            if let Some(blocker) = blocking_layer(&order, result_set, layer_path) {
                debug!(layer_path = %layer_path, blocked_by = %blocker, "hover result hidden by a higher layer");
                return false;
            }
            store.set_hover_feature(map_id, entry.feature.clone());
            true
        })
    }
}

/// First layer stacked above `layer_path` that already holds a hit.
fn blocking_layer<'a>(
    order: &'a [LayerPath],
    result_set: &ResultSet<HoverEntry>,
    layer_path: &LayerPath,
) -> Option<&'a LayerPath> {
    order
        .iter()
        .take_while(|path| *path != layer_path)
        .find(|path| result_set.get(*path).is_some_and(HoverEntry::holds_feature))
}
