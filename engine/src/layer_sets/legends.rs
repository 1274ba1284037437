use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mapsync_shared::{
    LayerData, LayerErrorKind, LayerPath, LayerStatus, LegendEntry, LegendQueryStatus, MapId,
};
use tracing::{debug, info, warn};

use crate::config::LayerSetConfig;
use crate::error::LayerSetError;
use crate::layer::MapLayer;
use crate::registry::{LayerSetHooks, Registry};
use crate::state::ObservabilityCounters;
use crate::store::LayerSetStore;

pub struct LegendHooks {
    store: Arc<dyn LayerSetStore>,
    observability: Arc<ObservabilityCounters>,
    auto_select_delay: Duration,
    auto_select_armed: AtomicBool,
}

impl LegendHooks {
    fn propagate(&self, registry: &Registry<Self>, excluding: Option<&LayerPath>) {
        let data: Vec<_> = registry.read(|result_set| {
            result_set
                .iter()
                .filter(|(path, _)| Some(*path) != excluding)
                .map(|(path, entry)| LayerData::new(path, entry))
                .collect()
        });
        let has_layers = !data.is_empty();
        self.store.set_legend_layers(registry.map_id(), data);

        if has_layers && !self.auto_select_armed.swap(true, Ordering::SeqCst) {
            self.spawn_auto_select(registry);
        }
    }

    fn spawn_auto_select(&self, registry: &Registry<Self>) {
        let registry = registry.clone();
        let delay = self.auto_select_delay;
        debug!(map_id = %registry.map_id(), ?delay, "legend auto-select armed");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let selected = registry.read(|result_set| {
                result_set
                    .iter()
                    .find(|(_, entry)| entry.layer_status.is_processed())
                    .map(|(path, _)| path.clone())
            });
            match selected {
                Some(layer_path) => {
                    info!(map_id = %registry.map_id(), layer_path = %layer_path, "legend layer auto-selected");
                    registry
                        .hooks()
                        .store
                        .set_selected_legend_layer(registry.map_id(), layer_path);
                }
                None => {
                    info!(map_id = %registry.map_id(), "no processed layer to auto-select for the legend");
                }
            }
        });
    }

    /// Start the legend fetch if the layer is processed and was never fetched.
    fn fetch_if_ready(&self, registry: &Registry<Self>, layer_path: &LayerPath) {
        let started = registry.update_entry_tracked(layer_path, |entry| {
            if entry.legend_query_status != LegendQueryStatus::Init
                || !entry.layer_status.is_processed()
            {
                return false;
            }
            entry.legend_query_status = LegendQueryStatus::Querying;
            true
        });
        let Some((generation, true)) = started else {
            return;
        };
        let Some(layer) = registry.layer(layer_path) else {
            return;
        };

        self.observability.record_legend_fetch();
        let registry = registry.clone();
        let layer_path = layer_path.clone();
        tokio::spawn(async move {
            let legend = match layer.query_legend().await {
                Ok(legend) => legend,
                Err(e) => {
                    warn!(layer_path = %layer_path, error = %e, "legend fetch failed");
                    None
                }
            };
            let stored = registry.update_entry_at(&layer_path, generation, |entry| {
                entry.legend = legend;
                entry.legend_query_status = LegendQueryStatus::Queried;
            });
            if stored.is_none() {
                debug!(layer_path = %layer_path, "layer unregistered while its legend was fetched");
                return;
            }
            debug!(layer_path = %layer_path, "legend queried");
            registry.hooks().propagate(&registry, None);
        });
    }
}

impl LayerSetHooks for LegendHooks {
    type Entry = LegendEntry;
    const NAME: &'static str = "legends";

    fn new_entry(&self, layer: &dyn MapLayer) -> LegendEntry {
        LegendEntry::new(layer.layer_name(), layer.layer_status())
    }

    fn on_register(&self, registry: &Registry<Self>, layer_path: &LayerPath) {
        self.propagate(registry, None);
        self.fetch_if_ready(registry, layer_path);
    }

    fn on_unregister(&self, registry: &Registry<Self>, layer_path: &LayerPath) {
        self.propagate(registry, Some(layer_path));
    }

    fn on_status_changed(
        &self,
        registry: &Registry<Self>,
        layer_path: &LayerPath,
        status: LayerStatus,
    ) -> Result<(), LayerSetError> {
        let message_key = status.is_error().then(|| {
            registry
                .layer(layer_path)
                .and_then(|layer| layer.error_kind())
                .unwrap_or(LayerErrorKind::Load)
                .message_key()
                .to_string()
        });
        registry.update_entry(layer_path, |entry| entry.message_key = message_key);

        self.fetch_if_ready(registry, layer_path);
        self.propagate(registry, None);
        Ok(())
    }
}

/// One legend fetch per registration, issued once the layer is processed.
#[derive(Clone)]
pub struct LegendsLayerSet {
    registry: Registry<LegendHooks>,
}

impl LegendsLayerSet {
    pub fn new(
        map_id: MapId,
        store: Arc<dyn LayerSetStore>,
        config: LayerSetConfig,
        observability: Arc<ObservabilityCounters>,
    ) -> Self {
        let hooks = LegendHooks {
            store,
            observability,
            auto_select_delay: config.legend_auto_select_delay,
            auto_select_armed: AtomicBool::new(false),
        };
        Self {
            registry: Registry::new(map_id, hooks, config.event_buffer),
        }
    }

    pub fn registry(&self) -> &Registry<LegendHooks> {
        &self.registry
    }

    pub fn legend_query_status(&self, layer_path: &LayerPath) -> Option<LegendQueryStatus> {
        self.registry
            .entry(layer_path)
            .map(|entry| entry.legend_query_status)
    }
}
