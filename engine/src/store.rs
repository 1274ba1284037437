use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use mapsync_shared::{
    AllFeatureInfoEntry, FeatureInfoEntry, HoverFeature, LayerData, LayerPath, LegendEntry, MapId,
};

pub type ClickLayerData = LayerData<FeatureInfoEntry>;
pub type AllFeatureLayerData = LayerData<AllFeatureInfoEntry>;
pub type LegendLayerData = LayerData<LegendEntry>;

pub trait LayerSetStore: Send + Sync {
    /// Upsert a single layer's click result as soon as that layer settles.
    fn set_click_layer_result(&self, map_id: &MapId, data: ClickLayerData);

    fn remove_click_layer_result(&self, map_id: &MapId, layer_path: &LayerPath);

    /// Coalesced copy of the full click result array (details panel).
    fn set_click_results_batch(&self, map_id: &MapId, data: Vec<ClickLayerData>);

    /// Layer whose terminal state flushes the click batch without waiting.
    fn click_batch_bypass(&self, map_id: &MapId) -> Option<LayerPath>;

    fn set_click_batch_bypass(&self, map_id: &MapId, layer_path: Option<LayerPath>);

    fn set_hover_feature(&self, map_id: &MapId, feature: Option<HoverFeature>);

    fn set_all_feature_results(&self, map_id: &MapId, data: Vec<AllFeatureLayerData>);

    fn set_legend_layers(&self, map_id: &MapId, data: Vec<LegendLayerData>);

    fn set_selected_legend_layer(&self, map_id: &MapId, layer_path: LayerPath);
}

/// Store state of one map.
#[derive(Debug, Clone, Default)]
pub struct MapStoreState {
    pub click_results: Vec<ClickLayerData>,
    pub click_results_batch: Vec<ClickLayerData>,
    pub click_batch_bypass: Option<LayerPath>,
    pub hover_feature: Option<HoverFeature>,
    pub all_feature_results: Vec<AllFeatureLayerData>,
    pub legend_layers: Vec<LegendLayerData>,
    pub selected_legend_layer: Option<LayerPath>,
}

/// One recorded write, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    ClickLayer(LayerPath),
    ClickLayerRemoved(LayerPath),
    ClickBatch(Vec<LayerPath>),
    ClickBypass(Option<LayerPath>),
    Hover(Option<HoverFeature>),
    AllFeatures(Vec<LayerPath>),
    Legends(Vec<LayerPath>),
    SelectedLegend(LayerPath),
}

pub const DEFAULT_WRITE_LOG_CAPACITY: usize = 1024;

/// Store for hosts without a UI store of their own. Keeps the latest state
/// per map plus the most recent writes, oldest dropped first.
#[derive(Debug)]
pub struct InMemoryStore {
    maps: DashMap<MapId, MapStoreState>,
    writes: Mutex<VecDeque<(MapId, StoreWrite)>>,
    write_log_capacity: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_write_log_capacity(DEFAULT_WRITE_LOG_CAPACITY)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capacity of zero disables the write log.
    pub fn with_write_log_capacity(write_log_capacity: usize) -> Self {
        Self {
            maps: DashMap::new(),
            writes: Mutex::new(VecDeque::new()),
            write_log_capacity,
        }
    }

    pub fn state(&self, map_id: &MapId) -> MapStoreState {
        self.maps
            .get(map_id)
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    /// Recent writes for one map, oldest first.
    pub fn writes(&self, map_id: &MapId) -> Vec<StoreWrite> {
        self.write_log()
            .iter()
            .filter(|(id, _)| id == map_id)
            .map(|(_, write)| write.clone())
            .collect()
    }

    fn write_log(&self) -> MutexGuard<'_, VecDeque<(MapId, StoreWrite)>> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, map_id: &MapId, write: StoreWrite) {
        if self.write_log_capacity == 0 {
            return;
        }
        let mut log = self.write_log();
        while log.len() >= self.write_log_capacity {
            log.pop_front();
        }
        log.push_back((map_id.clone(), write));
    }

    fn with_state<R>(&self, map_id: &MapId, update: impl FnOnce(&mut MapStoreState) -> R) -> R {
        let mut state = self.maps.entry(map_id.clone()).or_default();
        update(&mut state)
    }
}

fn paths<E>(data: &[LayerData<E>]) -> Vec<LayerPath> {
    data.iter().map(|item| item.layer_path.clone()).collect()
}

impl LayerSetStore for InMemoryStore {
    fn set_click_layer_result(&self, map_id: &MapId, data: ClickLayerData) {
        let layer_path = data.layer_path.clone();
        self.with_state(map_id, |state| {
            match state
                .click_results
                .iter()
                .position(|existing| existing.layer_path == data.layer_path)
            {
                Some(index) => state.click_results[index] = data,
                None => state.click_results.push(data),
            }
        });
        self.record(map_id, StoreWrite::ClickLayer(layer_path));
    }

    fn remove_click_layer_result(&self, map_id: &MapId, layer_path: &LayerPath) {
        self.with_state(map_id, |state| {
            state
                .click_results
                .retain(|existing| &existing.layer_path != layer_path);
        });
        self.record(map_id, StoreWrite::ClickLayerRemoved(layer_path.clone()));
    }

    fn set_click_results_batch(&self, map_id: &MapId, data: Vec<ClickLayerData>) {
        let written = paths(&data);
        self.with_state(map_id, |state| state.click_results_batch = data);
        self.record(map_id, StoreWrite::ClickBatch(written));
    }

    fn click_batch_bypass(&self, map_id: &MapId) -> Option<LayerPath> {
        self.maps
            .get(map_id)
            .and_then(|state| state.click_batch_bypass.clone())
    }

    fn set_click_batch_bypass(&self, map_id: &MapId, layer_path: Option<LayerPath>) {
        self.with_state(map_id, |state| state.click_batch_bypass = layer_path.clone());
        self.record(map_id, StoreWrite::ClickBypass(layer_path));
    }

    fn set_hover_feature(&self, map_id: &MapId, feature: Option<HoverFeature>) {
        self.with_state(map_id, |state| state.hover_feature = feature.clone());
        self.record(map_id, StoreWrite::Hover(feature));
    }

    fn set_all_feature_results(&self, map_id: &MapId, data: Vec<AllFeatureLayerData>) {
        let written = paths(&data);
        self.with_state(map_id, |state| state.all_feature_results = data);
        self.record(map_id, StoreWrite::AllFeatures(written));
    }

    fn set_legend_layers(&self, map_id: &MapId, data: Vec<LegendLayerData>) {
        let written = paths(&data);
        self.with_state(map_id, |state| state.legend_layers = data);
        self.record(map_id, StoreWrite::Legends(written));
    }

    fn set_selected_legend_layer(&self, map_id: &MapId, layer_path: LayerPath) {
        self.with_state(map_id, |state| {
            state.selected_legend_layer = Some(layer_path.clone());
        });
        self.record(map_id, StoreWrite::SelectedLegend(layer_path));
    }
}
