use std::sync::Arc;

use mapsync_shared::{LayerPath, LonLat, ScreenPixel};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::layer::MapLayer;
use crate::state::MapLayerSets;

/// Notifications from the map the layer sets react to.
pub enum MapEvent {
    LayerAdded(Arc<dyn MapLayer>),
    LayerRemoved(LayerPath),
    PointerMoved,
    PointerStopped(ScreenPixel),
    SingleClick(LonLat),
}

impl MapEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LayerAdded(_) => "layer_added",
            Self::LayerRemoved(_) => "layer_removed",
            Self::PointerMoved => "pointer_moved",
            Self::PointerStopped(_) => "pointer_stopped",
            Self::SingleClick(_) => "single_click",
        }
    }
}

/// Feed map events to `sets` until every sender is dropped.
pub async fn run(sets: MapLayerSets, mut events: mpsc::Receiver<MapEvent>) {
    while let Some(event) = events.recv().await {
        let kind = event.kind();
        if let Err(e) = sets.handle_map_event(event) {
            error!(map_id = %sets.map_id, event = kind, error = %e, "map event handling failed");
        }
    }
    debug!(map_id = %sets.map_id, "map event source closed");
}
