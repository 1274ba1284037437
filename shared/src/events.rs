use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::layer::LayerPath;
use crate::query::{LonLat, ScreenPixel};
use crate::result_set::ResultSet;

/// What started a query round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryTrigger {
    Click { coordinate: LonLat },
    Hover { pixel: ScreenPixel },
    All,
}

/// Notifications a layer set emits for observers outside the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerSetEvent<E> {
    ResultSetUpdated {
        layer_path: LayerPath,
        result_set: ResultSet<E>,
    },
    QueryEnded {
        trigger: QueryTrigger,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer_path: Option<LayerPath>,
        result_set: ResultSet<E>,
        ended_at: DateTime<Utc>,
    },
}

impl<E> LayerSetEvent<E> {
    pub fn layer_path(&self) -> Option<&LayerPath> {
        match self {
            Self::ResultSetUpdated { layer_path, .. } => Some(layer_path),
            Self::QueryEnded { layer_path, .. } => layer_path.as_ref(),
        }
    }

    pub fn result_set(&self) -> &ResultSet<E> {
        match self {
            Self::ResultSetUpdated { result_set, .. } | Self::QueryEnded { result_set, .. } => {
                result_set
            }
        }
    }
}
