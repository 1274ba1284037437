use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::layer::{LayerPath, LayerStatus};
use crate::query::{FeatureQueryState, HoverFeature, QueryStatus};

/// Registered layers of one layer set, in registration order.
pub type ResultSet<E> = IndexMap<LayerPath, E>;

/// What every layer-set entry shares: a name and the mirrored layer status.
pub trait ResultSetEntry: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn layer_name(&self) -> Option<&str>;
    fn layer_status(&self) -> LayerStatus;
    fn set_layer_status(&mut self, status: LayerStatus);
}

macro_rules! impl_result_set_entry {
    ($($entry:ty),+ $(,)?) => {
        $(
            impl ResultSetEntry for $entry {
                fn layer_name(&self) -> Option<&str> {
                    self.layer_name.as_deref()
                }

                fn layer_status(&self) -> LayerStatus {
                    self.layer_status
                }

                fn set_layer_status(&mut self, status: LayerStatus) {
                    self.layer_status = status;
                }
            }
        )+
    };
}

/// Click (feature-info) entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInfoEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,
    pub layer_status: LayerStatus,
    pub event_listener_enabled: bool,
    #[serde(flatten)]
    pub query: FeatureQueryState,
}

impl FeatureInfoEntry {
    pub fn new(layer_name: Option<String>, layer_status: LayerStatus) -> Self {
        Self {
            layer_name,
            layer_status,
            event_listener_enabled: true,
            query: FeatureQueryState::default(),
        }
    }
}

/// Hover entry. `feature` stays `None` until a query resolves with a hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoverEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,
    pub layer_status: LayerStatus,
    pub event_listener_enabled: bool,
    pub query_status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<HoverFeature>,
}

impl HoverEntry {
    pub fn new(layer_name: Option<String>, layer_status: LayerStatus) -> Self {
        Self {
            layer_name,
            layer_status,
            event_listener_enabled: true,
            query_status: QueryStatus::Init,
            feature: None,
        }
    }

    /// A resolved entry with a hit, which outranks every layer stacked below it.
    pub fn holds_feature(&self) -> bool {
        self.query_status == QueryStatus::Processed && self.feature.is_some()
    }
}

/// Bulk (whole table) entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllFeatureInfoEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,
    pub layer_status: LayerStatus,
    #[serde(flatten)]
    pub query: FeatureQueryState,
}

impl AllFeatureInfoEntry {
    pub fn new(layer_name: Option<String>, layer_status: LayerStatus) -> Self {
        Self {
            layer_name,
            layer_status,
            query: FeatureQueryState::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegendQueryStatus {
    #[default]
    Init,
    Querying,
    Queried,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendItem {
    pub label: String,
    /// Encoded symbol image, produced by the layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Legend {
    #[serde(default)]
    pub items: Vec<LegendItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,
    pub layer_status: LayerStatus,
    pub legend_query_status: LegendQueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legend: Option<Legend>,
    /// Localization key explaining why the layer is in error, if it is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
}

impl LegendEntry {
    pub fn new(layer_name: Option<String>, layer_status: LayerStatus) -> Self {
        Self {
            layer_name,
            layer_status,
            legend_query_status: LegendQueryStatus::Init,
            legend: None,
            message_key: None,
        }
    }
}

impl_result_set_entry!(FeatureInfoEntry, HoverEntry, AllFeatureInfoEntry, LegendEntry);

/// One entry flattened with its path, as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerData<E> {
    pub layer_path: LayerPath,
    #[serde(flatten)]
    pub entry: E,
}

impl<E: Clone> LayerData<E> {
    pub fn new(layer_path: &LayerPath, entry: &E) -> Self {
        Self {
            layer_path: layer_path.clone(),
            entry: entry.clone(),
        }
    }

    /// Flatten a whole result set, keeping registration order.
    pub fn collect(result_set: &ResultSet<E>) -> Vec<Self> {
        result_set
            .iter()
            .map(|(path, entry)| Self::new(path, entry))
            .collect()
    }
}
