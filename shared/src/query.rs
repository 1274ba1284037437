use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::layer::LayerPath;

/// Geographic coordinate of a map click.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl fmt::Display for LonLat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lon, self.lat)
    }
}

/// Pointer position in screen pixels, relative to the map viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPixel {
    pub x: f64,
    pub y: f64,
}

impl ScreenPixel {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for ScreenPixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    AtPixel,
    AtLonLat,
    All,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtPixel => write!(f, "at_pixel"),
            Self::AtLonLat => write!(f, "at_lon_lat"),
            Self::All => write!(f, "all"),
        }
    }
}

/// A feature query as handed to a layer: the kind of query plus its location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureQuery {
    AtPixel { pixel: ScreenPixel },
    AtLonLat { coordinate: LonLat },
    All,
}

impl FeatureQuery {
    pub const fn query_type(&self) -> QueryType {
        match self {
            Self::AtPixel { .. } => QueryType::AtPixel,
            Self::AtLonLat { .. } => QueryType::AtLonLat,
            Self::All => QueryType::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub alias: String,
    pub data_type: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub feature_key: u64,
    /// Field holding the feature's display name, if the layer declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_field: Option<String>,
    #[serde(default)]
    pub field_info: IndexMap<String, FieldInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,
}

impl Feature {
    /// Display value of the feature: its name field, or the first field when none is declared.
    pub fn representative_value(&self) -> Option<String> {
        let field = match self.name_field.as_deref() {
            Some(name) => self.field_info.get(name),
            None => self.field_info.values().next(),
        }?;
        match &field.value {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Query lifecycle of one result-set entry, owned by the layer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    #[default]
    Init,
    Processing,
    Processed,
    Error,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Error)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Processing => write!(f, "processing"),
            Self::Processed => write!(f, "processed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Tri-state feature payload: awaiting a result, result available, or terminated in error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "features", rename_all = "snake_case")]
pub enum Features {
    #[default]
    Pending,
    Ready(Vec<Feature>),
    Failed,
}

impl Features {
    pub fn as_slice(&self) -> Option<&[Feature]> {
        match self {
            Self::Ready(features) => Some(features),
            Self::Pending | Self::Failed => None,
        }
    }
}

/// The `(query status, features)` pair of an entry.
///
/// Fields are private: the only way to change them is through the transitions
/// below, each of which leaves the pair consistent (`Pending` with init or
/// processing, `Ready` with processed, `Failed` with error).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureQueryState {
    query_status: QueryStatus,
    features: Features,
}

impl FeatureQueryState {
    pub fn query_status(&self) -> QueryStatus {
        self.query_status
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn reset(&mut self) {
        self.query_status = QueryStatus::Init;
        self.features = Features::Pending;
    }

    pub fn begin(&mut self) {
        self.query_status = QueryStatus::Processing;
        self.features = Features::Pending;
    }

    pub fn resolve(&mut self, features: Vec<Feature>) {
        self.query_status = QueryStatus::Processed;
        self.features = Features::Ready(features);
    }

    pub fn fail(&mut self) {
        self.query_status = QueryStatus::Error;
        self.features = Features::Failed;
    }

    pub fn is_consistent(&self) -> bool {
        match self.features {
            Features::Pending => {
                matches!(self.query_status, QueryStatus::Init | QueryStatus::Processing)
            }
            Features::Ready(_) => self.query_status == QueryStatus::Processed,
            Features::Failed => self.query_status == QueryStatus::Error,
        }
    }
}

/// The single feature shown under the pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoverFeature {
    pub layer_path: LayerPath,
    pub feature_key: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl HoverFeature {
    pub fn from_feature(layer_path: &LayerPath, feature: &Feature) -> Self {
        Self {
            layer_path: layer_path.clone(),
            feature_key: feature.feature_key,
            value: feature.representative_value(),
        }
    }
}
