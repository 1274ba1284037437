use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one map instance. Every buffer and store write is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(String);

impl MapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MapId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Hierarchical layer identifier (`rootId/subId/...`), unique per layer on a map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerPath(String);

impl LayerPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// First segment of the path, i.e. the id of the layer that owns this sublayer.
    pub fn root(&self) -> &str {
        self.segments().next().unwrap_or("")
    }

    pub fn parent(&self) -> Option<LayerPath> {
        let trimmed = self.0.trim_end_matches('/');
        let (parent, _) = trimmed.rsplit_once('/')?;
        if parent.is_empty() {
            return None;
        }
        Some(LayerPath::new(parent))
    }

    /// True when `self` sits strictly below `ancestor` in the layer tree.
    pub fn is_descendant_of(&self, ancestor: &LayerPath) -> bool {
        let mut own = self.segments();
        let mut other = ancestor.segments().peekable();
        if other.peek().is_none() {
            return false;
        }
        for segment in other {
            if own.next() != Some(segment) {
                return false;
            }
        }
        own.next().is_some()
    }
}

impl fmt::Display for LayerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LayerPath {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Load lifecycle of a layer, owned by the layer itself and mirrored by every layer set.
///
/// Variants are declared in progression order, so `Ord` follows the lifecycle.
/// `Error` is reachable from any state and sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    Init,
    Loading,
    Loaded,
    Processing,
    Processed,
    Error,
}

impl LayerStatus {
    /// Loaded or any later preparation stage. Queries are only issued in this range.
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Loaded | Self::Processing | Self::Processed)
    }

    pub fn is_processed(self) -> bool {
        matches!(self, Self::Processed)
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::Processing => write!(f, "processing"),
            Self::Processed => write!(f, "processed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Why a layer ended up in [`LayerStatus::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerErrorKind {
    Load,
    ImageLoad,
}

impl LayerErrorKind {
    /// Localization key the UI resolves into a user-facing message.
    pub const fn message_key(self) -> &'static str {
        match self {
            Self::Load => "validation.layer.loadfailed",
            Self::ImageLoad => "validation.layer.imageloadfailed",
        }
    }
}

/// Schema type of a layer. Decides which layer sets track it at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayerKind {
    EsriDynamic,
    EsriFeature,
    EsriImage,
    GeoJson,
    Wms,
    Wfs,
    OgcFeature,
    Csv,
    ImageStatic,
    XyzTiles,
    VectorTiles,
}

impl LayerKind {
    /// Kinds that can answer a feature-info query at a location.
    pub const fn supports_feature_info(self) -> bool {
        !matches!(
            self,
            Self::EsriImage | Self::ImageStatic | Self::XyzTiles | Self::VectorTiles
        )
    }

    /// Kinds that can return their whole feature table.
    pub const fn supports_tabular_export(self) -> bool {
        matches!(
            self,
            Self::EsriDynamic
                | Self::EsriFeature
                | Self::GeoJson
                | Self::Wfs
                | Self::OgcFeature
                | Self::Csv
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_path_segments_and_root() {
        let path = LayerPath::new("base/1/roads");
        assert_eq!(path.segments().collect::<Vec<_>>(), ["base", "1", "roads"]);
        assert_eq!(path.root(), "base");
        assert_eq!(path.parent(), Some(LayerPath::new("base/1")));
        assert_eq!(LayerPath::new("base").parent(), None);
    }

    #[test]
    fn descendant_check_requires_full_segment_match() {
        let parent = LayerPath::new("base/1");
        assert!(LayerPath::new("base/1/roads").is_descendant_of(&parent));
        assert!(!LayerPath::new("base/10").is_descendant_of(&parent));
        assert!(!parent.is_descendant_of(&parent));
        assert!(!parent.is_descendant_of(&LayerPath::new("")));
    }

    #[test]
    fn status_order_follows_lifecycle() {
        assert!(LayerStatus::Init < LayerStatus::Loading);
        assert!(LayerStatus::Loaded < LayerStatus::Processed);
        assert!(LayerStatus::Processed.is_loaded());
        assert!(!LayerStatus::Loading.is_loaded());
        assert!(!LayerStatus::Error.is_loaded());
    }

    #[test]
    fn imagery_kinds_are_excluded_from_queries() {
        assert!(!LayerKind::XyzTiles.supports_feature_info());
        assert!(!LayerKind::ImageStatic.supports_tabular_export());
        assert!(LayerKind::Wms.supports_feature_info());
        assert!(!LayerKind::Wms.supports_tabular_export());
        assert!(LayerKind::GeoJson.supports_tabular_export());
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&LayerStatus::Processed).expect("serialize status");
        assert_eq!(json, "\"processed\"");
    }
}
