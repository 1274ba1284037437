use std::future::Future;
use std::pin::Pin;

use mapsync_shared::{
    Feature, FeatureQuery, LayerErrorKind, LayerKind, LayerPath, LayerStatus, Legend, QueryType,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type FeatureQueryFuture<'a> = BoxFuture<'a, Result<Vec<Feature>, QueryError>>;
pub type LegendQueryFuture<'a> = BoxFuture<'a, Result<Option<Legend>, QueryError>>;

/// A layer on the map, as seen by the layer sets.
pub trait MapLayer: Send + Sync {
    fn layer_path(&self) -> &LayerPath;

    fn layer_name(&self) -> Option<String>;

    fn kind(&self) -> LayerKind;

    fn layer_status(&self) -> LayerStatus;

    /// Receiver that observes every status change from now on.
    fn subscribe_status(&self) -> watch::Receiver<LayerStatus>;

    /// Reason for the current `error` status, when known.
    fn error_kind(&self) -> Option<LayerErrorKind> {
        None
    }

    /// Runtime switch from the layer configuration; independent of the schema type.
    fn is_queryable(&self) -> bool {
        true
    }

    fn is_hoverable(&self) -> bool {
        false
    }

    /// Whether the layer is drawn at the current zoom level.
    fn in_visible_range(&self) -> bool {
        true
    }

    fn supports_query(&self, query_type: QueryType) -> bool {
        match query_type {
            QueryType::AtPixel | QueryType::AtLonLat => self.kind().supports_feature_info(),
            QueryType::All => self.kind().supports_tabular_export(),
        }
    }

    /// Query features. `cancel` is fired when a newer query supersedes this one;
    /// layers may use it to abort the underlying request early.
    fn query_features(
        &self,
        query: FeatureQuery,
        include_geometry: bool,
        cancel: Option<CancellationToken>,
    ) -> FeatureQueryFuture<'_>;

    fn query_legend(&self) -> LegendQueryFuture<'_>;
}

/// Stacking order of the map's layers.
pub trait LayerOrder: Send + Sync {
    /// Layer paths, topmost first.
    fn ordered_layer_paths(&self) -> Vec<LayerPath>;
}

impl<F> LayerOrder for F
where
    F: Fn() -> Vec<LayerPath> + Send + Sync,
{
    fn ordered_layer_paths(&self) -> Vec<LayerPath> {
        self()
    }
}
