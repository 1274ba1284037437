use mapsync_shared::{LayerPath, QueryType};
use thiserror::Error;

/// Failure reported by a layer when answering a feature or legend query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The layer (or its remote service) rejected the query.
    #[error("query rejected: {0}")]
    Rejected(String),

    /// The query was superseded before it resolved.
    #[error("query cancelled")]
    Cancelled,

    /// The layer type does not implement this kind of query.
    #[error("query type {0} is not supported by this layer")]
    Unsupported(QueryType),
}

/// Errors surfaced by layer-set operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerSetError {
    /// A query kind was requested from a layer type that cannot answer it.
    /// This is a programming error and aborts the whole call.
    #[error("layer {layer_path} does not support {query_type} queries")]
    UnsupportedQuery {
        layer_path: LayerPath,
        query_type: QueryType,
    },

    /// A status-change hook failed. Caught and logged by the registry.
    #[error("status hook failed for {layer_path}: {reason}")]
    Hook { layer_path: LayerPath, reason: String },
}
