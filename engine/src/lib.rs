pub mod batch;
pub mod config;
pub mod error;
pub mod layer;
pub mod layer_sets;
pub mod registry;
pub mod services;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::LayerSetConfig;
pub use error::{LayerSetError, QueryError};
pub use layer::{LayerOrder, MapLayer};
pub use registry::{Generation, LayerSetHooks, RegistrationAction, Registry};
pub use services::map_events::MapEvent;
pub use state::{MapLayerSets, ObservabilityCounters, ObservabilitySnapshot};
pub use store::{InMemoryStore, LayerSetStore};
