pub mod events;
pub mod layer;
pub mod query;
pub mod result_set;

pub use events::*;
pub use layer::*;
pub use query::*;
pub use result_set::*;
