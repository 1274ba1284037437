pub mod all_feature_info;
pub mod feature_info;
pub mod hover_feature_info;
pub mod legends;

pub use all_feature_info::AllFeatureInfoLayerSet;
pub use feature_info::{ClickQuery, FeatureInfoLayerSet};
pub use hover_feature_info::HoverFeatureInfoLayerSet;
pub use legends::LegendsLayerSet;
