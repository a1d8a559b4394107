pub mod backbone;
pub mod blocks;
pub mod detector;
pub mod fusion;
pub mod head;
pub mod level;
pub mod plan;
pub mod profile;

pub use backbone::{Backbone, CspDarknet};
pub use detector::{Architecture, DetectionModel};
pub use fusion::{BackboneFeatures, FusedTriple, FusionConfig, FusionNetwork};
pub use head::{DecoupledHead, Prediction};
pub use level::{ScaleLevel, BASE_CHANNELS};
pub use plan::FusionPlan;
pub use profile::{Profile, PROFILES, PROFILE_TABLE_VERSION};
