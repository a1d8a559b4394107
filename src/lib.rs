pub mod config;
pub mod error;
pub mod model;
pub mod preprocess;

// Re-exports for convenience
pub use config::ModelConfig;
pub use error::{DetectError, Result};
pub use model::{
    Backbone, BackboneFeatures, DecoupledHead, DetectionModel, FusedTriple, FusionNetwork,
    Prediction, Profile, ScaleLevel, PROFILES,
};
pub use preprocess::ImagePreprocessor;
