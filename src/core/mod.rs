//! Core detection pipeline stages

pub mod chain;
pub mod components;
pub mod cfar;
pub mod discriminate;
pub mod gpt;
pub mod masking;

// Re-export main types
pub use chain::{extract_product_id, Artifact, CancelToken, Pipeline, PipelineConfig};
pub use cfar::{BackgroundEstimator, BackgroundField, CfarEngine, CfarParams, ThresholdDetections};
pub use components::{label_components, Component, Connectivity};
pub use discriminate::{Discrimination, DiscriminationParams, Discriminator, RejectionReason};
pub use gpt::{GptEngine, GptOperator, ProductFormat};
pub use masking::{apply_raster_mask, apply_vector_mask};
