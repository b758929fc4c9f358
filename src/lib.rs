//! ShipScan: A Fast, Modular Sentinel-1 Ship Detection Pipeline
//!
//! This library takes calibrated, multilooked SAR intensity rasters and turns
//! them into geolocated ship detections: land masking, CFAR adaptive
//! thresholding (with threshold sweeps for sensitivity analysis), false-alarm
//! discrimination, and tabular export. Preprocessing operators (orbit,
//! deburst, calibration, multilook, terrain correction) are submitted to ESA
//! SNAP's gpt engine through a uniform invoker rather than reimplemented.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, DetectError, DetectResult, DetectionCandidate, DetectionRecord, GeoTransform,
    LandPolygon, PixelBounds, PixelMask, SceneImage, SceneRaster,
};

pub use core::{
    apply_raster_mask, apply_vector_mask, BackgroundEstimator, CancelToken, CfarEngine,
    CfarParams, Connectivity, Discrimination, DiscriminationParams, Discriminator, GptEngine,
    GptOperator, Pipeline, PipelineConfig, ProductFormat, RejectionReason, ThresholdDetections,
};

pub use io::{export_candidates, export_csv, read_csv, read_land_polygons, read_scene};
