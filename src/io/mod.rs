//! I/O modules for reading rasters, land-mask vectors, and writing detections

pub mod export;
pub mod raster;
pub mod vector;

pub use export::{export_candidates, export_csv, read_csv};
pub use raster::{read_scene, write_mask_geotiff, write_scene_geotiff};
pub use vector::read_land_polygons;
