use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued calibrated intensity data
pub type SceneReal = f32;

/// 2D intensity array (row x column)
pub type SceneImage = Array2<SceneReal>;

/// 2D pixel mask (1 = valid/flagged, 0 = invalid/clear)
pub type PixelMask = Array2<u8>;

/// Geospatial bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// Geospatial transformation parameters (GDAL-style affine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Build from a GDAL geotransform array [x0, dx, rx, y0, ry, dy]
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Convert back to the GDAL array layout
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map fractional pixel coordinates (row, col) to geographic (x, y).
    ///
    /// Uses the pixel-center convention: (0.0, 0.0) maps to the center of the
    /// top-left pixel, not its corner.
    pub fn pixel_to_geo(&self, row: f64, col: f64) -> (f64, f64) {
        let c = col + 0.5;
        let r = row + 0.5;
        let x = self.top_left_x + c * self.pixel_width + r * self.rotation_x;
        let y = self.top_left_y + c * self.rotation_y + r * self.pixel_height;
        (x, y)
    }

    /// Map geographic (x, y) to fractional pixel coordinates (row, col).
    ///
    /// Inverse of [`pixel_to_geo`](Self::pixel_to_geo), same pixel-center
    /// convention. Returns None for a degenerate (non-invertible) transform.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < 1e-15 {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let c = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let r = (dy * self.pixel_width - dx * self.rotation_y) / det;
        Some((r - 0.5, c - 0.5))
    }
}

/// A calibrated, georeferenced intensity raster with per-pixel validity.
///
/// This is the artifact that flows between detection stages. Pixels with
/// `valid == 0` (no-data, non-finite values, land) keep their stored intensity
/// but are excluded from every statistic downstream, so "excluded" stays
/// distinguishable from "measured zero".
#[derive(Debug, Clone)]
pub struct SceneRaster {
    pub data: SceneImage,
    pub valid: PixelMask,
    pub geo_transform: GeoTransform,
    pub epsg: u32,
    pub no_data: Option<f32>,
}

impl SceneRaster {
    /// Create a raster from data and an explicit validity mask.
    pub fn new(
        data: SceneImage,
        valid: PixelMask,
        geo_transform: GeoTransform,
        epsg: u32,
        no_data: Option<f32>,
    ) -> DetectResult<Self> {
        if data.dim() != valid.dim() {
            return Err(DetectError::Precondition(format!(
                "validity mask {}x{} does not match raster {}x{}",
                valid.nrows(),
                valid.ncols(),
                data.nrows(),
                data.ncols()
            )));
        }
        Ok(Self {
            data,
            valid,
            geo_transform,
            epsg,
            no_data,
        })
    }

    /// Create a raster deriving validity from the no-data convention:
    /// non-finite pixels and pixels equal to `no_data` are invalid.
    pub fn from_data(
        data: SceneImage,
        geo_transform: GeoTransform,
        epsg: u32,
        no_data: Option<f32>,
    ) -> Self {
        let valid = data.mapv(|v| {
            let is_no_data = no_data.map(|nd| v == nd).unwrap_or(false);
            if v.is_finite() && !is_no_data {
                1u8
            } else {
                0u8
            }
        });
        Self {
            data,
            valid,
            geo_transform,
            epsg,
            no_data,
        }
    }

    /// (rows, cols) of the raster grid
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Whether the pixel at (row, col) is usable for statistics
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.valid[[row, col]] != 0
    }

    /// Number of valid pixels
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v != 0).count()
    }

    /// Geographic extent of the grid, from the outer pixel corners
    pub fn bounding_box(&self) -> BoundingBox {
        let (rows, cols) = self.dim();
        let (x0, y0) = self.geo_transform.pixel_to_geo(-0.5, -0.5);
        let (x1, y1) = self
            .geo_transform
            .pixel_to_geo(rows as f64 - 0.5, cols as f64 - 0.5);
        BoundingBox {
            min_lon: x0.min(x1),
            max_lon: x0.max(x1),
            min_lat: y0.min(y1),
            max_lat: y0.max(y1),
        }
    }
}

/// A land/no-search polygon in the raster's coordinate reference system.
///
/// `rings[0]` is the exterior ring; any further rings are holes. Rings are
/// closed or open vertex lists in (x, y) order; even-odd filling treats both
/// the same way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandPolygon {
    pub rings: Vec<Vec<(f64, f64)>>,
}

/// Inclusive pixel bounding box of a connected component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBounds {
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
}

impl PixelBounds {
    /// Area of the bounding box in pixels
    pub fn area(&self) -> usize {
        (self.max_row - self.min_row + 1) * (self.max_col - self.min_col + 1)
    }
}

/// A connected group of flagged pixels produced by the CFAR stage.
///
/// Immutable after creation: discrimination only accepts or rejects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionCandidate {
    /// Intensity-unweighted pixel centroid
    pub centroid_row: f64,
    pub centroid_col: f64,
    /// Geographic centroid (raster CRS)
    pub lon: f64,
    pub lat: f64,
    /// Number of flagged pixels in the component
    pub pixel_count: usize,
    pub bounds: PixelBounds,
    /// Brightest pixel of the component
    pub peak_row: usize,
    pub peak_col: usize,
    pub peak_intensity: f32,
    /// Background estimate at the peak pixel, as used for its flagging decision
    pub background_mean: f64,
    /// peak_intensity / background_mean
    pub contrast_ratio: f64,
    /// Threshold factor this candidate was detected under
    pub threshold_factor: f32,
}

/// Validated, exportable form of an accepted candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub lat: f64,
    pub lon: f64,
    pub row: f64,
    pub col: f64,
    pub peak_intensity: f32,
    pub contrast_ratio: f64,
    pub threshold: f32,
}

impl DetectionRecord {
    pub fn from_candidate(candidate: &DetectionCandidate) -> Self {
        Self {
            lat: candidate.lat,
            lon: candidate.lon,
            row: candidate.centroid_row,
            col: candidate.centroid_col,
            peak_intensity: candidate.peak_intensity,
            contrast_ratio: candidate.contrast_ratio,
            threshold: candidate.threshold_factor,
        }
    }
}

/// Error types for the detection pipeline
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("external processing failed in '{operation}' [{parameters}]: {message}")]
    ExternalProcessing {
        operation: String,
        parameters: String,
        message: String,
    },

    #[error("stage '{stage}' [{parameters}] failed: {source}")]
    Stage {
        stage: String,
        parameters: String,
        #[source]
        source: Box<DetectError>,
    },

    #[error("export error: {0}")]
    Export(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for detection operations
pub type DetectResult<T> = Result<T, DetectError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn north_up(x0: f64, y0: f64, size: f64) -> GeoTransform {
        GeoTransform {
            top_left_x: x0,
            pixel_width: size,
            rotation_x: 0.0,
            top_left_y: y0,
            rotation_y: 0.0,
            pixel_height: -size,
        }
    }

    #[test]
    fn test_pixel_geo_round_trip() {
        let gt = north_up(10.0, 45.0, 0.001);
        let (x, y) = gt.pixel_to_geo(12.0, 34.0);
        let (row, col) = gt.geo_to_pixel(x, y).unwrap();
        assert_relative_eq!(row, 12.0, epsilon = 1e-9);
        assert_relative_eq!(col, 34.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pixel_center_convention() {
        let gt = north_up(0.0, 0.0, 1.0);
        // Center of the top-left pixel, not its corner
        let (x, y) = gt.pixel_to_geo(0.0, 0.0);
        assert_relative_eq!(x, 0.5);
        assert_relative_eq!(y, -0.5);
    }

    #[test]
    fn test_degenerate_transform() {
        let gt = north_up(0.0, 0.0, 0.0);
        assert!(gt.geo_to_pixel(1.0, 1.0).is_none());
    }

    #[test]
    fn test_bounding_box_covers_grid() {
        let data = Array2::<f32>::zeros((10, 20));
        let raster = SceneRaster::from_data(data, north_up(5.0, 50.0, 0.1), 4326, None);
        let bbox = raster.bounding_box();
        assert_relative_eq!(bbox.min_lon, 5.0);
        assert_relative_eq!(bbox.max_lon, 7.0);
        assert_relative_eq!(bbox.max_lat, 50.0);
        assert_relative_eq!(bbox.min_lat, 49.0);
    }

    #[test]
    fn test_scene_raster_mask_mismatch() {
        let data = Array2::<f32>::zeros((4, 4));
        let valid = Array2::<u8>::ones((4, 5));
        let result = SceneRaster::new(data, valid, north_up(0.0, 0.0, 1.0), 4326, None);
        assert!(matches!(result, Err(DetectError::Precondition(_))));
    }

    #[test]
    fn test_from_data_no_data_handling() {
        let mut data = Array2::<f32>::ones((3, 3));
        data[[0, 0]] = -9999.0;
        data[[1, 1]] = f32::NAN;
        let raster = SceneRaster::from_data(data, north_up(0.0, 0.0, 1.0), 4326, Some(-9999.0));
        assert_eq!(raster.valid_count(), 7);
        assert!(!raster.is_valid(0, 0));
        assert!(!raster.is_valid(1, 1));
        assert!(raster.is_valid(2, 2));
    }
}
