use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::components::{label_components, Connectivity};
use crate::types::{DetectError, DetectResult, DetectionCandidate, PixelMask, SceneRaster};

/// Background statistic strategy for the adaptive threshold.
///
/// The detection decision is `intensity > estimate * threshold_factor`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BackgroundEstimator {
    /// Cell-averaging: local mean of the training ring
    Mean,
    /// Two-parameter: mean + k * standard deviation of the training ring
    MeanPlusStd { k: f64 },
}

impl BackgroundEstimator {
    fn estimate(&self, sum: f64, sum_sq: f64, count: f64) -> f64 {
        let mean = sum / count;
        match self {
            BackgroundEstimator::Mean => mean,
            BackgroundEstimator::MeanPlusStd { k } => {
                let variance = (sum_sq / count - mean * mean).max(0.0);
                mean + k * variance.sqrt()
            }
        }
    }
}

/// CFAR detector parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfarParams {
    /// Guard half-width in pixels; the (2*inner+1)^2 square around the CUT is
    /// excluded from the background statistic
    pub inner_window: usize,
    /// Training half-width in pixels; the ring between the guard square and the
    /// (2*outer+1)^2 square is the background region
    pub outer_window: usize,
    /// A CUT with fewer valid training pixels than this is skipped (undecidable)
    pub min_valid_background_pixels: usize,
    /// Connectivity used to group flagged pixels into candidates
    pub connectivity: Connectivity,
    /// Background statistic strategy
    pub estimator: BackgroundEstimator,
    /// Run a second pass with first-pass detections excluded from the
    /// background statistic
    pub refine_background: bool,
}

impl Default for CfarParams {
    fn default() -> Self {
        Self {
            inner_window: 2,
            outer_window: 6,
            min_valid_background_pixels: 24,
            connectivity: Connectivity::Eight,
            estimator: BackgroundEstimator::Mean,
            refine_background: false,
        }
    }
}

/// Detection output for a single threshold factor
#[derive(Debug, Clone)]
pub struct ThresholdDetections {
    /// Threshold factor this pass was run with
    pub threshold: f32,
    /// Binary detection mask (1 = flagged)
    pub mask: PixelMask,
    /// Candidates from connected-component grouping of the mask
    pub candidates: Vec<DetectionCandidate>,
    /// Flagged pixel total
    pub flagged_pixels: usize,
    /// CUTs skipped for lack of valid training pixels
    pub skipped_pixels: usize,
}

/// Summed-area tables over the valid pixels of a raster.
///
/// Built once per window geometry and shared read-only across a threshold
/// sweep; ring statistics come out as O(1) rectangle-sum differences.
pub struct BackgroundField {
    sum: Array2<f64>,
    sum_sq: Array2<f64>,
    count: Array2<f64>,
    rows: usize,
    cols: usize,
}

impl BackgroundField {
    /// Integrate the raster, treating pixels with `valid == 0` as absent.
    pub fn build(data: &Array2<f32>, valid: &PixelMask) -> Self {
        let (rows, cols) = data.dim();
        let mut sum = Array2::<f64>::zeros((rows + 1, cols + 1));
        let mut sum_sq = Array2::<f64>::zeros((rows + 1, cols + 1));
        let mut count = Array2::<f64>::zeros((rows + 1, cols + 1));

        for r in 0..rows {
            for c in 0..cols {
                let (v, vsq, n) = if valid[[r, c]] != 0 {
                    let v = data[[r, c]] as f64;
                    (v, v * v, 1.0)
                } else {
                    (0.0, 0.0, 0.0)
                };
                sum[[r + 1, c + 1]] = v + sum[[r, c + 1]] + sum[[r + 1, c]] - sum[[r, c]];
                sum_sq[[r + 1, c + 1]] =
                    vsq + sum_sq[[r, c + 1]] + sum_sq[[r + 1, c]] - sum_sq[[r, c]];
                count[[r + 1, c + 1]] = n + count[[r, c + 1]] + count[[r + 1, c]] - count[[r, c]];
            }
        }

        Self {
            sum,
            sum_sq,
            count,
            rows,
            cols,
        }
    }

    /// Sums over the inclusive pixel rectangle [r0..=r1] x [c0..=c1]
    fn rect(&self, r0: usize, c0: usize, r1: usize, c1: usize) -> (f64, f64, f64) {
        let s = self.sum[[r1 + 1, c1 + 1]] - self.sum[[r0, c1 + 1]] - self.sum[[r1 + 1, c0]]
            + self.sum[[r0, c0]];
        let sq = self.sum_sq[[r1 + 1, c1 + 1]]
            - self.sum_sq[[r0, c1 + 1]]
            - self.sum_sq[[r1 + 1, c0]]
            + self.sum_sq[[r0, c0]];
        let n = self.count[[r1 + 1, c1 + 1]]
            - self.count[[r0, c1 + 1]]
            - self.count[[r1 + 1, c0]]
            + self.count[[r0, c0]];
        (s, sq, n)
    }

    /// Training-ring sums around (row, col): the outer square minus the guard
    /// square, both clamped to the raster bounds (truncated edge windows).
    fn ring(&self, row: usize, col: usize, inner: usize, outer: usize) -> (f64, f64, f64) {
        let or0 = row.saturating_sub(outer);
        let oc0 = col.saturating_sub(outer);
        let or1 = (row + outer).min(self.rows - 1);
        let oc1 = (col + outer).min(self.cols - 1);

        let gr0 = row.saturating_sub(inner);
        let gc0 = col.saturating_sub(inner);
        let gr1 = (row + inner).min(self.rows - 1);
        let gc1 = (col + inner).min(self.cols - 1);

        let (os, osq, on) = self.rect(or0, oc0, or1, oc1);
        let (gs, gsq, gn) = self.rect(gr0, gc0, gr1, gc1);
        (os - gs, osq - gsq, on - gn)
    }
}

/// Adaptive-threshold (CFAR) ship detector.
///
/// For every valid cell under test, the local clutter statistic is estimated
/// from a training ring around a guard region, and the cell is flagged when its
/// intensity exceeds the estimate scaled by the threshold factor.
pub struct CfarEngine {
    params: CfarParams,
}

impl CfarEngine {
    /// Create an engine, validating the window geometry.
    pub fn new(params: CfarParams) -> DetectResult<Self> {
        if params.outer_window <= params.inner_window {
            return Err(DetectError::Precondition(format!(
                "outer window ({}) must exceed inner window ({})",
                params.outer_window, params.inner_window
            )));
        }
        if params.min_valid_background_pixels == 0 {
            return Err(DetectError::Precondition(
                "min_valid_background_pixels must be at least 1".to_string(),
            ));
        }
        Ok(Self { params })
    }

    /// Engine with default parameters
    pub fn with_defaults() -> Self {
        Self {
            params: CfarParams::default(),
        }
    }

    pub fn params(&self) -> &CfarParams {
        &self.params
    }

    /// Run one detection pass at a single threshold factor.
    pub fn detect(&self, raster: &SceneRaster, threshold: f32) -> DetectResult<ThresholdDetections> {
        validate_threshold(threshold)?;
        let field = BackgroundField::build(&raster.data, &raster.valid);
        Ok(self.run_single(raster, &field, threshold))
    }

    /// Run one detection pass per threshold factor, in the given order.
    ///
    /// The background field is computed once and shared read-only across the
    /// passes, which run as parallel workers.
    pub fn sweep(
        &self,
        raster: &SceneRaster,
        thresholds: &[f32],
    ) -> DetectResult<Vec<ThresholdDetections>> {
        if thresholds.is_empty() {
            return Err(DetectError::Precondition(
                "threshold sweep is empty".to_string(),
            ));
        }
        for &t in thresholds {
            validate_threshold(t)?;
        }

        let (rows, cols) = raster.dim();
        log::info!(
            "CFAR sweep over {} thresholds on {}x{} raster (inner={}, outer={})",
            thresholds.len(),
            rows,
            cols,
            self.params.inner_window,
            self.params.outer_window
        );

        let field = BackgroundField::build(&raster.data, &raster.valid);
        let results: Vec<ThresholdDetections> = thresholds
            .par_iter()
            .map(|&t| self.run_single(raster, &field, t))
            .collect();

        for result in &results {
            log::info!(
                "threshold {}: {} candidates, {} flagged, {} skipped",
                result.threshold,
                result.candidates.len(),
                result.flagged_pixels,
                result.skipped_pixels
            );
        }
        Ok(results)
    }

    fn run_single(
        &self,
        raster: &SceneRaster,
        field: &BackgroundField,
        threshold: f32,
    ) -> ThresholdDetections {
        let (mask, flagged, skipped) = self.flag_pixels(raster, field, threshold);

        if self.params.refine_background && flagged > 0 {
            // Rebuild the field with first-pass detections treated as invalid,
            // so target energy no longer contaminates the training statistic.
            log::debug!(
                "refining background at threshold {}: excluding {} flagged pixels",
                threshold,
                flagged
            );
            let mut refined_valid = raster.valid.clone();
            for ((r, c), &m) in mask.indexed_iter() {
                if m != 0 {
                    refined_valid[[r, c]] = 0;
                }
            }
            let refined = BackgroundField::build(&raster.data, &refined_valid);
            let (mask2, flagged2, skipped2) = self.flag_pixels(raster, &refined, threshold);
            return self.assemble(raster, &refined, mask2, flagged2, skipped2, threshold);
        }

        self.assemble(raster, field, mask, flagged, skipped, threshold)
    }

    /// Per-pixel flagging pass. Returns (mask, flagged count, skipped count).
    fn flag_pixels(
        &self,
        raster: &SceneRaster,
        field: &BackgroundField,
        threshold: f32,
    ) -> (PixelMask, usize, usize) {
        let (rows, cols) = raster.dim();
        let mut mask = Array2::<u8>::zeros((rows, cols));
        let mut flagged = 0usize;
        let mut skipped = 0usize;
        let threshold = threshold as f64;
        let min_count = self.params.min_valid_background_pixels as f64;

        for row in 0..rows {
            for col in 0..cols {
                if !raster.is_valid(row, col) {
                    continue;
                }
                let (sum, sum_sq, count) = field.ring(
                    row,
                    col,
                    self.params.inner_window,
                    self.params.outer_window,
                );
                if count < min_count {
                    skipped += 1;
                    continue;
                }
                let estimate = self.params.estimator.estimate(sum, sum_sq, count);
                if (raster.data[[row, col]] as f64) > estimate * threshold {
                    mask[[row, col]] = 1;
                    flagged += 1;
                }
            }
        }

        (mask, flagged, skipped)
    }

    fn assemble(
        &self,
        raster: &SceneRaster,
        field: &BackgroundField,
        mask: PixelMask,
        flagged: usize,
        skipped: usize,
        threshold: f32,
    ) -> ThresholdDetections {
        let components = label_components(&mask, self.params.connectivity);
        let mut candidates = Vec::with_capacity(components.len());

        for component in &components {
            let (mut peak_row, mut peak_col) = component.pixels[0];
            let mut peak_intensity = raster.data[[peak_row, peak_col]];
            for &(r, c) in &component.pixels {
                if raster.data[[r, c]] > peak_intensity {
                    peak_intensity = raster.data[[r, c]];
                    peak_row = r;
                    peak_col = c;
                }
            }

            let (sum, sum_sq, count) = field.ring(
                peak_row,
                peak_col,
                self.params.inner_window,
                self.params.outer_window,
            );
            let background_mean = if count > 0.0 {
                self.params.estimator.estimate(sum, sum_sq, count)
            } else {
                0.0
            };
            let contrast_ratio = if background_mean > 0.0 {
                peak_intensity as f64 / background_mean
            } else {
                f64::INFINITY
            };

            let (centroid_row, centroid_col) = component.centroid();
            let (lon, lat) = raster.geo_transform.pixel_to_geo(centroid_row, centroid_col);

            candidates.push(DetectionCandidate {
                centroid_row,
                centroid_col,
                lon,
                lat,
                pixel_count: component.pixels.len(),
                bounds: component.bounds,
                peak_row,
                peak_col,
                peak_intensity,
                background_mean,
                contrast_ratio,
                threshold_factor: threshold,
            });
        }

        ThresholdDetections {
            threshold,
            mask,
            candidates,
            flagged_pixels: flagged,
            skipped_pixels: skipped,
        }
    }
}

fn validate_threshold(threshold: f32) -> DetectResult<()> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(DetectError::Precondition(format!(
            "threshold factor must be finite and positive, got {}",
            threshold
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, SceneRaster};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn unit_transform() -> GeoTransform {
        GeoTransform {
            top_left_x: 0.0,
            pixel_width: 1.0,
            rotation_x: 0.0,
            top_left_y: 0.0,
            rotation_y: 0.0,
            pixel_height: -1.0,
        }
    }

    fn uniform_scene(rows: usize, cols: usize, value: f32) -> SceneRaster {
        SceneRaster::from_data(
            Array2::from_elem((rows, cols), value),
            unit_transform(),
            4326,
            None,
        )
    }

    fn spot_params() -> CfarParams {
        CfarParams {
            inner_window: 1,
            outer_window: 3,
            min_valid_background_pixels: 8,
            ..CfarParams::default()
        }
    }

    #[test]
    fn test_window_geometry_validation() {
        let params = CfarParams {
            inner_window: 3,
            outer_window: 3,
            ..CfarParams::default()
        };
        assert!(CfarEngine::new(params).is_err());
    }

    #[test]
    fn test_field_ring_matches_brute_force() {
        let data =
            Array2::from_shape_fn((8, 8), |(r, c)| (r * 8 + c) as f32 * 0.25 + 1.0);
        let valid = Array2::<u8>::ones((8, 8));
        let field = BackgroundField::build(&data, &valid);

        let (inner, outer) = (1usize, 2usize);
        let (row, col) = (4usize, 3usize);
        let (sum, sum_sq, count) = field.ring(row, col, inner, outer);

        let mut exp_sum = 0.0f64;
        let mut exp_sq = 0.0f64;
        let mut exp_n = 0.0f64;
        for r in row - outer..=row + outer {
            for c in col - outer..=col + outer {
                let dr = (r as i64 - row as i64).unsigned_abs() as usize;
                let dc = (c as i64 - col as i64).unsigned_abs() as usize;
                if dr <= inner && dc <= inner {
                    continue;
                }
                let v = data[[r, c]] as f64;
                exp_sum += v;
                exp_sq += v * v;
                exp_n += 1.0;
            }
        }
        assert_relative_eq!(sum, exp_sum, epsilon = 1e-9);
        assert_relative_eq!(sum_sq, exp_sq, epsilon = 1e-9);
        assert_eq!(count as usize, exp_n as usize);
    }

    #[test]
    fn test_isolated_bright_spot_single_candidate() {
        let mut raster = uniform_scene(20, 20, 1.0);
        raster.data[[10, 10]] = 10.0;

        let engine = CfarEngine::new(spot_params()).unwrap();
        let result = engine.detect(&raster, 5.0).unwrap();

        assert_eq!(result.candidates.len(), 1);
        let candidate = &result.candidates[0];
        assert_eq!(candidate.pixel_count, 1);
        assert_eq!((candidate.peak_row, candidate.peak_col), (10, 10));
        assert_relative_eq!(candidate.background_mean, 1.0, epsilon = 1e-6);
        assert_relative_eq!(candidate.contrast_ratio, 10.0, epsilon = 1e-6);
        assert_eq!(result.flagged_pixels, 1);
    }

    #[test]
    fn test_flat_raster_yields_no_detections() {
        let raster = uniform_scene(16, 16, 3.0);
        let engine = CfarEngine::new(spot_params()).unwrap();
        for threshold in [1.1f32, 2.0, 5.0] {
            let result = engine.detect(&raster, threshold).unwrap();
            assert_eq!(result.flagged_pixels, 0, "threshold {}", threshold);
            assert!(result.candidates.is_empty());
        }
    }

    #[test]
    fn test_masked_pixels_excluded_from_statistics() {
        // A bright land strip that is masked out must not raise the background
        // estimate, and must never be evaluated as a CUT.
        let mut raster = uniform_scene(15, 15, 2.0);
        for r in 0..15 {
            for c in 0..4 {
                raster.data[[r, c]] = 500.0;
                raster.valid[[r, c]] = 0;
            }
        }
        let engine = CfarEngine::new(spot_params()).unwrap();
        let result = engine.detect(&raster, 1.5).unwrap();
        assert_eq!(result.flagged_pixels, 0);
        for candidate in &result.candidates {
            assert!(candidate.centroid_col >= 4.0);
        }
    }

    #[test]
    fn test_insufficient_background_skips_cut() {
        // Every ring is smaller than the requested minimum: all CUTs skipped.
        let raster = uniform_scene(5, 5, 1.0);
        let params = CfarParams {
            inner_window: 1,
            outer_window: 2,
            min_valid_background_pixels: 20,
            ..CfarParams::default()
        };
        let engine = CfarEngine::new(params).unwrap();
        let result = engine.detect(&raster, 2.0).unwrap();
        assert_eq!(result.skipped_pixels, 25);
        assert_eq!(result.flagged_pixels, 0);
    }

    #[test]
    fn test_sweep_results_are_labeled_in_order() {
        let mut raster = uniform_scene(20, 20, 1.0);
        raster.data[[5, 5]] = 8.0;
        raster.data[[14, 14]] = 3.0;

        let engine = CfarEngine::new(spot_params()).unwrap();
        let thresholds = [2.0f32, 4.0, 6.0];
        let results = engine.sweep(&raster, &thresholds).unwrap();

        assert_eq!(results.len(), 3);
        for (result, &t) in results.iter().zip(thresholds.iter()) {
            assert_eq!(result.threshold, t);
        }
        // Detection count is non-increasing with the threshold factor
        assert!(results[0].flagged_pixels >= results[1].flagged_pixels);
        assert!(results[1].flagged_pixels >= results[2].flagged_pixels);
    }

    #[test]
    fn test_mean_plus_std_estimator_is_stricter() {
        let mut raster = uniform_scene(20, 20, 1.0);
        // Noisy-ish background around the target
        for r in 0..20 {
            for c in 0..20 {
                if (r + c) % 2 == 0 {
                    raster.data[[r, c]] = 1.5;
                }
            }
        }
        raster.data[[10, 10]] = 4.0;

        let mean_engine = CfarEngine::new(spot_params()).unwrap();
        let std_params = CfarParams {
            estimator: BackgroundEstimator::MeanPlusStd { k: 3.0 },
            ..spot_params()
        };
        let std_engine = CfarEngine::new(std_params).unwrap();

        let mean_result = mean_engine.detect(&raster, 2.0).unwrap();
        let std_result = std_engine.detect(&raster, 2.0).unwrap();
        assert!(std_result.flagged_pixels <= mean_result.flagged_pixels);
    }

    #[test]
    fn test_background_refinement_recovers_contaminated_estimate() {
        // A two-pixel target bright enough that its energy leaks into the
        // training ring of its neighbor; refinement removes the leak.
        let mut raster = uniform_scene(20, 20, 1.0);
        raster.data[[10, 10]] = 50.0;
        raster.data[[10, 11]] = 50.0;

        let refined_params = CfarParams {
            refine_background: true,
            ..spot_params()
        };
        let engine = CfarEngine::new(refined_params).unwrap();
        let result = engine.detect(&raster, 5.0).unwrap();

        assert_eq!(result.candidates.len(), 1);
        let candidate = &result.candidates[0];
        assert_eq!(candidate.pixel_count, 2);
        // Refined background excludes the 50.0 pixels from the ring
        assert_relative_eq!(candidate.background_mean, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let raster = uniform_scene(10, 10, 1.0);
        let engine = CfarEngine::with_defaults();
        assert!(engine.detect(&raster, 0.0).is_err());
        assert!(engine.detect(&raster, f32::NAN).is_err());
        assert!(engine.sweep(&raster, &[]).is_err());
    }
}
