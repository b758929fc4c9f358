use ndarray::Array2;
use shipscan::{CfarEngine, CfarParams, GeoTransform, SceneRaster};

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

/// Deterministic scene with targets of graded brightness over a textured sea
fn graded_scene() -> SceneRaster {
    let mut data = Array2::from_shape_fn((50, 50), |(r, c)| {
        1.0 + 0.1 * (((r * 7 + c * 13) % 5) as f32)
    });
    data[[10, 10]] = 3.0;
    data[[20, 25]] = 5.0;
    data[[35, 12]] = 9.0;
    data[[44, 40]] = 15.0;
    SceneRaster::from_data(data, unit_transform(), 4326, None)
}

fn engine() -> CfarEngine {
    CfarEngine::new(CfarParams {
        inner_window: 1,
        outer_window: 4,
        min_valid_background_pixels: 12,
        ..CfarParams::default()
    })
    .unwrap()
}

/// The detection set at a higher threshold is a subset of the set at a lower
/// threshold, pixel for pixel.
#[test]
fn test_higher_threshold_is_pixelwise_subset() {
    let raster = graded_scene();
    let results = engine().sweep(&raster, &[2.0, 3.0]).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].threshold, 2.0);
    assert_eq!(results[1].threshold, 3.0);

    for ((pixel, &low), &high) in results[0]
        .mask
        .indexed_iter()
        .zip(results[1].mask.iter())
    {
        assert!(
            high <= low,
            "pixel {:?} flagged at 3.0 but not at 2.0",
            pixel
        );
    }
}

/// Detection count is non-increasing as the threshold factor rises.
#[test]
fn test_detection_count_monotonic_in_threshold() {
    let raster = graded_scene();
    let thresholds = [1.5f32, 2.0, 3.0, 5.0, 8.0];
    let results = engine().sweep(&raster, &thresholds).unwrap();

    for pair in results.windows(2) {
        assert!(
            pair[1].flagged_pixels <= pair[0].flagged_pixels,
            "flagged count rose from {} to {} between thresholds {} and {}",
            pair[0].flagged_pixels,
            pair[1].flagged_pixels,
            pair[0].threshold,
            pair[1].threshold
        );
        assert!(pair[1].candidates.len() <= pair[0].candidates.len());
    }
}

/// A sweep result matches a standalone pass at the same threshold.
#[test]
fn test_sweep_matches_single_pass() {
    let raster = graded_scene();
    let engine = engine();

    let sweep = engine.sweep(&raster, &[2.5]).unwrap();
    let single = engine.detect(&raster, 2.5).unwrap();

    assert_eq!(sweep[0].flagged_pixels, single.flagged_pixels);
    assert_eq!(sweep[0].skipped_pixels, single.skipped_pixels);
    assert_eq!(sweep[0].candidates.len(), single.candidates.len());
    assert_eq!(sweep[0].mask, single.mask);
}

/// A raster with no variance produces zero detections at any threshold above
/// one.
#[test]
fn test_flat_raster_has_no_detections() {
    let raster = SceneRaster::from_data(
        Array2::from_elem((30, 30), 4.2f32),
        unit_transform(),
        4326,
        None,
    );
    let results = engine().sweep(&raster, &[1.01, 2.0, 10.0]).unwrap();
    for result in results {
        assert_eq!(result.flagged_pixels, 0, "threshold {}", result.threshold);
        assert!(result.candidates.is_empty());
    }
}
