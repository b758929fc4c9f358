use crate::types::{
    DetectError, DetectResult, GeoTransform, LandPolygon, PixelMask, SceneRaster,
};

/// Mark every pixel covered by a land polygon as invalid.
///
/// Polygons must already be in the raster's coordinate reference system (the
/// vector reader reconciles CRS). Covered pixels keep their intensity values
/// and only lose validity, so downstream statistics can still distinguish
/// "excluded" from "measured zero". Returns the masked raster and the number
/// of pixels newly excluded.
pub fn apply_vector_mask(
    raster: &SceneRaster,
    polygons: &[LandPolygon],
) -> DetectResult<(SceneRaster, usize)> {
    let (rows, cols) = raster.dim();
    let mut masked = raster.clone();
    let mut newly_masked = 0usize;

    for polygon in polygons {
        let rings = pixel_rings(polygon, &raster.geo_transform)?;
        newly_masked += fill_even_odd(&rings, &mut masked.valid, rows, cols);
    }

    log::info!(
        "land mask: {} polygons excluded {} of {} pixels",
        polygons.len(),
        newly_masked,
        rows * cols
    );
    Ok((masked, newly_masked))
}

/// Apply a pre-rasterized exclusion mask (nonzero = excluded).
///
/// The mask must align with the raster pixel-for-pixel: identical dimensions
/// and identical geotransform. Any mismatch is a fatal precondition failure.
pub fn apply_raster_mask(
    raster: &SceneRaster,
    mask: &PixelMask,
    mask_geo: &GeoTransform,
) -> DetectResult<(SceneRaster, usize)> {
    if mask.dim() != raster.dim() {
        return Err(DetectError::Precondition(format!(
            "exclusion mask {}x{} does not match raster {}x{}",
            mask.nrows(),
            mask.ncols(),
            raster.data.nrows(),
            raster.data.ncols()
        )));
    }
    if *mask_geo != raster.geo_transform {
        return Err(DetectError::Precondition(
            "exclusion mask geotransform does not match raster geotransform".to_string(),
        ));
    }

    let mut masked = raster.clone();
    let mut newly_masked = 0usize;
    for ((r, c), &m) in mask.indexed_iter() {
        if m != 0 && masked.valid[[r, c]] != 0 {
            masked.valid[[r, c]] = 0;
            newly_masked += 1;
        }
    }

    log::info!("raster mask excluded {} pixels", newly_masked);
    Ok((masked, newly_masked))
}

/// Project polygon rings into fractional pixel coordinates (row, col).
fn pixel_rings(
    polygon: &LandPolygon,
    geo_transform: &GeoTransform,
) -> DetectResult<Vec<Vec<(f64, f64)>>> {
    polygon
        .rings
        .iter()
        .map(|ring| {
            ring.iter()
                .map(|&(x, y)| {
                    geo_transform.geo_to_pixel(x, y).ok_or_else(|| {
                        DetectError::GeometryMismatch(
                            "raster geotransform is degenerate, cannot project mask polygons"
                                .to_string(),
                        )
                    })
                })
                .collect()
        })
        .collect()
}

/// Even-odd scanline fill over pixel centers. Rings beyond the first punch
/// holes. Returns the number of pixels switched from valid to invalid.
fn fill_even_odd(
    rings: &[Vec<(f64, f64)>],
    valid: &mut PixelMask,
    rows: usize,
    cols: usize,
) -> usize {
    // Row range touched by the polygon, clamped to the grid
    let mut min_row = f64::INFINITY;
    let mut max_row = f64::NEG_INFINITY;
    for ring in rings {
        for &(r, _) in ring {
            min_row = min_row.min(r);
            max_row = max_row.max(r);
        }
    }
    if !min_row.is_finite() || !max_row.is_finite() {
        return 0;
    }
    let row_start = min_row.ceil().max(0.0) as usize;
    let row_end = max_row.floor().min(rows as f64 - 1.0);
    if row_end < 0.0 {
        return 0;
    }
    let row_end = row_end as usize;

    let mut newly_masked = 0usize;
    let mut crossings: Vec<f64> = Vec::new();

    for row in row_start..=row_end {
        let scan = row as f64;
        crossings.clear();

        for ring in rings {
            if ring.len() < 3 {
                continue;
            }
            for i in 0..ring.len() {
                let (r0, c0) = ring[i];
                let (r1, c1) = ring[(i + 1) % ring.len()];
                // Half-open edge rule avoids double-counting shared vertices
                if (r0 > scan) == (r1 > scan) {
                    continue;
                }
                crossings.push(c0 + (scan - r0) * (c1 - c0) / (r1 - r0));
            }
        }

        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            let col_start = pair[0].ceil().max(0.0) as usize;
            let col_end = pair[1].ceil().min(cols as f64);
            if col_end <= 0.0 {
                continue;
            }
            for col in col_start..col_end as usize {
                if valid[[row, col]] != 0 {
                    valid[[row, col]] = 0;
                    newly_masked += 1;
                }
            }
        }
    }

    newly_masked
}
