use std::path::Path;

use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::{Geometry, LayerAccess, OGRwkbGeometryType};
use gdal::Dataset;

use crate::types::{DetectError, DetectResult, LandPolygon};

/// Read a land/no-search polygon layer and reconcile it to the raster CRS.
///
/// Accepts any vector format GDAL can open, in any coordinate reference
/// system. Polygons and multi-polygons are flattened into a plain polygon
/// list in `EPSG:target_epsg` coordinates; other geometry types are skipped
/// with a warning. An irreconcilable spatial reference is a
/// [`GeometryMismatch`](DetectError::GeometryMismatch) failure.
pub fn read_land_polygons(path: &Path, target_epsg: u32) -> DetectResult<Vec<LandPolygon>> {
    log::info!(
        "reading land mask {} (target EPSG:{})",
        path.display(),
        target_epsg
    );

    let mut dataset = Dataset::open(path)?;
    let mut layer = dataset.layer(0).map_err(|e| {
        DetectError::GeometryMismatch(format!(
            "land mask {} has no readable layer: {}",
            path.display(),
            e
        ))
    })?;

    let source_ref = layer.spatial_ref().ok_or_else(|| {
        DetectError::GeometryMismatch(format!(
            "land mask {} declares no spatial reference",
            path.display()
        ))
    })?;
    let target_ref = SpatialRef::from_epsg(target_epsg).map_err(|e| {
        DetectError::GeometryMismatch(format!("unknown target EPSG:{}: {}", target_epsg, e))
    })?;

    // Skip the transform when the layer already matches the raster CRS
    let transform = if source_ref.auth_code().ok() == Some(target_epsg as i32) {
        None
    } else {
        Some(CoordTransform::new(&source_ref, &target_ref).map_err(|e| {
            DetectError::GeometryMismatch(format!(
                "cannot reconcile land mask CRS with EPSG:{}: {}",
                target_epsg, e
            ))
        })?)
    };

    let mut polygons = Vec::new();
    let mut skipped = 0usize;
    for feature in layer.features() {
        let geometry = match feature.geometry() {
            Some(g) => g,
            None => continue,
        };
        collect_polygons(geometry, transform.as_ref(), &mut polygons, &mut skipped)?;
    }

    if skipped > 0 {
        log::warn!("skipped {} non-polygon geometries in land mask", skipped);
    }
    log::info!("land mask: {} polygons loaded", polygons.len());
    Ok(polygons)
}

fn collect_polygons(
    geometry: &Geometry,
    transform: Option<&CoordTransform>,
    polygons: &mut Vec<LandPolygon>,
    skipped: &mut usize,
) -> DetectResult<()> {
    // Mask off the 2.5D flag so POLYGON Z matches plain POLYGON
    match geometry.geometry_type() & 0xff {
        OGRwkbGeometryType::wkbPolygon => {
            polygons.push(polygon_from(geometry, transform)?);
        }
        OGRwkbGeometryType::wkbMultiPolygon => {
            for i in 0..geometry.geometry_count() {
                let part = geometry.get_geometry(i);
                polygons.push(polygon_from(&part, transform)?);
            }
        }
        _ => *skipped += 1,
    }
    Ok(())
}

fn polygon_from(
    geometry: &Geometry,
    transform: Option<&CoordTransform>,
) -> DetectResult<LandPolygon> {
    let mut rings = Vec::with_capacity(geometry.geometry_count());
    for i in 0..geometry.geometry_count() {
        let ring = geometry.get_geometry(i);
        let points = ring.get_point_vec();

        let mut xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let mut ys: Vec<f64> = points.iter().map(|p| p.1).collect();
        if let Some(transform) = transform {
            let mut zs = vec![0.0f64; xs.len()];
            transform
                .transform_coords(&mut xs, &mut ys, &mut zs)
                .map_err(|e| {
                    DetectError::GeometryMismatch(format!(
                        "coordinate transformation of land mask ring failed: {}",
                        e
                    ))
                })?;
        }

        rings.push(xs.into_iter().zip(ys).collect());
    }
    Ok(LandPolygon { rings })
}
