use std::path::Path;

use gdal::Dataset;
use ndarray::Array2;

use crate::types::{DetectError, DetectResult, GeoTransform, PixelMask, SceneRaster};

/// Read one band of a georeferenced intensity raster into a [`SceneRaster`].
///
/// The validity mask is derived from the band's declared no-data value plus
/// non-finite pixels. A raster without a geotransform or without an EPSG
/// coordinate reference system is rejected up front.
pub fn read_scene(path: &Path, band: isize) -> DetectResult<SceneRaster> {
    log::info!("reading scene raster {} (band {})", path.display(), band);

    let dataset = Dataset::open(path)?;
    let geo_transform = dataset.geo_transform().map_err(|_| {
        DetectError::Precondition(format!(
            "raster {} declares no affine geotransform",
            path.display()
        ))
    })?;
    let (width, height) = dataset.raster_size();
    log::debug!("raster size: {}x{}, geotransform: {:?}", width, height, geo_transform);

    let spatial_ref = dataset.spatial_ref().map_err(|_| {
        DetectError::Precondition(format!(
            "raster {} has no coordinate reference system",
            path.display()
        ))
    })?;
    let epsg = spatial_ref.auth_code().map_err(|_| {
        DetectError::Precondition(format!(
            "raster {} CRS has no EPSG authority code",
            path.display()
        ))
    })? as u32;

    let rasterband = dataset.rasterband(band)?;
    let no_data = rasterband.no_data_value().map(|v| v as f32);
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    let data = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| DetectError::Processing(format!("failed to reshape raster data: {}", e)))?;

    let raster = SceneRaster::from_data(data, GeoTransform::from_gdal(geo_transform), epsg, no_data);
    log::info!(
        "scene raster loaded: {}x{}, EPSG:{}, {} valid pixels",
        height,
        width,
        epsg,
        raster.valid_count()
    );
    Ok(raster)
}

/// Write an intensity raster as GeoTIFF, encoding invalid pixels as NaN
/// no-data so downstream tooling sees the exclusion.
pub fn write_scene_geotiff(raster: &SceneRaster, path: &Path) -> DetectResult<()> {
    use gdal::DriverManager;

    let (height, width) = raster.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<f32, _>(path, width as isize, height as isize, 1)?;

    dataset.set_geo_transform(&raster.geo_transform.to_gdal())?;
    dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(raster.epsg)?)?;

    let flat_data: Vec<f32> = raster
        .data
        .indexed_iter()
        .map(|((r, c), &v)| if raster.valid[[r, c]] != 0 { v } else { f32::NAN })
        .collect();
    let buffer = gdal::raster::Buffer::new((width, height), flat_data);
    let mut rasterband = dataset.rasterband(1)?;
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(f32::NAN as f64))?;

    log::info!("wrote scene raster {}", path.display());
    Ok(())
}

/// Write a binary detection mask as a single-band GeoTIFF.
pub fn write_mask_geotiff(
    mask: &PixelMask,
    geo_transform: &GeoTransform,
    epsg: u32,
    path: &Path,
) -> DetectResult<()> {
    use gdal::DriverManager;

    let (height, width) = mask.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<u8, _>(path, width as isize, height as isize, 1)?;

    dataset.set_geo_transform(&geo_transform.to_gdal())?;
    dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(epsg)?)?;

    let flat_data: Vec<u8> = mask.iter().cloned().collect();
    let buffer = gdal::raster::Buffer::new((width, height), flat_data);
    let mut rasterband = dataset.rasterband(1)?;
    rasterband.write((0, 0), (width, height), &buffer)?;

    log::info!("wrote detection mask {}", path.display());
    Ok(())
}
