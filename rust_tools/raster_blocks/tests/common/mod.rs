//! Shared helpers for the engine integration tests.
//!
//! Rasters are written in UTM zone 55S with 1 unit pixels unless a test
//! asks otherwise.

#![allow(dead_code)]

use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use raster_blocks::config::{Controls, OutputSetting};
use std::path::Path;

// ============================================================================
// Test Helpers
// ============================================================================

pub fn utm() -> String {
    SpatialRef::from_epsg(32755).unwrap().to_wkt().unwrap()
}

pub fn geographic() -> String {
    SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap()
}

/// Single band GTiff with `value(row, col)` in every pixel.
pub fn write_raster<T, F>(path: &Path, origin: (f64, f64), size: (usize, usize), nodata: Option<f64>, value: F)
where
    T: GdalType + Copy,
    F: Fn(usize, usize) -> T,
{
    write_raster_in(path, &utm(), origin, 1.0, size, nodata, value);
}

pub fn write_raster_in<T, F>(
    path: &Path,
    projection: &str,
    origin: (f64, f64),
    pixel: f64,
    size: (usize, usize),
    nodata: Option<f64>,
    value: F,
) where
    T: GdalType + Copy,
    F: Fn(usize, usize) -> T,
{
    let (cols, rows) = size;
    let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
    let mut ds = driver.create_with_band_type::<T, _>(path, cols, rows, 1).unwrap();
    ds.set_geo_transform(&[origin.0, pixel, 0.0, origin.1, 0.0, -pixel]).unwrap();
    ds.set_projection(projection).unwrap();

    let mut band = ds.rasterband(1).unwrap();
    if let Some(nd) = nodata {
        band.set_no_data_value(Some(nd)).unwrap();
    }
    let data: Vec<T> = (0..rows).flat_map(|r| (0..cols).map(move |c| (r, c))).map(|(r, c)| value(r, c)).collect();
    let mut buffer = Buffer::new((cols, rows), data);
    band.write((0, 0), (cols, rows), &mut buffer).unwrap();
}

/// Every pixel of one band, row-major.
pub fn read_band<T: GdalType + Copy>(path: &Path, band: usize) -> (Vec<T>, (usize, usize)) {
    let ds = Dataset::open(path).unwrap();
    let size = ds.raster_size();
    let band = ds.rasterband(band).unwrap();
    let buffer = band.read_as::<T>((0, 0), size, size, None).unwrap();
    (buffer.into_iter().collect(), size)
}

/// Controls whose output `name` is uncompressed, so small blocks are
/// accepted whatever the tile size.
pub fn uncompressed(name: &str) -> Controls {
    let mut controls = Controls::new();
    controls.set_output_option(name, OutputSetting::CreationOptions(vec!["COMPRESS=NONE".to_string()]));
    controls
}

/// Tiled output whose tiles match a square block edge.
pub fn tiled(name: &str, block: usize) -> Controls {
    let mut controls = Controls::new().with_block_size(block, block);
    controls.set_output_option(
        name,
        OutputSetting::CreationOptions(vec![
            "COMPRESS=DEFLATE".to_string(),
            "TILED=YES".to_string(),
            format!("BLOCKXSIZE={}", block),
            format!("BLOCKYSIZE={}", block),
        ]),
    );
    controls
}
