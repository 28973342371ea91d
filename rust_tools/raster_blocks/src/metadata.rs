//! Header inspection for raster and vector inputs.
//!
//! Nothing here reads pixel data: geometry, band layout and nodata for
//! rasters, layer and attribute schema for vectors.

use crate::array::PixelType;
use crate::error::{BlockError, Result};
use crate::pixelgrid::PixelGridDefn;
use gdal::vector::LayerAccess;
use gdal::{Dataset, Metadata};
use log::debug;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub path: PathBuf,
    pub driver: String,
    pub grid: PixelGridDefn,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    /// Type of the first band; every band is read as this type.
    pub pixel_type: PixelType,
    pub nodata: Vec<Option<f64>>,
    pub band_names: Vec<String>,
    pub thematic: bool,
    pub overview_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    pub name: String,
    pub feature_count: u64,
    pub projection: String,
    /// `(xmin, ymin, xmax, ymax)` when the driver can report it.
    pub extent: Option<(f64, f64, f64, f64)>,
    pub fields: Vec<FieldInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorInfo {
    pub path: PathBuf,
    pub driver: String,
    pub layers: Vec<LayerInfo>,
}

impl VectorInfo {
    pub fn layer(&self, name: Option<&str>) -> Result<&LayerInfo> {
        match name {
            Some(name) => self.layers.iter().find(|l| l.name == name).ok_or_else(|| {
                BlockError::Vector(format!("{} has no layer {}", self.path.display(), name))
            }),
            None => self.layers.first().ok_or_else(|| {
                BlockError::Vector(format!("{} has no layers", self.path.display()))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileMetadata {
    Raster(RasterInfo),
    Vector(VectorInfo),
}

impl FileMetadata {
    pub fn as_raster(&self) -> Option<&RasterInfo> {
        match self {
            FileMetadata::Raster(info) => Some(info),
            FileMetadata::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&VectorInfo> {
        match self {
            FileMetadata::Vector(info) => Some(info),
            FileMetadata::Raster(_) => None,
        }
    }
}

/// Open `path` and describe it without reading pixels.
pub fn read_file_metadata(path: &Path) -> Result<FileMetadata> {
    let dataset = Dataset::open(path)?;

    if dataset.raster_count() as usize > 0 {
        Ok(FileMetadata::Raster(raster_info_from_dataset(path, &dataset)?))
    } else if dataset.layer_count() as usize > 0 {
        Ok(FileMetadata::Vector(vector_info_from_dataset(path, &dataset)?))
    } else {
        Err(BlockError::InvalidConfig(format!(
            "{} has neither raster bands nor vector layers",
            path.display()
        )))
    }
}

/// Extract raster metadata from an open dataset
pub fn raster_info_from_dataset(path: &Path, dataset: &Dataset) -> Result<RasterInfo> {
    let (width, height) = dataset.raster_size();
    if width == 0 || height == 0 {
        return Err(BlockError::InvalidDimensions(width, height));
    }

    let band_count = dataset.raster_count() as usize;
    let geotransform = dataset.geo_transform()?;
    let grid = PixelGridDefn::from_geotransform(&dataset.projection(), &geotransform, width, height)?;

    let mut nodata = Vec::with_capacity(band_count);
    let mut band_names = Vec::with_capacity(band_count);
    let mut pixel_type = None;
    let mut thematic = false;
    let mut overview_count = 0;

    for band_index in 1..=band_count {
        let band = dataset.rasterband(band_index)?;
        if band_index == 1 {
            pixel_type = Some(PixelType::from_gdal(band.band_type())?);
            thematic = band
                .metadata_item("LAYER_TYPE", "")
                .map(|v| v.eq_ignore_ascii_case("thematic"))
                .unwrap_or(false);
            overview_count = band.overview_count()?.max(0) as usize;
        }
        nodata.push(band.no_data_value());
        band_names.push(band.description().unwrap_or_default());
    }

    let pixel_type = pixel_type.ok_or(BlockError::InvalidDimensions(width, height))?;

    debug!(
        "{}: {}x{} pixels, {} bands of {:?}",
        path.display(),
        width,
        height,
        band_count,
        pixel_type
    );

    Ok(RasterInfo {
        path: path.to_path_buf(),
        driver: dataset.driver().short_name(),
        grid,
        width,
        height,
        band_count,
        pixel_type,
        nodata,
        band_names,
        thematic,
        overview_count,
    })
}

fn vector_info_from_dataset(path: &Path, dataset: &Dataset) -> Result<VectorInfo> {
    let mut layers = Vec::new();

    for layer in dataset.layers() {
        let projection = match layer.spatial_ref() {
            Some(srs) => srs.to_wkt()?,
            None => String::new(),
        };
        let extent = layer
            .get_extent()
            .ok()
            .map(|env| (env.MinX, env.MinY, env.MaxX, env.MaxY));
        let fields = layer
            .defn()
            .fields()
            .map(|field| FieldInfo {
                name: field.name(),
                type_name: gdal::vector::field_type_to_name(field.field_type()),
            })
            .collect();

        layers.push(LayerInfo {
            name: layer.name(),
            feature_count: layer.feature_count(),
            projection,
            extent,
            fields,
        });
    }

    debug!("{}: vector with {} layers", path.display(), layers.len());

    Ok(VectorInfo {
        path: path.to_path_buf(),
        driver: dataset.driver().short_name(),
        layers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdal::raster::Buffer;
    use gdal::DriverManager;

    #[test]
    fn test_raster_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.tif");
        {
            let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
            let mut ds = driver.create_with_band_type::<i16, _>(&path, 6, 4, 2).unwrap();
            ds.set_geo_transform(&[500.0, 10.0, 0.0, 1000.0, 0.0, -10.0]).unwrap();
            let mut band = ds.rasterband(2).unwrap();
            band.set_no_data_value(Some(-1.0)).unwrap();
            band.set_description("second").unwrap();
            let mut buffer = Buffer::new((6, 4), vec![3i16; 24]);
            band.write((0, 0), (6, 4), &mut buffer).unwrap();
        }

        let meta = read_file_metadata(&path).unwrap();
        let info = meta.as_raster().unwrap();
        assert_eq!((info.width, info.height, info.band_count), (6, 4, 2));
        assert_eq!(info.pixel_type, PixelType::Int16);
        assert_eq!(info.nodata, vec![None, Some(-1.0)]);
        assert_eq!(info.band_names[1], "second");
        assert_eq!(info.grid.xmax, 560.0);
        assert_eq!(info.grid.ymin, 960.0);
        assert_eq!(info.driver, "GTiff");
        assert!(meta.as_vector().is_none());
    }

    #[test]
    fn test_missing_file() {
        assert!(read_file_metadata(Path::new("/nonexistent/input.tif")).is_err());
    }
}
