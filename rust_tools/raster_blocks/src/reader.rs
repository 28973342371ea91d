//! Input access.
//!
//! Every input slot gets an [`InputPlan`] before the first block is read:
//! which file is actually opened, where the working grid sits inside it and
//! what fills pixels outside it. Inputs that do not line up with the working
//! grid are read through a warped VRT view; vectors are rasterized first.
//! Plans are plain data shared by all workers, while the opened datasets live
//! in each worker's own [`InputReader`].

use crate::array::{with_pixel_type, BlockArray, Pixel, PixelType};
use crate::associations::{BlockAssociations, SlotKey};
use crate::chunking::BlockDefn;
use crate::config::InputOptions;
use crate::error::{BlockError, Result};
use crate::gdalapp;
use crate::metadata::{read_file_metadata, FileMetadata, RasterInfo, VectorInfo};
use crate::pixelgrid::PixelGridDefn;
use crate::tempfiles::TempRegistry;
use gdal::Dataset;
use log::{debug, info};
use ndarray::{s, Array2, Array3};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct InputPlan {
    pub key: SlotKey,
    /// File named by the caller.
    pub source: PathBuf,
    /// File opened for block reads: the source, a VRT view or a rasterized vector.
    pub read_path: PathBuf,
    pub via_view: bool,
    pub rasterized: bool,
    /// The file spans the whole working grid. Otherwise blocks may fall
    /// partly or wholly outside it and are filled there.
    pub covers: bool,
    /// Row and column of the working grid's top-left pixel in `read_path`.
    pub offset: (i64, i64),
    pub pixel_type: PixelType,
    pub band_count: usize,
    /// Per band: configured override, else the file's value.
    pub nodata: Vec<Option<f64>>,
    /// Per band value for pixels outside the file; nodata or zero.
    pub fill: Vec<f64>,
}

#[derive(Debug, Default)]
pub struct PreparedInputs {
    pub plans: Vec<InputPlan>,
    pub views_created: usize,
    pub vectors_rasterized: usize,
}

impl PreparedInputs {
    /// Nodata per band of every input, as handed to transforms.
    pub fn nodata_table(&self) -> BTreeMap<SlotKey, Vec<Option<f64>>> {
        self.plans
            .iter()
            .map(|plan| (plan.key.clone(), plan.nodata.clone()))
            .collect()
    }
}

fn effective_nodata(file_nodata: &[Option<f64>], options: &InputOptions) -> (Vec<Option<f64>>, Vec<f64>) {
    let nodata: Vec<Option<f64>> = file_nodata.iter().map(|nd| options.nodata.or(*nd)).collect();
    let fill = nodata.iter().map(|nd| nd.unwrap_or(0.0)).collect();
    (nodata, fill)
}

fn plan_raster(
    key: &SlotKey,
    source: &Path,
    info: &RasterInfo,
    working: &PixelGridDefn,
    options: &InputOptions,
    temps: &TempRegistry,
) -> Result<InputPlan> {
    let (nodata, fill) = effective_nodata(&info.nodata, options);

    // An input with nothing inside the working grid would only ever yield fill
    let footprint = info.grid.reproject(working)?;
    if let Err(BlockError::NonIntersectingGrids) = working.intersection(&footprint) {
        return Err(BlockError::OutsideBounds {
            path: source.display().to_string(),
            top: 0,
            left: 0,
            bottom: working.nrows() as i64,
            right: working.ncols() as i64,
        });
    }

    if info.grid.is_comparable(working) {
        let covers = info.grid.covers(working);
        debug!(
            "Input {} read directly from {}{}",
            key,
            info.path.display(),
            if covers { "" } else { ", filled outside its extent" }
        );
        return Ok(InputPlan {
            key: key.clone(),
            source: source.to_path_buf(),
            read_path: info.path.clone(),
            via_view: false,
            rasterized: false,
            covers,
            offset: info.grid.pixel_offset_of(working),
            pixel_type: info.pixel_type,
            band_count: info.band_count,
            nodata,
            fill,
        });
    }

    let view_path = temps.new_path(&format!("{}_view", key), "vrt");
    let source_nodata = options.nodata.map(|v| vec![v; info.band_count]);
    let destination_nodata = nodata.iter().any(Option::is_some).then(|| fill.clone());
    let args = gdalapp::warp_args(
        working,
        options.resample,
        source_nodata.as_deref(),
        destination_nodata.as_deref(),
    );
    let dataset = Dataset::open(&info.path)?;
    gdalapp::warp_to_file(&dataset, &view_path, &args)?;

    info!(
        "Input {} does not line up with the working grid, reading through {}",
        key,
        view_path.display()
    );
    Ok(InputPlan {
        key: key.clone(),
        source: source.to_path_buf(),
        read_path: view_path,
        via_view: true,
        rasterized: false,
        covers: true,
        offset: (0, 0),
        pixel_type: info.pixel_type,
        band_count: info.band_count,
        nodata,
        fill,
    })
}

/// Burn a vector input onto the working grid, expressed in the vector's own
/// projection, and describe the resulting raster.
fn rasterize_vector(
    key: &SlotKey,
    info: &VectorInfo,
    working: &PixelGridDefn,
    options: &InputOptions,
    temps: &TempRegistry,
) -> Result<RasterInfo> {
    let layer = info.layer(options.vector.layer.as_deref())?;
    let target = if layer.projection.trim().is_empty() {
        working.clone()
    } else {
        working.in_projection(&layer.projection)?
    };

    let path = temps.new_path(&format!("{}_rasterized", key), "tif");
    let args = gdalapp::rasterize_args(&target, &options.vector, &layer.name);
    let dataset = Dataset::open(&info.path)?;
    gdalapp::rasterize_to_file(&dataset, &path, &args)?;
    info!(
        "Rasterized {} layer {} to {}x{} pixels",
        key,
        layer.name,
        target.ncols(),
        target.nrows()
    );

    match read_file_metadata(&path)? {
        FileMetadata::Raster(raster) => Ok(raster),
        FileMetadata::Vector(_) => Err(BlockError::Vector(format!(
            "rasterizing {} did not produce a raster",
            info.path.display()
        ))),
    }
}

/// Build the plan of every input against the working grid.
///
/// `options_for` resolves the input options of a slot name.
pub fn prepare_inputs(
    inputs: &[(SlotKey, FileMetadata)],
    working: &PixelGridDefn,
    options_for: impl Fn(&str) -> InputOptions,
    temps: &TempRegistry,
) -> Result<PreparedInputs> {
    let mut prepared = PreparedInputs::default();

    for (key, metadata) in inputs {
        let options = options_for(&key.name);
        let plan = match metadata {
            FileMetadata::Raster(info) => plan_raster(key, &info.path, info, working, &options, temps)?,
            FileMetadata::Vector(info) => {
                let raster = rasterize_vector(key, info, working, &options, temps)?;
                prepared.vectors_rasterized += 1;
                let mut plan = plan_raster(key, &info.path, &raster, working, &options, temps)?;
                plan.rasterized = true;
                plan
            }
        };
        if plan.via_view {
            prepared.views_created += 1;
        }
        prepared.plans.push(plan);
    }

    Ok(prepared)
}

/// Intersection of the window `(top, left, rows, cols)` with a `width` x
/// `height` raster, as `(row0, row1, col0, col1)`.
fn clip_window(window: (i64, i64, usize, usize), width: usize, height: usize) -> Option<(usize, usize, usize, usize)> {
    let (top, left, rows, cols) = window;
    let r0 = top.max(0);
    let r1 = (top + rows as i64).min(height as i64);
    let c0 = left.max(0);
    let c1 = (left + cols as i64).min(width as i64);
    (r0 < r1 && c0 < c1).then(|| (r0 as usize, r1 as usize, c0 as usize, c1 as usize))
}

fn read_window_typed<T: Pixel>(
    dataset: &Dataset,
    window: (i64, i64, usize, usize),
    inside: Option<(usize, usize, usize, usize)>,
    band_count: usize,
    fill: &[f64],
) -> Result<Array3<T>> {
    let (top, left, rows, cols) = window;
    let mut out = Array3::<T>::default((band_count, rows, cols));

    for (band_index, mut plane) in out.outer_iter_mut().enumerate() {
        plane.fill(T::from_f64(fill.get(band_index).copied().unwrap_or(0.0)));

        if let Some((r0, r1, c0, c1)) = inside {
            let (read_width, read_height) = (c1 - c0, r1 - r0);
            let band = dataset.rasterband(band_index + 1)?;
            let buffer = band.read_as::<T>(
                (c0 as isize, r0 as isize),
                (read_width, read_height),
                (read_width, read_height),
                None,
            )?;
            let data_vec: Vec<T> = buffer.into_iter().collect();
            let data = Array2::from_shape_vec((read_height, read_width), data_vec)?;

            let row_start = (r0 as i64 - top) as usize;
            let col_start = (c0 as i64 - left) as usize;
            plane
                .slice_mut(s![row_start..row_start + read_height, col_start..col_start + read_width])
                .assign(&data);
        }
    }
    Ok(out)
}

/// Read the window `(top, left, rows, cols)` of `dataset`, which includes
/// `margin` pixels on every side of the block proper.
///
/// Pixels outside the raster take the band's `fill` value. A window whose
/// block proper lies entirely outside the raster is an error.
pub fn read_block_with_margin(
    dataset: &Dataset,
    name: &str,
    window: (i64, i64, usize, usize),
    margin: usize,
    pixel_type: PixelType,
    fill: &[f64],
) -> Result<BlockArray> {
    let (width, height) = dataset.raster_size();
    let (top, left, rows, cols) = window;
    let margin_i = margin as i64;
    let core = (
        top + margin_i,
        left + margin_i,
        rows.saturating_sub(2 * margin),
        cols.saturating_sub(2 * margin),
    );

    if clip_window(core, width, height).is_none() {
        return Err(BlockError::OutsideBounds {
            path: name.to_string(),
            top: core.0,
            left: core.1,
            bottom: core.0 + core.2 as i64,
            right: core.1 + core.3 as i64,
        });
    }

    read_window_filled(dataset, window, pixel_type, fill)
}

/// Read the window `(top, left, rows, cols)` of `dataset`, filling whatever
/// lies outside the raster, including the whole window.
pub fn read_window_filled(
    dataset: &Dataset,
    window: (i64, i64, usize, usize),
    pixel_type: PixelType,
    fill: &[f64],
) -> Result<BlockArray> {
    let (width, height) = dataset.raster_size();
    let inside = clip_window(window, width, height);
    let band_count = dataset.raster_count() as usize;
    with_pixel_type!(pixel_type, T => {
        let array = read_window_typed::<T>(dataset, window, inside, band_count, fill)?;
        Ok(T::wrap(array))
    })
}

/// Per-worker reader. Datasets are opened on first use and closed when the
/// reader is dropped; they are never shared with another thread.
pub struct InputReader<'a> {
    plans: &'a [InputPlan],
    datasets: HashMap<SlotKey, Dataset>,
}

impl<'a> InputReader<'a> {
    pub fn new(plans: &'a [InputPlan]) -> Self {
        Self {
            plans,
            datasets: HashMap::new(),
        }
    }

    /// Every input's window for `block`, margin included.
    pub fn read_block(&mut self, block: &BlockDefn, margin: usize) -> Result<BlockAssociations> {
        let mut arrays = BlockAssociations::new();
        let (top, left, rows, cols) = block.read_window(margin);

        for plan in self.plans {
            if !self.datasets.contains_key(&plan.key) {
                debug!("Opening {} for input {}", plan.read_path.display(), plan.key);
                self.datasets.insert(plan.key.clone(), Dataset::open(&plan.read_path)?);
            }
            let dataset = self
                .datasets
                .get(&plan.key)
                .ok_or_else(|| BlockError::InvalidConfig(format!("no dataset for input {}", plan.key)))?;

            let window = (top + plan.offset.0, left + plan.offset.1, rows, cols);
            let array = if plan.covers {
                read_block_with_margin(
                    dataset,
                    &plan.source.to_string_lossy(),
                    window,
                    margin,
                    plan.pixel_type,
                    &plan.fill,
                )?
            } else {
                read_window_filled(dataset, window, plan.pixel_type, &plan.fill)?
            };
            arrays.insert(plan.key.clone(), array);
        }
        Ok(arrays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdal::raster::Buffer;
    use gdal::DriverManager;

    fn utm() -> String {
        gdal::spatial_ref::SpatialRef::from_epsg(32755).unwrap().to_wkt().unwrap()
    }

    /// 10x10 byte raster with pixel value `row * 10 + col`, 1 unit pixels,
    /// origin at (x0, y0).
    fn write_raster(path: &Path, x0: f64, y0: f64, nodata: Option<f64>) {
        let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
        let mut ds = driver.create_with_band_type::<u8, _>(path, 10, 10, 1).unwrap();
        ds.set_geo_transform(&[x0, 1.0, 0.0, y0, 0.0, -1.0]).unwrap();
        ds.set_projection(&utm()).unwrap();
        let mut band = ds.rasterband(1).unwrap();
        band.set_no_data_value(nodata).unwrap();
        let values: Vec<u8> = (0..100).map(|i| i as u8).collect();
        let mut buffer = Buffer::new((10, 10), values);
        band.write((0, 0), (10, 10), &mut buffer).unwrap();
    }

    #[test]
    fn test_margin_outside_file_is_filled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        write_raster(&path, 0.0, 10.0, None);
        let ds = Dataset::open(&path).unwrap();

        let block = read_block_with_margin(&ds, "a", (-1, -1, 4, 4), 1, PixelType::UInt8, &[99.0]).unwrap();
        let a = block.get::<u8>().unwrap();
        assert_eq!(a.dim(), (1, 4, 4));
        assert_eq!(a[[0, 0, 0]], 99);
        assert_eq!(a[[0, 0, 3]], 99);
        assert_eq!(a[[0, 3, 0]], 99);
        assert_eq!(a[[0, 1, 1]], 0);
        assert_eq!(a[[0, 3, 3]], 22);
    }

    #[test]
    fn test_block_entirely_outside_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        write_raster(&path, 0.0, 10.0, None);
        let ds = Dataset::open(&path).unwrap();

        let err = read_block_with_margin(&ds, "a", (12, 0, 4, 4), 0, PixelType::UInt8, &[0.0]).unwrap_err();
        assert!(matches!(err, BlockError::OutsideBounds { top: 12, bottom: 16, .. }));

        // The margin reaching into the file does not rescue the block itself
        let err = read_block_with_margin(&ds, "a", (9, 0, 4, 4), 1, PixelType::UInt8, &[0.0]).unwrap_err();
        assert!(matches!(err, BlockError::OutsideBounds { .. }));
    }

    #[test]
    fn test_matching_input_needs_no_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        write_raster(&path, 0.0, 10.0, Some(255.0));
        let meta = read_file_metadata(&path).unwrap();
        let working = meta.as_raster().unwrap().grid.clone();
        let temps = TempRegistry::new(Some(dir.path())).unwrap();

        let inputs = vec![(SlotKey::single("a"), meta)];
        let prepared = prepare_inputs(&inputs, &working, |_| InputOptions::default(), &temps).unwrap();
        assert_eq!(prepared.views_created, 0);
        let plan = &prepared.plans[0];
        assert!(!plan.via_view);
        assert_eq!(plan.offset, (0, 0));
        assert_eq!(plan.fill, vec![255.0]);
        assert_eq!(prepared.nodata_table()[&SlotKey::single("a")], vec![Some(255.0)]);
    }

    #[test]
    fn test_partial_coverage_read_directly_with_fill() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        write_raster(&path, 0.0, 10.0, None);
        let meta = read_file_metadata(&path).unwrap();
        let projection = meta.as_raster().unwrap().grid.projection.clone();
        let working = PixelGridDefn::new(projection, 5.0, 15.0, 0.0, 10.0, 1.0, 1.0).unwrap();
        let temps = TempRegistry::new(Some(dir.path())).unwrap();

        let inputs = vec![(SlotKey::single("a"), meta)];
        let options = |_: &str| InputOptions {
            nodata: Some(200.0),
            ..InputOptions::default()
        };
        let prepared = prepare_inputs(&inputs, &working, options, &temps).unwrap();
        assert_eq!(prepared.views_created, 0);
        let plan = &prepared.plans[0];
        assert!(!plan.via_view && !plan.covers);
        assert_eq!(plan.offset, (0, 5));

        let mut reader = InputReader::new(&prepared.plans);
        let block = BlockDefn {
            top: 0,
            left: 0,
            nrows: 10,
            ncols: 10,
        };
        let arrays = reader.read_block(&block, 0).unwrap();
        let a = arrays.array("a").unwrap().get::<u8>().unwrap();
        assert_eq!(a[[0, 0, 0]], 5);
        assert_eq!(a[[0, 2, 4]], 29);
        assert_eq!(a[[0, 0, 5]], 200);
        assert_eq!(a[[0, 9, 9]], 200);

        // A block wholly past the file's right edge is all fill
        let outside = BlockDefn {
            top: 0,
            left: 5,
            nrows: 10,
            ncols: 5,
        };
        let arrays = reader.read_block(&outside, 1).unwrap();
        let a = arrays.array("a").unwrap().get::<u8>().unwrap();
        assert_eq!(a.dim(), (1, 12, 7));
        assert_eq!(a[[0, 1, 0]], 9);
        assert!(a.slice(s![.., .., 1..]).iter().all(|&v| v == 200));
    }

    #[test]
    fn test_misaligned_input_reads_through_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        write_raster(&path, 0.0, 10.0, None);
        let meta = read_file_metadata(&path).unwrap();
        let projection = meta.as_raster().unwrap().grid.projection.clone();
        let working = PixelGridDefn::new(projection, 0.5, 8.5, 0.5, 8.5, 1.0, 1.0).unwrap();
        let temps = TempRegistry::new(Some(dir.path())).unwrap();

        let inputs = vec![(SlotKey::single("a"), meta)];
        let prepared = prepare_inputs(&inputs, &working, |_| InputOptions::default(), &temps).unwrap();
        assert_eq!(prepared.views_created, 1);
        assert!(prepared.plans[0].via_view);
        assert_eq!(prepared.plans[0].offset, (0, 0));
    }

    #[test]
    fn test_input_outside_working_grid_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        write_raster(&path, 0.0, 10.0, None);
        let meta = read_file_metadata(&path).unwrap();
        let projection = meta.as_raster().unwrap().grid.projection.clone();
        let working = PixelGridDefn::new(projection, 100.0, 110.0, 100.0, 110.0, 1.0, 1.0).unwrap();
        let temps = TempRegistry::new(Some(dir.path())).unwrap();

        let inputs = vec![(SlotKey::single("a"), meta)];
        let result = prepare_inputs(&inputs, &working, |_| InputOptions::default(), &temps);
        assert!(matches!(result, Err(BlockError::OutsideBounds { bottom: 10, right: 10, .. })));
        assert!(temps.files().is_empty());
    }

    #[test]
    fn test_reader_applies_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        write_raster(&path, 0.0, 10.0, None);
        let meta = read_file_metadata(&path).unwrap();
        let projection = meta.as_raster().unwrap().grid.projection.clone();
        let working = PixelGridDefn::new(projection, 2.0, 8.0, 1.0, 7.0, 1.0, 1.0).unwrap();
        let temps = TempRegistry::new(Some(dir.path())).unwrap();

        let inputs = vec![(SlotKey::single("a"), meta)];
        let prepared = prepare_inputs(&inputs, &working, |_| InputOptions::default(), &temps).unwrap();
        assert_eq!(prepared.plans[0].offset, (3, 2));

        let mut reader = InputReader::new(&prepared.plans);
        let block = BlockDefn {
            top: 1,
            left: 1,
            nrows: 2,
            ncols: 2,
        };
        let arrays = reader.read_block(&block, 1).unwrap();
        let a = arrays.array("a").unwrap().get::<u8>().unwrap();
        assert_eq!(a.dim(), (1, 4, 4));
        assert_eq!(a[[0, 0, 0]], 32);
        assert_eq!(a[[0, 1, 1]], 43);
    }
}
