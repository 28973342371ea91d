//! Output files.
//!
//! The [`OutputWriter`] is owned by the one thread that writes. Each output
//! slot's file is created from the first block the transform produces for
//! it, so the pixel type and band count follow the transform's arrays. Every
//! block is written at its own offset with the margin trimmed off; after the
//! last block each file gets its pyramids and statistics.

use crate::array::{with_block_array, with_pixel_type, BlockArray, Pixel, PixelType};
use crate::associations::{BlockAssociations, SlotKey};
use crate::chunking::BlockDefn;
use crate::config::{OutputOptions, SinglePass};
use crate::creation::{self, GtiffLayout};
use crate::error::{BlockError, Result};
use crate::pixelgrid::PixelGridDefn;
use crate::stats::{self, Accumulator, BandSummary};
use gdal::cpl::CslStringList;
use gdal::raster::Buffer;
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags, Metadata};
use log::{debug, info, warn};
use ndarray::{s, Array3};
use std::path::{Path, PathBuf};

/// Which finalization steps of one output happen while blocks are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinglePassPlan {
    pub pyramids: bool,
    pub statistics: bool,
    /// Settled once the pixel type is known, at file creation.
    pub histogram: SinglePass,
}

fn unsupported(slot: &str, feature: &'static str, reason: String) -> BlockError {
    BlockError::SinglePassUnsupported {
        slot: slot.to_string(),
        feature,
        reason,
    }
}

/// Why overviews cannot be filled block by block, if they cannot.
fn single_pass_pyramid_obstacle(options: &OutputOptions, layout: Option<&GtiffLayout>) -> Option<String> {
    if !creation::driver_supports_single_pass_pyramids(&options.driver) {
        return Some(format!(
            "driver {} cannot hold overviews created before the data",
            options.driver
        ));
    }
    let aggregation = options.overview_aggregation();
    if aggregation != "NEAREST" {
        return Some(format!(
            "{} aggregation needs the full resolution neighbourhood of every overview pixel",
            aggregation
        ));
    }
    match layout {
        Some(layout) if layout.is_compressed() => Some(format!(
            "COMPRESS={} overview tiles would be rewritten by every block",
            layout.compression
        )),
        _ => None,
    }
}

/// Check an output slot's options before the run and settle what can be
/// done incrementally.
pub fn plan_output(
    slot: &str,
    options: &OutputOptions,
    block_width: usize,
    block_height: usize,
) -> Result<SinglePassPlan> {
    let layout = GtiffLayout::of(options)?;
    if let Some(layout) = &layout {
        creation::validate_gtiff_layout(slot, layout, block_width, block_height)?;
    }

    let pyramids = match (options.build_pyramids, options.single_pass.pyramids) {
        (false, _) | (true, SinglePass::Never) => false,
        (true, mode) => match single_pass_pyramid_obstacle(options, layout.as_ref()) {
            None => true,
            Some(reason) if mode == SinglePass::Always => {
                return Err(unsupported(slot, "pyramids", reason));
            }
            Some(reason) => {
                debug!("Output {}: pyramids built after the run, {}", slot, reason);
                false
            }
        },
    };

    Ok(SinglePassPlan {
        pyramids,
        statistics: options.calc_stats && options.single_pass.statistics != SinglePass::Never,
        histogram: if options.calc_stats {
            options.single_pass.histogram
        } else {
            SinglePass::Never
        },
    })
}

/// What became of one output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputReport {
    pub key: SlotKey,
    pub path: PathBuf,
    pub pixel_type: PixelType,
    pub band_count: usize,
    pub overview_levels: Vec<i32>,
    pub single_pass_pyramids: bool,
    pub incremental_statistics: bool,
    pub incremental_histogram: bool,
    pub summaries: Vec<BandSummary>,
}

struct OpenOutput {
    dataset: Dataset,
    pixel_type: PixelType,
    band_count: usize,
    overview_levels: Vec<i32>,
    single_pass_pyramids: bool,
    accumulator: Option<Accumulator>,
    incremental_histogram: bool,
}

struct OutputSlot {
    key: SlotKey,
    path: PathBuf,
    options: OutputOptions,
    plan: SinglePassPlan,
    open: Option<OpenOutput>,
}

pub struct OutputWriter {
    working: PixelGridDefn,
    margin: usize,
    total_blocks: usize,
    blocks_written: usize,
    slots: Vec<OutputSlot>,
    reports: Vec<OutputReport>,
}

impl OutputWriter {
    /// `outputs` holds each slot's path, resolved options and plan from
    /// [`plan_output`].
    pub fn new(
        working: PixelGridDefn,
        margin: usize,
        total_blocks: usize,
        outputs: Vec<(SlotKey, PathBuf, OutputOptions, SinglePassPlan)>,
    ) -> Self {
        let slots = outputs
            .into_iter()
            .map(|(key, path, options, plan)| OutputSlot {
                key,
                path,
                options,
                plan,
                open: None,
            })
            .collect();
        Self {
            working,
            margin,
            total_blocks,
            blocks_written: 0,
            slots,
            reports: Vec::new(),
        }
    }

    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    pub fn is_finished(&self) -> bool {
        self.blocks_written == self.total_blocks
    }

    /// Write the outputs of one block; finalizes every file after the last.
    pub fn write_block(&mut self, block: &BlockDefn, mut outputs: BlockAssociations) -> Result<()> {
        for slot in &mut self.slots {
            let array = outputs
                .remove(&slot.key)
                .ok_or_else(|| BlockError::MissingOutput(slot.key.to_string()))?;
            let trimmed = array.trim_margin(self.margin)?;
            let (bands, rows, cols) = trimmed.shape();
            if rows != block.nrows || cols != block.ncols {
                return Err(BlockError::BlockShape {
                    slot: slot.key.to_string(),
                    expected: (bands, block.nrows, block.ncols),
                    actual: trimmed.shape(),
                });
            }

            if slot.open.is_none() {
                slot.open = Some(open_output(slot, &self.working, &trimmed)?);
            }
            let open = slot
                .open
                .as_mut()
                .ok_or_else(|| BlockError::MissingOutput(slot.key.to_string()))?;

            if trimmed.pixel_type() != open.pixel_type || bands != open.band_count {
                return Err(BlockError::BlockShape {
                    slot: slot.key.to_string(),
                    expected: (open.band_count, block.nrows, block.ncols),
                    actual: trimmed.shape(),
                });
            }

            write_array(&open.dataset, &trimmed, block)?;
            if open.single_pass_pyramids {
                write_decimated(&open.dataset, &trimmed, block, &open.overview_levels)?;
            }
            if let Some(accumulator) = open.accumulator.as_mut() {
                accumulator.update(&trimmed);
            }
        }

        if let Some((key, _)) = outputs.iter().next() {
            return Err(BlockError::InvalidConfig(format!(
                "transform produced output {} that has no file",
                key
            )));
        }

        self.blocks_written += 1;
        debug!("Wrote block {}/{}", self.blocks_written, self.total_blocks);
        if self.is_finished() {
            self.finalize()?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            if let Some(open) = slot.open.take() {
                let report = finalize_output(slot, open)?;
                self.reports.push(report);
            }
        }
        Ok(())
    }

    /// Reports of the finalized outputs; empty until the last block is written.
    pub fn into_reports(self) -> Vec<OutputReport> {
        self.reports
    }
}

fn open_output(slot: &OutputSlot, working: &PixelGridDefn, first: &BlockArray) -> Result<OpenOutput> {
    let options = &slot.options;
    let slot_name = slot.key.to_string();
    let pixel_type = first.pixel_type();
    let band_count = first.band_count();
    let (width, height) = (working.ncols(), working.nrows());

    let incremental_histogram = match slot.plan.histogram {
        SinglePass::Never => false,
        SinglePass::Auto => pixel_type.supports_single_pass_histogram(),
        SinglePass::Always if pixel_type.supports_single_pass_histogram() => true,
        SinglePass::Always => {
            return Err(unsupported(
                &slot_name,
                "histogram",
                format!("{} values are too many to count one by one", pixel_type.gdal_name()),
            ));
        }
    };

    info!(
        "Creating output {}: {} {}x{}x{} {}",
        slot.key,
        options.driver,
        width,
        height,
        band_count,
        pixel_type.gdal_name()
    );
    let mut dataset = create_dataset(&slot.path, options, pixel_type, width, height, band_count)?;
    dataset.set_geo_transform(&working.geotransform())?;
    if !working.projection.trim().is_empty() {
        dataset.set_projection(&working.projection)?;
    }

    let layer_type = if options.thematic { "thematic" } else { "athematic" };
    for band_index in 1..=band_count {
        let mut band = dataset.rasterband(band_index)?;
        if options.nodata.is_some() {
            band.set_no_data_value(options.nodata)?;
        }
        band.set_metadata_item("LAYER_TYPE", layer_type, "")?;
        if let Some(name) = options.band_names.get(band_index - 1) {
            band.set_description(name)?;
        }
    }

    let overview_levels = if options.build_pyramids {
        creation::overview_levels(
            width,
            height,
            options.overview_levels.as_deref(),
            options.min_overview_dim,
        )
    } else {
        Vec::new()
    };
    let single_pass_pyramids = slot.plan.pyramids && !overview_levels.is_empty();
    if single_pass_pyramids {
        // Empty levels, filled as blocks arrive
        creation::build_overviews(&mut dataset, "NONE", &overview_levels)?;
    }

    let accumulator = (slot.plan.statistics || incremental_histogram).then(|| {
        Accumulator::new(pixel_type, band_count, options.nodata, options.thematic, incremental_histogram)
    });

    Ok(OpenOutput {
        dataset,
        pixel_type,
        band_count,
        overview_levels,
        single_pass_pyramids,
        accumulator,
        incremental_histogram,
    })
}

fn create_dataset(
    path: &Path,
    options: &OutputOptions,
    pixel_type: PixelType,
    width: usize,
    height: usize,
    band_count: usize,
) -> Result<Dataset> {
    let creation_error = |e: gdal::errors::GdalError| BlockError::OutputCreation {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let driver = DriverManager::get_driver_by_name(&options.driver).map_err(creation_error)?;
    let mut gdal_options = CslStringList::new();
    for opt in &options.creation_options {
        gdal_options.add_string(opt)?;
    }

    with_pixel_type!(pixel_type, T => driver
        .create_with_band_type_with_options::<T, _>(path, width, height, band_count, &gdal_options)
        .map_err(creation_error))
}

fn write_typed<T: Pixel>(dataset: &Dataset, array: &Array3<T>, block: &BlockDefn) -> Result<()> {
    for (band_index, plane) in array.outer_iter().enumerate() {
        let mut band = dataset.rasterband(band_index + 1)?;
        let data: Vec<T> = plane.iter().copied().collect();
        let mut buffer = Buffer::new((block.ncols, block.nrows), data);
        band.write(
            (block.left as isize, block.top as isize),
            (block.ncols, block.nrows),
            &mut buffer,
        )?;
    }
    Ok(())
}

fn write_array(dataset: &Dataset, array: &BlockArray, block: &BlockDefn) -> Result<()> {
    with_block_array!(array, a => write_typed(dataset, a, block))
}

/// Write every `factor`-th pixel of the block into each overview level.
///
/// Overview pixel `(i, j)` takes full resolution pixel `(i * f, j * f)`, so a
/// block contributes the rows and columns of its own that are multiples of f.
fn write_decimated_typed<T: Pixel>(
    dataset: &Dataset,
    array: &Array3<T>,
    block: &BlockDefn,
    levels: &[i32],
) -> Result<()> {
    for (band_index, plane) in array.outer_iter().enumerate() {
        let band = dataset.rasterband(band_index + 1)?;
        for (level_index, &factor) in levels.iter().enumerate() {
            let f = factor as usize;
            let row_skip = (f - block.top % f) % f;
            let col_skip = (f - block.left % f) % f;
            if row_skip >= block.nrows || col_skip >= block.ncols {
                continue;
            }

            let mut overview = band.overview(level_index)?;
            let (ov_width, ov_height) = overview.size();
            let ov_top = (block.top + row_skip) / f;
            let ov_left = (block.left + col_skip) / f;
            if ov_top >= ov_height || ov_left >= ov_width {
                continue;
            }

            let step = f as isize;
            let sampled = plane.slice(s![row_skip..;step, col_skip..;step]);
            let rows = sampled.nrows().min(ov_height - ov_top);
            let cols = sampled.ncols().min(ov_width - ov_left);
            let data: Vec<T> = sampled.slice(s![..rows, ..cols]).iter().copied().collect();
            let mut buffer = Buffer::new((cols, rows), data);
            overview.write((ov_left as isize, ov_top as isize), (cols, rows), &mut buffer)?;
        }
    }
    Ok(())
}

fn write_decimated(dataset: &Dataset, array: &BlockArray, block: &BlockDefn, levels: &[i32]) -> Result<()> {
    with_block_array!(array, a => write_decimated_typed(dataset, a, block, levels))
}

fn finalize_output(slot: &OutputSlot, mut open: OpenOutput) -> Result<OutputReport> {
    let options = &slot.options;

    if options.build_pyramids && !open.single_pass_pyramids {
        creation::build_overviews(&mut open.dataset, &options.overview_aggregation(), &open.overview_levels)?;
    }

    let mut summaries = Vec::new();
    if options.calc_stats {
        for band_index in 0..open.band_count {
            let mut band = open.dataset.rasterband(band_index + 1)?;
            let incremental = open.accumulator.as_ref().map(|acc| acc.summary(band_index));

            let needs_pass = !slot.plan.statistics || !open.incremental_histogram;
            let full_pass = if needs_pass {
                debug!("Output {} band {}: finishing pass", slot.key, band_index + 1);
                Some(stats::compute_band_stats(&band, open.pixel_type, options.nodata, options.thematic)?)
            } else {
                None
            };

            let pick_stats = |s: &Option<BandSummary>| s.as_ref().and_then(|s| s.stats.clone());
            let pick_histogram = |s: &Option<BandSummary>| s.as_ref().and_then(|s| s.histogram.clone());
            let summary = BandSummary {
                stats: if slot.plan.statistics {
                    pick_stats(&incremental)
                } else {
                    pick_stats(&full_pass)
                },
                histogram: if open.incremental_histogram {
                    pick_histogram(&incremental)
                } else {
                    pick_histogram(&full_pass)
                },
            };

            if summary.stats.is_none() {
                warn!("Output {} band {} has no valid pixels", slot.key, band_index + 1);
            }
            stats::write_band_summary(&mut band, &summary)?;
            summaries.push(summary);
        }
    }

    info!("Finished output {} at {}", slot.key, slot.path.display());
    Ok(OutputReport {
        key: slot.key.clone(),
        path: slot.path.clone(),
        pixel_type: open.pixel_type,
        band_count: open.band_count,
        overview_levels: open.overview_levels.clone(),
        single_pass_pyramids: open.single_pass_pyramids,
        incremental_statistics: slot.plan.statistics,
        incremental_histogram: open.incremental_histogram,
        summaries,
    })
}

/// Pyramids, statistics and histogram of a raster written elsewhere, by
/// finishing passes only.
pub fn finalize_existing(path: &Path, options: &OutputOptions) -> Result<Vec<BandSummary>> {
    let mut dataset = Dataset::open_ex(
        path,
        DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_UPDATE,
            ..DatasetOptions::default()
        },
    )?;
    let (width, height) = dataset.raster_size();

    if options.build_pyramids {
        let levels = creation::overview_levels(
            width,
            height,
            options.overview_levels.as_deref(),
            options.min_overview_dim,
        );
        creation::build_overviews(&mut dataset, &options.overview_aggregation(), &levels)?;
    }

    let mut summaries = Vec::new();
    if options.calc_stats {
        for band_index in 1..=dataset.raster_count() as usize {
            let mut band = dataset.rasterband(band_index)?;
            let pixel_type = PixelType::from_gdal(band.band_type())?;
            let nodata = options.nodata.or(band.no_data_value());
            let summary = stats::compute_band_stats(&band, pixel_type, nodata, options.thematic)?;
            stats::write_band_summary(&mut band, &summary)?;
            summaries.push(summary);
        }
    }
    info!("Finished {}", path.display());
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputSetting;
    use gdal::raster::RasterBand;

    fn uncompressed() -> OutputOptions {
        let mut options = OutputOptions::default();
        options.apply(&OutputSetting::CreationOptions(vec!["COMPRESS=NONE".into()]));
        options
    }

    fn grid(cols: usize, rows: usize) -> PixelGridDefn {
        PixelGridDefn::new("", 0.0, cols as f64, 0.0, rows as f64, 1.0, 1.0).unwrap()
    }

    fn read_all(band: &RasterBand) -> Vec<u8> {
        let (w, h) = band.size();
        band.read_as::<u8>((0, 0), (w, h), (w, h), None).unwrap().data().to_vec()
    }

    #[test]
    fn test_plan_output_single_pass_pyramids() {
        let mut thematic = uncompressed();
        thematic.thematic = true;
        assert!(plan_output("out", &thematic, 64, 64).unwrap().pyramids);

        // AVERAGE falls back unless single pass is demanded
        let plain = uncompressed();
        assert!(!plan_output("out", &plain, 64, 64).unwrap().pyramids);
        let mut demanding = uncompressed();
        demanding.single_pass.pyramids = SinglePass::Always;
        assert!(matches!(
            plan_output("out", &demanding, 64, 64),
            Err(BlockError::SinglePassUnsupported { feature: "pyramids", .. })
        ));

        let mut compressed = OutputOptions::default();
        compressed.thematic = true;
        assert!(!plan_output("out", &compressed, 256, 256).unwrap().pyramids);
    }

    #[test]
    fn test_plan_output_checks_gtiff_layout() {
        assert!(matches!(
            plan_output("out", &OutputOptions::default(), 100, 100),
            Err(BlockError::GtiffLayout { .. })
        ));

        let mut bad_codec = OutputOptions::default();
        bad_codec.apply(&OutputSetting::CreationOptions(vec!["COMPRESS=WEBPX".into()]));
        assert!(matches!(
            plan_output("out", &bad_codec, 256, 256),
            Err(BlockError::InvalidCompression(_))
        ));

        // Other drivers take their creation options as given
        let mut kea = bad_codec.clone();
        kea.apply(&OutputSetting::Driver("KEA".into()));
        assert!(plan_output("out", &kea, 100, 100).is_ok());
    }

    #[test]
    fn test_blocks_written_at_offsets_with_margin_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let mut options = uncompressed();
        options.build_pyramids = false;
        options.nodata = Some(0.0);
        let plan = plan_output("out", &options, 2, 4).unwrap();

        let key = SlotKey::single("out");
        let mut writer = OutputWriter::new(grid(4, 4), 1, 2, vec![(key.clone(), path.clone(), options, plan)]);
        for (index, left) in [0usize, 2].iter().enumerate() {
            let block = BlockDefn {
                top: 0,
                left: *left,
                nrows: 4,
                ncols: 2,
            };
            // margin of 1 around a 4x2 block
            let values = Array3::from_shape_fn((1, 6, 4), |(_, r, c)| (10 * index + r * 4 + c) as u8);
            let mut outputs = BlockAssociations::new();
            outputs.insert(key.clone(), values);
            writer.write_block(&block, outputs).unwrap();
        }
        assert!(writer.is_finished());
        let reports = writer.into_reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].incremental_statistics);
        assert!(reports[0].incremental_histogram);

        let ds = Dataset::open(&path).unwrap();
        let band = ds.rasterband(1).unwrap();
        let values = read_all(&band);
        assert_eq!(&values[0..4], &[5, 6, 15, 16]);
        assert_eq!(&values[12..16], &[17, 18, 27, 28]);
        assert_eq!(band.metadata_item("STATISTICS_MINIMUM", ""), Some("5".to_string()));
        assert_eq!(band.metadata_item("STATISTICS_HISTOBINFUNCTION", ""), Some("direct".to_string()));
        assert_eq!(band.no_data_value(), Some(0.0));
    }

    #[test]
    fn test_single_pass_pyramids_match_decimation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyr.tif");
        let mut options = uncompressed();
        options.thematic = true;
        options.calc_stats = false;
        options.min_overview_dim = 4;
        let plan = plan_output("pyr", &options, 16, 16).unwrap();
        assert!(plan.pyramids);

        let key = SlotKey::single("pyr");
        let mut writer = OutputWriter::new(grid(20, 20), 0, 4, vec![(key.clone(), path.clone(), options, plan)]);
        let full = Array3::from_shape_fn((1, 20, 20), |(_, r, c)| ((r * 20 + c) % 251) as u8);
        for (index, block) in crate::chunking::BlockPartition::new(20, 20, 16, 16).iter() {
            let piece = full
                .slice(s![.., block.top..block.bottom(), block.left..block.right()])
                .to_owned();
            let mut outputs = BlockAssociations::new();
            outputs.insert(key.clone(), piece);
            writer.write_block(&block, outputs).unwrap();
            assert_eq!(writer.blocks_written(), index + 1);
        }
        let report = writer.into_reports().remove(0);
        assert!(report.single_pass_pyramids);
        assert_eq!(report.overview_levels, vec![2, 4]);

        let ds = Dataset::open(&path).unwrap();
        let band = ds.rasterband(1).unwrap();
        for (level_index, &factor) in report.overview_levels.iter().enumerate() {
            let overview = band.overview(level_index).unwrap();
            let f = factor as usize;
            let (w, h) = overview.size();
            let values = read_all(&overview);
            for i in 0..h {
                for j in 0..w {
                    assert_eq!(values[i * w + j], full[[0, i * f, j * f]], "level {} ({}, {})", f, i, j);
                }
            }
        }
    }

    #[test]
    fn test_finalize_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.tif");
        {
            let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
            let ds = driver.create_with_band_type::<u16, _>(&path, 64, 64, 1).unwrap();
            let mut band = ds.rasterband(1).unwrap();
            let data: Vec<u16> = (0..64 * 64).map(|i| (i % 64) as u16).collect();
            let mut buffer = Buffer::new((64, 64), data);
            band.write((0, 0), (64, 64), &mut buffer).unwrap();
        }

        let mut options = OutputOptions::default();
        options.min_overview_dim = 16;
        let summaries = finalize_existing(&path, &options).unwrap();
        assert_eq!(summaries.len(), 1);
        let stats = summaries[0].stats.clone().unwrap();
        assert_eq!((stats.min, stats.max, stats.count), (0.0, 63.0, 4096));
        assert_eq!(summaries[0].histogram.as_ref().unwrap().total(), 4096);

        let ds = Dataset::open(&path).unwrap();
        let band = ds.rasterband(1).unwrap();
        assert_eq!(band.overview_count().unwrap(), 2);
        assert_eq!(band.metadata_item("STATISTICS_MEAN", ""), Some("31.5".to_string()));
    }

    #[test]
    fn test_missing_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = uncompressed();
        let plan = plan_output("out", &options, 4, 4).unwrap();
        let mut writer = OutputWriter::new(
            grid(4, 4),
            0,
            1,
            vec![(SlotKey::single("out"), dir.path().join("out.tif"), options, plan)],
        );
        let block = BlockDefn {
            top: 0,
            left: 0,
            nrows: 4,
            ncols: 4,
        };
        assert!(matches!(
            writer.write_block(&block, BlockAssociations::new()),
            Err(BlockError::MissingOutput(_))
        ));
    }

    #[test]
    fn test_histogram_always_rejects_float_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = uncompressed();
        options.single_pass.histogram = SinglePass::Always;
        let plan = plan_output("out", &options, 4, 4).unwrap();
        let key = SlotKey::single("out");
        let mut writer = OutputWriter::new(grid(4, 4), 0, 1, vec![(key.clone(), dir.path().join("f.tif"), options, plan)]);
        let mut outputs = BlockAssociations::new();
        outputs.insert(key, Array3::<f32>::zeros((1, 4, 4)));
        let block = BlockDefn {
            top: 0,
            left: 0,
            nrows: 4,
            ncols: 4,
        };
        assert!(matches!(
            writer.write_block(&block, outputs),
            Err(BlockError::SinglePassUnsupported { feature: "histogram", .. })
        ));
    }
}
