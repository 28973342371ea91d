//! One run of a transform over a set of files.

use crate::associations::{FilenameAssociations, SlotKey};
use crate::chunking::BlockPartition;
use crate::config::Controls;
use crate::dispatch::Dispatcher;
use crate::error::{BlockError, Result};
use crate::metadata::{read_file_metadata, FileMetadata};
use crate::pixelgrid::PixelGridDefn;
use crate::reader::prepare_inputs;
use crate::tempfiles::TempRegistry;
use crate::transform::{BlockTransform, RunInfo};
use crate::workinggrid::{resolve_reference, resolve_working_grid};
use crate::writer::{plan_output, OutputReport, OutputWriter};
use log::info;
use std::collections::BTreeMap;
use std::time::Instant;

/// What a finished run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub working_grid: PixelGridDefn,
    pub total_blocks: usize,
    /// Inputs read through a warped view because they did not line up with
    /// the working grid.
    pub views_created: usize,
    pub vectors_rasterized: usize,
    pub outputs: Vec<OutputReport>,
}

impl RunSummary {
    pub fn output(&self, name: &str) -> Option<&OutputReport> {
        let key = SlotKey::single(name);
        self.outputs.iter().find(|report| report.key == key)
    }
}

/// Run `transform` over every block of the working grid of `inputs` and
/// write the arrays it produces into `outputs`.
///
/// Everything that can be checked without reading pixels is checked before
/// the first block: options, grids, output layouts and single-pass support.
/// Temporary views are removed when the run ends, successfully or not.
pub fn apply(
    transform: &dyn BlockTransform,
    inputs: &FilenameAssociations,
    outputs: &FilenameAssociations,
    controls: &Controls,
) -> Result<RunSummary> {
    let start = Instant::now();
    controls.validate()?;
    if outputs.is_empty() {
        return Err(BlockError::InvalidConfig("no output files given".to_string()));
    }

    let metadata = inputs
        .iter()
        .map(|(key, path)| Ok((key, read_file_metadata(path)?)))
        .collect::<Result<Vec<(SlotKey, FileMetadata)>>>()?;
    let by_key: BTreeMap<SlotKey, FileMetadata> = metadata.iter().cloned().collect();

    let reference = controls
        .reference
        .as_ref()
        .map(|reference| resolve_reference(reference, &by_key))
        .transpose()?;
    let rasters: Vec<(SlotKey, PixelGridDefn)> = metadata
        .iter()
        .filter_map(|(key, m)| m.as_raster().map(|info| (key.clone(), info.grid.clone())))
        .collect();
    let working = resolve_working_grid(&rasters, reference.as_ref(), controls.footprint)?;

    let output_slots = outputs
        .iter()
        .map(|(key, path)| {
            let options = controls.output_options(&key.name);
            let plan = plan_output(&key.to_string(), &options, controls.block_width, controls.block_height)?;
            Ok((key, path.to_path_buf(), options, plan))
        })
        .collect::<Result<Vec<_>>>()?;

    let temps = TempRegistry::new(controls.temp_dir.as_deref())?;
    let prepared = prepare_inputs(&metadata, &working, |name| controls.input_options(name), &temps)?;

    let partition = BlockPartition::new(
        working.ncols(),
        working.nrows(),
        controls.block_width,
        controls.block_height,
    );
    let blocks = partition.blocks();
    let run = RunInfo {
        working_grid: working.clone(),
        margin: controls.overlap,
        total_blocks: blocks.len(),
        nodata: prepared.nodata_table(),
    };

    let mut writer = OutputWriter::new(working.clone(), controls.overlap, blocks.len(), output_slots);
    let mut dispatcher = Dispatcher::new(transform, &run, &blocks, &prepared.plans, &controls.concurrency);
    dispatcher.run(&mut writer)?;

    info!(
        "Processed {} blocks in {:.2}s ({} views, {} vectors rasterized)",
        blocks.len(),
        start.elapsed().as_secs_f64(),
        prepared.views_created,
        prepared.vectors_rasterized
    );
    Ok(RunSummary {
        working_grid: working,
        total_blocks: blocks.len(),
        views_created: prepared.views_created,
        vectors_rasterized: prepared.vectors_rasterized,
        outputs: writer.into_reports(),
    })
}
