//! Working grid resolution.
//!
//! All inputs are read, and all outputs written, on one common grid. Without
//! a reference grid the inputs must already line up with each other; with
//! one, every input footprint is carried into the reference projection and
//! pixel alignment before the footprints are combined.

use crate::associations::SlotKey;
use crate::config::{Footprint, ReferenceGrid};
use crate::error::{BlockError, Result};
use crate::metadata::{read_file_metadata, FileMetadata};
use crate::pixelgrid::PixelGridDefn;
use log::{debug, info};
use std::collections::BTreeMap;

/// Look up the grid a [`ReferenceGrid`] names.
pub fn resolve_reference(
    reference: &ReferenceGrid,
    inputs: &BTreeMap<SlotKey, FileMetadata>,
) -> Result<PixelGridDefn> {
    match reference {
        ReferenceGrid::Grid(grid) => Ok(grid.clone()),
        ReferenceGrid::Slot(key) => match inputs.get(key) {
            Some(FileMetadata::Raster(info)) => Ok(info.grid.clone()),
            Some(FileMetadata::Vector(_)) => Err(BlockError::ReferenceNotFound(format!(
                "input {} is a vector and has no pixel grid",
                key
            ))),
            None => Err(BlockError::ReferenceNotFound(format!("no input named {}", key))),
        },
        ReferenceGrid::File(path) => match read_file_metadata(path) {
            Ok(FileMetadata::Raster(info)) => Ok(info.grid),
            Ok(FileMetadata::Vector(_)) => Err(BlockError::ReferenceNotFound(format!(
                "{} is a vector and has no pixel grid",
                path.display()
            ))),
            Err(e) => Err(BlockError::ReferenceNotFound(format!("{}: {}", path.display(), e))),
        },
    }
}

fn mismatch_reason(first: &PixelGridDefn, other: &PixelGridDefn) -> &'static str {
    if !first.equivalent_projection(other) {
        "projection differs"
    } else if !first.same_resolution(other) {
        "pixel size differs"
    } else {
        "pixel alignment differs"
    }
}

fn combine(reference: &PixelGridDefn, grids: &[PixelGridDefn], footprint: Footprint) -> Result<PixelGridDefn> {
    match footprint {
        Footprint::BoundsFromReference => Ok(reference.clone()),
        Footprint::Intersection => grids
            .iter()
            .skip(1)
            .try_fold(grids[0].clone(), |acc, grid| acc.intersection(grid)),
        Footprint::Union => grids
            .iter()
            .skip(1)
            .try_fold(grids[0].clone(), |acc, grid| acc.union(grid)),
    }
}

/// Compute the working grid from the raster input grids.
///
/// Vector inputs do not take part; they are rasterized onto the result.
pub fn resolve_working_grid(
    rasters: &[(SlotKey, PixelGridDefn)],
    reference: Option<&PixelGridDefn>,
    footprint: Footprint,
) -> Result<PixelGridDefn> {
    let working = match (rasters.first(), reference) {
        (None, Some(reference)) => reference.clone(),
        (None, None) => return Err(BlockError::NoRasterInputs),
        (Some((_, first)), None) => {
            for (key, grid) in &rasters[1..] {
                if !first.is_comparable(grid) {
                    return Err(BlockError::ResampleNeeded {
                        slot: key.to_string(),
                        reason: mismatch_reason(first, grid).to_string(),
                    });
                }
            }
            let grids: Vec<PixelGridDefn> = rasters.iter().map(|(_, g)| g.clone()).collect();
            combine(first, &grids, footprint)?
        }
        (Some(_), Some(reference)) => {
            let grids = rasters
                .iter()
                .map(|(key, grid)| {
                    let reprojected = grid.reproject(reference)?;
                    debug!("Input {} footprint on reference grid: {:?}", key, reprojected);
                    Ok(reprojected)
                })
                .collect::<Result<Vec<_>>>()?;
            combine(reference, &grids, footprint)?
        }
    };

    info!(
        "Working grid: {}x{} pixels of {}x{}, extent [{}, {}, {}, {}]",
        working.ncols(),
        working.nrows(),
        working.xres,
        working.yres,
        working.xmin,
        working.ymin,
        working.xmax,
        working.ymax
    );
    Ok(working)
}
