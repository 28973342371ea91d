//! Transforms available by name, for the CLI and for worker processes.

use crate::array::BlockArray;
use crate::associations::{BlockAssociations, SlotKey};
use crate::error::{BlockError, Result};
use crate::transform::{BlockInfo, BlockTransform};
use clap::ValueEnum;
use log::debug;
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransformName {
    /// Elementwise sum of all inputs, in the first input's type
    Sum,
    /// The first input unchanged
    Copy,
    /// Mean over a square window of radius `overlap`, ignoring nodata
    MeanFilter,
    /// Input `image` with nodata wherever input `mask` is non-zero
    ApplyMask,
}

impl TransformName {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformName::Sum => "sum",
            TransformName::Copy => "copy",
            TransformName::MeanFilter => "mean-filter",
            TransformName::ApplyMask => "apply-mask",
        }
    }
}

/// A built-in transform writing its result to one output slot.
#[derive(Debug, Clone)]
pub struct Builtin {
    name: TransformName,
    output: String,
}

impl Builtin {
    pub fn new(name: TransformName, output: impl Into<String>) -> Self {
        Self {
            name,
            output: output.into(),
        }
    }
}

fn first_input(inputs: &BlockAssociations) -> Result<(&SlotKey, &BlockArray)> {
    inputs
        .iter()
        .next()
        .ok_or_else(|| BlockError::transform("transform needs at least one input"))
}

fn sum(info: &BlockInfo, inputs: &BlockAssociations) -> Result<BlockArray> {
    let (first_key, first) = first_input(inputs)?;
    let shape = first.shape();
    let mut total = Array3::<f64>::zeros(shape);
    let mut null = Array3::from_elem(shape, false);

    for (key, array) in inputs.iter() {
        if array.shape() != shape {
            return Err(BlockError::BlockShape {
                slot: key.to_string(),
                expected: shape,
                actual: array.shape(),
            });
        }
        let nodata = info.nodata(key).unwrap_or(&[]);
        let values = array.to_f64();
        for (band, (mut total, mut null)) in total.outer_iter_mut().zip(null.outer_iter_mut()).enumerate() {
            let band_nodata = nodata.get(band).copied().flatten();
            Zip::from(&mut total)
                .and(&mut null)
                .and(values.index_axis(Axis(0), band))
                .for_each(|t, n, &v| {
                    if Some(v) == band_nodata {
                        *n = true;
                    } else {
                        *t += v;
                    }
                });
        }
    }

    // Pixels with a null input become the first input's nodata, where it has one
    let first_nodata = info.nodata(first_key).unwrap_or(&[]);
    for (band, (mut total, null)) in total.outer_iter_mut().zip(null.outer_iter()).enumerate() {
        if let Some(nd) = first_nodata.get(band).copied().flatten() {
            Zip::from(&mut total).and(&null).for_each(|t, &n| {
                if n {
                    *t = nd;
                }
            });
        }
    }
    Ok(BlockArray::from_f64(first.pixel_type(), &total))
}

/// Mean of the non-null pixels in the `(2r+1)^2` window around one pixel;
/// `None` when the window holds no valid pixel.
fn window_mean(
    plane: &ArrayView2<f64>,
    center_row: usize,
    center_col: usize,
    radius: usize,
    nodata: Option<f64>,
) -> Option<f64> {
    let (nrows, ncols) = plane.dim();
    let row_min = center_row.saturating_sub(radius);
    let row_max = (center_row + radius + 1).min(nrows);
    let col_min = center_col.saturating_sub(radius);
    let col_max = (center_col + radius + 1).min(ncols);

    let mut total = 0.0;
    let mut valid = 0u32;
    for r in row_min..row_max {
        for c in col_min..col_max {
            let value = plane[[r, c]];
            if value.is_nan() || Some(value) == nodata {
                continue;
            }
            total += value;
            valid += 1;
        }
    }
    (valid > 0).then(|| total / valid as f64)
}

fn mean_filter_plane(plane: ArrayView2<f64>, radius: usize, nodata: Option<f64>) -> Result<Array2<f32>> {
    let (nrows, ncols) = plane.dim();
    let empty = nodata.map_or(f32::NAN, |nd| nd as f32);

    // Rows in parallel
    let rows: Vec<Vec<f32>> = (0..nrows)
        .into_par_iter()
        .map(|row| {
            (0..ncols)
                .map(|col| window_mean(&plane, row, col, radius, nodata).map_or(empty, |m| m as f32))
                .collect()
        })
        .collect();

    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((nrows, ncols), flat)?)
}

fn mean_filter(info: &BlockInfo, inputs: &BlockAssociations) -> Result<BlockArray> {
    let (key, first) = first_input(inputs)?;
    let nodata = info.nodata(key).unwrap_or(&[]);
    let values = first.to_f64();
    let radius = info.margin();
    debug!("Mean filter of radius {} on block {}", radius, info.index());

    let (bands, rows, cols) = first.shape();
    let mut out = Array3::<f32>::zeros((bands, rows, cols));
    for (band, mut plane) in out.outer_iter_mut().enumerate() {
        let band_nodata = nodata.get(band).copied().flatten();
        plane.assign(&mean_filter_plane(values.index_axis(Axis(0), band), radius, band_nodata)?);
    }
    Ok(BlockArray::from(out))
}

fn apply_mask(info: &BlockInfo, inputs: &BlockAssociations) -> Result<BlockArray> {
    let image = inputs.array("image")?;
    let mask = inputs.array("mask")?.to_f64();
    let (bands, rows, cols) = image.shape();
    let (_, mask_rows, mask_cols) = mask.dim();
    if (mask_rows, mask_cols) != (rows, cols) {
        return Err(BlockError::BlockShape {
            slot: "mask".to_string(),
            expected: (1, rows, cols),
            actual: mask.dim(),
        });
    }

    let nodata = info.nodata(&SlotKey::single("image")).unwrap_or(&[]);
    let masked = mask.index_axis(Axis(0), 0).mapv(|m| m != 0.0);
    let mut values = image.to_f64();
    for band in 0..bands {
        let fill = nodata.get(band).copied().flatten().unwrap_or(0.0);
        Zip::from(values.index_axis_mut(Axis(0), band))
            .and(&masked)
            .for_each(|v, &m| {
                if m {
                    *v = fill;
                }
            });
    }
    Ok(BlockArray::from_f64(image.pixel_type(), &values))
}

impl BlockTransform for Builtin {
    fn apply(&self, info: &BlockInfo, inputs: &BlockAssociations, outputs: &mut BlockAssociations) -> Result<()> {
        let result = match self.name {
            TransformName::Sum => sum(info, inputs)?,
            TransformName::Copy => first_input(inputs)?.1.clone(),
            TransformName::MeanFilter => mean_filter(info, inputs)?,
            TransformName::ApplyMask => apply_mask(info, inputs)?,
        };
        outputs.set(&self.output, result);
        Ok(())
    }
}
