//! Pixel grid geometry.
//!
//! A [`PixelGridDefn`] is a north-up raster geometry: a projection, an extent
//! and a pixel size. Grids are immutable; every operation returns a new grid.

use crate::crs;
use crate::error::{BlockError, Result};
use log::debug;

/// Fraction of a pixel within which two coordinates count as the same line.
const PIXEL_TOLERANCE: f64 = 0.01;

/// Points sampled along each edge when reprojecting an extent.
const EDGE_SAMPLES: usize = 20;

#[derive(Debug, Clone)]
pub struct PixelGridDefn {
    pub projection: String,
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
    pub xres: f64,
    pub yres: f64,
}

fn is_whole(value: f64) -> bool {
    (value - value.round()).abs() < PIXEL_TOLERANCE
}

/// Move `value` down onto the grid line through `origin` with spacing `res`.
fn snap_down(value: f64, origin: f64, res: f64) -> f64 {
    origin + ((value - origin) / res + PIXEL_TOLERANCE).floor() * res
}

fn snap_up(value: f64, origin: f64, res: f64) -> f64 {
    origin + ((value - origin) / res - PIXEL_TOLERANCE).ceil() * res
}

impl PixelGridDefn {
    pub fn new(
        projection: impl Into<String>,
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
        xres: f64,
        yres: f64,
    ) -> Result<Self> {
        if !(xres > 0.0 && yres > 0.0) {
            return Err(BlockError::InvalidConfig(format!(
                "pixel size must be positive, got {} x {}",
                xres, yres
            )));
        }
        if xmax < xmin || ymax < ymin {
            return Err(BlockError::InvalidConfig(format!(
                "inverted extent x={}..{} y={}..{}",
                xmin, xmax, ymin, ymax
            )));
        }
        Ok(Self {
            projection: projection.into(),
            xmin,
            xmax,
            ymin,
            ymax,
            xres,
            yres,
        })
    }

    /// Build from a GDAL geotransform and raster size. Rotated rasters are
    /// rejected.
    pub fn from_geotransform(
        projection: &str,
        geotransform: &[f64; 6],
        ncols: usize,
        nrows: usize,
    ) -> Result<Self> {
        if geotransform[2] != 0.0 || geotransform[4] != 0.0 {
            return Err(BlockError::InvalidConfig(
                "rotated geotransforms are not supported".to_string(),
            ));
        }
        let xres = geotransform[1].abs();
        let yres = geotransform[5].abs();
        let xmin = geotransform[0];
        let ymax = geotransform[3];
        Self::new(
            projection,
            xmin,
            xmin + ncols as f64 * xres,
            ymax - nrows as f64 * yres,
            ymax,
            xres,
            yres,
        )
    }

    pub fn geotransform(&self) -> [f64; 6] {
        [self.xmin, self.xres, 0.0, self.ymax, 0.0, -self.yres]
    }

    pub fn ncols(&self) -> usize {
        ((self.xmax - self.xmin) / self.xres).round() as usize
    }

    pub fn nrows(&self) -> usize {
        ((self.ymax - self.ymin) / self.yres).round() as usize
    }

    pub fn equivalent_projection(&self, other: &PixelGridDefn) -> bool {
        crs::equivalent_projection(&self.projection, &other.projection)
    }

    pub fn same_resolution(&self, other: &PixelGridDefn) -> bool {
        (self.xres - other.xres).abs() < PIXEL_TOLERANCE * self.xres
            && (self.yres - other.yres).abs() < PIXEL_TOLERANCE * self.yres
    }

    /// Same pixel size, and origins a whole number of pixels apart.
    pub fn aligned_with(&self, other: &PixelGridDefn) -> bool {
        self.same_resolution(other)
            && is_whole((self.xmin - other.xmin) / self.xres)
            && is_whole((self.ymax - other.ymax) / self.yres)
    }

    /// Pixels of the two grids line up exactly, so no resampling is needed
    /// to read one on the other.
    pub fn is_comparable(&self, other: &PixelGridDefn) -> bool {
        self.aligned_with(other) && self.equivalent_projection(other)
    }

    /// Whether this grid's extent contains `other`'s extent.
    pub fn covers(&self, other: &PixelGridDefn) -> bool {
        let tx = PIXEL_TOLERANCE * self.xres;
        let ty = PIXEL_TOLERANCE * self.yres;
        self.xmin <= other.xmin + tx
            && self.xmax >= other.xmax - tx
            && self.ymin <= other.ymin + ty
            && self.ymax >= other.ymax - ty
    }

    fn require_aligned(&self, other: &PixelGridDefn) -> Result<()> {
        if self.aligned_with(other) {
            Ok(())
        } else {
            Err(BlockError::InvalidConfig(
                "grids must be aligned to be combined".to_string(),
            ))
        }
    }

    /// Largest region inside both grids, on this grid's alignment.
    pub fn intersection(&self, other: &PixelGridDefn) -> Result<PixelGridDefn> {
        self.require_aligned(other)?;
        let xmin = self.xmin.max(other.xmin);
        let xmax = self.xmax.min(other.xmax);
        let ymin = self.ymin.max(other.ymin);
        let ymax = self.ymax.min(other.ymax);

        if xmax - xmin < (1.0 - PIXEL_TOLERANCE) * self.xres
            || ymax - ymin < (1.0 - PIXEL_TOLERANCE) * self.yres
        {
            return Err(BlockError::NonIntersectingGrids);
        }
        Ok(self.with_extent(xmin, xmax, ymin, ymax))
    }

    /// Smallest region containing both grids, on this grid's alignment.
    pub fn union(&self, other: &PixelGridDefn) -> Result<PixelGridDefn> {
        self.require_aligned(other)?;
        Ok(self.with_extent(
            self.xmin.min(other.xmin),
            self.xmax.max(other.xmax),
            self.ymin.min(other.ymin),
            self.ymax.max(other.ymax),
        ))
    }

    fn with_extent(&self, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> PixelGridDefn {
        PixelGridDefn {
            projection: self.projection.clone(),
            xmin,
            xmax,
            ymin,
            ymax,
            xres: self.xres,
            yres: self.yres,
        }
    }

    /// Expand an extent expressed in `target`'s projection outward onto
    /// `target`'s pixel alignment.
    fn snapped_extent(target: &PixelGridDefn, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> PixelGridDefn {
        PixelGridDefn {
            projection: target.projection.clone(),
            xmin: snap_down(xmin, target.xmin, target.xres),
            xmax: snap_up(xmax, target.xmin, target.xres),
            ymin: snap_down(ymin, target.ymax, target.yres),
            ymax: snap_up(ymax, target.ymax, target.yres),
            xres: target.xres,
            yres: target.yres,
        }
    }

    /// Bounding box `(xmin, xmax, ymin, ymax)` of this grid's extent in
    /// another projection, from points sampled along every edge.
    fn transformed_extent(&self, projection: &str) -> Result<(f64, f64, f64, f64)> {
        let mut xs = Vec::with_capacity(4 * (EDGE_SAMPLES + 1));
        let mut ys = Vec::with_capacity(4 * (EDGE_SAMPLES + 1));
        for i in 0..=EDGE_SAMPLES {
            let fraction = i as f64 / EDGE_SAMPLES as f64;
            let x = self.xmin + fraction * (self.xmax - self.xmin);
            let y = self.ymin + fraction * (self.ymax - self.ymin);
            xs.extend_from_slice(&[x, x, self.xmin, self.xmax]);
            ys.extend_from_slice(&[self.ymin, self.ymax, y, y]);
        }
        crs::transform_points(&self.projection, projection, &mut xs, &mut ys)?;

        let fold = |values: &[f64]| {
            values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
        };
        let (xmin, xmax) = fold(&xs);
        let (ymin, ymax) = fold(&ys);
        if !(xmin.is_finite() && xmax.is_finite() && ymin.is_finite() && ymax.is_finite()) {
            return Err(BlockError::InvalidConfig(
                "extent could not be transformed into the target projection".to_string(),
            ));
        }
        Ok((xmin, xmax, ymin, ymax))
    }

    /// A grid in `projection` covering this grid's extent with the same
    /// number of rows and columns.
    pub fn in_projection(&self, projection: &str) -> Result<PixelGridDefn> {
        if crs::equivalent_projection(&self.projection, projection) {
            return Ok(self.clone());
        }
        let (xmin, xmax, ymin, ymax) = self.transformed_extent(projection)?;
        let ncols = self.ncols().max(1) as f64;
        let nrows = self.nrows().max(1) as f64;
        PixelGridDefn::new(
            projection,
            xmin,
            xmax,
            ymin,
            ymax,
            (xmax - xmin) / ncols,
            (ymax - ymin) / nrows,
        )
    }

    /// This grid's footprint expressed in `target`'s projection, pixel size
    /// and alignment. The extent grows outward to whole target pixels.
    pub fn reproject(&self, target: &PixelGridDefn) -> Result<PixelGridDefn> {
        if self.equivalent_projection(target) {
            return Ok(Self::snapped_extent(target, self.xmin, self.xmax, self.ymin, self.ymax));
        }

        let (xmin, xmax, ymin, ymax) = self.transformed_extent(&target.projection)?;
        let grid = Self::snapped_extent(target, xmin, xmax, ymin, ymax);
        debug!(
            "Reprojected extent [{}, {}, {}, {}] -> [{}, {}, {}, {}]",
            self.xmin, self.ymin, self.xmax, self.ymax, grid.xmin, grid.ymin, grid.xmax, grid.ymax
        );
        Ok(grid)
    }

    /// Position of `other`'s top-left pixel in this grid, as (row, col).
    /// Only meaningful for aligned grids.
    pub fn pixel_offset_of(&self, other: &PixelGridDefn) -> (i64, i64) {
        let row = ((self.ymax - other.ymax) / self.yres).round() as i64;
        let col = ((other.xmin - self.xmin) / self.xres).round() as i64;
        (row, col)
    }

    /// World bounds `(xmin, ymin, xmax, ymax)` of a pixel window.
    pub fn window_bounds(&self, top: i64, left: i64, nrows: usize, ncols: usize) -> (f64, f64, f64, f64) {
        let xmin = self.xmin + left as f64 * self.xres;
        let ymax = self.ymax - top as f64 * self.yres;
        (
            xmin,
            ymax - nrows as f64 * self.yres,
            xmin + ncols as f64 * self.xres,
            ymax,
        )
    }
}

impl PartialEq for PixelGridDefn {
    fn eq(&self, other: &Self) -> bool {
        let tx = PIXEL_TOLERANCE * self.xres;
        let ty = PIXEL_TOLERANCE * self.yres;
        self.same_resolution(other)
            && (self.xmin - other.xmin).abs() < tx
            && (self.xmax - other.xmax).abs() < tx
            && (self.ymin - other.ymin).abs() < ty
            && (self.ymax - other.ymax).abs() < ty
            && self.equivalent_projection(other)
    }
}
