//! Band statistics and histograms.
//!
//! An [`Accumulator`] is fed every block of an output as it is written and
//! keeps running count/sum/sum-of-squares/min/max per band. For 8 and 16 bit
//! integer data it also keeps per-value counts in two half-histograms, one
//! for non-negative values and one for negated negative values. Everything it
//! holds merges commutatively, so the block order does not matter.
//!
//! [`compute_band_stats`] is the finishing pass used when the histogram cannot
//! be kept incrementally, and by the `stats` subcommand on existing files.

use crate::array::{with_block_array, BlockArray, Pixel, PixelType};
use crate::error::Result;
use crate::gdalapp::check_rc;
use gdal::raster::RasterBand;
use gdal::Metadata;
use log::{debug, warn};
use ndarray::Axis;

/// Bin count for linearly binned histograms.
pub const LINEAR_BINS: usize = 256;

/// Integer data spanning at most this many values gets one bin per value.
pub const MAX_DIRECT_BINS: usize = 256;

/// Thematic data keeps one bin per class up to the size of a UInt16
/// histogram.
pub const MAX_THEMATIC_BINS: usize = 1 << 16;

/// Rows read per strip by the finishing pass.
const STRIP_ROWS: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct BandStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// Lowest binned value (direct) or lower edge (linear).
    pub min: f64,
    /// Highest binned value (direct) or upper edge (linear).
    pub max: f64,
    pub counts: Vec<u64>,
    /// One bin per integer value, starting at `min`.
    pub direct: bool,
}

impl Histogram {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    fn bin_width(&self) -> f64 {
        if self.direct {
            1.0
        } else {
            (self.max - self.min) / self.counts.len() as f64
        }
    }

    /// Value a bin stands for: the value itself for direct bins, the bin
    /// centre otherwise.
    pub fn bin_value(&self, bin: usize) -> f64 {
        if self.direct {
            self.min + bin as f64
        } else {
            self.min + (bin as f64 + 0.5) * self.bin_width()
        }
    }

    /// Lower median.
    pub fn median(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let target = (total + 1) / 2;
        let mut seen = 0;
        for (bin, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                return Some(self.bin_value(bin));
            }
        }
        None
    }

    pub fn mode(&self) -> Option<f64> {
        let (bin, &count) = self
            .counts
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, &u64)>, (bin, count)| match best {
                Some((_, c)) if c >= count => best,
                _ => Some((bin, count)),
            })?;
        (count > 0).then(|| self.bin_value(bin))
    }

    /// Edges handed to GDAL, which always thinks in buckets of equal width.
    fn gdal_edges(&self) -> (f64, f64) {
        if self.direct {
            (self.min - 0.5, self.max + 0.5)
        } else {
            (self.min, self.max)
        }
    }
}

fn linear_bin(value: f64, min: f64, max: f64, bins: usize) -> usize {
    if max <= min {
        return 0;
    }
    let bin = ((value - min) / (max - min) * bins as f64).floor();
    (bin.max(0.0) as usize).min(bins - 1)
}

/// First value of a direct histogram. Byte and thematic integer data count
/// classes from 0.
fn direct_start(pixel_type: PixelType, thematic: bool, min: f64) -> f64 {
    if !pixel_type.is_float() && (pixel_type == PixelType::UInt8 || thematic) {
        min.min(0.0)
    } else {
        min
    }
}

/// Which binning a band gets once its range is known.
fn use_direct_bins(pixel_type: PixelType, thematic: bool, min: f64, max: f64) -> bool {
    if pixel_type.is_float() {
        return min == max;
    }
    let span = max - direct_start(pixel_type, thematic, min) + 1.0;
    if pixel_type == PixelType::UInt8 || span <= MAX_DIRECT_BINS as f64 {
        return true;
    }
    if thematic {
        if span <= MAX_THEMATIC_BINS as f64 {
            return true;
        }
        warn!(
            "Thematic values span {} classes, more than {}; using {} linear histogram bins",
            span, MAX_THEMATIC_BINS, LINEAR_BINS
        );
    }
    false
}

/// Running state of one band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandAccumulator {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
    positive: Option<Vec<u64>>,
    negative: Option<Vec<u64>>,
}

impl BandAccumulator {
    pub fn new(with_histogram: bool) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            positive: with_histogram.then(Vec::new),
            negative: with_histogram.then(Vec::new),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn tracks_histogram(&self) -> bool {
        self.positive.is_some()
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }

        let (half, index) = if value >= 0.0 {
            (&mut self.positive, value as usize)
        } else {
            (&mut self.negative, (-value) as usize)
        };
        if let Some(counts) = half {
            if counts.len() <= index {
                counts.resize(index + 1, 0);
            }
            counts[index] += 1;
        }
    }

    pub fn merge(&mut self, other: &BandAccumulator) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);

        for (mine, theirs) in [
            (&mut self.positive, &other.positive),
            (&mut self.negative, &other.negative),
        ] {
            match (mine, theirs) {
                (Some(mine), Some(theirs)) => {
                    if mine.len() < theirs.len() {
                        mine.resize(theirs.len(), 0);
                    }
                    for (m, t) in mine.iter_mut().zip(theirs) {
                        *m += t;
                    }
                }
                (mine, _) => *mine = None,
            }
        }
    }

    pub fn stats(&self) -> Option<BandStats> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        Some(BandStats {
            count: self.count,
            min: self.min,
            max: self.max,
            mean,
            stddev: variance.sqrt(),
        })
    }

    /// Merge the half-histograms into one array spanning the observed range
    /// and bin it for `pixel_type`.
    pub fn histogram(&self, pixel_type: PixelType, thematic: bool) -> Option<Histogram> {
        let (positive, negative) = (self.positive.as_ref()?, self.negative.as_ref()?);
        if self.count == 0 {
            return None;
        }

        let direct = use_direct_bins(pixel_type, thematic, self.min, self.max);
        let start = direct_start(pixel_type, thematic, self.min);

        let values = negative
            .iter()
            .enumerate()
            .rev()
            .map(|(i, &c)| (-(i as f64), c))
            .chain(positive.iter().enumerate().map(|(i, &c)| (i as f64, c)))
            .filter(|&(_, c)| c > 0);

        if direct {
            let mut counts = vec![0u64; (self.max - start) as usize + 1];
            for (value, count) in values {
                counts[(value - start) as usize] += count;
            }
            Some(Histogram {
                min: start,
                max: self.max,
                counts,
                direct: true,
            })
        } else {
            let mut counts = vec![0u64; LINEAR_BINS];
            for (value, count) in values {
                counts[linear_bin(value, self.min, self.max, LINEAR_BINS)] += count;
            }
            Some(Histogram {
                min: self.min,
                max: self.max,
                counts,
                direct: false,
            })
        }
    }
}

/// Statistics and histogram of one band, ready to be stored on the file.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSummary {
    pub stats: Option<BandStats>,
    pub histogram: Option<Histogram>,
}

/// Per-band accumulation for one output.
#[derive(Debug, Clone)]
pub struct Accumulator {
    pixel_type: PixelType,
    nodata: Option<f64>,
    thematic: bool,
    bands: Vec<BandAccumulator>,
}

impl Accumulator {
    /// `with_histogram` is ignored for types whose half-histograms would be
    /// too large to keep.
    pub fn new(
        pixel_type: PixelType,
        band_count: usize,
        nodata: Option<f64>,
        thematic: bool,
        with_histogram: bool,
    ) -> Self {
        let with_histogram = with_histogram && pixel_type.supports_single_pass_histogram();
        Self {
            pixel_type,
            nodata,
            thematic,
            bands: (0..band_count).map(|_| BandAccumulator::new(with_histogram)).collect(),
        }
    }

    pub fn tracks_histogram(&self) -> bool {
        self.bands.first().map_or(false, |b| b.tracks_histogram())
    }

    pub fn band(&self, band: usize) -> Option<&BandAccumulator> {
        self.bands.get(band)
    }

    /// Add every non-null pixel of `block`, which must already be trimmed to
    /// the written region.
    pub fn update(&mut self, block: &BlockArray) {
        let nodata = self.nodata;
        let bands = &mut self.bands;
        with_block_array!(block, a => update_bands(bands, a, nodata));
    }

    pub fn merge(&mut self, other: &Accumulator) {
        for (mine, theirs) in self.bands.iter_mut().zip(&other.bands) {
            mine.merge(theirs);
        }
    }

    pub fn summary(&self, band: usize) -> BandSummary {
        match self.bands.get(band) {
            Some(acc) => BandSummary {
                stats: acc.stats(),
                histogram: acc.histogram(self.pixel_type, self.thematic),
            },
            None => BandSummary {
                stats: None,
                histogram: None,
            },
        }
    }
}

fn update_bands<T: Pixel>(bands: &mut [BandAccumulator], array: &ndarray::Array3<T>, nodata: Option<f64>) {
    // Compare in the pixel type so a nodata of -9999.5 on Int16 data matches
    let nodata = nodata.map(|nd| T::from_f64(nd).to_f64());
    for (acc, plane) in bands.iter_mut().zip(array.axis_iter(Axis(0))) {
        for &value in plane.iter() {
            let value = value.to_f64();
            if value.is_nan() || Some(value) == nodata {
                continue;
            }
            acc.add(value);
        }
    }
}

fn for_each_strip(band: &RasterBand, mut f: impl FnMut(&[f64])) -> Result<()> {
    let (width, height) = band.size();
    for y_offset in (0..height).step_by(STRIP_ROWS) {
        let rows = STRIP_ROWS.min(height - y_offset);
        let buffer = band.read_as::<f64>((0, y_offset as isize), (width, rows), (width, rows), None)?;
        f(buffer.data());
    }
    Ok(())
}

/// Statistics and histogram of a band read back from disk.
///
/// 8 and 16 bit integers need one read; other types need a second one to
/// bin against the range found by the first.
pub fn compute_band_stats(
    band: &RasterBand,
    pixel_type: PixelType,
    nodata: Option<f64>,
    thematic: bool,
) -> Result<BandSummary> {
    let mut accumulator = Accumulator::new(pixel_type, 1, nodata, thematic, true);
    let nodata_typed = nodata.map(|nd| BlockArray::filled(pixel_type, (1, 1, 1), &[nd]).to_f64()[[0, 0, 0]]);
    let is_valid = |v: f64| !v.is_nan() && Some(v) != nodata_typed;

    for_each_strip(band, |values| {
        let acc = &mut accumulator.bands[0];
        for &value in values.iter().filter(|&&v| is_valid(v)) {
            acc.add(value);
        }
    })?;

    let acc = &accumulator.bands[0];
    let stats = acc.stats();
    let histogram = match &stats {
        None => None,
        Some(_) if acc.tracks_histogram() => acc.histogram(pixel_type, thematic),
        Some(stats) => {
            let direct = use_direct_bins(pixel_type, thematic, stats.min, stats.max);
            let (start, bins) = if direct {
                let start = direct_start(pixel_type, thematic, stats.min);
                (start, (stats.max - start) as usize + 1)
            } else {
                (stats.min, LINEAR_BINS)
            };
            let mut counts = vec![0u64; bins];
            for_each_strip(band, |values| {
                for &value in values.iter().filter(|&&v| is_valid(v)) {
                    let bin = if direct {
                        (value - start) as usize
                    } else {
                        linear_bin(value, stats.min, stats.max, bins)
                    };
                    counts[bin] += 1;
                }
            })?;
            Some(Histogram {
                min: start,
                max: stats.max,
                counts,
                direct,
            })
        }
    };

    Ok(BandSummary { stats, histogram })
}

/// Store statistics and histogram on a band the way GDAL tools expect them.
pub fn write_band_summary(band: &mut RasterBand, summary: &BandSummary) -> Result<()> {
    if let Some(stats) = &summary.stats {
        let rc = unsafe {
            gdal_sys::GDALSetRasterStatistics(
                band.c_rasterband(),
                stats.min,
                stats.max,
                stats.mean,
                stats.stddev,
            )
        };
        check_rc(rc, "GDALSetRasterStatistics")?;
        band.set_metadata_item("STATISTICS_MINIMUM", &stats.min.to_string(), "")?;
        band.set_metadata_item("STATISTICS_MAXIMUM", &stats.max.to_string(), "")?;
        band.set_metadata_item("STATISTICS_MEAN", &stats.mean.to_string(), "")?;
        band.set_metadata_item("STATISTICS_STDDEV", &stats.stddev.to_string(), "")?;
        band.set_metadata_item("STATISTICS_SKIPFACTORX", "1", "")?;
        band.set_metadata_item("STATISTICS_SKIPFACTORY", "1", "")?;
    }

    if let Some(histogram) = &summary.histogram {
        let (lo, hi) = histogram.gdal_edges();
        let mut counts = histogram.counts.clone();
        let rc = unsafe {
            gdal_sys::GDALSetDefaultHistogramEx(
                band.c_rasterband(),
                lo,
                hi,
                counts.len() as std::ffi::c_int,
                counts.as_mut_ptr(),
            )
        };
        check_rc(rc, "GDALSetDefaultHistogramEx")?;

        let bin_values = histogram
            .counts
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("|");
        band.set_metadata_item("STATISTICS_HISTOMIN", &histogram.min.to_string(), "")?;
        band.set_metadata_item("STATISTICS_HISTOMAX", &histogram.max.to_string(), "")?;
        band.set_metadata_item("STATISTICS_HISTONUMBINS", &histogram.counts.len().to_string(), "")?;
        band.set_metadata_item("STATISTICS_HISTOBINVALUES", &bin_values, "")?;
        band.set_metadata_item(
            "STATISTICS_HISTOBINFUNCTION",
            if histogram.direct { "direct" } else { "linear" },
            "",
        )?;

        if let Some(median) = histogram.median() {
            band.set_metadata_item("STATISTICS_MEDIAN", &median.to_string(), "")?;
        }
        if let Some(mode) = histogram.mode() {
            band.set_metadata_item("STATISTICS_MODE", &mode.to_string(), "")?;
        }
    }

    debug!(
        "Stored statistics {:?}, histogram of {} bins",
        summary.stats,
        summary.histogram.as_ref().map_or(0, |h| h.counts.len())
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdal::raster::Buffer;
    use gdal::DriverManager;
    use ndarray::Array3;

    fn block<T: Pixel>(rows: usize, cols: usize, values: Vec<T>) -> BlockArray {
        BlockArray::from(Array3::from_shape_vec((1, rows, cols), values).unwrap())
    }

    #[test]
    fn test_running_stats_exclude_nodata() {
        let mut acc = Accumulator::new(PixelType::Int16, 1, Some(-1.0), false, true);
        acc.update(&block::<i16>(2, 3, vec![-1, 2, 4, -1, 4, 6]));
        let summary = acc.summary(0);
        let stats = summary.stats.unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!((stats.min, stats.max), (2.0, 6.0));
        assert!((stats.mean - 4.0).abs() < 1e-12);
        assert!((stats.stddev - 2.0f64.sqrt()).abs() < 1e-12);

        let hist = summary.histogram.unwrap();
        assert!(hist.direct);
        assert_eq!(hist.total(), 4);
        assert_eq!((hist.min, hist.max), (2.0, 6.0));
        assert_eq!(hist.counts, vec![1, 0, 2, 0, 1]);
        assert_eq!(hist.median(), Some(4.0));
        assert_eq!(hist.mode(), Some(4.0));
    }

    #[test]
    fn test_negative_values_merge_into_one_histogram() {
        let mut acc = Accumulator::new(PixelType::Int16, 1, None, false, true);
        acc.update(&block::<i16>(1, 5, vec![-3, -3, 0, 1, -1]));
        let hist = acc.summary(0).histogram.unwrap();
        assert_eq!(hist.min, -3.0);
        assert_eq!(hist.counts, vec![2, 0, 1, 1, 1]);
        assert_eq!(hist.median(), Some(-1.0));
        assert_eq!(hist.mode(), Some(-3.0));
    }

    #[test]
    fn test_byte_bins_start_at_zero() {
        let mut acc = Accumulator::new(PixelType::UInt8, 1, None, false, true);
        acc.update(&block::<u8>(1, 3, vec![5, 6, 6]));
        let hist = acc.summary(0).histogram.unwrap();
        assert_eq!(hist.min, 0.0);
        assert_eq!(hist.counts.len(), 7);
        assert_eq!(hist.counts[6], 2);
    }

    #[test]
    fn test_wide_uint16_range_gets_linear_bins() {
        let mut acc = Accumulator::new(PixelType::UInt16, 1, None, false, true);
        let values: Vec<u16> = (0..1000).map(|i| i * 10).collect();
        acc.update(&block::<u16>(10, 100, values));
        let hist = acc.summary(0).histogram.unwrap();
        assert!(!hist.direct);
        assert_eq!(hist.counts.len(), LINEAR_BINS);
        assert_eq!(hist.total(), 1000);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = block::<u8>(1, 4, vec![1, 2, 3, 4]);
        let b = block::<u8>(1, 4, vec![9, 9, 0, 200]);

        let mut ab = Accumulator::new(PixelType::UInt8, 1, Some(0.0), false, true);
        ab.update(&a);
        ab.update(&b);

        let mut left = Accumulator::new(PixelType::UInt8, 1, Some(0.0), false, true);
        left.update(&b);
        let mut right = Accumulator::new(PixelType::UInt8, 1, Some(0.0), false, true);
        right.update(&a);
        left.merge(&right);

        assert_eq!(ab.summary(0), left.summary(0));
        assert_eq!(ab.summary(0).stats.unwrap().count, 7);
    }

    #[test]
    fn test_float_accumulator_keeps_no_histogram() {
        let mut acc = Accumulator::new(PixelType::Float32, 1, None, false, true);
        assert!(!acc.tracks_histogram());
        acc.update(&block::<f32>(1, 3, vec![0.5, f32::NAN, 1.5]));
        let summary = acc.summary(0);
        assert_eq!(summary.stats.unwrap().count, 2);
        assert!(summary.histogram.is_none());
    }

    #[test]
    fn test_all_null_band() {
        let mut acc = Accumulator::new(PixelType::UInt8, 1, Some(7.0), false, true);
        acc.update(&block::<u8>(1, 2, vec![7, 7]));
        let summary = acc.summary(0);
        assert!(summary.stats.is_none());
        assert!(summary.histogram.is_none());
    }

    #[test]
    fn test_finishing_pass_matches_accumulator() {
        let values: Vec<i16> = (0..40 * 30).map(|i| ((i * 37) % 500) as i16 - 100).collect();
        let driver = DriverManager::get_driver_by_name("MEM").unwrap();
        let ds = driver.create_with_band_type::<i16, _>("", 40, 30, 1).unwrap();
        let mut band = ds.rasterband(1).unwrap();
        let mut buffer = Buffer::new((40, 30), values.clone());
        band.write((0, 0), (40, 30), &mut buffer).unwrap();

        let mut acc = Accumulator::new(PixelType::Int16, 1, Some(-100.0), false, true);
        acc.update(&block::<i16>(30, 40, values));
        let incremental = acc.summary(0);

        let full = compute_band_stats(&band, PixelType::Int16, Some(-100.0), false).unwrap();
        let (a, b) = (incremental.stats.unwrap(), full.stats.unwrap());
        assert_eq!(a.count, b.count);
        assert_eq!((a.min, a.max), (b.min, b.max));
        assert!((a.mean - b.mean).abs() < 1e-9);
        assert_eq!(incremental.histogram, full.histogram);
        assert_eq!(full.histogram.unwrap().total(), b.count);
    }

    fn mem_band_i32(values: Vec<i32>) -> gdal::Dataset {
        let driver = DriverManager::get_driver_by_name("MEM").unwrap();
        let width = values.len();
        let ds = driver.create_with_band_type::<i32, _>("", width, 1, 1).unwrap();
        {
            let mut band = ds.rasterband(1).unwrap();
            let mut buffer = Buffer::new((width, 1), values);
            band.write((0, 0), (width, 1), &mut buffer).unwrap();
        }
        ds
    }

    #[test]
    fn test_finishing_pass_thematic_bins_start_at_zero() {
        let ds = mem_band_i32(vec![5, 6, 7, 8, 9, 9]);
        let band = ds.rasterband(1).unwrap();

        let hist = compute_band_stats(&band, PixelType::Int32, None, true).unwrap().histogram.unwrap();
        assert!(hist.direct);
        assert_eq!(hist.min, 0.0);
        assert_eq!(hist.counts, vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 2]);
        assert_eq!(hist.mode(), Some(9.0));

        // Same classes kept incrementally as Int16
        let mut acc = Accumulator::new(PixelType::Int16, 1, None, true, true);
        acc.update(&block::<i16>(1, 6, vec![5, 6, 7, 8, 9, 9]));
        assert_eq!(acc.summary(0).histogram, Some(hist));
    }

    #[test]
    fn test_thematic_classes_beyond_uint16_get_linear_bins() {
        let ds = mem_band_i32(vec![0, 7, 2_000_000_000]);
        let band = ds.rasterband(1).unwrap();

        let hist = compute_band_stats(&band, PixelType::Int32, None, true).unwrap().histogram.unwrap();
        assert!(!hist.direct);
        assert_eq!(hist.counts.len(), LINEAR_BINS);
        assert_eq!((hist.min, hist.max), (0.0, 2_000_000_000.0));
        assert_eq!(hist.counts[0], 2);
        assert_eq!(hist.total(), 3);
    }

    #[test]
    fn test_finishing_pass_float_linear_bins() {
        let values: Vec<f32> = (0..64).map(|i| i as f32 * 0.25).collect();
        let driver = DriverManager::get_driver_by_name("MEM").unwrap();
        let ds = driver.create_with_band_type::<f32, _>("", 8, 8, 1).unwrap();
        let mut band = ds.rasterband(1).unwrap();
        let mut buffer = Buffer::new((8, 8), values);
        band.write((0, 0), (8, 8), &mut buffer).unwrap();

        let summary = compute_band_stats(&band, PixelType::Float32, None, false).unwrap();
        let hist = summary.histogram.unwrap();
        assert!(!hist.direct);
        assert_eq!(hist.counts.len(), LINEAR_BINS);
        assert_eq!(hist.total(), 64);
        assert_eq!(hist.counts[LINEAR_BINS - 1], 1);
        assert_eq!(summary.stats.unwrap().max, 15.75);
    }
}
