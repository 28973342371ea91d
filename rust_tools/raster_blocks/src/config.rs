//! Run configuration.
//!
//! [`Controls`] is built once before a run and is read-only afterwards. Input
//! and output options have a base value plus typed per-slot overrides; the
//! engine resolves each slot's options once, before any block is processed.

use crate::array::PixelType;
use crate::associations::SlotKey;
use crate::error::{BlockError, Result};
use crate::pixelgrid::PixelGridDefn;
use clap::ValueEnum;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BLOCK_SIZE: usize = 256;
/// Output creation options unless a slot replaces them. The tiles match
/// [`DEFAULT_BLOCK_SIZE`] so compressed tiles are written once.
pub const DEFAULT_CREATION_OPTIONS: [&str; 5] = [
    "COMPRESS=DEFLATE",
    "TILED=YES",
    "BLOCKXSIZE=256",
    "BLOCKYSIZE=256",
    "BIGTIFF=IF_SAFER",
];
pub const DEFAULT_MIN_OVERVIEW_DIM: usize = 33;
pub const DEFAULT_BUFFER_TIMEOUT: Duration = Duration::from_secs(120);

/// How the working grid extent is derived from the input extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Footprint {
    #[default]
    Intersection,
    Union,
    BoundsFromReference,
}

/// Grid that inputs are resampled onto when they do not already line up.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceGrid {
    /// The grid of one of the declared inputs.
    Slot(SlotKey),
    /// The grid of a raster file that is not itself an input.
    File(PathBuf),
    Grid(PixelGridDefn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResampleMethod {
    #[default]
    Near,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
    Min,
    Max,
    Median,
}

impl ResampleMethod {
    /// Name accepted by `gdalwarp -r`.
    pub fn gdal_name(self) -> &'static str {
        match self {
            ResampleMethod::Near => "near",
            ResampleMethod::Bilinear => "bilinear",
            ResampleMethod::Cubic => "cubic",
            ResampleMethod::CubicSpline => "cubicspline",
            ResampleMethod::Lanczos => "lanczos",
            ResampleMethod::Average => "average",
            ResampleMethod::Mode => "mode",
            ResampleMethod::Min => "min",
            ResampleMethod::Max => "max",
            ResampleMethod::Median => "med",
        }
    }
}

/// Whether a finalization step is done while blocks are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SinglePass {
    /// Incremental where possible, a finishing pass otherwise.
    #[default]
    Auto,
    /// Incremental, or fail before the run starts.
    Always,
    /// Always a finishing pass.
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinglePassOptions {
    pub pyramids: SinglePass,
    pub statistics: SinglePass,
    pub histogram: SinglePass,
}

/// Rasterization of vector inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorOptions {
    pub burn_value: f64,
    /// Attribute whose value is burned instead of `burn_value`.
    pub burn_attribute: Option<String>,
    pub null_value: f64,
    pub layer: Option<String>,
    /// Attribute filter (SQL WHERE clause).
    pub filter: Option<String>,
    /// Full SQL statement selecting the features, replaces `layer`.
    pub sql: Option<String>,
    pub all_touched: bool,
    pub data_type: PixelType,
}

impl Default for VectorOptions {
    fn default() -> Self {
        Self {
            burn_value: 1.0,
            burn_attribute: None,
            null_value: 0.0,
            layer: None,
            filter: None,
            sql: None,
            all_touched: false,
            data_type: PixelType::UInt8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputOptions {
    /// Overrides the nodata value stored in the file.
    pub nodata: Option<f64>,
    pub resample: ResampleMethod,
    pub vector: VectorOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputSetting {
    Nodata(f64),
    Resample(ResampleMethod),
    BurnValue(f64),
    BurnAttribute(String),
    VectorNull(f64),
    VectorLayer(String),
    VectorFilter(String),
    VectorSql(String),
    AllTouched(bool),
    VectorDataType(PixelType),
}

impl InputOptions {
    pub fn apply(&mut self, setting: &InputSetting) {
        match setting {
            InputSetting::Nodata(v) => self.nodata = Some(*v),
            InputSetting::Resample(m) => self.resample = *m,
            InputSetting::BurnValue(v) => self.vector.burn_value = *v,
            InputSetting::BurnAttribute(a) => self.vector.burn_attribute = Some(a.clone()),
            InputSetting::VectorNull(v) => self.vector.null_value = *v,
            InputSetting::VectorLayer(l) => self.vector.layer = Some(l.clone()),
            InputSetting::VectorFilter(f) => self.vector.filter = Some(f.clone()),
            InputSetting::VectorSql(s) => self.vector.sql = Some(s.clone()),
            InputSetting::AllTouched(b) => self.vector.all_touched = *b,
            InputSetting::VectorDataType(t) => self.vector.data_type = *t,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputOptions {
    pub driver: String,
    pub creation_options: Vec<String>,
    pub nodata: Option<f64>,
    pub thematic: bool,
    pub band_names: Vec<String>,
    pub calc_stats: bool,
    pub build_pyramids: bool,
    /// Explicit overview factors; successive halving when `None`.
    pub overview_levels: Option<Vec<u32>>,
    /// Overview levels whose smaller side would drop below this are skipped.
    pub min_overview_dim: usize,
    /// Overview resampling; NEAREST for thematic, AVERAGE otherwise when `None`.
    pub overview_aggregation: Option<String>,
    pub single_pass: SinglePassOptions,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            driver: "GTiff".to_string(),
            creation_options: DEFAULT_CREATION_OPTIONS.iter().map(|o| o.to_string()).collect(),
            nodata: None,
            thematic: false,
            band_names: Vec::new(),
            calc_stats: true,
            build_pyramids: true,
            overview_levels: None,
            min_overview_dim: DEFAULT_MIN_OVERVIEW_DIM,
            overview_aggregation: None,
            single_pass: SinglePassOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputSetting {
    Driver(String),
    CreationOptions(Vec<String>),
    Nodata(f64),
    Thematic(bool),
    BandNames(Vec<String>),
    CalcStats(bool),
    BuildPyramids(bool),
    OverviewLevels(Vec<u32>),
    MinOverviewDim(usize),
    OverviewAggregation(String),
    SinglePassPyramids(SinglePass),
    SinglePassStatistics(SinglePass),
    SinglePassHistogram(SinglePass),
}

impl OutputOptions {
    pub fn apply(&mut self, setting: &OutputSetting) {
        match setting {
            OutputSetting::Driver(d) => self.driver = d.clone(),
            OutputSetting::CreationOptions(o) => self.creation_options = o.clone(),
            OutputSetting::Nodata(v) => self.nodata = Some(*v),
            OutputSetting::Thematic(b) => self.thematic = *b,
            OutputSetting::BandNames(n) => self.band_names = n.clone(),
            OutputSetting::CalcStats(b) => self.calc_stats = *b,
            OutputSetting::BuildPyramids(b) => self.build_pyramids = *b,
            OutputSetting::OverviewLevels(l) => self.overview_levels = Some(l.clone()),
            OutputSetting::MinOverviewDim(d) => self.min_overview_dim = *d,
            OutputSetting::OverviewAggregation(a) => self.overview_aggregation = Some(a.clone()),
            OutputSetting::SinglePassPyramids(s) => self.single_pass.pyramids = *s,
            OutputSetting::SinglePassStatistics(s) => self.single_pass.statistics = *s,
            OutputSetting::SinglePassHistogram(s) => self.single_pass.histogram = *s,
        }
    }

    pub fn overview_aggregation(&self) -> String {
        match &self.overview_aggregation {
            Some(agg) => agg.to_uppercase(),
            None if self.thematic => "NEAREST".to_string(),
            None => "AVERAGE".to_string(),
        }
    }
}

/// Where compute workers run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ComputeKind {
    /// Scoped threads in this process.
    #[default]
    Threads,
    /// Child processes running `program args...`, which must serve the
    /// worker protocol on stdin/stdout (`raster-blocks worker` does). A
    /// batch-queue launcher goes here with the engine binary in `args`.
    Subprocess { program: PathBuf, args: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyStyle {
    /// Threads reading ahead into the input buffer; 0 reads in the compute loop.
    pub read_workers: usize,
    /// Concurrent compute workers; 0 computes in the calling thread.
    pub compute_workers: usize,
    pub compute_kind: ComputeKind,
    /// Capacity of each block buffer; 0 picks twice the worker count.
    pub buffer_capacity: usize,
    pub insert_timeout: Duration,
    pub pop_timeout: Duration,
    /// Write blocks in partition order even when computed out of order.
    pub ordered_writes: bool,
}

impl Default for ConcurrencyStyle {
    fn default() -> Self {
        Self {
            read_workers: 0,
            compute_workers: 0,
            compute_kind: ComputeKind::Threads,
            buffer_capacity: 0,
            insert_timeout: DEFAULT_BUFFER_TIMEOUT,
            pop_timeout: DEFAULT_BUFFER_TIMEOUT,
            ordered_writes: true,
        }
    }
}

impl ConcurrencyStyle {
    pub fn threads(compute_workers: usize) -> Self {
        Self {
            compute_workers,
            ..Self::default()
        }
    }

    pub fn is_direct(&self) -> bool {
        self.compute_workers == 0
    }

    pub fn buffer_capacity(&self) -> usize {
        if self.buffer_capacity > 0 {
            self.buffer_capacity
        } else {
            2 * self.read_workers.max(self.compute_workers).max(1)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Controls {
    pub block_width: usize,
    pub block_height: usize,
    /// Margin in pixels read around every block.
    pub overlap: usize,
    pub footprint: Footprint,
    /// Without a reference every input must already line up with the first.
    pub reference: Option<ReferenceGrid>,
    pub input: InputOptions,
    pub output: OutputOptions,
    input_overrides: HashMap<String, Vec<InputSetting>>,
    output_overrides: HashMap<String, Vec<OutputSetting>>,
    pub concurrency: ConcurrencyStyle,
    /// Directory for reprojected views and rasterized vectors.
    pub temp_dir: Option<PathBuf>,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            block_width: DEFAULT_BLOCK_SIZE,
            block_height: DEFAULT_BLOCK_SIZE,
            overlap: 0,
            footprint: Footprint::default(),
            reference: None,
            input: InputOptions::default(),
            output: OutputOptions::default(),
            input_overrides: HashMap::new(),
            output_overrides: HashMap::new(),
            concurrency: ConcurrencyStyle::default(),
            temp_dir: None,
        }
    }
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(mut self, width: usize, height: usize) -> Self {
        self.block_width = width;
        self.block_height = height;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_footprint(mut self, footprint: Footprint) -> Self {
        self.footprint = footprint;
        self
    }

    pub fn with_reference(mut self, reference: ReferenceGrid) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyStyle) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Override one input option for the slot `name` (all files of a list slot).
    pub fn set_input_option(&mut self, name: &str, setting: InputSetting) -> &mut Self {
        self.input_overrides.entry(name.to_string()).or_default().push(setting);
        self
    }

    /// Override one output option for the slot `name`.
    pub fn set_output_option(&mut self, name: &str, setting: OutputSetting) -> &mut Self {
        self.output_overrides.entry(name.to_string()).or_default().push(setting);
        self
    }

    /// Base input options with the overrides for `name` applied in order.
    pub fn input_options(&self, name: &str) -> InputOptions {
        let mut options = self.input.clone();
        for setting in self.input_overrides.get(name).into_iter().flatten() {
            options.apply(setting);
        }
        options
    }

    pub fn output_options(&self, name: &str) -> OutputOptions {
        let mut options = self.output.clone();
        for setting in self.output_overrides.get(name).into_iter().flatten() {
            options.apply(setting);
        }
        options
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_width == 0 || self.block_height == 0 {
            return Err(BlockError::InvalidConfig(format!(
                "block size must be positive, got {}x{}",
                self.block_width, self.block_height
            )));
        }
        let c = &self.concurrency;
        if c.insert_timeout.is_zero() || c.pop_timeout.is_zero() {
            return Err(BlockError::InvalidConfig("buffer timeouts must be non-zero".to_string()));
        }
        if let ComputeKind::Subprocess { program, .. } = &c.compute_kind {
            if program.as_os_str().is_empty() {
                return Err(BlockError::InvalidConfig("subprocess worker program is empty".to_string()));
            }
        }
        Ok(())
    }
}
