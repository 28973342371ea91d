use crate::associations::{FilenameAssociations, SlotKey};
use crate::builtins::TransformName;
use crate::config::{
    ComputeKind, ConcurrencyStyle, Controls, Footprint, InputSetting, OutputSetting, ReferenceGrid,
    ResampleMethod, SinglePass, DEFAULT_BLOCK_SIZE, DEFAULT_MIN_OVERVIEW_DIM,
};
use crate::error::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "raster-blocks")]
#[command(about = "Apply block-by-block computations to GDAL rasters")]
#[command(version)]
pub struct Cli {
    /// Number of threads for work inside a block (default: all available)
    #[arg(short, long, global = true, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the metadata of a raster or vector file
    Info {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    /// Run a built-in transform over input files
    Apply(ApplyArgs),

    /// Compute statistics, histogram and pyramids of an existing raster
    Stats(StatsArgs),

    /// Serve the subprocess worker protocol on stdin/stdout
    #[command(hide = true)]
    Worker {
        #[arg(long, value_enum)]
        transform: TransformName,

        #[arg(long, default_value = "out")]
        output: String,
    },
}

fn parse_assignment(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() && !value.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

fn parse_nodata(s: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = parse_assignment(s)?;
    let value = value.parse::<f64>().map_err(|e| format!("{}: {}", value, e))?;
    Ok((name, value))
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Transform to run
    #[arg(long, value_enum)]
    pub transform: TransformName,

    /// Input file; repeating a name makes a list of files
    #[arg(short, long = "input", value_name = "NAME=PATH", value_parser = parse_assignment, required = true)]
    pub inputs: Vec<(String, String)>,

    /// Output file
    #[arg(short, long, value_name = "NAME=PATH", value_parser = parse_assignment)]
    pub output: (String, String),

    /// Block edge in pixels
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, value_name = "PIXELS")]
    pub block_size: usize,

    /// Margin read around every block; also the mean filter radius
    #[arg(long, default_value_t = 0, value_name = "PIXELS")]
    pub overlap: usize,

    #[arg(long, value_enum, default_value_t = Footprint::Intersection)]
    pub footprint: Footprint,

    /// Input name or raster file whose grid the inputs are resampled onto
    #[arg(long, value_name = "NAME|FILE")]
    pub reference: Option<String>,

    #[arg(long, value_enum, default_value_t = ResampleMethod::Near)]
    pub resample: ResampleMethod,

    /// Nodata value overriding the one stored in an input file
    #[arg(long, value_name = "NAME=VALUE", value_parser = parse_nodata)]
    pub input_nodata: Vec<(String, f64)>,

    /// Threads reading blocks ahead of the computation
    #[arg(long, default_value_t = 0, value_name = "N")]
    pub read_workers: usize,

    /// Concurrent compute workers (0: compute on the main thread)
    #[arg(long, default_value_t = 0, value_name = "N")]
    pub compute_workers: usize,

    /// Run compute workers as child processes of this executable
    #[arg(long)]
    pub subprocess: bool,

    /// Output GDAL driver
    #[arg(long, default_value = "GTiff")]
    pub driver: String,

    /// Output creation option; replaces the defaults when given
    #[arg(long = "co", value_name = "KEY=VALUE")]
    pub creation_options: Vec<String>,

    /// Output nodata value
    #[arg(long, value_name = "VALUE")]
    pub nodata: Option<f64>,

    /// Output holds classes rather than measurements
    #[arg(long)]
    pub thematic: bool,

    /// Skip statistics and histogram
    #[arg(long)]
    pub no_stats: bool,

    /// Skip pyramid layers
    #[arg(long)]
    pub no_pyramids: bool,

    #[arg(long, value_enum, default_value_t = SinglePass::Auto)]
    pub single_pass: SinglePass,

    /// Directory for temporary views and rasterized vectors
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,
}

impl ApplyArgs {
    pub fn inputs(&self) -> FilenameAssociations {
        let mut inputs = FilenameAssociations::new();
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.inputs {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        for name in names {
            let paths: Vec<&String> = self.inputs.iter().filter(|(n, _)| n == name).map(|(_, p)| p).collect();
            match paths.as_slice() {
                [single] => inputs.set(name, single.as_str()),
                many => inputs.set_list(name, many.iter().map(|p| p.as_str())),
            };
        }
        inputs
    }

    pub fn outputs(&self) -> FilenameAssociations {
        let mut outputs = FilenameAssociations::new();
        outputs.set(&self.output.0, self.output.1.as_str());
        outputs
    }

    pub fn controls(&self) -> Result<Controls> {
        let compute_kind = if self.subprocess {
            ComputeKind::Subprocess {
                program: std::env::current_exe()?,
                args: vec![
                    "worker".to_string(),
                    "--transform".to_string(),
                    self.transform.as_str().to_string(),
                    "--output".to_string(),
                    self.output.0.clone(),
                ],
            }
        } else {
            ComputeKind::Threads
        };
        let concurrency = ConcurrencyStyle {
            read_workers: self.read_workers,
            // Child processes need somewhere to run
            compute_workers: if self.subprocess { self.compute_workers.max(1) } else { self.compute_workers },
            compute_kind,
            ..ConcurrencyStyle::default()
        };

        let mut controls = Controls::new()
            .with_block_size(self.block_size, self.block_size)
            .with_overlap(self.overlap)
            .with_footprint(self.footprint)
            .with_concurrency(concurrency);
        if let Some(dir) = &self.temp_dir {
            controls = controls.with_temp_dir(dir);
        }
        if let Some(reference) = &self.reference {
            let is_input = self.inputs.iter().any(|(name, _)| name == reference);
            controls = controls.with_reference(if is_input {
                ReferenceGrid::Slot(SlotKey::single(reference.as_str()))
            } else {
                ReferenceGrid::File(PathBuf::from(reference))
            });
        }

        controls.input.resample = self.resample;
        for (name, value) in &self.input_nodata {
            controls.set_input_option(name, InputSetting::Nodata(*value));
        }

        let output = &self.output.0;
        controls.set_output_option(output, OutputSetting::Driver(self.driver.clone()));
        if !self.creation_options.is_empty() {
            controls.set_output_option(output, OutputSetting::CreationOptions(self.creation_options.clone()));
        }
        if let Some(nodata) = self.nodata {
            controls.set_output_option(output, OutputSetting::Nodata(nodata));
        }
        controls
            .set_output_option(output, OutputSetting::Thematic(self.thematic))
            .set_output_option(output, OutputSetting::CalcStats(!self.no_stats))
            .set_output_option(output, OutputSetting::BuildPyramids(!self.no_pyramids))
            .set_output_option(output, OutputSetting::SinglePassPyramids(self.single_pass))
            .set_output_option(output, OutputSetting::SinglePassStatistics(self.single_pass))
            .set_output_option(output, OutputSetting::SinglePassHistogram(self.single_pass));
        Ok(controls)
    }
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[arg(value_name = "FILE")]
    pub path: PathBuf,

    /// Raster holds classes: direct histogram bins and NEAREST pyramids
    #[arg(long)]
    pub thematic: bool,

    /// Nodata value overriding the one stored in the file
    #[arg(long, value_name = "VALUE")]
    pub nodata: Option<f64>,

    /// Skip pyramid layers
    #[arg(long)]
    pub no_pyramids: bool,

    /// Overview levels whose smaller side would drop below this are skipped
    #[arg(long, default_value_t = DEFAULT_MIN_OVERVIEW_DIM, value_name = "PIXELS")]
    pub min_overview_dim: usize,
}
