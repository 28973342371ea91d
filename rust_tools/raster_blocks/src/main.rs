use clap::Parser;
use env_logger::Env;
use log::info;
use raster_blocks::builtins::Builtin;
use raster_blocks::cli::{Cli, Command, StatsArgs};
use raster_blocks::config::OutputOptions;
use raster_blocks::metadata::{read_file_metadata, FileMetadata};
use raster_blocks::{engine, subprocess, writer, BlockError, Result};
use std::io;
use std::path::Path;

fn print_info(path: &Path) -> Result<()> {
    match read_file_metadata(path)? {
        FileMetadata::Raster(info) => {
            println!("{} ({})", info.path.display(), info.driver);
            println!("  size: {} x {} x {} {}", info.width, info.height, info.band_count, info.pixel_type.gdal_name());
            println!(
                "  extent: [{}, {}, {}, {}], pixel {} x {}",
                info.grid.xmin, info.grid.ymin, info.grid.xmax, info.grid.ymax, info.grid.xres, info.grid.yres
            );
            println!("  thematic: {}, overviews: {}", info.thematic, info.overview_count);
            for (band, nodata) in info.nodata.iter().enumerate() {
                let name = info.band_names.get(band).map(String::as_str).unwrap_or("");
                match nodata {
                    Some(nd) => println!("  band {} {}: nodata {}", band + 1, name, nd),
                    None => println!("  band {} {}: no nodata", band + 1, name),
                }
            }
        }
        FileMetadata::Vector(info) => {
            println!("{} ({})", info.path.display(), info.driver);
            for layer in &info.layers {
                println!("  layer {}: {} features", layer.name, layer.feature_count);
                for field in &layer.fields {
                    println!("    {}: {}", field.name, field.type_name);
                }
            }
        }
    }
    Ok(())
}

fn run_stats(args: &StatsArgs) -> Result<()> {
    let options = OutputOptions {
        nodata: args.nodata,
        thematic: args.thematic,
        build_pyramids: !args.no_pyramids,
        min_overview_dim: args.min_overview_dim,
        ..OutputOptions::default()
    };
    let summaries = writer::finalize_existing(&args.path, &options)?;
    for (band, summary) in summaries.iter().enumerate() {
        match &summary.stats {
            Some(s) => info!(
                "Band {}: min {} max {} mean {:.4} stddev {:.4} ({} pixels)",
                band + 1,
                s.min,
                s.max,
                s.mean,
                s.stddev,
                s.count
            ),
            None => info!("Band {}: no valid pixels", band + 1),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Set thread pool size if specified
    if let Some(n_threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .map_err(|e| BlockError::InvalidConfig(format!("thread pool: {}", e)))?;
    }

    match cli.command {
        Command::Info { path } => print_info(&path),
        Command::Stats(args) => run_stats(&args),
        Command::Worker { transform, output } => {
            let transform = Builtin::new(transform, output);
            subprocess::serve_worker(&transform, io::stdin().lock(), io::stdout().lock())?;
            Ok(())
        }
        Command::Apply(args) => {
            info!("=== raster-blocks {} ===", args.transform.as_str());
            let transform = Builtin::new(args.transform, args.output.0.clone());
            let summary = engine::apply(&transform, &args.inputs(), &args.outputs(), &args.controls()?)?;
            for report in &summary.outputs {
                info!(
                    "Wrote {} ({} band {}, {} overview levels)",
                    report.path.display(),
                    report.band_count,
                    report.pixel_type.gdal_name(),
                    report.overview_levels.len()
                );
            }
            info!("=== Done! ===");
            Ok(())
        }
    }
}
