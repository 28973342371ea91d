use crate::config::OutputOptions;
use crate::error::{BlockError, Result};
use gdal::Dataset;
use log::{debug, info};

/// Drivers that can hold empty overview levels created before the pixel
/// data, which single-pass pyramids write into.
const SINGLE_PASS_PYRAMID_DRIVERS: [&str; 3] = ["GTiff", "KEA", "HFA"];

/// GTiff tile edge when the creation options do not set one.
const GTIFF_DEFAULT_TILE: usize = 256;

/// Codecs accepted in a GTiff `COMPRESS` option.
const GTIFF_CODECS: [&str; 6] = ["DEFLATE", "LZW", "ZSTD", "LZMA", "PACKBITS", "NONE"];

/// Value of `KEY=VALUE` in a creation option list, key matched case-insensitively.
pub fn option_value<'a>(options: &'a [String], key: &str) -> Option<&'a str> {
    options.iter().rev().find_map(|opt| {
        let (k, v) = opt.split_once('=')?;
        k.trim().eq_ignore_ascii_case(key).then(|| v.trim())
    })
}

/// Storage layout a GTiff output's creation options ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtiffLayout {
    /// Upper-cased codec, `NONE` when unset.
    pub compression: String,
    /// Tile edges, `None` for a striped file.
    pub tiles: Option<(usize, usize)>,
}

impl GtiffLayout {
    /// `None` for drivers other than GTiff.
    pub fn of(options: &OutputOptions) -> Result<Option<Self>> {
        if !options.driver.eq_ignore_ascii_case("GTiff") {
            return Ok(None);
        }
        let creation = &options.creation_options;

        let compression = option_value(creation, "COMPRESS")
            .map(str::to_uppercase)
            .unwrap_or_else(|| "NONE".to_string());
        if !GTIFF_CODECS.contains(&compression.as_str()) {
            return Err(BlockError::InvalidCompression(compression));
        }

        let tiled = option_value(creation, "TILED")
            .map(|v| matches!(v.to_uppercase().as_str(), "YES" | "TRUE" | "ON" | "1"))
            .unwrap_or(false);
        let tile_dim = |key: &str| -> Result<usize> {
            let size = match option_value(creation, key) {
                Some(v) => v
                    .parse::<usize>()
                    .map_err(|_| BlockError::InvalidConfig(format!("{}={} is not a number", key, v)))?,
                None => GTIFF_DEFAULT_TILE,
            };
            if size == 0 || size % 16 != 0 {
                return Err(BlockError::InvalidTileSize(size));
            }
            Ok(size)
        };
        let tiles = if tiled {
            Some((tile_dim("BLOCKXSIZE")?, tile_dim("BLOCKYSIZE")?))
        } else {
            None
        };

        Ok(Some(Self { compression, tiles }))
    }

    pub fn is_compressed(&self) -> bool {
        self.compression != "NONE"
    }
}

/// Reject GTiff layouts that make GDAL rewrite compressed tiles.
///
/// GTiff never reclaims the space of a rewritten compressed tile, so a block
/// that covers part of a tile, written after a neighbour that covers the
/// rest, leaves a dead copy of the tile in the file. Compressed output must
/// be tiled with tiles that divide the block size.
pub fn validate_gtiff_layout(
    slot: &str,
    layout: &GtiffLayout,
    block_width: usize,
    block_height: usize,
) -> Result<()> {
    if !layout.is_compressed() {
        return Ok(());
    }
    let layout_error = |reason: String| BlockError::GtiffLayout {
        slot: slot.to_string(),
        reason,
    };

    let (tile_x, tile_y) = layout
        .tiles
        .ok_or_else(|| layout_error(format!("COMPRESS={} requires TILED=YES", layout.compression)))?;
    if block_width % tile_x != 0 || block_height % tile_y != 0 {
        return Err(layout_error(format!(
            "block size {}x{} is not a multiple of tile size {}x{}",
            block_width, block_height, tile_x, tile_y
        )));
    }
    Ok(())
}

pub fn driver_supports_single_pass_pyramids(driver: &str) -> bool {
    SINGLE_PASS_PYRAMID_DRIVERS
        .iter()
        .any(|d| d.eq_ignore_ascii_case(driver))
}

/// Overview factors for a raster of the given size.
///
/// Explicit levels are kept while the reduced raster's smaller side stays at
/// or above `min_dim`. Without explicit levels the factor starts at 2 and
/// doubles under the same condition.
pub fn overview_levels(
    width: usize,
    height: usize,
    explicit: Option<&[u32]>,
    min_dim: usize,
) -> Vec<i32> {
    let min_side = width.min(height);
    let min_dim = min_dim.max(1);

    match explicit {
        Some(levels) => levels
            .iter()
            .filter(|&&level| level > 1 && min_side / level as usize >= min_dim)
            .map(|&level| level as i32)
            .collect(),
        None => {
            let mut overview_levels: Vec<i32> = Vec::new();
            let mut level = 2;

            // Halve until the smaller side drops below the floor
            while (min_side / level) >= min_dim {
                overview_levels.push(level as i32);
                level *= 2;
            }
            overview_levels
        }
    }
}

/// Build overviews using GDAL's internal overview generation
pub fn build_overviews(dataset: &mut Dataset, resampling: &str, levels: &[i32]) -> Result<()> {
    if levels.is_empty() {
        let (width, height) = dataset.raster_size();
        debug!("Raster too small for overviews ({}x{}), skipping", width, height);
        return Ok(());
    }

    info!(
        "Building {} overview levels {:?} with {} resampling",
        levels.len(),
        levels,
        resampling
    );

    // Empty bands list means build for all bands
    dataset.build_overviews(resampling, levels, &[])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn gtiff(items: &[&str]) -> OutputOptions {
        OutputOptions {
            creation_options: opts(items),
            ..OutputOptions::default()
        }
    }

    fn layout(items: &[&str]) -> GtiffLayout {
        GtiffLayout::of(&gtiff(items)).unwrap().unwrap()
    }

    #[test]
    fn test_layout_from_default_options() {
        let defaults = GtiffLayout::of(&OutputOptions::default()).unwrap().unwrap();
        assert_eq!(defaults.compression, "DEFLATE");
        assert_eq!(defaults.tiles, Some((256, 256)));
        assert!(defaults.is_compressed());
    }

    #[test]
    fn test_layout_parsing() {
        let striped = layout(&["compress=lzw"]);
        assert_eq!((striped.compression.as_str(), striped.tiles), ("LZW", None));
        assert!(!layout(&[]).is_compressed());
        assert_eq!(layout(&["TILED=YES", "BLOCKXSIZE=512"]).tiles, Some((512, 256)));

        let hfa = OutputOptions {
            driver: "HFA".to_string(),
            ..gtiff(&["COMPRESS=YES"])
        };
        assert_eq!(GtiffLayout::of(&hfa).unwrap(), None);
    }

    #[test]
    fn test_layout_rejects_bad_codec_and_tiles() {
        assert!(matches!(
            GtiffLayout::of(&gtiff(&["COMPRESS=jpeg2"])),
            Err(BlockError::InvalidCompression(c)) if c == "JPEG2"
        ));
        assert!(matches!(
            GtiffLayout::of(&gtiff(&["TILED=YES", "BLOCKXSIZE=100"])),
            Err(BlockError::InvalidTileSize(100))
        ));
        // Tile options of a striped file are not looked at
        assert!(GtiffLayout::of(&gtiff(&["BLOCKXSIZE=100"])).is_ok());
    }

    #[test]
    fn test_gtiff_layout_accepts_matching_tiles() {
        let defaults = layout(&["COMPRESS=DEFLATE", "TILED=YES"]);
        assert!(validate_gtiff_layout("out", &defaults, 256, 256).is_ok());
        assert!(validate_gtiff_layout("out", &defaults, 512, 1024).is_ok());
        assert!(validate_gtiff_layout("out", &layout(&["COMPRESS=NONE"]), 100, 100).is_ok());
    }

    #[test]
    fn test_gtiff_layout_rejects_bloat() {
        assert!(matches!(
            validate_gtiff_layout("out", &layout(&["COMPRESS=LZW"]), 256, 256),
            Err(BlockError::GtiffLayout { .. })
        ));
        assert!(matches!(
            validate_gtiff_layout("out", &layout(&["COMPRESS=DEFLATE", "TILED=YES"]), 300, 256),
            Err(BlockError::GtiffLayout { .. })
        ));
    }

    #[test]
    fn test_overview_levels_halving() {
        assert_eq!(overview_levels(1000, 800, None, 100), vec![2, 4, 8]);
        assert!(overview_levels(50, 50, None, 33).is_empty());
    }

    #[test]
    fn test_overview_levels_explicit() {
        let levels = overview_levels(1000, 1000, Some(&[4, 8, 16, 32, 64]), 33);
        assert_eq!(levels, vec![4, 8, 16]);
    }

    #[test]
    fn test_single_pass_drivers() {
        assert!(driver_supports_single_pass_pyramids("gtiff"));
        assert!(driver_supports_single_pass_pyramids("KEA"));
        assert!(!driver_supports_single_pass_pyramids("PNG"));
    }
}
