//! GDAL utility programs (`gdalwarp`, `gdal_rasterize`) called in-process
//! through their library entry points.

use crate::array::PixelType;
use crate::config::{ResampleMethod, VectorOptions};
use crate::error::{BlockError, Result};
use crate::pixelgrid::PixelGridDefn;
use gdal::cpl::CslStringList;
use gdal::Dataset;
use log::debug;
use std::ffi::{c_int, CStr, CString};
use std::path::Path;

fn last_error_message() -> String {
    unsafe {
        let msg = gdal_sys::CPLGetLastErrorMsg();
        if msg.is_null() {
            String::new()
        } else {
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

pub(crate) fn check_rc(rc: gdal_sys::CPLErr::Type, method: &'static str) -> Result<()> {
    if rc == gdal_sys::CPLErr::CE_None {
        Ok(())
    } else {
        Err(BlockError::GdalCall {
            method,
            msg: last_error_message(),
        })
    }
}

fn string_list(args: &[String]) -> Result<CslStringList> {
    let mut list = CslStringList::new();
    for arg in args {
        list.add_string(arg)?;
    }
    Ok(list)
}

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.to_string_lossy().as_ref())
        .map_err(|e| BlockError::InvalidConfig(format!("bad path {}: {}", path.display(), e)))
}

fn fmt_values(values: &[f64]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

struct WarpAppOptionsWrapper {
    options: *mut gdal_sys::GDALWarpAppOptions,
}

impl WarpAppOptionsWrapper {
    fn new(args: &[String]) -> Result<Self> {
        let c_args = string_list(args)?;
        let options = unsafe { gdal_sys::GDALWarpAppOptionsNew(c_args.as_ptr(), std::ptr::null_mut()) };
        if options.is_null() {
            return Err(BlockError::GdalCall {
                method: "GDALWarpAppOptionsNew",
                msg: last_error_message(),
            });
        }
        Ok(Self { options })
    }
}

impl Drop for WarpAppOptionsWrapper {
    fn drop(&mut self) {
        unsafe {
            gdal_sys::GDALWarpAppOptionsFree(self.options);
        }
    }
}

struct RasterizeOptionsWrapper {
    options: *mut gdal_sys::GDALRasterizeOptions,
}

impl RasterizeOptionsWrapper {
    fn new(args: &[String]) -> Result<Self> {
        let c_args = string_list(args)?;
        let options =
            unsafe { gdal_sys::GDALRasterizeOptionsNew(c_args.as_ptr(), std::ptr::null_mut()) };
        if options.is_null() {
            return Err(BlockError::GdalCall {
                method: "GDALRasterizeOptionsNew",
                msg: last_error_message(),
            });
        }
        Ok(Self { options })
    }
}

impl Drop for RasterizeOptionsWrapper {
    fn drop(&mut self) {
        unsafe {
            gdal_sys::GDALRasterizeOptionsFree(self.options);
        }
    }
}

/// Arguments warping a raster onto exactly `grid`.
///
/// `source_nodata` overrides what the file declares; `fill` is written where
/// the source has no data, or left out to let GDAL fill with zero.
pub fn warp_args(
    grid: &PixelGridDefn,
    resample: ResampleMethod,
    source_nodata: Option<&[f64]>,
    fill: Option<&[f64]>,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-of".into(), "VRT".into()];
    if !grid.projection.trim().is_empty() {
        args.extend(["-t_srs".to_string(), grid.projection.clone()]);
    }
    args.extend([
        "-te".to_string(),
        grid.xmin.to_string(),
        grid.ymin.to_string(),
        grid.xmax.to_string(),
        grid.ymax.to_string(),
        "-tr".to_string(),
        grid.xres.to_string(),
        grid.yres.to_string(),
        "-r".to_string(),
        resample.gdal_name().to_string(),
    ]);
    if let Some(values) = source_nodata {
        args.extend(["-srcnodata".to_string(), fmt_values(values)]);
    }
    if let Some(values) = fill {
        args.extend(["-dstnodata".to_string(), fmt_values(values)]);
    }
    args
}

/// Write a warped virtual view of `source` to `dest` (`gdalwarp -of VRT`).
pub fn warp_to_file(source: &Dataset, dest: &Path, args: &[String]) -> Result<()> {
    debug!("gdalwarp {} -> {}", args.join(" "), dest.display());
    let options = WarpAppOptionsWrapper::new(args)?;
    let dest_c = path_cstring(dest)?;

    let mut user_error: c_int = 0;
    let output = unsafe {
        let mut source_handle = source.c_dataset();
        gdal_sys::GDALWarp(
            dest_c.as_ptr(),
            std::ptr::null_mut(),
            1,
            &mut source_handle,
            options.options,
            &mut user_error,
        )
    };

    if user_error != 0 {
        return Err(BlockError::GdalCall {
            method: "GDALWarp",
            msg: "invalid arguments".to_string(),
        });
    }
    if output.is_null() {
        return Err(BlockError::GdalCall {
            method: "GDALWarp",
            msg: last_error_message(),
        });
    }

    // Closing the handle flushes the VRT to disk
    drop(unsafe { Dataset::from_c_dataset(output) });
    Ok(())
}

/// Arguments rasterizing one vector layer onto exactly `grid`.
pub fn rasterize_args(grid: &PixelGridDefn, vector: &VectorOptions, layer_name: &str) -> Vec<String> {
    let null = vector.null_value.to_string();
    let mut args: Vec<String> = vec![
        "-of".into(),
        "GTiff".into(),
        "-co".into(),
        "COMPRESS=DEFLATE".into(),
        "-co".into(),
        "TILED=YES".into(),
        "-te".into(),
        grid.xmin.to_string(),
        grid.ymin.to_string(),
        grid.xmax.to_string(),
        grid.ymax.to_string(),
        "-tr".into(),
        grid.xres.to_string(),
        grid.yres.to_string(),
        "-ot".into(),
        vector_type_name(vector.data_type).into(),
        "-init".into(),
        null.clone(),
        "-a_nodata".into(),
        null,
    ];

    match &vector.burn_attribute {
        Some(attribute) => args.extend(["-a".to_string(), attribute.clone()]),
        None => args.extend(["-burn".to_string(), vector.burn_value.to_string()]),
    }
    match &vector.sql {
        Some(sql) => args.extend(["-sql".to_string(), sql.clone()]),
        None => args.extend(["-l".to_string(), layer_name.to_string()]),
    }
    if let Some(filter) = &vector.filter {
        args.extend(["-where".to_string(), filter.clone()]);
    }
    if vector.all_touched {
        args.push("-at".into());
    }
    args
}

fn vector_type_name(pixel_type: PixelType) -> &'static str {
    pixel_type.gdal_name()
}

/// Burn the vector `source` into a new raster at `dest` (`gdal_rasterize`).
pub fn rasterize_to_file(source: &Dataset, dest: &Path, args: &[String]) -> Result<()> {
    debug!("gdal_rasterize {} -> {}", args.join(" "), dest.display());
    let options = RasterizeOptionsWrapper::new(args)?;
    let dest_c = path_cstring(dest)?;

    let mut user_error: c_int = 0;
    let output = unsafe {
        gdal_sys::GDALRasterize(
            dest_c.as_ptr(),
            std::ptr::null_mut(),
            source.c_dataset(),
            options.options,
            &mut user_error,
        )
    };

    if user_error != 0 {
        return Err(BlockError::GdalCall {
            method: "GDALRasterize",
            msg: "invalid arguments".to_string(),
        });
    }
    if output.is_null() {
        return Err(BlockError::GdalCall {
            method: "GDALRasterize",
            msg: last_error_message(),
        });
    }

    drop(unsafe { Dataset::from_c_dataset(output) });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> PixelGridDefn {
        PixelGridDefn::new("", 0.0, 100.0, -50.0, 50.0, 10.0, 5.0).unwrap()
    }

    #[test]
    fn test_warp_args() {
        let args = warp_args(&grid(), ResampleMethod::Cubic, None, Some(&[0.0, -9999.0]));
        assert_eq!(&args[0..2], &["-of", "VRT"]);
        assert!(!args.contains(&"-t_srs".to_string()));
        let te = args.iter().position(|a| a == "-te").unwrap();
        assert_eq!(&args[te + 1..te + 5], &["0", "-50", "100", "50"]);
        let r = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[r + 1], "cubic");
        let nd = args.iter().position(|a| a == "-dstnodata").unwrap();
        assert_eq!(args[nd + 1], "0 -9999");
        assert!(!args.contains(&"-srcnodata".to_string()));
    }

    #[test]
    fn test_rasterize_args_burn_attribute_and_sql() {
        let vector = VectorOptions {
            burn_attribute: Some("class".into()),
            sql: Some("SELECT * FROM roads".into()),
            all_touched: true,
            null_value: 255.0,
            ..VectorOptions::default()
        };
        let args = rasterize_args(&grid(), &vector, "roads");
        let a = args.iter().position(|x| x == "-a").unwrap();
        assert_eq!(args[a + 1], "class");
        assert!(!args.contains(&"-burn".to_string()));
        assert!(!args.contains(&"-l".to_string()));
        assert!(args.contains(&"-at".to_string()));
        let init = args.iter().position(|x| x == "-init").unwrap();
        assert_eq!(args[init + 1], "255");
        let ot = args.iter().position(|x| x == "-ot").unwrap();
        assert_eq!(args[ot + 1], "Byte");
    }

    #[test]
    fn test_rasterize_args_default_burn() {
        let args = rasterize_args(&grid(), &VectorOptions::default(), "layer0");
        let burn = args.iter().position(|x| x == "-burn").unwrap();
        assert_eq!(args[burn + 1], "1");
        let l = args.iter().position(|x| x == "-l").unwrap();
        assert_eq!(args[l + 1], "layer0");
    }
}
