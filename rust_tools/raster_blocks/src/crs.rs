use crate::error::{BlockError, Result};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use log::{debug, warn};

/// Parse a WKT projection, forcing x/y (easting/northing) axis order.
pub fn spatial_ref(projection_wkt: &str) -> Result<SpatialRef> {
    let srs = SpatialRef::from_wkt(projection_wkt)?;
    unsafe {
        gdal_sys::OSRSetAxisMappingStrategy(
            srs.to_c_hsrs(),
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
    }
    Ok(srs)
}

/// Whether two WKT strings describe the same coordinate system.
///
/// Identical strings are equivalent without consulting GDAL. An empty string
/// only matches another empty string.
pub fn equivalent_projection(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if a.trim().is_empty() || b.trim().is_empty() {
        return false;
    }

    match (SpatialRef::from_wkt(a), SpatialRef::from_wkt(b)) {
        (Ok(sa), Ok(sb)) => sa == sb,
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to parse projection WKT, treating as different: {}", e);
            false
        }
    }
}

/// Transform points in place from one projection to another.
pub fn transform_points(
    source_wkt: &str,
    target_wkt: &str,
    xs: &mut [f64],
    ys: &mut [f64],
) -> Result<()> {
    if xs.len() != ys.len() {
        return Err(BlockError::InvalidConfig(format!(
            "coordinate arrays differ in length ({} vs {})",
            xs.len(),
            ys.len()
        )));
    }

    let source = spatial_ref(source_wkt)?;
    let target = spatial_ref(target_wkt)?;
    let transform = CoordTransform::new(&source, &target)?;

    let mut zs = vec![0.0; xs.len()];
    transform.transform_coords(xs, ys, &mut zs)?;

    debug!("Transformed {} points between projections", xs.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings_equivalent() {
        assert!(equivalent_projection("LOCAL_CS[\"grid\"]", "LOCAL_CS[\"grid\"]"));
        assert!(equivalent_projection("", ""));
    }

    #[test]
    fn test_empty_never_matches_defined() {
        let wkt = SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap();
        assert!(!equivalent_projection("", &wkt));
        assert!(!equivalent_projection(&wkt, " "));
    }

    #[test]
    fn test_equivalent_after_round_trip() {
        let a = SpatialRef::from_epsg(32755).unwrap().to_wkt().unwrap();
        let b = SpatialRef::from_wkt(&a).unwrap().to_pretty_wkt().unwrap();
        assert!(equivalent_projection(&a, &b));

        let other = SpatialRef::from_epsg(32756).unwrap().to_wkt().unwrap();
        assert!(!equivalent_projection(&a, &other));
    }

    #[test]
    fn test_transform_points_geographic_to_utm() {
        let geo = SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap();
        let utm = SpatialRef::from_epsg(32755).unwrap().to_wkt().unwrap();
        // Central meridian of zone 55 maps to false easting
        let mut xs = [147.0];
        let mut ys = [-35.0];
        transform_points(&geo, &utm, &mut xs, &mut ys).unwrap();
        assert!((xs[0] - 500_000.0).abs() < 1e-3);
        assert!(ys[0] > 6_000_000.0 && ys[0] < 6_200_000.0);
    }
}
