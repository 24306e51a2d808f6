//! GDAL/PROJ backed CRS registry
//!
//! GDAL spatial references are not thread safe, so [`Crs`] tokens only carry WKT and the
//! spatial references and transforms are rebuilt whenever a transform is requested.

use crate::core::crs::{AxisDirection, Crs, CrsProvider, PointTransform};
use crate::types::{ReprojError, ReprojResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal_sys::OGRAxisOrientation;

/// Production [`CrsProvider`] with traditional GIS axis order (longitude/easting first)
pub struct GdalCrsProvider {
    geographic: Crs,
}

impl GdalCrsProvider {
    pub fn new() -> ReprojResult<Self> {
        let srs = SpatialRef::from_epsg(4326)?;
        let geographic = Self::to_crs("EPSG:4326", &srs)?;
        log::debug!("GDAL CRS provider ready");
        Ok(Self { geographic })
    }

    fn spatial_ref(wkt: &str) -> ReprojResult<SpatialRef> {
        let srs = SpatialRef::from_wkt(wkt)?;
        srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        Ok(srs)
    }

    fn axis_direction(srs: &SpatialRef, target_key: &str, axis: i32) -> AxisDirection {
        match srs.axis_orientation(target_key, axis) {
            Ok(OGRAxisOrientation::OAO_East) => AxisDirection::East,
            Ok(OGRAxisOrientation::OAO_West) => AxisDirection::West,
            Ok(OGRAxisOrientation::OAO_North) => AxisDirection::North,
            Ok(OGRAxisOrientation::OAO_South) => AxisDirection::South,
            Ok(OGRAxisOrientation::OAO_Up) => AxisDirection::Up,
            Ok(OGRAxisOrientation::OAO_Down) => AxisDirection::Down,
            _ => AxisDirection::Other,
        }
    }

    /// Axis directions in data order, i.e. after longitude/easting has been forced first
    fn data_axes(srs: &SpatialRef) -> [AxisDirection; 2] {
        if srs.is_geographic() {
            return [AxisDirection::East, AxisDirection::North];
        }
        let key = if srs.is_projected() { "PROJCS" } else { "LOCAL_CS" };
        let first = Self::axis_direction(srs, key, 0);
        let second = Self::axis_direction(srs, key, 1);
        let northing_first = matches!(first, AxisDirection::North | AxisDirection::South)
            && matches!(second, AxisDirection::East | AxisDirection::West);
        match (northing_first, first, second) {
            (true, _, _) => [second, first],
            (false, AxisDirection::Other, AxisDirection::Other) => [AxisDirection::East, AxisDirection::North],
            _ => [first, second],
        }
    }

    fn to_crs(name: &str, srs: &SpatialRef) -> ReprojResult<Crs> {
        let wkt = srs.to_wkt()?;
        Ok(Crs::from_wkt_parts(name, wkt, Self::data_axes(srs), srs.is_geographic()))
    }

    fn resolution_error(spec: &str, e: impl std::fmt::Display) -> ReprojError {
        ReprojError::CrsResolution {
            spec: spec.to_string(),
            reason: e.to_string(),
        }
    }
}

impl CrsProvider for GdalCrsProvider {
    fn decode(&self, code: &str) -> ReprojResult<Crs> {
        if code.eq_ignore_ascii_case("EPSG:4326") {
            return Ok(self.geographic.clone());
        }
        let srs = SpatialRef::from_definition(code).map_err(|e| Self::resolution_error(code, e))?;
        srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        let crs = Self::to_crs(code, &srs).map_err(|e| Self::resolution_error(code, e))?;
        log::debug!("Decoded {} (axes {:?})", code, [crs.axis_direction(0), crs.axis_direction(1)]);
        Ok(crs)
    }

    fn parse_wkt(&self, wkt: &str) -> ReprojResult<Crs> {
        let srs = Self::spatial_ref(wkt.trim()).map_err(|e| Self::resolution_error(wkt, e))?;
        let name = match (srs.auth_name(), srs.auth_code()) {
            (Ok(authority), Ok(code)) => format!("{}:{}", authority, code),
            _ => "WKT".to_string(),
        };
        Self::to_crs(&name, &srs).map_err(|e| Self::resolution_error(wkt, e))
    }

    fn geographic(&self) -> ReprojResult<Crs> {
        Ok(self.geographic.clone())
    }

    fn create_transform(&self, source: &Crs, target: &Crs) -> ReprojResult<Box<dyn PointTransform>> {
        let missing = |reason: String| ReprojError::MissingTransform {
            source_crs: source.to_string(),
            target_crs: target.to_string(),
            reason,
        };
        let (source_wkt, target_wkt) = match (source.wkt(), target.wkt()) {
            (Some(s), Some(t)) => (s, t),
            _ => return Err(missing("image CRSs have no GDAL definition".to_string())),
        };
        let source_srs = Self::spatial_ref(source_wkt).map_err(|e| missing(e.to_string()))?;
        let target_srs = Self::spatial_ref(target_wkt).map_err(|e| missing(e.to_string()))?;
        let transform = CoordTransform::new(&source_srs, &target_srs).map_err(|e| missing(e.to_string()))?;
        Ok(Box::new(GdalPointTransform { transform }))
    }
}

/// [`PointTransform`] over a GDAL coordinate transformation
pub struct GdalPointTransform {
    transform: CoordTransform,
}

impl PointTransform for GdalPointTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> ReprojResult<()> {
        let mut zs = vec![0.0; xs.len()];
        let valid = xs.iter().zip(ys.iter()).all(|(x, y)| x.is_finite() && y.is_finite());

        if !valid || self.transform.transform_coords(xs, ys, &mut zs).is_err() {
            // Batch refused, retry point by point and mark the failures
            for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
                if !(x.is_finite() && y.is_finite()) {
                    *x = f64::NAN;
                    *y = f64::NAN;
                    continue;
                }
                let (mut px, mut py, mut pz) = ([*x], [*y], [0.0]);
                match self.transform.transform_coords(&mut px, &mut py, &mut pz) {
                    Ok(()) => {
                        *x = px[0];
                        *y = py[0];
                    }
                    Err(_) => {
                        *x = f64::NAN;
                        *y = f64::NAN;
                    }
                }
            }
        }

        for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
            if !(x.is_finite() && y.is_finite()) {
                *x = f64::NAN;
                *y = f64::NAN;
            }
        }
        Ok(())
    }
}
