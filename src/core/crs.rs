//! Coordinate reference systems and their resolution
//!
//! A [`Crs`] is an opaque token: it carries a display name, its WKT (for CRSs known to a
//! [`CrsProvider`]) and the direction of its two axes as seen by this crate, i.e. after
//! the provider has forced longitude/easting onto X and latitude/northing onto Y.
//! Two `Crs` values are equal only if they are the same resolved object.
//!
//! Image CRSs are the exception to the provider rule: their model coordinates are the
//! full-resolution pixel coordinates of a raster and the mapping to geographic
//! coordinates is the raster's own [`GeoCoding`]. They let rasters without an affine
//! map geocoding (tie-point grids, orthorectified swaths) take part in reprojection.

use crate::core::geocoding::{GeoCoding, SceneReference};
use crate::types::{GeoPos, PixelPos, ReprojError, ReprojResult};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Direction of a coordinate system axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisDirection {
    East,
    West,
    North,
    South,
    Up,
    Down,
    DisplayRight,
    DisplayLeft,
    DisplayUp,
    DisplayDown,
    Other,
}

enum CrsDefinition {
    Wkt(String),
    Image(Arc<dyn GeoCoding>),
}

struct CrsInner {
    name: String,
    definition: CrsDefinition,
    axes: [AxisDirection; 2],
    geographic: bool,
}

/// Opaque, identity-compared coordinate reference system
#[derive(Clone)]
pub struct Crs(Arc<CrsInner>);

impl Crs {
    /// Create a CRS known to a provider by its WKT
    pub fn from_wkt_parts(
        name: impl Into<String>,
        wkt: impl Into<String>,
        axes: [AxisDirection; 2],
        geographic: bool,
    ) -> Self {
        Crs(Arc::new(CrsInner {
            name: name.into(),
            definition: CrsDefinition::Wkt(wkt.into()),
            axes,
            geographic,
        }))
    }

    /// Image CRS whose model coordinates are the pixel coordinates of `geocoding`
    pub fn image(name: impl Into<String>, geocoding: Arc<dyn GeoCoding>) -> Self {
        Crs(Arc::new(CrsInner {
            name: name.into(),
            definition: CrsDefinition::Image(geocoding),
            axes: [AxisDirection::DisplayRight, AxisDirection::DisplayDown],
            geographic: false,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn wkt(&self) -> Option<&str> {
        match &self.0.definition {
            CrsDefinition::Wkt(wkt) => Some(wkt),
            CrsDefinition::Image(_) => None,
        }
    }

    pub fn image_geocoding(&self) -> Option<&Arc<dyn GeoCoding>> {
        match &self.0.definition {
            CrsDefinition::Image(gc) => Some(gc),
            CrsDefinition::Wkt(_) => None,
        }
    }

    /// Direction of axis 0 (X) or axis 1 (Y)
    pub fn axis_direction(&self, axis: usize) -> AxisDirection {
        self.0.axes.get(axis).copied().unwrap_or(AxisDirection::Other)
    }

    pub fn is_geographic(&self) -> bool {
        self.0.geographic
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crs")
            .field("name", &self.0.name)
            .field("axes", &self.0.axes)
            .field("image", &self.image_geocoding().is_some())
            .finish()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

/// Batched coordinate transform between two model spaces.
///
/// Points that cannot be transformed are set to NaN rather than failing the batch.
pub trait PointTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> ReprojResult<()>;
}

pub struct IdentityTransform;

impl PointTransform for IdentityTransform {
    fn transform(&self, _xs: &mut [f64], _ys: &mut [f64]) -> ReprojResult<()> {
        Ok(())
    }
}

/// Applies each transform in order
pub struct ChainedTransform(pub Vec<Box<dyn PointTransform>>);

impl PointTransform for ChainedTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> ReprojResult<()> {
        for step in &self.0 {
            step.transform(xs, ys)?;
        }
        Ok(())
    }
}

/// Geographic lon/lat to pixel coordinates through a geocoding
pub struct GeoToPixelTransform(pub Arc<dyn GeoCoding>);

impl PointTransform for GeoToPixelTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> ReprojResult<()> {
        for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
            let pos = GeoPos::new(*x, *y);
            match self.0.pixel_pos(pos).filter(|_| pos.is_valid()) {
                Some(p) => {
                    *x = p.x;
                    *y = p.y;
                }
                None => {
                    *x = f64::NAN;
                    *y = f64::NAN;
                }
            }
        }
        Ok(())
    }
}

/// Pixel coordinates to geographic lon/lat through a geocoding
pub struct PixelToGeoTransform(pub Arc<dyn GeoCoding>);

impl PointTransform for PixelToGeoTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> ReprojResult<()> {
        for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
            let geo = if x.is_finite() && y.is_finite() {
                self.0.geo_pos(PixelPos::new(*x, *y))
            } else {
                None
            };
            match geo {
                Some(g) => {
                    *x = g.lon;
                    *y = g.lat;
                }
                None => {
                    *x = f64::NAN;
                    *y = f64::NAN;
                }
            }
        }
        Ok(())
    }
}

/// Replaceable CRS registry and coordinate transform library
pub trait CrsProvider: Send + Sync {
    /// Decode an authority code (`EPSG:4326`, `AUTO:42001,lon,lat`, ...).
    ///
    /// Implementations must force longitude/easting onto X and latitude/northing onto Y,
    /// whatever the registry's native axis order is.
    fn decode(&self, code: &str) -> ReprojResult<Crs>;

    /// Parse a well-known-text CRS definition, with the same axis order rule as `decode`
    fn parse_wkt(&self, wkt: &str) -> ReprojResult<Crs>;

    /// WGS84 longitude/latitude, the CRS geocodings express positions in
    fn geographic(&self) -> ReprojResult<Crs>;

    /// Transform between two provider CRSs. Image CRSs are never passed here.
    fn create_transform(&self, source: &Crs, target: &Crs) -> ReprojResult<Box<dyn PointTransform>>;
}

/// Transform from model coordinates of `source` to model coordinates of `target`.
///
/// Image CRSs are routed through their geocoding and geographic coordinates;
/// everything else is handed to the provider.
pub fn find_model_transform(
    provider: &dyn CrsProvider,
    source: &Crs,
    target: &Crs,
) -> ReprojResult<Box<dyn PointTransform>> {
    if source == target {
        return Ok(Box::new(IdentityTransform));
    }
    match (source.image_geocoding(), target.image_geocoding()) {
        (None, None) => provider.create_transform(source, target),
        (None, Some(target_gc)) => {
            let geographic = provider.geographic()?;
            let mut steps: Vec<Box<dyn PointTransform>> = Vec::new();
            if *source != geographic {
                steps.push(provider.create_transform(source, &geographic)?);
            }
            steps.push(Box::new(GeoToPixelTransform(Arc::clone(target_gc))));
            Ok(Box::new(ChainedTransform(steps)))
        }
        (Some(source_gc), None) => {
            let geographic = provider.geographic()?;
            let mut steps: Vec<Box<dyn PointTransform>> =
                vec![Box::new(PixelToGeoTransform(Arc::clone(source_gc)))];
            if *target != geographic {
                steps.push(provider.create_transform(&geographic, target)?);
            }
            Ok(Box::new(ChainedTransform(steps)))
        }
        (Some(source_gc), Some(target_gc)) => Ok(Box::new(ChainedTransform(vec![
            Box::new(PixelToGeoTransform(Arc::clone(source_gc))),
            Box::new(GeoToPixelTransform(Arc::clone(target_gc))),
        ]))),
    }
}

/// How the target CRS is specified. Exactly one mode is allowed.
#[derive(Debug, Clone)]
pub enum CrsSpec {
    Code(String),
    WktFile(PathBuf),
    Wkt(String),
    Collocation(Crs),
}

impl CrsSpec {
    /// Build the spec from the optional parameters, rejecting zero or several modes
    pub fn from_parts(
        crs_code: Option<&str>,
        wkt_file: Option<&Path>,
        wkt: Option<&str>,
        collocation: Option<Crs>,
    ) -> ReprojResult<CrsSpec> {
        Self::check_exclusive([
            crs_code.is_some(),
            wkt_file.is_some(),
            wkt.is_some(),
            collocation.is_some(),
        ])?;

        if let Some(code) = crs_code {
            Ok(CrsSpec::Code(code.to_string()))
        } else if let Some(path) = wkt_file {
            Ok(CrsSpec::WktFile(path.to_path_buf()))
        } else if let Some(text) = wkt {
            Ok(CrsSpec::Wkt(text.to_string()))
        } else {
            collocation
                .map(CrsSpec::Collocation)
                .ok_or(ReprojError::AmbiguousOrMissingCrsSpec("at least"))
        }
    }
}

impl CrsSpec {
    /// Exactly one of crs code, WKT file, WKT text and collocation product may be given
    pub fn check_exclusive(given: [bool; 4]) -> ReprojResult<()> {
        match given.iter().filter(|g| **g).count() {
            0 => Err(ReprojError::AmbiguousOrMissingCrsSpec("at least")),
            1 => Ok(()),
            _ => Err(ReprojError::AmbiguousOrMissingCrsSpec("only")),
        }
    }
}

/// Turns a [`CrsSpec`] into exactly one [`Crs`]
pub struct CrsResolver<'a> {
    provider: &'a dyn CrsProvider,
}

impl<'a> CrsResolver<'a> {
    pub fn new(provider: &'a dyn CrsProvider) -> Self {
        Self { provider }
    }

    pub fn resolve(&self, spec: &CrsSpec, scene: Option<&SceneReference<'_>>) -> ReprojResult<Crs> {
        let crs = match spec {
            CrsSpec::Code(code) => {
                let code = self.expand_code(code, scene)?;
                log::debug!("Decoding target CRS code {}", code);
                self.provider.decode(&code)?
            }
            CrsSpec::WktFile(path) => {
                log::debug!("Reading target CRS WKT from {}", path.display());
                let text = std::fs::read_to_string(path).map_err(|e| ReprojError::CrsResolution {
                    spec: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                self.provider.parse_wkt(&text)?
            }
            CrsSpec::Wkt(text) => self.provider.parse_wkt(text)?,
            CrsSpec::Collocation(crs) => crs.clone(),
        };
        log::info!("Target CRS: {}", crs);
        Ok(crs)
    }

    /// Normalise a CRS code: bare numbers get an `EPSG:` prefix and `AUTO:<n>` codes get
    /// the scene centre longitude and latitude appended.
    pub fn expand_code(&self, code: &str, scene: Option<&SceneReference<'_>>) -> ReprojResult<String> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ReprojError::InvalidCrsCode(code.to_string()));
        }
        let mut code = if code.chars().all(|c| c.is_ascii_digit()) {
            format!("EPSG:{}", code)
        } else {
            code.to_string()
        };

        let auto_pattern = Regex::new(r"^AUTO:[0-9]*$")
            .map_err(|e| ReprojError::Processing(format!("Regex error: {}", e)))?;
        if auto_pattern.is_match(&code) {
            let scene = scene.ok_or_else(|| ReprojError::CrsResolution {
                spec: code.clone(),
                reason: "AUTO codes need a geocoded source raster".to_string(),
            })?;
            let center = scene.center_geo_pos().ok_or_else(|| ReprojError::CrsResolution {
                spec: code.clone(),
                reason: "scene centre has no geographic position".to_string(),
            })?;
            code = format!("{},{},{}", code, center.lon, center.lat);
        }
        Ok(code)
    }
}

/// Pattern a `crsCode` parameter must match
pub fn is_valid_crs_code(code: &str) -> bool {
    Regex::new(r"^(?:[a-zA-Z]+:)?[0-9]+$")
        .map(|re| re.is_match(code))
        .unwrap_or(false)
}
