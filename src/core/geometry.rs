//! Target raster geometry derivation
//!
//! An [`ImageGeometry`] is a pixel rectangle, a model CRS and an invertible affine
//! image-to-model transform. Targets are either built explicitly from a reference pixel,
//! pixel size, orientation and size (with defaults covering the source footprint), or
//! copied from a collocation product's grid.

use crate::core::affine::AffineTransform;
use crate::core::crs::{find_model_transform, AxisDirection, Crs, CrsProvider};
use crate::core::geocoding::{GeoCoding, SceneReference};
use crate::types::{GeoPos, ModelBounds, PixelPos, Rect, ReprojError, ReprojResult};

/// Explicit grid parameters of a target geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridParams {
    pub reference_pixel_x: f64,
    pub reference_pixel_y: f64,
    pub easting: f64,
    pub northing: f64,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    /// Degrees
    pub orientation: f64,
}

impl GridParams {
    /// `translate(easting, northing) · scale(psX, psY) · rotate(-orientation) · translate(-refX, -refY)`
    pub fn image_to_model(&self) -> AffineTransform {
        AffineTransform::identity()
            .translate(self.easting, self.northing)
            .scale(self.pixel_size_x, self.pixel_size_y)
            .rotate((-self.orientation).to_radians())
            .translate(-self.reference_pixel_x, -self.reference_pixel_y)
    }
}

/// Reference pixel and its model position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Referencing {
    pub reference_pixel_x: f64,
    pub reference_pixel_y: f64,
    pub easting: f64,
    pub northing: f64,
}

/// User supplied target grid parameters; anything left out is derived from the source
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGridSpec {
    pub referencing: Option<Referencing>,
    pub pixel_size: Option<(f64, f64)>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub orientation: f64,
}

impl Default for TargetGridSpec {
    fn default() -> Self {
        Self {
            referencing: None,
            pixel_size: None,
            width: None,
            height: None,
            orientation: 0.0,
        }
    }
}

impl TargetGridSpec {
    /// Validate the all-or-nothing parameter groups and build the spec
    #[allow(clippy::too_many_arguments)]
    pub fn from_optional(
        reference_pixel_x: Option<f64>,
        reference_pixel_y: Option<f64>,
        easting: Option<f64>,
        northing: Option<f64>,
        pixel_size_x: Option<f64>,
        pixel_size_y: Option<f64>,
        width: Option<usize>,
        height: Option<usize>,
        orientation: Option<f64>,
    ) -> ReprojResult<Self> {
        let referencing = match (reference_pixel_x, reference_pixel_y, easting, northing) {
            (None, None, None, None) => None,
            (Some(rx), Some(ry), Some(e), Some(n)) => Some(Referencing {
                reference_pixel_x: rx,
                reference_pixel_y: ry,
                easting: e,
                northing: n,
            }),
            _ => return Err(ReprojError::InvalidReferencing),
        };

        let pixel_size = match (pixel_size_x, pixel_size_y) {
            (None, None) => None,
            (Some(x), Some(y)) => {
                if !(x.is_finite() && y.is_finite() && x > 0.0 && y > 0.0) {
                    return Err(ReprojError::InvalidGridSize(format!(
                        "pixel size must be positive, got ({}, {})",
                        x, y
                    )));
                }
                Some((x, y))
            }
            _ => return Err(ReprojError::InvalidPixelSize),
        };

        let orientation = orientation.unwrap_or(0.0);
        if !(0.0..=360.0).contains(&orientation) {
            return Err(ReprojError::InvalidOrientation(orientation));
        }

        for (name, value) in [("width", width), ("height", height)] {
            if value == Some(0) {
                return Err(ReprojError::InvalidGridSize(format!("{} must be positive", name)));
            }
        }

        Ok(Self {
            referencing,
            pixel_size,
            width,
            height,
            orientation,
        })
    }
}

/// Pixel grid of a raster and its mapping to model coordinates
#[derive(Debug, Clone)]
pub struct ImageGeometry {
    image_rect: Rect,
    model_crs: Crs,
    image_to_model: AffineTransform,
    grid: Option<GridParams>,
}

impl ImageGeometry {
    pub fn new(image_rect: Rect, model_crs: Crs, image_to_model: AffineTransform) -> ReprojResult<Self> {
        if image_rect.is_empty() {
            return Err(ReprojError::InvalidGeometry(format!(
                "image rectangle must not be empty: {:?}",
                image_rect
            )));
        }
        if !image_to_model.is_invertible() {
            return Err(ReprojError::InvalidGeometry(format!(
                "image-to-model transform is degenerate: {:?}",
                image_to_model
            )));
        }
        Ok(Self {
            image_rect,
            model_crs,
            image_to_model,
            grid: None,
        })
    }

    fn from_grid(image_rect: Rect, model_crs: Crs, grid: GridParams) -> ReprojResult<Self> {
        let mut geometry = Self::new(image_rect, model_crs, grid.image_to_model())?;
        geometry.grid = Some(grid);
        Ok(geometry)
    }

    pub fn image_rect(&self) -> Rect {
        self.image_rect
    }

    pub fn model_crs(&self) -> &Crs {
        &self.model_crs
    }

    pub fn image_to_model(&self) -> AffineTransform {
        self.image_to_model
    }

    pub fn model_to_image(&self) -> ReprojResult<AffineTransform> {
        self.image_to_model.inverse()
    }

    /// Explicit grid parameters, for geometries that were not copied from a product
    pub fn grid(&self) -> Option<&GridParams> {
        self.grid.as_ref()
    }

    /// Negate the Y pixel size of an explicit grid
    pub fn change_y_axis_direction(&mut self) {
        match self.grid.as_mut() {
            Some(grid) => {
                grid.pixel_size_y = -grid.pixel_size_y;
                self.image_to_model = grid.image_to_model();
            }
            None => log::debug!("Geometry has no explicit grid, Y axis left unchanged"),
        }
    }

    /// Copy the pixel grid, CRS and transform of a collocation product verbatim
    pub fn create_collocation_target_geometry(
        model_crs: Crs,
        geocoding: &dyn GeoCoding,
        width: usize,
        height: usize,
    ) -> ReprojResult<Self> {
        let i2m = crate::core::geocoding::image_to_model(geocoding);
        Self::new(Rect::from_size(width, height), model_crs, i2m)
    }

    /// Build a geometry in `target_crs` from the grid spec, deriving whatever the spec
    /// leaves out from the source footprint.
    pub fn create_target_geometry(
        source: &SceneReference<'_>,
        target_crs: &Crs,
        spec: &TargetGridSpec,
        provider: &dyn CrsProvider,
    ) -> ReprojResult<Self> {
        let needs_boundary = spec.pixel_size.is_none()
            || spec.width.is_none()
            || spec.height.is_none()
            || spec.referencing.is_none();

        let map_bounds = if needs_boundary {
            Some(create_map_boundary(source, target_crs, provider)?)
        } else {
            None
        };

        let (pixel_size_x, pixel_size_y) = match (spec.pixel_size, map_bounds) {
            (Some(ps), _) => ps,
            (None, Some(bounds)) => {
                // Single precision, matching the historic map-projection behaviour
                let mut size = (bounds.width() / source.width as f64)
                    .min(bounds.height() / source.height as f64) as f32;
                if size == 0.0 {
                    size = 1.0;
                }
                if !size.is_finite() {
                    return Err(ReprojError::InvalidGeometry(format!(
                        "cannot derive a pixel size from map bounds {:?}",
                        bounds
                    )));
                }
                (size as f64, size as f64)
            }
            (None, None) => unreachable_bounds()?,
        };

        let width = match (spec.width, map_bounds) {
            (Some(w), _) => check_extent(w, "width")?,
            (None, Some(bounds)) => grid_extent(bounds.width(), pixel_size_x, "width")?,
            (None, None) => unreachable_bounds()?,
        };
        let height = match (spec.height, map_bounds) {
            (Some(h), _) => check_extent(h, "height")?,
            (None, Some(bounds)) => grid_extent(bounds.height(), pixel_size_y, "height")?,
            (None, None) => unreachable_bounds()?,
        };

        let referencing = match (spec.referencing, map_bounds) {
            (Some(r), _) => r,
            (None, Some(bounds)) => {
                let reference_pixel_x = 0.5 * width as f64;
                let reference_pixel_y = 0.5 * height as f64;
                Referencing {
                    reference_pixel_x,
                    reference_pixel_y,
                    easting: bounds.min_x + reference_pixel_x * pixel_size_x,
                    northing: bounds.max_y - reference_pixel_y * pixel_size_y,
                }
            }
            (None, None) => unreachable_bounds()?,
        };

        let grid = GridParams {
            reference_pixel_x: referencing.reference_pixel_x,
            reference_pixel_y: referencing.reference_pixel_y,
            easting: referencing.easting,
            northing: referencing.northing,
            pixel_size_x,
            pixel_size_y,
            orientation: spec.orientation,
        };
        log::debug!("Target grid {}x{}: {:?}", width, height, grid);
        Self::from_grid(Rect::from_size(width, height), target_crs.clone(), grid)
    }

    /// Target geometry for `target_crs`: the collocation grid when one is given, else an
    /// explicit grid whose Y pixel size is negated unless the CRS's second axis already
    /// points down on display.
    pub fn for_target(
        source: &SceneReference<'_>,
        target_crs: &Crs,
        spec: &TargetGridSpec,
        collocation: Option<(&dyn GeoCoding, usize, usize)>,
        provider: &dyn CrsProvider,
    ) -> ReprojResult<Self> {
        if let Some((geocoding, width, height)) = collocation {
            let geometry =
                Self::create_collocation_target_geometry(target_crs.clone(), geocoding, width, height)?;
            log::info!("Collocating onto {}x{} grid in {}", width, height, target_crs);
            return Ok(geometry);
        }

        let mut geometry = Self::create_target_geometry(source, target_crs, spec, provider)?;
        if target_crs.axis_direction(1) != AxisDirection::DisplayDown {
            geometry.change_y_axis_direction();
        }
        log::info!(
            "Target geometry: {}x{} pixels in {}",
            geometry.image_rect.width,
            geometry.image_rect.height,
            target_crs
        );
        Ok(geometry)
    }
}

fn unreachable_bounds<T>() -> ReprojResult<T> {
    Err(ReprojError::Processing(
        "map boundary required but not computed".to_string(),
    ))
}

/// Largest target width or height, in pixels
pub const MAX_GRID_EXTENT: usize = 1 << 20;

fn check_extent(pixels: usize, axis: &str) -> ReprojResult<usize> {
    if pixels > MAX_GRID_EXTENT {
        return Err(ReprojError::InvalidGeometry(format!(
            "target {} of {} pixels exceeds the limit of {}",
            axis, pixels, MAX_GRID_EXTENT
        )));
    }
    Ok(pixels)
}

fn grid_extent(map_extent: f64, pixel_size: f64, axis: &str) -> ReprojResult<usize> {
    let pixels = (map_extent / pixel_size - 1e-9).ceil();
    if !pixels.is_finite() || pixels > MAX_GRID_EXTENT as f64 {
        return Err(ReprojError::InvalidGeometry(format!(
            "target {} of {} / {} pixels exceeds the limit of {}",
            axis, map_extent, pixel_size, MAX_GRID_EXTENT
        )));
    }
    Ok((pixels as usize).max(1))
}

/// Geographic outline of the source footprint, traced along the pixel edges with
/// `max(1, min(w, h) / 2)` pixel steps
pub fn create_geo_boundary(source: &SceneReference<'_>) -> Vec<GeoPos> {
    let w = source.width;
    let h = source.height;
    let step = (w.min(h) / 2).max(1);

    let mut pixels = Vec::new();
    let mut x = 0;
    while x < w {
        pixels.push(PixelPos::new(x as f64, 0.0));
        x += step;
    }
    let mut y = 0;
    while y < h {
        pixels.push(PixelPos::new(w as f64, y as f64));
        y += step;
    }
    let mut x = w;
    while x > 0 {
        pixels.push(PixelPos::new(x as f64, h as f64));
        x = x.saturating_sub(step);
    }
    let mut y = h;
    while y > 0 {
        pixels.push(PixelPos::new(0.0, y as f64));
        y = y.saturating_sub(step);
    }

    let mut geo: Vec<GeoPos> = source
        .geocoding
        .geo_positions(&pixels)
        .into_iter()
        .flatten()
        .collect();
    normalize_geo_polygon(&mut geo);
    geo
}

/// Unwrap longitudes so that a polygon crossing the antimeridian stays contiguous
pub fn normalize_geo_polygon(polygon: &mut [GeoPos]) {
    for i in 1..polygon.len() {
        let prev = polygon[i - 1].lon;
        let mut lon = polygon[i].lon;
        while lon - prev > 180.0 {
            lon -= 360.0;
        }
        while lon - prev < -180.0 {
            lon += 360.0;
        }
        polygon[i].lon = lon;
    }
}

/// Bounds of the source footprint in the model coordinates of `target_crs`
pub fn create_map_boundary(
    source: &SceneReference<'_>,
    target_crs: &Crs,
    provider: &dyn CrsProvider,
) -> ReprojResult<ModelBounds> {
    let boundary = create_geo_boundary(source);
    if boundary.is_empty() {
        return Err(ReprojError::InvalidGeometry(
            "source footprint has no geographic positions".to_string(),
        ));
    }
    let mut xs: Vec<f64> = boundary.iter().map(|g| g.lon).collect();
    let mut ys: Vec<f64> = boundary.iter().map(|g| g.lat).collect();

    let geographic = provider.geographic()?;
    let transform = find_model_transform(provider, &geographic, target_crs)?;
    transform.transform(&mut xs, &mut ys)?;

    let bounds = ModelBounds::from_points(xs.into_iter().zip(ys)).ok_or_else(|| {
        ReprojError::InvalidGeometry(format!("source footprint does not map into {}", target_crs))
    })?;
    log::debug!("Map boundary in {}: {:?}", target_crs, bounds);
    Ok(bounds)
}
