//! Pixel to geographic coordinate mappings

use crate::core::affine::AffineTransform;
use crate::core::crs::{Crs, CrsProvider, PointTransform};
use crate::types::{GeoPos, PixelPos, Rect, ReprojError, ReprojResult};
use ndarray::Array2;
use std::sync::Arc;

/// Viewing geometry of a sensor, the capability a geocoding needs to be orthorectified
pub trait Pointing: Send + Sync {
    /// View zenith and view azimuth in degrees at a pixel.
    ///
    /// The azimuth is measured clockwise from north and points from the pixel towards
    /// the sensor.
    fn view_angles(&self, pixel: PixelPos) -> Option<(f64, f64)>;

    /// Terrain height in metres taken from the product's own tie-point data
    fn elevation(&self, pixel: PixelPos) -> Option<f64>;
}

/// Mapping between full-resolution pixel coordinates and WGS84 lon/lat
pub trait GeoCoding: Send + Sync {
    fn geo_pos(&self, pixel: PixelPos) -> Option<GeoPos>;

    fn pixel_pos(&self, geo: GeoPos) -> Option<PixelPos>;

    fn geo_positions(&self, pixels: &[PixelPos]) -> Vec<Option<GeoPos>> {
        pixels.iter().map(|p| self.geo_pos(*p)).collect()
    }

    /// CRS and image-to-model transform for geocodings defined by an affine map grid
    fn map_geometry(&self) -> Option<(&Crs, &AffineTransform)> {
        None
    }

    /// Viewing geometry, present only when the raster can be orthorectified
    fn pointing(&self) -> Option<Arc<dyn Pointing>> {
        None
    }
}

/// Model CRS of a geocoding: its map CRS, or an image CRS built on the geocoding itself
pub fn model_crs(geocoding: &Arc<dyn GeoCoding>, name: &str) -> Crs {
    match geocoding.map_geometry() {
        Some((crs, _)) => crs.clone(),
        None => Crs::image(format!("image CRS of {}", name), Arc::clone(geocoding)),
    }
}

/// Full-resolution image-to-model transform of a geocoding (identity for image CRSs)
pub fn image_to_model(geocoding: &dyn GeoCoding) -> AffineTransform {
    geocoding
        .map_geometry()
        .map(|(_, t)| *t)
        .unwrap_or_else(AffineTransform::identity)
}

/// A geocoded raster extent, used to locate the scene centre
pub struct SceneReference<'a> {
    pub geocoding: &'a dyn GeoCoding,
    pub width: usize,
    pub height: usize,
}

impl<'a> SceneReference<'a> {
    pub fn new(geocoding: &'a dyn GeoCoding, width: usize, height: usize) -> Self {
        Self { geocoding, width, height }
    }

    /// Geographic position of pixel `(width / 2, height / 2)`
    pub fn center_geo_pos(&self) -> Option<GeoPos> {
        let pixel = PixelPos::new((self.width / 2) as f64, (self.height / 2) as f64);
        self.geocoding.geo_pos(pixel).filter(GeoPos::is_valid)
    }
}

/// Geocoding of a raster whose pixels map to a CRS through an affine transform
pub struct CrsGeoCoding {
    crs: Crs,
    image_rect: Rect,
    image_to_model: AffineTransform,
    model_to_image: AffineTransform,
    provider: Arc<dyn CrsProvider>,
}

impl CrsGeoCoding {
    pub fn new(
        crs: Crs,
        image_rect: Rect,
        image_to_model: AffineTransform,
        provider: Arc<dyn CrsProvider>,
    ) -> ReprojResult<Self> {
        if image_rect.is_empty() {
            return Err(ReprojError::InvalidGeometry(format!(
                "empty image rectangle {:?}",
                image_rect
            )));
        }
        let model_to_image = image_to_model.inverse()?;
        Ok(Self {
            crs,
            image_rect,
            image_to_model,
            model_to_image,
            provider,
        })
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn image_rect(&self) -> Rect {
        self.image_rect
    }

    fn to_geographic(&self) -> ReprojResult<Option<Box<dyn PointTransform>>> {
        let geographic = self.provider.geographic()?;
        if geographic == self.crs {
            return Ok(None);
        }
        self.provider.create_transform(&self.crs, &geographic).map(Some)
    }

    fn from_geographic(&self) -> ReprojResult<Option<Box<dyn PointTransform>>> {
        let geographic = self.provider.geographic()?;
        if geographic == self.crs {
            return Ok(None);
        }
        self.provider.create_transform(&geographic, &self.crs).map(Some)
    }
}

impl GeoCoding for CrsGeoCoding {
    fn geo_pos(&self, pixel: PixelPos) -> Option<GeoPos> {
        self.geo_positions(&[pixel]).into_iter().next().flatten()
    }

    fn geo_positions(&self, pixels: &[PixelPos]) -> Vec<Option<GeoPos>> {
        let mut xs: Vec<f64> = pixels.iter().map(|p| p.x).collect();
        let mut ys: Vec<f64> = pixels.iter().map(|p| p.y).collect();
        self.image_to_model.apply_all(&mut xs, &mut ys);
        match self.to_geographic() {
            Ok(None) => {}
            Ok(Some(t)) => {
                if let Err(e) = t.transform(&mut xs, &mut ys) {
                    log::warn!("Model to geographic transform failed: {}", e);
                    return vec![None; pixels.len()];
                }
            }
            Err(e) => {
                log::warn!("No geographic transform for {}: {}", self.crs, e);
                return vec![None; pixels.len()];
            }
        }
        xs.into_iter()
            .zip(ys)
            .map(|(lon, lat)| Some(GeoPos::new(lon, lat)).filter(GeoPos::is_valid))
            .collect()
    }

    fn pixel_pos(&self, geo: GeoPos) -> Option<PixelPos> {
        let mut xs = [geo.lon];
        let mut ys = [geo.lat];
        match self.from_geographic() {
            Ok(None) => {}
            Ok(Some(t)) => t.transform(&mut xs, &mut ys).ok()?,
            Err(_) => return None,
        }
        let (x, y) = self.model_to_image.apply(xs[0], ys[0]);
        (x.is_finite() && y.is_finite()).then(|| PixelPos::new(x, y))
    }

    fn map_geometry(&self) -> Option<(&Crs, &AffineTransform)> {
        Some((&self.crs, &self.image_to_model))
    }
}

/// Geocoding interpolated from sub-sampled latitude/longitude tie-point grids
pub struct TiePointGeoCoding {
    lat: Array2<f64>,
    lon: Array2<f64>,
    offset: (f64, f64),
    sub_sampling: (f64, f64),
    /// Geographic to grid coordinates, fitted to the grid corners
    corner_fit: Option<AffineTransform>,
    pointing: Option<Arc<dyn Pointing>>,
}

impl TiePointGeoCoding {
    /// Tie point `(i, j)` (row, column) sits at pixel
    /// `(offset.0 + j * sub_sampling.0, offset.1 + i * sub_sampling.1)`.
    pub fn new(
        lat: Array2<f64>,
        lon: Array2<f64>,
        offset: (f64, f64),
        sub_sampling: (f64, f64),
    ) -> ReprojResult<Self> {
        if lat.dim() != lon.dim() {
            return Err(ReprojError::InvalidGeometry(format!(
                "tie-point grids differ in shape: {:?} vs {:?}",
                lat.dim(),
                lon.dim()
            )));
        }
        if lat.nrows() < 2 || lat.ncols() < 2 || sub_sampling.0 <= 0.0 || sub_sampling.1 <= 0.0 {
            return Err(ReprojError::InvalidGeometry(
                "tie-point grids need at least 2x2 points and positive sub-sampling".to_string(),
            ));
        }
        let corner_fit = Self::fit_corners(&lat, &lon);
        Ok(Self {
            lat,
            lon,
            offset,
            sub_sampling,
            corner_fit,
            pointing: None,
        })
    }

    fn fit_corners(lat: &Array2<f64>, lon: &Array2<f64>) -> Option<AffineTransform> {
        let (rows, cols) = lat.dim();
        let (last_row, last_col) = ((rows - 1) as f64, (cols - 1) as f64);
        let grid_to_geo = AffineTransform::new(
            (lon[[0, cols - 1]] - lon[[0, 0]]) / last_col,
            (lon[[rows - 1, 0]] - lon[[0, 0]]) / last_row,
            lon[[0, 0]],
            (lat[[0, cols - 1]] - lat[[0, 0]]) / last_col,
            (lat[[rows - 1, 0]] - lat[[0, 0]]) / last_row,
            lat[[0, 0]],
        );
        grid_to_geo.inverse().ok().filter(|t| {
            [t.m00, t.m01, t.m02, t.m10, t.m11, t.m12]
                .iter()
                .all(|v| v.is_finite())
        })
    }

    /// Starting grid coordinates for the inverse lookup, from the corner fit
    fn seed(&self, geo: GeoPos) -> Option<(f64, f64)> {
        let (gx, gy) = self.corner_fit?.apply(geo.lon, geo.lat);
        (gx.is_finite() && gy.is_finite()).then_some((gx, gy))
    }

    fn closest_tie_point(&self, geo: GeoPos) -> (f64, f64) {
        let mut best = (0usize, 0usize, f64::INFINITY);
        for ((i, j), lat) in self.lat.indexed_iter() {
            let d = (lat - geo.lat).powi(2) + (self.lon[[i, j]] - geo.lon).powi(2);
            if d < best.2 {
                best = (i, j, d);
            }
        }
        (best.1 as f64, best.0 as f64)
    }

    /// Newton iteration on the interpolated grids. The flag tells whether the
    /// residual dropped below tolerance; `None` means a singular Jacobian.
    fn newton(&self, geo: GeoPos, mut gx: f64, mut gy: f64) -> Option<(f64, f64, bool)> {
        const MAX_ITERATIONS: usize = 20;
        const TOLERANCE: f64 = 1e-10;
        const H: f64 = 1e-3;

        for _ in 0..MAX_ITERATIONS {
            let lon = Self::interpolate(&self.lon, gx, gy);
            let lat = Self::interpolate(&self.lat, gx, gy);
            let (rx, ry) = (geo.lon - lon, geo.lat - lat);
            if rx.abs() < TOLERANCE && ry.abs() < TOLERANCE {
                return Some((gx, gy, true));
            }
            let dlon_dx = (Self::interpolate(&self.lon, gx + H, gy) - lon) / H;
            let dlon_dy = (Self::interpolate(&self.lon, gx, gy + H) - lon) / H;
            let dlat_dx = (Self::interpolate(&self.lat, gx + H, gy) - lat) / H;
            let dlat_dy = (Self::interpolate(&self.lat, gx, gy + H) - lat) / H;
            let det = dlon_dx * dlat_dy - dlon_dy * dlat_dx;
            if det.abs() < 1e-15 {
                return None;
            }
            gx += (rx * dlat_dy - ry * dlon_dy) / det;
            gy += (ry * dlon_dx - rx * dlat_dx) / det;
        }
        Some((gx, gy, false))
    }

    pub fn with_pointing(mut self, pointing: Arc<dyn Pointing>) -> Self {
        self.pointing = Some(pointing);
        self
    }

    fn grid_coords(&self, pixel: PixelPos) -> (f64, f64) {
        (
            (pixel.x - self.offset.0) / self.sub_sampling.0,
            (pixel.y - self.offset.1) / self.sub_sampling.1,
        )
    }

    /// Bilinear interpolation, extrapolating linearly beyond the outermost tie points
    fn interpolate(grid: &Array2<f64>, gx: f64, gy: f64) -> f64 {
        let (rows, cols) = grid.dim();
        let j0 = (gx.floor().max(0.0) as usize).min(cols - 2);
        let i0 = (gy.floor().max(0.0) as usize).min(rows - 2);
        let dx = gx - j0 as f64;
        let dy = gy - i0 as f64;

        let v00 = grid[[i0, j0]];
        let v01 = grid[[i0, j0 + 1]];
        let v10 = grid[[i0 + 1, j0]];
        let v11 = grid[[i0 + 1, j0 + 1]];

        v00 * (1.0 - dx) * (1.0 - dy) + v01 * dx * (1.0 - dy) + v10 * (1.0 - dx) * dy + v11 * dx * dy
    }
}

impl GeoCoding for TiePointGeoCoding {
    fn geo_pos(&self, pixel: PixelPos) -> Option<GeoPos> {
        let (gx, gy) = self.grid_coords(pixel);
        let geo = GeoPos::new(
            Self::interpolate(&self.lon, gx, gy),
            Self::interpolate(&self.lat, gx, gy),
        );
        geo.is_valid().then_some(geo)
    }

    /// Newton iteration seeded from the corner fit; only when that does not converge
    /// is the closest tie point searched for and used as the start instead
    fn pixel_pos(&self, geo: GeoPos) -> Option<PixelPos> {
        let seeded = self
            .seed(geo)
            .and_then(|(gx, gy)| self.newton(geo, gx, gy))
            .filter(|(_, _, converged)| *converged);
        let (gx, gy, _) = match seeded {
            Some(solution) => solution,
            None => {
                let (gx, gy) = self.closest_tie_point(geo);
                self.newton(geo, gx, gy)?
            }
        };

        let pixel = PixelPos::new(
            self.offset.0 + gx * self.sub_sampling.0,
            self.offset.1 + gy * self.sub_sampling.1,
        );
        (pixel.x.is_finite() && pixel.y.is_finite()).then_some(pixel)
    }

    fn pointing(&self) -> Option<Arc<dyn Pointing>> {
        self.pointing.clone()
    }
}
