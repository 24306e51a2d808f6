//! Terrain correction of pixel geolocation
//!
//! A sensor looking at terrain of height `h` under view zenith `vz` sees the point
//! displaced by `h * tan(vz)` from where the ellipsoid-based geocoding puts it, towards
//! the sensor. The [`Orthorectifier`] wraps a geocoding and removes that displacement,
//! taking heights from an [`ElevationModel`] or, without one, from the raster's own
//! tie-point elevation.

use crate::core::geocoding::{GeoCoding, Pointing};
use crate::types::{GeoPos, PixelPos};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Iterations used when no other limit is given
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

const EARTH_RADIUS: f64 = 6_378_137.0;
const CONVERGENCE: f64 = 1e-9;

/// Terrain height lookup
pub trait ElevationModel: Send + Sync {
    fn name(&self) -> &str;

    /// Height above the ellipsoid in metres, `None` where the model has no data
    fn elevation(&self, geo: GeoPos) -> Option<f64>;

    /// Release held resources; lookups return `None` afterwards
    fn dispose(&self) {}

    fn is_disposed(&self) -> bool {
        false
    }
}

/// Whether a geocoding exposes the viewing geometry orthorectification needs
pub fn can_be_orthorectified(geocoding: &dyn GeoCoding) -> bool {
    geocoding.pointing().is_some()
}

/// Move `geo` by `distance` metres along `azimuth` degrees (clockwise from north)
fn displace(geo: GeoPos, distance: f64, azimuth: f64) -> GeoPos {
    let az = azimuth.to_radians();
    let dlat = (distance * az.cos() / EARTH_RADIUS).to_degrees();
    let dlon = (distance * az.sin() / (EARTH_RADIUS * geo.lat.to_radians().cos())).to_degrees();
    GeoPos::new(geo.lon + dlon, geo.lat + dlat)
}

/// Geocoding adapter correcting terrain-induced displacement
pub struct Orthorectifier {
    base: Arc<dyn GeoCoding>,
    pointing: Arc<dyn Pointing>,
    elevation_model: Option<Arc<dyn ElevationModel>>,
    width: usize,
    height: usize,
    max_iterations: usize,
    disposed_warned: AtomicBool,
}

impl Orthorectifier {
    /// `None` when the geocoding has no pointing
    pub fn new(
        base: Arc<dyn GeoCoding>,
        width: usize,
        height: usize,
        elevation_model: Option<Arc<dyn ElevationModel>>,
        max_iterations: usize,
    ) -> Option<Self> {
        let pointing = base.pointing()?;
        Some(Self {
            base,
            pointing,
            elevation_model,
            width,
            height,
            max_iterations: max_iterations.max(1),
            disposed_warned: AtomicBool::new(false),
        })
    }

    /// Whether the attached elevation model has already released its data
    pub fn elevation_model_disposed(&self) -> bool {
        self.elevation_model.as_ref().is_some_and(|dem| dem.is_disposed())
    }

    fn height_at(&self, pixel: PixelPos, geo: GeoPos) -> f64 {
        let h = match &self.elevation_model {
            Some(dem) => {
                let h = dem.elevation(geo);
                if h.is_none() && dem.is_disposed() && !self.disposed_warned.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "Elevation model {} is disposed, orthorectifying at height 0",
                        dem.name()
                    );
                }
                h
            }
            None => self.pointing.elevation(pixel),
        };
        h.filter(|h| h.is_finite()).unwrap_or(0.0)
    }

    /// Horizontal displacement in metres and its azimuth at a pixel
    fn parallax(&self, pixel: PixelPos, h: f64) -> Option<(f64, f64)> {
        let (zenith, azimuth) = self.pointing.view_angles(pixel)?;
        Some((h * zenith.to_radians().tan(), azimuth))
    }

    fn in_scene(&self, pixel: PixelPos) -> bool {
        pixel.x >= 0.0 && pixel.y >= 0.0 && pixel.x <= self.width as f64 && pixel.y <= self.height as f64
    }
}

impl GeoCoding for Orthorectifier {
    /// Terrain point seen at `pixel`: the ellipsoid point moved towards the sensor by
    /// the parallax of the terrain height found there
    fn geo_pos(&self, pixel: PixelPos) -> Option<GeoPos> {
        let ellipsoid = self.base.geo_pos(pixel)?;
        let mut geo = ellipsoid;
        for _ in 0..self.max_iterations {
            let h = self.height_at(pixel, geo);
            let (distance, azimuth) = self.parallax(pixel, h)?;
            let next = displace(ellipsoid, distance, azimuth);
            let converged = (next.lon - geo.lon).abs() < CONVERGENCE && (next.lat - geo.lat).abs() < CONVERGENCE;
            geo = next;
            if converged {
                break;
            }
        }
        geo.is_valid().then_some(geo)
    }

    /// Pixel seeing the terrain point `geo`
    fn pixel_pos(&self, geo: GeoPos) -> Option<PixelPos> {
        let mut pixel = self.base.pixel_pos(geo)?;
        for _ in 0..self.max_iterations {
            let h = self.height_at(pixel, geo);
            let (distance, azimuth) = self.parallax(pixel, h)?;
            let next = self.base.pixel_pos(displace(geo, -distance, azimuth))?;
            let converged = (next.x - pixel.x).abs() < 1e-6 && (next.y - pixel.y).abs() < 1e-6;
            pixel = next;
            if converged {
                break;
            }
        }
        (pixel.x.is_finite() && pixel.y.is_finite() && self.in_scene(pixel)).then_some(pixel)
    }

    fn pointing(&self) -> Option<Arc<dyn Pointing>> {
        Some(Arc::clone(&self.pointing))
    }
}
