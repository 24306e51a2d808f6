//! Installed digital elevation models

use crate::core::affine::AffineTransform;
use crate::core::multilevel::Raster;
use crate::core::orthorectify::ElevationModel;
use crate::core::resampling::ResamplingMethod;
use crate::types::{DataType, GeoPos, Rect, ReprojError, ReprojResult};
use gdal::Dataset;
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Environment variable overriding the DEM registry root
pub const DEM_DIR_ENV: &str = "GEOREPROJECT_DEM_DIR";

const DEM_EXTENSIONS: [&str; 4] = ["tif", "tiff", "hgt", "dem"];

/// Elevation grid in geographic lon/lat, sampled bilinearly
pub struct GridElevationModel {
    name: String,
    grid: RwLock<Option<Raster>>,
    model_to_image: AffineTransform,
    no_data: f64,
}

impl GridElevationModel {
    /// `geo_transform` is the GDAL layout `[ul_lon, dlon, 0, ul_lat, 0, dlat]`
    pub fn from_array(
        name: impl Into<String>,
        data: Array2<f64>,
        geo_transform: [f64; 6],
        no_data: Option<f64>,
    ) -> ReprojResult<Self> {
        let (height, width) = data.dim();
        let grid = Raster::new(Rect::from_size(width, height), data, DataType::Float32)?;
        let model_to_image = AffineTransform::from_gdal(geo_transform).inverse()?;
        Ok(Self {
            name: name.into(),
            grid: RwLock::new(Some(grid)),
            model_to_image,
            no_data: no_data.unwrap_or(f64::NAN),
        })
    }

    /// Read the first band of a GDAL raster
    pub fn open<P: AsRef<Path>>(name: impl Into<String>, path: P) -> ReprojResult<Self> {
        let name = name.into();
        log::info!("Loading elevation model {} from {}", name, path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        log::debug!("DEM size: {}x{}", width, height);
        log::debug!("DEM geotransform: {:?}", geo_transform);

        let rasterband = dataset.rasterband(1)?;
        let no_data = rasterband.no_data_value();
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| ReprojError::Processing(format!("Failed to reshape DEM data: {}", e)))?
            .mapv(f64::from);

        Self::from_array(name, data, geo_transform, no_data)
    }
}

impl ElevationModel for GridElevationModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn elevation(&self, geo: GeoPos) -> Option<f64> {
        let grid = self.grid.read().ok()?;
        let grid = grid.as_ref()?;
        let (x, y) = self.model_to_image.apply(geo.lon, geo.lat);
        ResamplingMethod::Bilinear
            .sample(grid, x, y, self.no_data)
            .filter(|h| h.is_finite())
    }

    fn is_disposed(&self) -> bool {
        self.grid.read().map(|grid| grid.is_none()).unwrap_or(true)
    }

    fn dispose(&self) {
        if let Ok(mut grid) = self.grid.write() {
            if grid.take().is_some() {
                log::debug!("Released elevation model {}", self.name);
            }
        }
    }
}

/// A named entry of the registry
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationModelDescriptor {
    pub name: String,
    pub path: Option<PathBuf>,
}

impl ElevationModelDescriptor {
    pub fn is_installed(&self) -> bool {
        self.path.is_some()
    }

    pub fn create_dem(&self) -> ReprojResult<Arc<dyn ElevationModel>> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| ReprojError::ElevationModelNotInstalled(self.name.clone()))?;
        Ok(Arc::new(GridElevationModel::open(&self.name, path)?))
    }
}

/// Directory of installed elevation datasets, looked up by name.
///
/// `<root>/<name>.<ext>` or `<root>/<name>/<name>.<ext>` for the extensions
/// tif, tiff, hgt and dem.
#[derive(Debug, Clone)]
pub struct ElevationModelRegistry {
    root: PathBuf,
}

impl ElevationModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$GEOREPROJECT_DEM_DIR`, else `<data dir>/georeproject/dem`
    pub fn default_root() -> PathBuf {
        if let Ok(dir) = std::env::var(DEM_DIR_ENV) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("georeproject")
            .join("dem")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor(&self, name: &str) -> ElevationModelDescriptor {
        let path = DEM_EXTENSIONS
            .iter()
            .flat_map(|ext| {
                [
                    self.root.join(format!("{}.{}", name, ext)),
                    self.root.join(name).join(format!("{}.{}", name, ext)),
                ]
            })
            .find(|p| p.is_file());
        ElevationModelDescriptor {
            name: name.to_string(),
            path,
        }
    }

    /// Open an installed model, failing with "DEM not installed" otherwise
    pub fn create_dem(&self, name: &str) -> ReprojResult<Arc<dyn ElevationModel>> {
        let descriptor = self.descriptor(name);
        if !descriptor.is_installed() {
            return Err(ReprojError::ElevationModelNotInstalled(name.to_string()));
        }
        descriptor.create_dem()
    }
}

impl Default for ElevationModelRegistry {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn ramp() -> GridElevationModel {
        // 1 degree cells from (10E, 50N), height grows eastwards
        GridElevationModel::from_array(
            "ramp",
            array![[0.0, 100.0, 200.0], [0.0, 100.0, 200.0]],
            [10.0, 1.0, 0.0, 50.0, 0.0, -1.0],
            Some(-32768.0),
        )
        .unwrap()
    }

    #[test]
    fn test_bilinear_elevation() {
        let dem = ramp();
        assert_relative_eq!(dem.elevation(GeoPos::new(11.5, 49.5)).unwrap(), 100.0);
        assert_relative_eq!(dem.elevation(GeoPos::new(12.0, 49.5)).unwrap(), 150.0);
        assert!(dem.elevation(GeoPos::new(20.0, 49.5)).is_none());
    }

    #[test]
    fn test_dispose_releases_grid() {
        let dem = ramp();
        assert!(!dem.is_disposed());
        dem.dispose();
        assert!(dem.is_disposed());
        assert!(dem.elevation(GeoPos::new(11.5, 49.5)).is_none());
        dem.dispose();
    }

    #[test]
    fn test_registry_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("SRTM")).unwrap();
        std::fs::write(dir.path().join("SRTM").join("SRTM.tif"), b"").unwrap();

        let registry = ElevationModelRegistry::new(dir.path());
        let srtm = registry.descriptor("SRTM");
        assert!(srtm.is_installed());
        assert_eq!(srtm.path.unwrap(), dir.path().join("SRTM").join("SRTM.tif"));

        let missing = registry.create_dem("GETASSE30");
        match missing {
            Err(e) => assert_eq!(e.to_string(), "DEM not installed: GETASSE30"),
            Ok(_) => panic!("GETASSE30 is not installed"),
        }
    }
}
