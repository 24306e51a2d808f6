//! Product reprojection operator
//!
//! Builds a target product in a new CRS (or on the grid of a collocation product) whose
//! bands are lazily reprojected pyramids of the source bands.

use crate::core::affine::AffineTransform;
use crate::core::crs::{is_valid_crs_code, Crs, CrsProvider, CrsResolver, CrsSpec};
use crate::core::expression::ExpressionLevelSource;
use crate::core::geocoding::{image_to_model, model_crs, CrsGeoCoding, GeoCoding};
use crate::core::geometry::{ImageGeometry, TargetGridSpec};
use crate::core::multilevel::{compute_level_count, MultiLevelModel, MultiLevelSource, DEFAULT_TILE_SIZE};
use crate::core::nodata::{must_replace_nan, target_no_data_value, NanReplacedSource, SourceNoDataMaskedSource, ValidMaskedSource};
use crate::core::orthorectify::{can_be_orthorectified, ElevationModel, Orthorectifier, DEFAULT_MAX_ITERATIONS};
use crate::core::reproject::{ReprojectedLevelSource, SamplingSettings};
use crate::core::resampling::ResamplingMethod;
use crate::io::dem::ElevationModelRegistry;
use crate::io::gdal_crs::GdalCrsProvider;
use crate::product::{Band, CodingKind, Product};
use crate::types::{DataType, ReprojError, ReprojResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// User parameters of a reprojection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReprojectionParams {
    /// Authority code such as `EPSG:32633`, a bare EPSG number or `AUTO:42001`
    pub crs_code: Option<String>,
    pub wkt_file: Option<PathBuf>,
    pub wkt: Option<String>,
    /// `Nearest`, `Bilinear` or `Bicubic`
    pub resampling: String,
    pub include_tie_point_grids: bool,
    pub reference_pixel_x: Option<f64>,
    pub reference_pixel_y: Option<f64>,
    pub easting: Option<f64>,
    pub northing: Option<f64>,
    /// Degrees in [0, 360]
    pub orientation: f64,
    pub pixel_size_x: Option<f64>,
    pub pixel_size_y: Option<f64>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub orthorectify: bool,
    pub elevation_model_name: Option<String>,
    /// Overrides every band's own no-data value
    pub no_data_value: Option<f64>,
}

impl Default for ReprojectionParams {
    fn default() -> Self {
        Self {
            crs_code: None,
            wkt_file: None,
            wkt: None,
            resampling: ResamplingMethod::Nearest.to_string(),
            include_tie_point_grids: true,
            reference_pixel_x: None,
            reference_pixel_y: None,
            easting: None,
            northing: None,
            orientation: 0.0,
            pixel_size_x: None,
            pixel_size_y: None,
            width: None,
            height: None,
            orthorectify: false,
            elevation_model_name: None,
            no_data_value: None,
        }
    }
}

impl ReprojectionParams {
    pub fn with_crs_code(code: impl Into<String>) -> Self {
        Self {
            crs_code: Some(code.into()),
            ..Self::default()
        }
    }
}

/// Validated parameters
struct Settings {
    crs_spec: CrsSpec,
    resampling: ResamplingMethod,
    grid: TargetGridSpec,
}

/// Reprojects a product onto a target geometry.
///
/// [`initialize`](Self::initialize) validates the parameters and builds the target
/// product. Band data is only computed when a level of a target band is requested.
pub struct ReprojectionOp {
    source: Product,
    collocation: Option<Product>,
    params: ReprojectionParams,
    provider: Arc<dyn CrsProvider>,
    dem_registry: ElevationModelRegistry,
    elevation_model: Option<Arc<dyn ElevationModel>>,
    target: Option<Product>,
}

impl ReprojectionOp {
    pub fn new(source: Product, params: ReprojectionParams, provider: Arc<dyn CrsProvider>) -> Self {
        Self {
            source,
            collocation: None,
            params,
            provider,
            dem_registry: ElevationModelRegistry::default(),
            elevation_model: None,
            target: None,
        }
    }

    /// Operator backed by GDAL/PROJ
    pub fn with_gdal(source: Product, params: ReprojectionParams) -> ReprojResult<Self> {
        Ok(Self::new(source, params, Arc::new(GdalCrsProvider::new()?)))
    }

    /// Reproject onto the pixel grid of `product` instead of an explicit CRS
    pub fn with_collocation_product(mut self, product: Product) -> Self {
        self.collocation = Some(product);
        self
    }

    pub fn with_elevation_registry(mut self, registry: ElevationModelRegistry) -> Self {
        self.dem_registry = registry;
        self
    }

    pub fn params(&self) -> &ReprojectionParams {
        &self.params
    }

    pub fn source_product(&self) -> &Product {
        &self.source
    }

    /// The product built by [`initialize`](Self::initialize)
    pub fn target_product(&self) -> Option<&Product> {
        self.target.as_ref()
    }

    fn collocation_crs(&self) -> ReprojResult<Option<Crs>> {
        let product = match &self.collocation {
            Some(p) => p,
            None => return Ok(None),
        };
        let geocoding = product.geocoding().ok_or_else(|| {
            ReprojError::InvalidGeometry(format!("collocation product '{}' is not geocoded", product.name))
        })?;
        Ok(Some(model_crs(geocoding, &product.name)))
    }

    fn validate(&self) -> ReprojResult<Settings> {
        let p = &self.params;
        CrsSpec::check_exclusive([
            p.crs_code.is_some(),
            p.wkt_file.is_some(),
            p.wkt.is_some(),
            self.collocation.is_some(),
        ])?;
        if let Some(code) = &p.crs_code {
            if !is_valid_crs_code(code.trim()) {
                return Err(ReprojError::InvalidCrsCode(code.clone()));
            }
        }
        let resampling: ResamplingMethod = p.resampling.parse()?;
        let grid = TargetGridSpec::from_optional(
            p.reference_pixel_x,
            p.reference_pixel_y,
            p.easting,
            p.northing,
            p.pixel_size_x,
            p.pixel_size_y,
            p.width,
            p.height,
            Some(p.orientation),
        )?;

        // the collocation geocoding is only looked at once the plain parameters pass
        let crs_spec = CrsSpec::from_parts(
            p.crs_code.as_deref(),
            p.wkt_file.as_deref(),
            p.wkt.as_deref(),
            self.collocation_crs()?,
        )?;
        Ok(Settings {
            crs_spec,
            resampling,
            grid,
        })
    }

    /// Validate the parameters and build the target product. Calling it again returns
    /// the product built the first time.
    pub fn initialize(&mut self) -> ReprojResult<&Product> {
        if self.target.is_none() {
            let target = self.build_target()?;
            self.target = Some(target);
        }
        self.target
            .as_ref()
            .ok_or_else(|| ReprojError::Processing("target product missing after initialization".to_string()))
    }

    fn build_target(&mut self) -> ReprojResult<Product> {
        let settings = self.validate()?;
        let source_gc = self.source.geocoding().cloned().ok_or_else(|| {
            ReprojError::InvalidGeometry(format!("source product '{}' is not geocoded", self.source.name))
        })?;
        log::info!(
            "Reprojecting {} ({}x{}, {} bands)",
            self.source.name,
            self.source.width,
            self.source.height,
            self.source.bands().len()
        );

        let scene = self.source.scene();
        let target_crs = CrsResolver::new(self.provider.as_ref()).resolve(&settings.crs_spec, scene.as_ref())?;
        let collocation = self
            .collocation
            .as_ref()
            .and_then(|p| p.geocoding().map(|gc| (&**gc as &dyn GeoCoding, p.width, p.height)));
        let scene = scene.ok_or_else(|| ReprojError::InvalidGeometry("source product is not geocoded".to_string()))?;
        let geometry = ImageGeometry::for_target(
            &scene,
            &target_crs,
            &settings.grid,
            collocation,
            self.provider.as_ref(),
        )?;

        let rect = geometry.image_rect();
        let (width, height) = (rect.width, rect.height);
        let mut target = Product::new(format!("projected_{}", self.source.name), width, height)
            .with_description(format!("projection of: {}", self.source.description));
        let tile_size = (DEFAULT_TILE_SIZE.min(width), DEFAULT_TILE_SIZE.min(height));
        target.preferred_tile_size = Some(tile_size);

        if self.params.orthorectify {
            if let Some(name) = &self.params.elevation_model_name {
                let dem = self.dem_registry.create_dem(name)?;
                log::info!("Orthorectifying with elevation model {}", dem.name());
                self.elevation_model = Some(dem);
            } else {
                log::info!("Orthorectifying with tie-point elevation");
            }
        }

        for coding in self.source.flag_codings().iter().chain(self.source.index_codings()) {
            target.add_coding(Arc::new(coding.as_ref().clone()));
        }

        let target_gc: Arc<dyn GeoCoding> = match target_crs.image_geocoding() {
            Some(gc) => Arc::clone(gc),
            None => Arc::new(CrsGeoCoding::new(
                target_crs.clone(),
                rect,
                geometry.image_to_model(),
                Arc::clone(&self.provider),
            )?),
        };
        target.set_geocoding(target_gc);

        let source_gc = self.source_geocoding(source_gc);
        let source_crs = model_crs(&source_gc, &self.source.name);
        let source_i2m = image_to_model(source_gc.as_ref());
        let target_model = MultiLevelModel::new(
            compute_level_count(width, height, DEFAULT_TILE_SIZE),
            geometry.image_to_model(),
            width,
            height,
        )?;

        let context = BandContext {
            source_crs,
            source_i2m,
            target_crs: &target_crs,
            target_model: &target_model,
            tile_size,
            resampling: settings.resampling,
        };
        for band in self.source.bands() {
            let reprojected = self.reproject_band(band, &context, &target, true)?;
            target.add_band(reprojected);
        }
        if self.params.include_tie_point_grids {
            for grid in self.source.tie_point_grids() {
                let reprojected = self.reproject_band(grid, &context, &target, false)?;
                target.add_band(reprojected);
            }
        }

        log::info!(
            "Target product {}: {}x{} pixels, {} bands, {} levels in {}",
            target.name,
            width,
            height,
            target.bands().len(),
            target_model.level_count(),
            target_crs
        );
        Ok(target)
    }

    /// The source geocoding, wrapped in an [`Orthorectifier`] when requested and possible
    fn source_geocoding(&self, geocoding: Arc<dyn GeoCoding>) -> Arc<dyn GeoCoding> {
        if !self.params.orthorectify {
            return geocoding;
        }
        if !can_be_orthorectified(geocoding.as_ref()) {
            log::warn!("Source geocoding of {} has no pointing, not orthorectified", self.source.name);
            return geocoding;
        }
        match Orthorectifier::new(
            Arc::clone(&geocoding),
            self.source.width,
            self.source.height,
            self.elevation_model.clone(),
            DEFAULT_MAX_ITERATIONS,
        ) {
            Some(ortho) => Arc::new(ortho),
            None => geocoding,
        }
    }

    fn reproject_band(
        &self,
        band: &Band,
        context: &BandContext<'_>,
        target: &Product,
        copy_band_metadata: bool,
    ) -> ReprojResult<Band> {
        let source_no_data = band.no_data_used.then_some(band.no_data_value);
        let no_data = target_no_data_value(self.params.no_data_value, source_no_data);
        let data_type = band.data_type();

        let mut source: Arc<dyn MultiLevelSource> = Arc::clone(band.source());
        if let Some(source_no_data) = source_no_data {
            source = Arc::new(SourceNoDataMaskedSource::new(source, source_no_data, no_data));
        }
        if let Some(expression) = band.valid_expression.as_deref().filter(|e| !e.trim().is_empty()) {
            let mask = ExpressionLevelSource::new(
                expression,
                &self.source,
                source.model().clone(),
                DataType::UInt8,
            )?;
            source = Arc::new(ValidMaskedSource::new(source, Arc::new(mask), no_data));
        }

        let settings = SamplingSettings {
            method: context.resampling,
            no_data,
            data_type,
        };
        let reprojected = ReprojectedLevelSource::new(
            source,
            context.source_crs.clone(),
            context.target_model.clone(),
            context.target_crs.clone(),
            Arc::clone(&self.provider),
            settings,
        )?
        .with_source_image_to_model(context.source_i2m)?
        .with_tile_size(context.tile_size);
        if reprojected.settings().method != context.resampling {
            log::debug!(
                "{} is {}, resampled with {} instead of {}",
                band.name,
                data_type,
                reprojected.settings().method,
                context.resampling
            );
        }

        let mut image: Arc<dyn MultiLevelSource> = Arc::new(reprojected);
        if must_replace_nan(data_type, band.no_data_used, self.params.no_data_value.is_some(), no_data) {
            image = Arc::new(NanReplacedSource::new(image, no_data));
        }

        let mut target_band = Band::new(band.name.clone(), image)
            .with_description(band.description.clone())
            .with_unit(band.unit.clone())
            .with_no_data(no_data);
        if copy_band_metadata {
            target_band = target_band.with_spectral(band.spectral);
            if let Some(coding) = &band.sample_coding {
                let copied = match coding.kind {
                    CodingKind::Flag => target.flag_coding(&coding.name),
                    CodingKind::Index => target.index_coding(&coding.name),
                };
                if let Some(copied) = copied {
                    target_band = target_band.with_sample_coding(Arc::clone(copied));
                }
            }
        }
        log::debug!("Band {} reprojected, no-data {}", band.name, no_data);
        Ok(target_band)
    }

    /// Release the elevation model. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(dem) = self.elevation_model.take() {
            dem.dispose();
            log::debug!("Disposed elevation model {}", dem.name());
        }
    }
}

impl Drop for ReprojectionOp {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Per-product state shared by every reprojected band
struct BandContext<'a> {
    source_crs: Crs,
    source_i2m: AffineTransform,
    target_crs: &'a Crs,
    target_model: &'a MultiLevelModel,
    tile_size: (usize, usize),
    resampling: ResamplingMethod,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crs::tests::StubProvider;
    use crate::core::multilevel::ArrayLevelSource;
    use crate::product::SampleCoding;
    use crate::types::Rect;
    use ndarray::Array2;

    fn geographic_product(provider: &Arc<StubProvider>) -> Product {
        let i2m = AffineTransform::identity().translate(0.0, 4.0).scale(1.0, -1.0);
        let gc = CrsGeoCoding::new(provider.wgs84.clone(), Rect::from_size(4, 4), i2m, provider.clone()).unwrap();
        let data = Array2::from_shape_fn((4, 4), |(y, x)| (y * 4 + x) as f64);
        let source = ArrayLevelSource::new(data, DataType::Float32, i2m, 1).unwrap();
        let mut product = Product::new("scene", 4, 4)
            .with_description("test scene")
            .with_geocoding(Arc::new(gc));
        product.add_coding(Arc::new(
            SampleCoding::new("quality", CodingKind::Flag).with_sample("CLOUD", 1, "cloudy"),
        ));
        let coding = product.flag_coding("quality").cloned().unwrap();
        product.add_band(Band::new("radiance", Arc::new(source)).with_sample_coding(coding));
        product
    }

    #[test]
    fn test_params_defaults() {
        let params = ReprojectionParams::with_crs_code("EPSG:4326");
        assert_eq!(params.crs_code.as_deref(), Some("EPSG:4326"));
        assert_eq!(params.resampling, "Nearest");
        assert!(params.no_data_value.is_none());
        assert!(!params.orthorectify);
        assert!(params.include_tie_point_grids);
        assert_eq!(params.orientation, 0.0);
    }

    #[test]
    fn test_target_product_metadata() {
        let provider = Arc::new(StubProvider::new());
        let source = geographic_product(&provider);
        let mut op = ReprojectionOp::new(source, ReprojectionParams::with_crs_code("EPSG:4326"), provider.clone());
        op.initialize().unwrap();
        let target = op.target_product().unwrap();

        assert_eq!(target.name, "projected_scene");
        assert_eq!(target.description, "projection of: test scene");
        assert_eq!((target.width, target.height), (4, 4));
        assert_eq!(target.preferred_tile_size, Some((4, 4)));

        let band = target.raster("radiance").unwrap();
        assert!(band.no_data_used);
        assert!(band.no_data_value.is_nan());
        // Coding is the target product's copy
        let coding = band.sample_coding.as_ref().unwrap();
        let target_coding = target.flag_coding("quality").unwrap();
        assert!(Arc::ptr_eq(coding, target_coding));
        let source_coding = op.source_product().flag_coding("quality").unwrap();
        assert!(!Arc::ptr_eq(coding, source_coding));
    }

    #[test]
    fn test_validation_rejects_bad_code() {
        let provider = Arc::new(StubProvider::new());
        let source = geographic_product(&provider);
        let mut op = ReprojectionOp::new(source, ReprojectionParams::with_crs_code("EPSG:abc"), provider.clone());
        let err = op.initialize().unwrap_err();
        assert!(matches!(err, ReprojError::InvalidCrsCode(_)));
        assert!(provider.decoded.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parameter_errors_precede_collocation_geocoding() {
        let provider = Arc::new(StubProvider::new());
        let source = geographic_product(&provider);
        let params = ReprojectionParams {
            resampling: "Lanczos".to_string(),
            ..ReprojectionParams::default()
        };
        // the collocation product has no geocoding at all
        let mut op = ReprojectionOp::new(source, params, provider.clone())
            .with_collocation_product(Product::new("reference", 4, 4));
        let err = op.initialize().unwrap_err();
        assert!(matches!(err, ReprojError::InvalidResampling(ref name) if name == "Lanczos"), "{}", err);

        // with valid parameters the missing geocoding is what gets reported
        let source = geographic_product(&provider);
        let mut op = ReprojectionOp::new(source, ReprojectionParams::default(), provider)
            .with_collocation_product(Product::new("reference", 4, 4));
        assert!(matches!(op.initialize(), Err(ReprojError::InvalidGeometry(_))));
    }

    #[test]
    fn test_unknown_crs_fails_before_any_band() {
        let provider = Arc::new(StubProvider::new());
        let source = geographic_product(&provider);
        let mut op = ReprojectionOp::new(source, ReprojectionParams::with_crs_code("EPSG:32633"), provider);
        assert!(matches!(op.initialize(), Err(ReprojError::CrsResolution { .. })));
        assert!(op.target_product().is_none());
    }
}
