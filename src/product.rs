//! Raster product model
//!
//! A [`Product`] is a set of equally sized rasters (bands and tie-point grids) sharing a
//! geocoding, plus the flag and index codings its categorical bands refer to.

use crate::core::geocoding::{GeoCoding, SceneReference};
use crate::core::multilevel::{MultiLevelImage, MultiLevelSource};
use crate::types::DataType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a coding describes bit flags or enumerated classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodingKind {
    Flag,
    Index,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingSample {
    pub name: String,
    /// Bit mask for flag codings, class value for index codings
    pub value: i64,
    pub description: String,
}

/// Categorical metadata of a band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleCoding {
    pub name: String,
    pub kind: CodingKind,
    pub samples: Vec<CodingSample>,
}

impl SampleCoding {
    pub fn new(name: impl Into<String>, kind: CodingKind) -> Self {
        Self {
            name: name.into(),
            kind,
            samples: Vec::new(),
        }
    }

    pub fn with_sample(mut self, name: impl Into<String>, value: i64, description: impl Into<String>) -> Self {
        self.samples.push(CodingSample {
            name: name.into(),
            value,
            description: description.into(),
        });
        self
    }

    pub fn sample(&self, name: &str) -> Option<&CodingSample> {
        self.samples.iter().find(|s| s.name == name)
    }

    /// True when `value` carries the named flag (all mask bits set) or equals the named class
    pub fn test(&self, value: f64, sample: &CodingSample) -> bool {
        if !value.is_finite() {
            return false;
        }
        let v = value as i64;
        match self.kind {
            CodingKind::Flag => v & sample.value == sample.value,
            CodingKind::Index => v == sample.value,
        }
    }
}

/// Spectral properties carried over from source to target bands
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectralProperties {
    /// Nanometres
    pub wavelength: f32,
    pub bandwidth: f32,
    pub spectral_band_index: Option<usize>,
    pub solar_flux: f32,
}

/// One raster of a product
#[derive(Clone)]
pub struct Band {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub no_data_value: f64,
    pub no_data_used: bool,
    pub valid_expression: Option<String>,
    pub spectral: SpectralProperties,
    pub sample_coding: Option<Arc<SampleCoding>>,
    image: Arc<MultiLevelImage>,
}

impl Band {
    pub fn new(name: impl Into<String>, source: Arc<dyn MultiLevelSource>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            no_data_value: 0.0,
            no_data_used: false,
            valid_expression: None,
            spectral: SpectralProperties::default(),
            sample_coding: None,
            image: Arc::new(MultiLevelImage::new(source)),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_no_data(mut self, value: f64) -> Self {
        self.no_data_value = value;
        self.no_data_used = true;
        self
    }

    pub fn with_valid_expression(mut self, expression: impl Into<String>) -> Self {
        self.valid_expression = Some(expression.into());
        self
    }

    pub fn with_spectral(mut self, spectral: SpectralProperties) -> Self {
        self.spectral = spectral;
        self
    }

    pub fn with_sample_coding(mut self, coding: Arc<SampleCoding>) -> Self {
        self.sample_coding = Some(coding);
        self
    }

    pub fn data_type(&self) -> DataType {
        self.image.source().data_type()
    }

    pub fn source(&self) -> &Arc<dyn MultiLevelSource> {
        self.image.source()
    }

    /// Memoized level images
    pub fn image(&self) -> &Arc<MultiLevelImage> {
        &self.image
    }
}

impl std::fmt::Debug for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Band")
            .field("name", &self.name)
            .field("data_type", &self.data_type())
            .field("no_data_value", &self.no_data_value)
            .field("no_data_used", &self.no_data_used)
            .field("valid_expression", &self.valid_expression)
            .finish()
    }
}

/// A geocoded raster product
#[derive(Clone)]
pub struct Product {
    pub name: String,
    pub description: String,
    pub width: usize,
    pub height: usize,
    pub preferred_tile_size: Option<(usize, usize)>,
    geocoding: Option<Arc<dyn GeoCoding>>,
    bands: Vec<Band>,
    tie_point_grids: Vec<Band>,
    flag_codings: Vec<Arc<SampleCoding>>,
    index_codings: Vec<Arc<SampleCoding>>,
}

impl Product {
    pub fn new(name: impl Into<String>, width: usize, height: usize) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            width,
            height,
            preferred_tile_size: None,
            geocoding: None,
            bands: Vec::new(),
            tie_point_grids: Vec::new(),
            flag_codings: Vec::new(),
            index_codings: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_geocoding(mut self, geocoding: Arc<dyn GeoCoding>) -> Self {
        self.geocoding = Some(geocoding);
        self
    }

    pub fn set_geocoding(&mut self, geocoding: Arc<dyn GeoCoding>) {
        self.geocoding = Some(geocoding);
    }

    pub fn geocoding(&self) -> Option<&Arc<dyn GeoCoding>> {
        self.geocoding.as_ref()
    }

    /// Geocoded extent of the product, if it has a geocoding
    pub fn scene(&self) -> Option<SceneReference<'_>> {
        self.geocoding
            .as_deref()
            .map(|gc| SceneReference::new(gc, self.width, self.height))
    }

    pub fn add_band(&mut self, band: Band) {
        self.bands.push(band);
    }

    pub fn add_tie_point_grid(&mut self, grid: Band) {
        self.tie_point_grids.push(grid);
    }

    /// Add a flag or index coding, depending on its kind
    pub fn add_coding(&mut self, coding: Arc<SampleCoding>) {
        match coding.kind {
            CodingKind::Flag => self.flag_codings.push(coding),
            CodingKind::Index => self.index_codings.push(coding),
        }
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn tie_point_grids(&self) -> &[Band] {
        &self.tie_point_grids
    }

    /// Band or tie-point grid by name
    pub fn raster(&self, name: &str) -> Option<&Band> {
        self.bands
            .iter()
            .chain(self.tie_point_grids.iter())
            .find(|b| b.name == name)
    }

    pub fn flag_codings(&self) -> &[Arc<SampleCoding>] {
        &self.flag_codings
    }

    pub fn index_codings(&self) -> &[Arc<SampleCoding>] {
        &self.index_codings
    }

    pub fn flag_coding(&self, name: &str) -> Option<&Arc<SampleCoding>> {
        self.flag_codings.iter().find(|c| c.name == name)
    }

    pub fn index_coding(&self, name: &str) -> Option<&Arc<SampleCoding>> {
        self.index_codings.iter().find(|c| c.name == name)
    }
}

impl std::fmt::Debug for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Product")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bands", &self.bands)
            .field("tie_point_grids", &self.tie_point_grids.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::affine::AffineTransform;
    use crate::core::multilevel::ArrayLevelSource;
    use ndarray::Array2;

    fn source() -> Arc<dyn MultiLevelSource> {
        Arc::new(
            ArrayLevelSource::new(Array2::zeros((2, 2)), DataType::UInt8, AffineTransform::identity(), 1).unwrap(),
        )
    }

    #[test]
    fn test_flag_and_index_tests() {
        let flags = SampleCoding::new("l1_flags", CodingKind::Flag)
            .with_sample("INVALID", 0x01, "")
            .with_sample("LAND_COAST", 0x06, "");
        assert!(flags.test(7.0, flags.sample("LAND_COAST").unwrap()));
        assert!(!flags.test(4.0, flags.sample("LAND_COAST").unwrap()));
        assert!(!flags.test(f64::NAN, flags.sample("INVALID").unwrap()));

        let classes = SampleCoding::new("land_class", CodingKind::Index).with_sample("water", 2, "");
        assert!(classes.test(2.0, classes.sample("water").unwrap()));
        assert!(!classes.test(3.0, classes.sample("water").unwrap()));
    }

    #[test]
    fn test_raster_lookup_covers_tie_point_grids() {
        let mut product = Product::new("scene", 2, 2);
        product.add_band(Band::new("radiance_1", source()));
        product.add_tie_point_grid(Band::new("sun_zenith", source()));
        product.add_coding(Arc::new(SampleCoding::new("l1_flags", CodingKind::Flag)));

        assert!(product.raster("radiance_1").is_some());
        assert!(product.raster("sun_zenith").is_some());
        assert!(product.raster("latitude").is_none());
        assert!(product.flag_coding("l1_flags").is_some());
        assert!(product.index_coding("l1_flags").is_none());
        assert_eq!(product.raster("radiance_1").unwrap().data_type(), DataType::UInt8);
    }
}
