#![allow(dead_code)]

use georeproject::core::crs::{AxisDirection, Crs, CrsProvider, IdentityTransform, PointTransform};
use georeproject::core::geocoding::CrsGeoCoding;
use georeproject::core::multilevel::ArrayLevelSource;
use georeproject::{AffineTransform, Band, DataType, Product, Rect, ReprojError, ReprojResult};
use ndarray::Array2;
use std::sync::{Arc, Mutex};

/// Provider knowing only WGS84, which it hands out for every code it decodes
pub struct GeographicOnlyProvider {
    pub wgs84: Crs,
    pub decoded: Mutex<Vec<String>>,
}

impl GeographicOnlyProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            wgs84: Crs::from_wkt_parts(
                "EPSG:4326",
                "GEOGCS[\"WGS 84\"]",
                [AxisDirection::East, AxisDirection::North],
                true,
            ),
            decoded: Mutex::new(Vec::new()),
        })
    }
}

impl CrsProvider for GeographicOnlyProvider {
    fn decode(&self, code: &str) -> ReprojResult<Crs> {
        self.decoded.lock().unwrap().push(code.to_string());
        if code == "EPSG:4326" || code.starts_with("AUTO:") {
            Ok(self.wgs84.clone())
        } else {
            Err(ReprojError::CrsResolution {
                spec: code.to_string(),
                reason: "only WGS84 is known".to_string(),
            })
        }
    }

    fn parse_wkt(&self, wkt: &str) -> ReprojResult<Crs> {
        if wkt.trim_start().starts_with("GEOGCS") {
            Ok(self.wgs84.clone())
        } else {
            Err(ReprojError::CrsResolution {
                spec: wkt.to_string(),
                reason: "only WGS84 is known".to_string(),
            })
        }
    }

    fn geographic(&self) -> ReprojResult<Crs> {
        Ok(self.wgs84.clone())
    }

    fn create_transform(&self, source: &Crs, target: &Crs) -> ReprojResult<Box<dyn PointTransform>> {
        if source == target {
            Ok(Box::new(IdentityTransform))
        } else {
            Err(ReprojError::MissingTransform {
                source_crs: source.to_string(),
                target_crs: target.to_string(),
                reason: "only identity transforms".to_string(),
            })
        }
    }
}

/// North-up one-degree grid whose upper left corner is at (`west`, `north`)
pub fn north_up(west: f64, north: f64) -> AffineTransform {
    AffineTransform::identity().translate(west, north).scale(1.0, -1.0)
}

/// Geographic product with one band named `band`
pub fn geographic_product(
    provider: &Arc<GeographicOnlyProvider>,
    name: &str,
    data: Array2<f64>,
    data_type: DataType,
    i2m: AffineTransform,
) -> Product {
    product_with_band(provider, name, data, data_type, i2m, |band| band)
}

/// Like [`geographic_product`], with the band's own no-data value in use
pub fn geographic_product_with_no_data(
    provider: &Arc<GeographicOnlyProvider>,
    name: &str,
    data: Array2<f64>,
    data_type: DataType,
    i2m: AffineTransform,
    no_data: f64,
) -> Product {
    product_with_band(provider, name, data, data_type, i2m, |band| band.with_no_data(no_data))
}

fn product_with_band(
    provider: &Arc<GeographicOnlyProvider>,
    name: &str,
    data: Array2<f64>,
    data_type: DataType,
    i2m: AffineTransform,
    configure: impl FnOnce(Band) -> Band,
) -> Product {
    let (height, width) = data.dim();
    let gc = CrsGeoCoding::new(provider.wgs84.clone(), Rect::from_size(width, height), i2m, provider.clone())
        .expect("Failed to create geocoding");
    let source = ArrayLevelSource::new(data, data_type, i2m, 1).expect("Failed to create level source");
    let mut product = Product::new(name, width, height).with_geocoding(Arc::new(gc));
    product.add_band(configure(Band::new("band", Arc::new(source))));
    product
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
