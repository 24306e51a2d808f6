//! No-data sentinel resolution and the wrappers that keep invalid samples out of
//! reprojected output

use crate::core::multilevel::{MultiLevelModel, MultiLevelSource, Raster};
use crate::core::resampling::is_no_data;
use crate::types::{DataType, ReprojError, ReprojResult};
use ndarray::Zip;
use std::sync::Arc;

/// Target sentinel: the global override, else the source's own value when it is used,
/// else NaN
pub fn target_no_data_value(override_value: Option<f64>, source_no_data: Option<f64>) -> f64 {
    override_value.or(source_no_data).unwrap_or(f64::NAN)
}

/// NaNs in resampled output are replaced only for floating point bands that have a
/// no-data value in effect which is not itself NaN.
pub fn must_replace_nan(
    data_type: DataType,
    source_no_data_used: bool,
    override_given: bool,
    sentinel: f64,
) -> bool {
    data_type.is_floating_point() && (source_no_data_used || override_given) && !sentinel.is_nan()
}

/// Replaces every NaN of the wrapped levels with a fixed value
pub struct NanReplacedSource {
    inner: Arc<dyn MultiLevelSource>,
    value: f64,
}

impl NanReplacedSource {
    pub fn new(inner: Arc<dyn MultiLevelSource>, value: f64) -> Self {
        Self { inner, value }
    }
}

impl MultiLevelSource for NanReplacedSource {
    fn model(&self) -> &MultiLevelModel {
        self.inner.model()
    }

    fn data_type(&self) -> DataType {
        self.inner.data_type()
    }

    fn create_image(&self, level: usize) -> ReprojResult<Raster> {
        let mut raster = self.inner.create_image(level)?;
        let value = self.value;
        raster.data.mapv_inplace(|v| if v.is_nan() { value } else { v });
        Ok(raster)
    }
}

/// Rewrites samples equal to the source band's own no-data value (NaN matches NaN) to
/// the target sentinel, so the kernels skip them like any other masked sample
pub struct SourceNoDataMaskedSource {
    inner: Arc<dyn MultiLevelSource>,
    source_no_data: f64,
    no_data: f64,
}

impl SourceNoDataMaskedSource {
    pub fn new(inner: Arc<dyn MultiLevelSource>, source_no_data: f64, no_data: f64) -> Self {
        Self {
            inner,
            source_no_data,
            no_data,
        }
    }
}

impl MultiLevelSource for SourceNoDataMaskedSource {
    fn model(&self) -> &MultiLevelModel {
        self.inner.model()
    }

    fn data_type(&self) -> DataType {
        self.inner.data_type()
    }

    fn create_image(&self, level: usize) -> ReprojResult<Raster> {
        let mut raster = self.inner.create_image(level)?;
        let fill = raster.data_type.coerce(self.no_data);
        let source_no_data = self.source_no_data;
        raster
            .data
            .mapv_inplace(|v| if is_no_data(v, source_no_data) { fill } else { v });
        Ok(raster)
    }
}

/// `mask ? value : sentinel` over two pyramids with the same layout
pub struct ValidMaskedSource {
    inner: Arc<dyn MultiLevelSource>,
    mask: Arc<dyn MultiLevelSource>,
    no_data: f64,
}

impl ValidMaskedSource {
    pub fn new(inner: Arc<dyn MultiLevelSource>, mask: Arc<dyn MultiLevelSource>, no_data: f64) -> Self {
        Self { inner, mask, no_data }
    }
}

impl MultiLevelSource for ValidMaskedSource {
    fn model(&self) -> &MultiLevelModel {
        self.inner.model()
    }

    fn data_type(&self) -> DataType {
        self.inner.data_type()
    }

    fn create_image(&self, level: usize) -> ReprojResult<Raster> {
        let mut raster = self.inner.create_image(level)?;
        let mask = self.mask.create_image(level)?;
        if mask.bounds != raster.bounds {
            return Err(ReprojError::Processing(format!(
                "valid mask level {} covers {:?}, raster covers {:?}",
                level, mask.bounds, raster.bounds
            )));
        }
        let fill = raster.data_type.coerce(self.no_data);
        Zip::from(&mut raster.data).and(&mask.data).for_each(|v, &m| {
            if m == 0.0 || m.is_nan() {
                *v = fill;
            }
        });
        Ok(raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::affine::AffineTransform;
    use crate::core::multilevel::ArrayLevelSource;
    use ndarray::array;

    #[test]
    fn test_sentinel_resolution_order() {
        assert_eq!(target_no_data_value(Some(-9999.0), Some(0.0)), -9999.0);
        assert_eq!(target_no_data_value(None, Some(0.0)), 0.0);
        assert!(target_no_data_value(None, None).is_nan());
    }

    #[test]
    fn test_nan_replacement_decision_table() {
        let cases = [
            // (type, source used, override, sentinel, expected)
            (DataType::Float32, false, true, -9999.0, true),
            (DataType::Float32, true, false, 0.0, true),
            (DataType::Float64, true, true, 1.0, true),
            (DataType::Float32, false, false, -9999.0, false),
            (DataType::Float32, true, false, f64::NAN, false),
            (DataType::Float32, false, true, f64::NAN, false),
            (DataType::Int16, true, true, -1.0, false),
            (DataType::UInt8, false, true, 0.0, false),
        ];
        for (dt, used, given, sentinel, expected) in cases {
            assert_eq!(
                must_replace_nan(dt, used, given, sentinel),
                expected,
                "{} used={} override={} sentinel={}",
                dt,
                used,
                given,
                sentinel
            );
        }
    }

    #[test]
    fn test_nan_replaced_source() {
        let source = Arc::new(
            ArrayLevelSource::new(
                array![[1.0, f64::NAN], [f64::NAN, -9999.0]],
                DataType::Float32,
                AffineTransform::identity(),
                1,
            )
            .unwrap(),
        );
        let replaced = NanReplacedSource::new(source, -9999.0);
        let image = replaced.create_image(0).unwrap();
        assert_eq!(image.data, array![[1.0, -9999.0], [-9999.0, -9999.0]]);
    }

    #[test]
    fn test_source_no_data_rewritten_to_sentinel() {
        let i2m = AffineTransform::identity();
        let data = Arc::new(
            ArrayLevelSource::new(array![[0.0, 2.0], [3.0, 0.0]], DataType::Float32, i2m, 1).unwrap(),
        );
        let masked = SourceNoDataMaskedSource::new(data, 0.0, -9999.0);
        let image = masked.create_image(0).unwrap();
        assert_eq!(image.data, array![[-9999.0, 2.0], [3.0, -9999.0]]);
    }

    #[test]
    fn test_source_no_data_nan_matches_only_nan() {
        let i2m = AffineTransform::identity();
        let data = Arc::new(
            ArrayLevelSource::new(array![[f64::NAN, 0.0], [1.0, 2.0]], DataType::Float64, i2m, 1).unwrap(),
        );
        let image = SourceNoDataMaskedSource::new(data.clone(), f64::NAN, -1.0)
            .create_image(0)
            .unwrap();
        assert_eq!(image.data, array![[-1.0, 0.0], [1.0, 2.0]]);

        // a numeric source value leaves NaN alone
        let image = SourceNoDataMaskedSource::new(data, 0.0, -1.0).create_image(0).unwrap();
        assert!(image.data[[0, 0]].is_nan());
        assert_eq!(image.data[[0, 1]], -1.0);
    }

    #[test]
    fn test_valid_mask_substitutes_sentinel() {
        let i2m = AffineTransform::identity();
        let data = Arc::new(ArrayLevelSource::new(array![[1.0, 2.0], [3.0, 4.0]], DataType::Int16, i2m, 1).unwrap());
        let mask = Arc::new(ArrayLevelSource::new(array![[1.0, 0.0], [0.0, 1.0]], DataType::UInt8, i2m, 1).unwrap());
        let masked = ValidMaskedSource::new(data, mask, -1.0);
        let image = masked.create_image(0).unwrap();
        assert_eq!(image.data, array![[1.0, -1.0], [-1.0, 4.0]]);
        assert_eq!(masked.data_type(), DataType::Int16);
    }
}
