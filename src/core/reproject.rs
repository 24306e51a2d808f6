//! Per-level reprojection
//!
//! Each target level is realized independently: target pixel centres are mapped through
//! target image-to-model, the target-to-source model transform and source
//! model-to-image, then the source level is sampled there. Target pixels that land
//! outside the source (or whose transform fails) keep the no-data fill.

use crate::core::affine::AffineTransform;
use crate::core::crs::{find_model_transform, Crs, CrsProvider};
use crate::core::geometry::ImageGeometry;
use crate::core::multilevel::{check_level, MultiLevelModel, MultiLevelSource, Raster};
use crate::core::resampling::ResamplingMethod;
use crate::types::{DataType, ReprojResult};
use ndarray::{Array2, Axis};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Settings shared by every level of one reprojected band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingSettings {
    pub method: ResamplingMethod,
    pub no_data: f64,
    pub data_type: DataType,
}

/// Resample `source` (covering `source_geometry`) onto `target_geometry`
pub fn reproject(
    source: &Raster,
    source_geometry: &ImageGeometry,
    target_geometry: &ImageGeometry,
    provider: &dyn CrsProvider,
    settings: SamplingSettings,
) -> ReprojResult<Raster> {
    let target_rect = target_geometry.image_rect();
    let (width, height) = (target_rect.width, target_rect.height);

    // Target pixel centres, in level pixel coordinates
    let n = width * height;
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for r in 0..height {
        for c in 0..width {
            xs.push((target_rect.x + c as i64) as f64 + 0.5);
            ys.push((target_rect.y + r as i64) as f64 + 0.5);
        }
    }

    target_geometry.image_to_model().apply_all(&mut xs, &mut ys);
    let transform = find_model_transform(
        provider,
        target_geometry.model_crs(),
        source_geometry.model_crs(),
    )?;
    transform.transform(&mut xs, &mut ys)?;
    source_geometry.model_to_image()?.apply_all(&mut xs, &mut ys);

    let fill = settings.data_type.coerce(settings.no_data);
    let mut data = Array2::from_elem((height, width), fill);

    let fill_row = |r: usize, mut row: ndarray::ArrayViewMut1<'_, f64>| {
        let offset = r * width;
        for (c, out) in row.iter_mut().enumerate() {
            let (sx, sy) = (xs[offset + c], ys[offset + c]);
            if let Some(v) = settings.method.sample(source, sx, sy, settings.no_data) {
                *out = settings.data_type.coerce(v);
            }
        }
    };

    #[cfg(feature = "parallel")]
    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(r, row)| fill_row(r, row));

    #[cfg(not(feature = "parallel"))]
    data.axis_iter_mut(Axis(0))
        .enumerate()
        .for_each(|(r, row)| fill_row(r, row));

    Raster::new(target_rect, data, settings.data_type)
}

/// Lazily reprojected pyramid of one band
pub struct ReprojectedLevelSource {
    source: Arc<dyn MultiLevelSource>,
    source_model: MultiLevelModel,
    source_crs: Crs,
    target_model: MultiLevelModel,
    target_crs: Crs,
    provider: Arc<dyn CrsProvider>,
    settings: SamplingSettings,
    tile_size: (usize, usize),
}

impl ReprojectedLevelSource {
    /// The resampling method is downgraded to nearest neighbour for non floating point
    /// bands. Fails when no transform exists between the two CRSs.
    pub fn new(
        source: Arc<dyn MultiLevelSource>,
        source_crs: Crs,
        target_model: MultiLevelModel,
        target_crs: Crs,
        provider: Arc<dyn CrsProvider>,
        mut settings: SamplingSettings,
    ) -> ReprojResult<Self> {
        settings.method = settings.method.for_data_type(settings.data_type);
        find_model_transform(provider.as_ref(), &target_crs, &source_crs)?;
        let source_model = source.model().clone();
        Ok(Self {
            source,
            source_model,
            source_crs,
            target_model,
            target_crs,
            provider,
            settings,
            tile_size: (crate::core::multilevel::DEFAULT_TILE_SIZE, crate::core::multilevel::DEFAULT_TILE_SIZE),
        })
    }

    pub fn with_tile_size(mut self, tile_size: (usize, usize)) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Place the source levels in the source CRS through `image_to_model` instead of the
    /// source's own model, e.g. the transform of a substituted geocoding
    pub fn with_source_image_to_model(mut self, image_to_model: AffineTransform) -> ReprojResult<Self> {
        let level0 = self.source_model.level_bounds(0)?;
        self.source_model = MultiLevelModel::with_bounds(
            self.source_model.level_count(),
            image_to_model,
            image_to_model.transform_rect(&level0),
        )?;
        Ok(self)
    }

    pub fn settings(&self) -> SamplingSettings {
        self.settings
    }

    /// Source level sampled for target `level`: coarser target levels reuse the
    /// coarsest source level
    pub fn source_level(&self, level: usize) -> usize {
        level.min(self.source_model.level_count() - 1)
    }
}

impl MultiLevelSource for ReprojectedLevelSource {
    fn model(&self) -> &MultiLevelModel {
        &self.target_model
    }

    fn data_type(&self) -> DataType {
        self.settings.data_type
    }

    fn create_image(&self, level: usize) -> ReprojResult<Raster> {
        check_level(&self.target_model, level)?;
        let source_level = self.source_level(level);
        let source_model = &self.source_model;

        let source_geometry = ImageGeometry::new(
            source_model.level_bounds(source_level)?,
            self.source_crs.clone(),
            source_model.image_to_model(source_level),
        )?;
        let target_geometry = ImageGeometry::new(
            self.target_model.level_bounds(level)?,
            self.target_crs.clone(),
            self.target_model.image_to_model(level),
        )?;
        log::debug!(
            "Reprojecting level {} from source level {} ({:?} -> {:?})",
            level,
            source_level,
            source_geometry.image_rect(),
            target_geometry.image_rect()
        );

        let source_image = self.source.create_image(source_level)?;
        let raster = reproject(
            &source_image,
            &source_geometry,
            &target_geometry,
            self.provider.as_ref(),
            self.settings,
        )?;
        let rect = target_geometry.image_rect();
        Ok(raster.with_tile_size((
            self.tile_size.0.clamp(1, rect.width),
            self.tile_size.1.clamp(1, rect.height),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crs::tests::StubProvider;
    use crate::core::multilevel::ArrayLevelSource;
    use crate::types::Rect;
    use approx::assert_relative_eq;

    fn settings(method: ResamplingMethod, data_type: DataType) -> SamplingSettings {
        SamplingSettings {
            method,
            no_data: f64::NAN,
            data_type,
        }
    }

    #[test]
    fn test_identity_reprojection_is_exact() {
        let provider = StubProvider::new();
        let data = Array2::from_shape_fn((5, 6), |(r, c)| (r * 10 + c) as f64);
        let (rows, cols) = data.dim();
        let i2m = AffineTransform::identity().translate(3.0, 40.0).scale(0.25, -0.25);
        let source = Raster::new(Rect::from_size(cols, rows), data.clone(), DataType::Float32).unwrap();
        let geometry = ImageGeometry::new(Rect::from_size(cols, rows), provider.wgs84.clone(), i2m).unwrap();

        for method in [ResamplingMethod::Nearest, ResamplingMethod::Bilinear, ResamplingMethod::Bicubic] {
            let out = reproject(&source, &geometry, &geometry, &provider, settings(method, DataType::Float32))
                .unwrap();
            for ((r, c), v) in out.data.indexed_iter() {
                assert_relative_eq!(*v, data[[r, c]], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_pixels_outside_source_get_no_data() {
        let provider = StubProvider::new();
        let source = Raster::new(Rect::from_size(2, 2), Array2::from_elem((2, 2), 7.0), DataType::Int16).unwrap();
        let source_geometry =
            ImageGeometry::new(Rect::from_size(2, 2), provider.wgs84.clone(), AffineTransform::identity()).unwrap();
        // Target one pixel to the right of the source
        let target_geometry = ImageGeometry::new(
            Rect::from_size(2, 1),
            provider.wgs84.clone(),
            AffineTransform::identity().translate(1.0, 0.0),
        )
        .unwrap();

        let out = reproject(
            &source,
            &source_geometry,
            &target_geometry,
            &provider,
            SamplingSettings {
                method: ResamplingMethod::Nearest,
                no_data: -1.0,
                data_type: DataType::Int16,
            },
        )
        .unwrap();
        assert_eq!(out.data.row(0).to_vec(), vec![7.0, -1.0]);
    }

    #[test]
    fn test_missing_transform_fails_at_construction() {
        let provider = Arc::new(StubProvider::new());
        let other = provider.decode("AUTO:42001,10,50").unwrap();
        let source = Arc::new(
            ArrayLevelSource::new(Array2::zeros((4, 4)), DataType::Float32, AffineTransform::identity(), 1)
                .unwrap(),
        );
        let target_model = MultiLevelModel::new(1, AffineTransform::identity(), 4, 4).unwrap();
        let result = ReprojectedLevelSource::new(
            source,
            provider.wgs84.clone(),
            target_model,
            other,
            provider.clone(),
            settings(ResamplingMethod::Nearest, DataType::Float32),
        );
        assert!(matches!(result, Err(crate::types::ReprojError::MissingTransform { .. })));
    }

    #[test]
    fn test_target_levels_clamp_to_coarsest_source_level() {
        let provider = Arc::new(StubProvider::new());
        let data = Array2::from_shape_fn((16, 16), |(r, c)| (r * 16 + c) as f64);
        let source = Arc::new(ArrayLevelSource::new(data, DataType::Float32, AffineTransform::identity(), 2).unwrap());
        let target_model = MultiLevelModel::new(4, AffineTransform::identity(), 16, 16).unwrap();
        let level_source = ReprojectedLevelSource::new(
            source.clone(),
            provider.wgs84.clone(),
            target_model,
            provider.wgs84.clone(),
            provider.clone(),
            settings(ResamplingMethod::Bicubic, DataType::UInt16),
        )
        .unwrap();

        assert_eq!(level_source.settings().method, ResamplingMethod::Nearest);
        assert_eq!(level_source.source_level(0), 0);
        assert_eq!(level_source.source_level(3), 1);

        let level3 = level_source.create_image(3).unwrap();
        assert_eq!(level3.bounds, Rect::from_size(2, 2));
        // Target level-3 pixel (0, 0) centre is source level-1 pixel (2, 2)
        let source_level1 = source.create_image(1).unwrap();
        assert_eq!(level3.data[[0, 0]], source_level1.data[[2, 2]]);
        assert!(level_source.create_image(4).is_err());
    }
}
