//! Multi-resolution (pyramid) rasters
//!
//! Level 0 is full resolution; level `L` is downsampled by `2^L` in both directions.
//! Every level's image-to-model transform and pixel bounds follow from level 0's
//! transform, the model bounds and the level scale.

use crate::core::affine::AffineTransform;
use crate::types::{DataType, ModelBounds, Rect, ReprojError, ReprojResult};
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Default tile edge used when a raster does not ask for anything else
pub const DEFAULT_TILE_SIZE: usize = 512;

/// Pyramid layout of a raster in model coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct MultiLevelModel {
    level_count: usize,
    image_to_model: AffineTransform,
    model_bounds: ModelBounds,
}

impl MultiLevelModel {
    /// Model covering the `width` x `height` level-0 raster
    pub fn new(
        level_count: usize,
        image_to_model: AffineTransform,
        width: usize,
        height: usize,
    ) -> ReprojResult<Self> {
        let bounds = image_to_model.transform_rect(&Rect::from_size(width, height));
        Self::with_bounds(level_count, image_to_model, bounds)
    }

    pub fn with_bounds(
        level_count: usize,
        image_to_model: AffineTransform,
        model_bounds: ModelBounds,
    ) -> ReprojResult<Self> {
        if level_count == 0 {
            return Err(ReprojError::InvalidGeometry(
                "a multi-level model needs at least one level".to_string(),
            ));
        }
        if !image_to_model.is_invertible() {
            return Err(ReprojError::InvalidGeometry(format!(
                "level 0 image-to-model transform is degenerate: {:?}",
                image_to_model
            )));
        }
        Ok(Self {
            level_count,
            image_to_model,
            model_bounds,
        })
    }

    pub fn level_count(&self) -> usize {
        self.level_count
    }

    pub fn model_bounds(&self) -> ModelBounds {
        self.model_bounds
    }

    pub fn scale(&self, level: usize) -> f64 {
        (1u64 << level.min(62)) as f64
    }

    pub fn image_to_model(&self, level: usize) -> AffineTransform {
        let s = self.scale(level);
        self.image_to_model.scale(s, s)
    }

    pub fn model_to_image(&self, level: usize) -> ReprojResult<AffineTransform> {
        self.image_to_model(level).inverse()
    }

    /// Integer pixel rectangle of the model bounds at `level`
    pub fn level_bounds(&self, level: usize) -> ReprojResult<Rect> {
        let m2i = self.model_to_image(level)?;
        Ok(m2i.transform_bounds(&self.model_bounds).enclosing_rect())
    }
}

/// Number of levels needed until the coarsest level fits into one tile
pub fn compute_level_count(width: usize, height: usize, tile_size: usize) -> usize {
    let tile_size = tile_size.max(1);
    let (mut w, mut h) = (width.max(1), height.max(1));
    let mut count = 1;
    while w > tile_size || h > tile_size {
        w = (w + 1) / 2;
        h = (h + 1) / 2;
        count += 1;
    }
    count
}

/// One realized pyramid level: samples of a pixel rectangle in level coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    /// Pixel rectangle the samples cover, in level pixel coordinates
    pub bounds: Rect,
    /// Row-major samples, `bounds.height` x `bounds.width`
    pub data: Array2<f64>,
    pub data_type: DataType,
    /// Preferred tile layout `(width, height)` for whoever renders this level
    pub tile_size: (usize, usize),
}

impl Raster {
    pub fn new(bounds: Rect, data: Array2<f64>, data_type: DataType) -> ReprojResult<Self> {
        if data.dim() != (bounds.height, bounds.width) {
            return Err(ReprojError::InvalidGeometry(format!(
                "raster data shape {:?} does not match bounds {:?}",
                data.dim(),
                bounds
            )));
        }
        let tile_size = (
            bounds.width.clamp(1, DEFAULT_TILE_SIZE),
            bounds.height.clamp(1, DEFAULT_TILE_SIZE),
        );
        Ok(Self {
            bounds,
            data,
            data_type,
            tile_size,
        })
    }

    pub fn filled(bounds: Rect, data_type: DataType, value: f64) -> Self {
        let data = Array2::from_elem((bounds.height, bounds.width), data_type.coerce(value));
        Self {
            bounds,
            data,
            data_type,
            tile_size: (
                bounds.width.clamp(1, DEFAULT_TILE_SIZE),
                bounds.height.clamp(1, DEFAULT_TILE_SIZE),
            ),
        }
    }

    pub fn with_tile_size(mut self, tile_size: (usize, usize)) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn width(&self) -> usize {
        self.bounds.width
    }

    pub fn height(&self) -> usize {
        self.bounds.height
    }

    /// Sample at level pixel `(x, y)`, `None` outside the bounds
    pub fn get(&self, x: i64, y: i64) -> Option<f64> {
        let col = x - self.bounds.x;
        let row = y - self.bounds.y;
        if col < 0 || row < 0 {
            return None;
        }
        self.data.get((row as usize, col as usize)).copied()
    }
}

/// Source of lazily realized pyramid levels.
///
/// `create_image` must be safe to call concurrently for different levels and return
/// equivalent data for repeated calls; caching is left to [`MultiLevelImage`].
pub trait MultiLevelSource: Send + Sync {
    fn model(&self) -> &MultiLevelModel;

    fn data_type(&self) -> DataType;

    fn create_image(&self, level: usize) -> ReprojResult<Raster>;
}

pub(crate) fn check_level(model: &MultiLevelModel, level: usize) -> ReprojResult<()> {
    if level >= model.level_count() {
        return Err(ReprojError::Processing(format!(
            "level {} requested, only {} levels available",
            level,
            model.level_count()
        )));
    }
    Ok(())
}

/// In-memory level-0 raster whose coarser levels are nearest-neighbour downsamplings
pub struct ArrayLevelSource {
    model: MultiLevelModel,
    data: Array2<f64>,
    data_type: DataType,
}

impl ArrayLevelSource {
    /// `data` is rows x columns at full resolution
    pub fn new(
        data: Array2<f64>,
        data_type: DataType,
        image_to_model: AffineTransform,
        level_count: usize,
    ) -> ReprojResult<Self> {
        let (height, width) = data.dim();
        if width == 0 || height == 0 {
            return Err(ReprojError::InvalidGeometry("empty source raster".to_string()));
        }
        let model = MultiLevelModel::new(level_count, image_to_model, width, height)?;
        Ok(Self {
            model,
            data,
            data_type,
        })
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }
}

impl MultiLevelSource for ArrayLevelSource {
    fn model(&self) -> &MultiLevelModel {
        &self.model
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn create_image(&self, level: usize) -> ReprojResult<Raster> {
        check_level(&self.model, level)?;
        if level == 0 {
            let (height, width) = self.data.dim();
            return Raster::new(Rect::from_size(width, height), self.data.clone(), self.data_type);
        }

        let bounds = self.model.level_bounds(level)?;
        let scale = self.model.scale(level);
        let (rows, cols) = self.data.dim();
        let data = Array2::from_shape_fn((bounds.height, bounds.width), |(r, c)| {
            let sx = (((bounds.x + c as i64) as f64 + 0.5) * scale).floor().max(0.0) as usize;
            let sy = (((bounds.y + r as i64) as f64 + 0.5) * scale).floor().max(0.0) as usize;
            self.data[[sy.min(rows - 1), sx.min(cols - 1)]]
        });
        Raster::new(bounds, data, self.data_type)
    }
}

/// Caller-owned memoization of the levels of a [`MultiLevelSource`]
pub struct MultiLevelImage {
    source: Arc<dyn MultiLevelSource>,
    levels: RwLock<HashMap<usize, Arc<Raster>>>,
}

impl MultiLevelImage {
    pub fn new(source: Arc<dyn MultiLevelSource>) -> Self {
        Self {
            source,
            levels: RwLock::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &Arc<dyn MultiLevelSource> {
        &self.source
    }

    pub fn model(&self) -> &MultiLevelModel {
        self.source.model()
    }

    /// Realize `level`, reusing an earlier result when there is one
    pub fn image(&self, level: usize) -> ReprojResult<Arc<Raster>> {
        {
            let levels = self
                .levels
                .read()
                .map_err(|e| ReprojError::Processing(format!("Level cache poisoned: {}", e)))?;
            if let Some(raster) = levels.get(&level) {
                return Ok(Arc::clone(raster));
            }
        }

        // Realized outside the lock so other levels are not blocked
        let raster = Arc::new(self.source.create_image(level)?);
        let mut levels = self
            .levels
            .write()
            .map_err(|e| ReprojError::Processing(format!("Level cache poisoned: {}", e)))?;
        Ok(Arc::clone(levels.entry(level).or_insert(raster)))
    }

    pub fn cached_levels(&self) -> usize {
        self.levels.read().map(|l| l.len()).unwrap_or(0)
    }
}
