//! georeproject: multi-resolution raster reprojection
//!
//! Reprojects the bands of geocoded remote-sensing products into a target coordinate
//! reference system, or onto the pixel grid of a collocation product. Target bands are
//! lazy image pyramids: each level is resampled from the matching source level only when
//! it is first requested.

pub mod core;
pub mod io;
pub mod operator;
pub mod product;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{DataType, GeoPos, ModelBounds, PixelPos, Rect, ReprojError, ReprojResult};

pub use crate::core::{
    AffineTransform, Crs, CrsProvider, CrsSpec, GeoCoding, ImageGeometry, MultiLevelImage, MultiLevelModel,
    MultiLevelSource, ResamplingMethod, TargetGridSpec,
};
pub use io::{ElevationModelRegistry, GdalCrsProvider};
pub use operator::{ReprojectionOp, ReprojectionParams};
pub use product::{Band, Product, SampleCoding};
