//! Core reprojection modules

pub mod affine;
pub mod crs;
pub mod expression;
pub mod geocoding;
pub mod geometry;
pub mod multilevel;
pub mod nodata;
pub mod orthorectify;
pub mod reproject;
pub mod resampling;

// Re-export main types
pub use affine::AffineTransform;
pub use crs::{find_model_transform, AxisDirection, Crs, CrsProvider, CrsResolver, CrsSpec, PointTransform};
pub use expression::ExpressionLevelSource;
pub use geocoding::{CrsGeoCoding, GeoCoding, Pointing, SceneReference, TiePointGeoCoding};
pub use geometry::{GridParams, ImageGeometry, Referencing, TargetGridSpec};
pub use multilevel::{ArrayLevelSource, MultiLevelImage, MultiLevelModel, MultiLevelSource, Raster};
pub use nodata::{must_replace_nan, target_no_data_value, NanReplacedSource, SourceNoDataMaskedSource, ValidMaskedSource};
pub use orthorectify::{ElevationModel, Orthorectifier};
pub use reproject::{reproject, ReprojectedLevelSource, SamplingSettings};
pub use resampling::ResamplingMethod;
