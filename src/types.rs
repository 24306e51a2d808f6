use num_traits::NumCast;
use serde::{Deserialize, Serialize};

/// Geophysical sample type of a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl DataType {
    pub fn is_floating_point(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Coerce a computed sample into the value range and precision of this type.
    ///
    /// Integer types round to nearest and saturate; NaN becomes zero, which is what
    /// an integer raster stores when asked to hold a NaN sentinel.
    pub fn coerce(&self, value: f64) -> f64 {
        fn saturate<T: NumCast + Copy>(value: f64, min: T, max: T) -> f64 {
            if value.is_nan() {
                return 0.0;
            }
            let lo: f64 = NumCast::from(min).unwrap_or(f64::MIN);
            let hi: f64 = NumCast::from(max).unwrap_or(f64::MAX);
            value.round().max(lo).min(hi)
        }

        match self {
            DataType::Int8 => saturate(value, i8::MIN, i8::MAX),
            DataType::UInt8 => saturate(value, u8::MIN, u8::MAX),
            DataType::Int16 => saturate(value, i16::MIN, i16::MAX),
            DataType::UInt16 => saturate(value, u16::MIN, u16::MAX),
            DataType::Int32 => saturate(value, i32::MIN, i32::MAX),
            DataType::UInt32 => saturate(value, u32::MIN, u32::MAX),
            DataType::Float32 => value as f32 as f64,
            DataType::Float64 => value,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Int8 => "int8",
            DataType::UInt8 => "uint8",
            DataType::Int16 => "int16",
            DataType::UInt16 => "uint16",
            DataType::Int32 => "int32",
            DataType::UInt32 => "uint32",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        write!(f, "{}", name)
    }
}

/// Continuous pixel coordinate (corner based: pixel (0,0) spans [0,1) x [0,1))
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPos {
    pub x: f64,
    pub y: f64,
}

impl PixelPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPos {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPos {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_valid(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

/// Integer pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_size(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned rectangle in model (map) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ModelBounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Bounding box of a set of points, ignoring non-finite ones
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<ModelBounds> {
        let mut mins = [f64::INFINITY, f64::INFINITY];
        let mut maxs = [f64::NEG_INFINITY, f64::NEG_INFINITY];
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            mins[0] = mins[0].min(x);
            mins[1] = mins[1].min(y);
            maxs[0] = maxs[0].max(x);
            maxs[1] = maxs[1].max(y);
        }
        if mins[0] > maxs[0] || mins[1] > maxs[1] {
            return None;
        }
        Some(ModelBounds {
            min_x: mins[0],
            min_y: mins[1],
            max_x: maxs[0],
            max_y: maxs[1],
        })
    }

    /// Smallest integer rectangle enclosing these bounds.
    ///
    /// Edges within 1e-9 of an integer snap to it so that float noise from a
    /// round trip through an affine transform does not grow the rectangle.
    pub fn enclosing_rect(&self) -> Rect {
        const EPS: f64 = 1e-9;
        let x0 = (self.min_x + EPS).floor();
        let y0 = (self.min_y + EPS).floor();
        let x1 = (self.max_x - EPS).ceil();
        let y1 = (self.max_y - EPS).ceil();
        Rect {
            x: x0 as i64,
            y: y0 as i64,
            width: (x1 - x0).max(0.0) as usize,
            height: (y1 - y0).max(0.0) as usize,
        }
    }
}

/// Error types for reprojection
#[derive(Debug, thiserror::Error)]
pub enum ReprojError {
    #[error("Invalid target CRS specification. Specify {0} one of 'crsCode', 'wktFile', 'wkt' and 'collocationProduct' parameter")]
    AmbiguousOrMissingCrsSpec(&'static str),

    #[error("Invalid CRS code: {0}")]
    InvalidCrsCode(String),

    #[error("Invalid resampling method: {0}")]
    InvalidResampling(String),

    #[error("Invalid referencing parameters: 'referencePixelX', 'referencePixelY', 'easting' and 'northing' have to be specified either all or none")]
    InvalidReferencing,

    #[error("'pixelSizeX' and 'pixelSizeY' must be specified both or not at all")]
    InvalidPixelSize,

    #[error("Orientation {0} is outside of [0, 360]")]
    InvalidOrientation(f64),

    #[error("Invalid target grid: {0}")]
    InvalidGridSize(String),

    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Failed to resolve CRS '{spec}': {reason}")]
    CrsResolution { spec: String, reason: String },

    #[error("No coordinate transform from '{source_crs}' to '{target_crs}': {reason}")]
    MissingTransform {
        source_crs: String,
        target_crs: String,
        reason: String,
    },

    #[error("DEM not installed: {0}")]
    ElevationModelNotInstalled(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl ReprojError {
    /// Configuration errors are detected before any geometry is computed
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReprojError::AmbiguousOrMissingCrsSpec(_)
                | ReprojError::InvalidCrsCode(_)
                | ReprojError::InvalidResampling(_)
                | ReprojError::InvalidReferencing
                | ReprojError::InvalidPixelSize
                | ReprojError::InvalidOrientation(_)
                | ReprojError::InvalidGridSize(_)
                | ReprojError::InvalidExpression { .. }
        )
    }
}

/// Result type for reprojection operations
pub type ReprojResult<T> = Result<T, ReprojError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_coercion_rounds_and_saturates() {
        assert_eq!(DataType::UInt8.coerce(12.6), 13.0);
        assert_eq!(DataType::UInt8.coerce(-4.0), 0.0);
        assert_eq!(DataType::UInt8.coerce(300.0), 255.0);
        assert_eq!(DataType::Int16.coerce(f64::NAN), 0.0);
        assert!(DataType::Float64.coerce(f64::NAN).is_nan());
        assert_eq!(DataType::Float32.coerce(0.1), 0.1f32 as f64);
    }

    #[test]
    fn test_enclosing_rect_tolerates_float_noise() {
        let bounds = ModelBounds {
            min_x: -1e-12,
            min_y: 0.0,
            max_x: 4.000000000001,
            max_y: 3.5,
        };
        assert_eq!(bounds.enclosing_rect(), Rect::new(0, 0, 4, 4));
    }

    #[test]
    fn test_error_classification() {
        assert!(ReprojError::InvalidPixelSize.is_configuration());
        assert!(ReprojError::AmbiguousOrMissingCrsSpec("only").is_configuration());
        assert!(!ReprojError::ElevationModelNotInstalled("GETASSE30".into()).is_configuration());
    }
}
