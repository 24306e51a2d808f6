use crate::types::{ModelBounds, Rect, ReprojError, ReprojResult};
use serde::{Deserialize, Serialize};

/// 2-D affine transform
///
/// ```text
/// x' = m00 * x + m01 * y + m02
/// y' = m10 * x + m11 * y + m12
/// ```
///
/// `translate`, `scale` and `rotate` concatenate onto the right hand side, so the last
/// operation added is the first one applied to a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub m00: f64,
    pub m01: f64,
    pub m02: f64,
    pub m10: f64,
    pub m11: f64,
    pub m12: f64,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub fn new(m00: f64, m01: f64, m02: f64, m10: f64, m11: f64, m12: f64) -> Self {
        Self { m00, m01, m02, m10, m11, m12 }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// From a GDAL style geotransform `[ul_x, x_res, x_rot, ul_y, y_rot, y_res]`
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3])
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [self.m02, self.m00, self.m01, self.m12, self.m10, self.m11]
    }

    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det != 0.0 && [self.m02, self.m12].iter().all(|v| v.is_finite())
    }

    /// `self · other`: applies `other` first, then `self`
    pub fn concatenate(&self, other: &AffineTransform) -> AffineTransform {
        AffineTransform {
            m00: self.m00 * other.m00 + self.m01 * other.m10,
            m01: self.m00 * other.m01 + self.m01 * other.m11,
            m02: self.m00 * other.m02 + self.m01 * other.m12 + self.m02,
            m10: self.m10 * other.m00 + self.m11 * other.m10,
            m11: self.m10 * other.m01 + self.m11 * other.m11,
            m12: self.m10 * other.m02 + self.m11 * other.m12 + self.m12,
        }
    }

    pub fn translate(&self, tx: f64, ty: f64) -> AffineTransform {
        self.concatenate(&AffineTransform::new(1.0, 0.0, tx, 0.0, 1.0, ty))
    }

    pub fn scale(&self, sx: f64, sy: f64) -> AffineTransform {
        self.concatenate(&AffineTransform::new(sx, 0.0, 0.0, 0.0, sy, 0.0))
    }

    /// Counter-clockwise rotation by `theta` radians
    pub fn rotate(&self, theta: f64) -> AffineTransform {
        let (sin, cos) = theta.sin_cos();
        self.concatenate(&AffineTransform::new(cos, -sin, 0.0, sin, cos, 0.0))
    }

    pub fn inverse(&self) -> ReprojResult<AffineTransform> {
        if !self.is_invertible() {
            return Err(ReprojError::InvalidGeometry(format!(
                "affine transform is not invertible: {:?}",
                self
            )));
        }
        let det = self.determinant();
        let m00 = self.m11 / det;
        let m01 = -self.m01 / det;
        let m10 = -self.m10 / det;
        let m11 = self.m00 / det;
        Ok(AffineTransform {
            m00,
            m01,
            m02: -(m00 * self.m02 + m01 * self.m12),
            m10,
            m11,
            m12: -(m10 * self.m02 + m11 * self.m12),
        })
    }

    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.m00 * x + self.m01 * y + self.m02,
            self.m10 * x + self.m11 * y + self.m12,
        )
    }

    /// Apply the transform in place to coordinate arrays
    pub fn apply_all(&self, xs: &mut [f64], ys: &mut [f64]) {
        for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
            let (tx, ty) = self.apply(*x, *y);
            *x = tx;
            *y = ty;
        }
    }

    /// Bounds of the transformed corners of a pixel rectangle
    pub fn transform_rect(&self, rect: &Rect) -> ModelBounds {
        let x0 = rect.x as f64;
        let y0 = rect.y as f64;
        let x1 = x0 + rect.width as f64;
        let y1 = y0 + rect.height as f64;
        self.transform_bounds(&ModelBounds {
            min_x: x0,
            min_y: y0,
            max_x: x1,
            max_y: y1,
        })
    }

    /// Bounds of the transformed corners of a rectangle
    pub fn transform_bounds(&self, bounds: &ModelBounds) -> ModelBounds {
        let corners = [
            self.apply(bounds.min_x, bounds.min_y),
            self.apply(bounds.max_x, bounds.min_y),
            self.apply(bounds.max_x, bounds.max_y),
            self.apply(bounds.min_x, bounds.max_y),
        ];
        let mut out = ModelBounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            out.min_x = out.min_x.min(x);
            out.min_y = out.min_y.min(y);
            out.max_x = out.max_x.max(x);
            out.max_y = out.max_y.max(y);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_operations_apply_last_first() {
        let t = AffineTransform::identity()
            .translate(100.0, 50.0)
            .scale(2.0, -3.0)
            .translate(-1.0, -1.0);
        let (x, y) = t.apply(1.0, 1.0);
        assert_relative_eq!(x, 100.0);
        assert_relative_eq!(y, 50.0);
        let (x, y) = t.apply(2.0, 3.0);
        assert_relative_eq!(x, 102.0);
        assert_relative_eq!(y, 44.0);
    }

    #[test]
    fn test_inverse_round_trip() {
        let t = AffineTransform::identity()
            .translate(500_000.0, 4_200_000.0)
            .scale(30.0, -30.0)
            .rotate(0.3)
            .translate(-12.5, -7.0);
        let inv = t.inverse().unwrap();
        let (mx, my) = t.apply(17.0, 4.0);
        let (px, py) = inv.apply(mx, my);
        assert_relative_eq!(px, 17.0, epsilon = 1e-8);
        assert_relative_eq!(py, 4.0, epsilon = 1e-8);
    }

    #[test]
    fn test_degenerate_transform_is_rejected() {
        let t = AffineTransform::identity().scale(0.0, 1.0);
        assert!(!t.is_invertible());
        assert!(t.inverse().is_err());
    }

    #[test]
    fn test_gdal_geotransform_layout() {
        let gt = [10.0, 0.5, 0.0, 20.0, 0.0, -0.5];
        let t = AffineTransform::from_gdal(gt);
        assert_eq!(t.apply(2.0, 2.0), (11.0, 19.0));
        assert_eq!(t.to_gdal(), gt);
    }

    #[test]
    fn test_transform_rect_bounds() {
        let t = AffineTransform::identity().translate(10.0, 20.0).scale(2.0, -1.0);
        let b = t.transform_rect(&Rect::from_size(4, 3));
        assert_relative_eq!(b.min_x, 10.0);
        assert_relative_eq!(b.max_x, 18.0);
        assert_relative_eq!(b.min_y, 17.0);
        assert_relative_eq!(b.max_y, 20.0);
    }
}
