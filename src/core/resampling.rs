//! Resampling kernels
//!
//! Coordinates are corner based: pixel `(c, r)` covers `[c, c+1) x [r, r+1)` and its
//! centre sits at `(c + 0.5, r + 0.5)`. Neighbours holding the no-data sentinel are left
//! out and the remaining weights renormalised, so invalid source pixels never bleed into
//! interpolated values.

use crate::core::multilevel::Raster;
use crate::types::{DataType, ReprojError};
use std::fmt;
use std::str::FromStr;

/// Interpolation kernel used to sample the source raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResamplingMethod {
    #[default]
    Nearest,
    Bilinear,
    Bicubic,
}

impl FromStr for ResamplingMethod {
    type Err = ReprojError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResamplingMethod::Nearest),
            "bilinear" => Ok(ResamplingMethod::Bilinear),
            "bicubic" => Ok(ResamplingMethod::Bicubic),
            _ => Err(ReprojError::InvalidResampling(s.to_string())),
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResamplingMethod::Nearest => "Nearest",
            ResamplingMethod::Bilinear => "Bilinear",
            ResamplingMethod::Bicubic => "Bicubic",
        };
        write!(f, "{}", name)
    }
}

impl ResamplingMethod {
    /// Kernel actually used for a band: anything but floating point bands is sampled
    /// with nearest neighbour.
    pub fn for_data_type(self, data_type: DataType) -> ResamplingMethod {
        if data_type.is_floating_point() {
            self
        } else {
            ResamplingMethod::Nearest
        }
    }

    /// Sample `raster` at level pixel coordinate `(x, y)`.
    ///
    /// Returns `None` outside the raster or when no valid neighbour contributes.
    pub fn sample(&self, raster: &Raster, x: f64, y: f64, no_data: f64) -> Option<f64> {
        let cx = x - raster.bounds.x as f64;
        let cy = y - raster.bounds.y as f64;
        let (rows, cols) = raster.data.dim();
        if !(cx >= 0.0 && cy >= 0.0 && cx < cols as f64 && cy < rows as f64) {
            return None;
        }
        match self {
            ResamplingMethod::Nearest => sample_nearest(raster, cx, cy),
            ResamplingMethod::Bilinear => sample_bilinear(raster, cx, cy, no_data),
            ResamplingMethod::Bicubic => sample_bicubic(raster, cx, cy, no_data),
        }
    }
}

pub(crate) fn is_no_data(value: f64, no_data: f64) -> bool {
    if no_data.is_nan() {
        value.is_nan()
    } else {
        value == no_data
    }
}

fn sample_nearest(raster: &Raster, cx: f64, cy: f64) -> Option<f64> {
    raster.data.get((cy.floor() as usize, cx.floor() as usize)).copied()
}

/// Weighted sum over the given neighbours, skipping zero weights, out-of-range
/// pixels and sentinels
fn weighted<I>(raster: &Raster, neighbours: I, no_data: f64) -> Option<f64>
where
    I: IntoIterator<Item = (isize, isize, f64)>,
{
    let (rows, cols) = raster.data.dim();
    let (rows, cols) = (rows as isize, cols as isize);
    let mut accum = 0.0_f64;
    let mut weight_sum = 0.0_f64;

    for (col, row, weight) in neighbours {
        if weight == 0.0 || col < 0 || row < 0 || col >= cols || row >= rows {
            continue;
        }
        let value = raster.data[[row as usize, col as usize]];
        if is_no_data(value, no_data) {
            continue;
        }
        accum += weight * value;
        weight_sum += weight;
    }

    if weight_sum.abs() < 1e-10 {
        return None;
    }
    Some(accum / weight_sum)
}

fn sample_bilinear(raster: &Raster, cx: f64, cy: f64, no_data: f64) -> Option<f64> {
    let px = cx - 0.5;
    let py = cy - 0.5;
    let x0 = px.floor();
    let y0 = py.floor();
    let dx = px - x0;
    let dy = py - y0;
    let (x0, y0) = (x0 as isize, y0 as isize);

    weighted(
        raster,
        [
            (x0, y0, (1.0 - dx) * (1.0 - dy)),
            (x0 + 1, y0, dx * (1.0 - dy)),
            (x0, y0 + 1, (1.0 - dx) * dy),
            (x0 + 1, y0 + 1, dx * dy),
        ],
        no_data,
    )
}

/// Keys cubic convolution weight with `a = -0.5`
fn cubic_weight(t: f64) -> f64 {
    const A: f64 = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        ((A + 2.0) * t - (A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((A * t - 5.0 * A) * t + 8.0 * A) * t - 4.0 * A
    } else {
        0.0
    }
}

fn sample_bicubic(raster: &Raster, cx: f64, cy: f64, no_data: f64) -> Option<f64> {
    let px = cx - 0.5;
    let py = cy - 0.5;
    let x0 = px.floor();
    let y0 = py.floor();
    let dx = px - x0;
    let dy = py - y0;
    let (x0, y0) = (x0 as isize, y0 as isize);

    let wx: [f64; 4] = [cubic_weight(1.0 + dx), cubic_weight(dx), cubic_weight(1.0 - dx), cubic_weight(2.0 - dx)];
    let wy: [f64; 4] = [cubic_weight(1.0 + dy), cubic_weight(dy), cubic_weight(1.0 - dy), cubic_weight(2.0 - dy)];

    let neighbours = (0..4).flat_map(|j| {
        (0..4).map(move |i| (x0 - 1 + i as isize, y0 - 1 + j as isize, wx[i] * wy[j]))
    });
    weighted(raster, neighbours, no_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn raster(data: ndarray::Array2<f64>) -> Raster {
        let (rows, cols) = data.dim();
        Raster::new(Rect::from_size(cols, rows), data, DataType::Float32).unwrap()
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("bicubic".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::Bicubic);
        assert_eq!("NEAREST".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::Nearest);
        assert_eq!("Bilinear".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::Bilinear);
        assert!(matches!(
            "lanczos".parse::<ResamplingMethod>(),
            Err(ReprojError::InvalidResampling(_))
        ));
    }

    #[test]
    fn test_integer_bands_use_nearest() {
        for dt in [DataType::UInt8, DataType::Int16, DataType::UInt32] {
            assert_eq!(ResamplingMethod::Bicubic.for_data_type(dt), ResamplingMethod::Nearest);
            assert_eq!(ResamplingMethod::Bilinear.for_data_type(dt), ResamplingMethod::Nearest);
        }
        assert_eq!(
            ResamplingMethod::Bicubic.for_data_type(DataType::Float32),
            ResamplingMethod::Bicubic
        );
    }

    #[test]
    fn test_pixel_centres_are_exact() {
        let r = raster(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        for method in [ResamplingMethod::Nearest, ResamplingMethod::Bilinear, ResamplingMethod::Bicubic] {
            for row in 0..3 {
                for col in 0..3 {
                    let v = method.sample(&r, col as f64 + 0.5, row as f64 + 0.5, f64::NAN).unwrap();
                    assert_relative_eq!(v, r.data[[row, col]], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_bilinear_midpoint() {
        let r = raster(array![[0.0, 10.0], [20.0, 30.0]]);
        let v = ResamplingMethod::Bilinear.sample(&r, 1.0, 1.0, f64::NAN).unwrap();
        assert_relative_eq!(v, 15.0);
    }

    #[test]
    fn test_sentinel_neighbours_are_skipped() {
        let r = raster(array![[-9999.0, 10.0], [20.0, 30.0]]);
        let v = ResamplingMethod::Bilinear.sample(&r, 1.0, 1.0, -9999.0).unwrap();
        assert_relative_eq!(v, 20.0);

        let all_invalid = raster(array![[-9999.0, -9999.0], [-9999.0, -9999.0]]);
        assert!(ResamplingMethod::Bilinear.sample(&all_invalid, 1.0, 1.0, -9999.0).is_none());
    }

    #[test]
    fn test_nan_propagates_unless_it_is_the_sentinel() {
        let r = raster(array![[f64::NAN, 10.0], [20.0, 30.0]]);
        assert!(ResamplingMethod::Bilinear.sample(&r, 1.0, 1.0, -9999.0).unwrap().is_nan());
        let v = ResamplingMethod::Bilinear.sample(&r, 1.0, 1.0, f64::NAN).unwrap();
        assert_relative_eq!(v, 20.0);
    }

    #[test]
    fn test_outside_domain() {
        let r = raster(array![[1.0, 2.0], [3.0, 4.0]]);
        assert!(ResamplingMethod::Nearest.sample(&r, -0.1, 0.5, f64::NAN).is_none());
        assert!(ResamplingMethod::Bilinear.sample(&r, 0.5, 2.0, f64::NAN).is_none());
        assert!(ResamplingMethod::Bicubic.sample(&r, f64::NAN, 0.5, f64::NAN).is_none());
    }

    #[test]
    fn test_offset_bounds() {
        let data = array![[1.0, 2.0], [3.0, 4.0]];
        let r = Raster::new(Rect::new(10, 20, 2, 2), data, DataType::Float64).unwrap();
        let v = ResamplingMethod::Nearest.sample(&r, 11.5, 20.5, f64::NAN).unwrap();
        assert_eq!(v, 2.0);
    }
}
