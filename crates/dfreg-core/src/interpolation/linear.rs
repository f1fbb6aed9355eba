//! Trilinear interpolation.

use burn::tensor::{Int, Tensor};
use burn::tensor::backend::Backend;
use super::trait_::{split_columns, Interpolator};

/// Trilinear interpolator with border clamping.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Interpolator<B> for LinearInterpolator {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let [d0, d1, d2] = data.dims(); // Z, Y, X
        let [x, y, z] = split_columns(indices);

        // Clamp the sampling position first so that points outside the grid
        // take the border value instead of extrapolating.
        let x = x.clamp(0.0, (d2 - 1) as f64);
        let y = y.clamp(0.0, (d1 - 1) as f64);
        let z = z.clamp(0.0, (d0 - 1) as f64);

        let x0 = x.clone().floor();
        let y0 = y.clone().floor();
        let z0 = z.clone().floor();

        let wx = x - x0.clone();
        let wy = y - y0.clone();
        let wz = z - z0.clone();

        let x1_i = (x0.clone() + 1.0).clamp(0.0, (d2 - 1) as f64).int();
        let y1_i = (y0.clone() + 1.0).clamp(0.0, (d1 - 1) as f64).int();
        let z1_i = (z0.clone() + 1.0).clamp(0.0, (d0 - 1) as f64).int();
        let x0_i = x0.int();
        let y0_i = y0.int();
        let z0_i = z0.int();

        let stride_z = (d1 * d2) as i32;
        let stride_y = d2 as i32;
        let flat = data.clone().reshape([d0 * d1 * d2]);

        let gather = |xi: &Tensor<B, 1, Int>, yi: &Tensor<B, 1, Int>, zi: &Tensor<B, 1, Int>| {
            let idx = zi.clone() * stride_z + yi.clone() * stride_y + xi.clone();
            flat.clone().gather(0, idx)
        };

        let v000 = gather(&x0_i, &y0_i, &z0_i);
        let v100 = gather(&x1_i, &y0_i, &z0_i);
        let v010 = gather(&x0_i, &y1_i, &z0_i);
        let v110 = gather(&x1_i, &y1_i, &z0_i);
        let v001 = gather(&x0_i, &y0_i, &z1_i);
        let v101 = gather(&x1_i, &y0_i, &z1_i);
        let v011 = gather(&x0_i, &y1_i, &z1_i);
        let v111 = gather(&x1_i, &y1_i, &z1_i);

        // lerp(a, b, w) = a + (b - a) * w
        let c00 = v000.clone() + (v100 - v000) * wx.clone();
        let c10 = v010.clone() + (v110 - v010) * wx.clone();
        let c01 = v001.clone() + (v101 - v001) * wx.clone();
        let c11 = v011.clone() + (v111 - v011) * wx;

        let c0 = c00.clone() + (c10 - c00) * wy.clone();
        let c1 = c01.clone() + (c11 - c01) * wy;

        c0.clone() + (c1 - c0) * wz
    }
}
