//! Nearest-neighbour interpolation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use super::trait_::{split_columns, Interpolator};

/// Picks the value of the closest voxel; useful for label volumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborInterpolator;

impl NearestNeighborInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Interpolator<B> for NearestNeighborInterpolator {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let [d0, d1, d2] = data.dims();
        let [x, y, z] = split_columns(indices);

        let x_i = x.round().clamp(0.0, (d2 - 1) as f64).int();
        let y_i = y.round().clamp(0.0, (d1 - 1) as f64).int();
        let z_i = z.round().clamp(0.0, (d0 - 1) as f64).int();

        let idx = z_i * ((d1 * d2) as i32) + y_i * (d2 as i32) + x_i;
        data.clone().reshape([d0 * d1 * d2]).gather(0, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_nearest_neighbor_rounding() {
        let device = Default::default();
        let data = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![0.0, 1.0, 10.0, 11.0, 100.0, 101.0, 110.0, 111.0], [2, 2, 2]),
            &device,
        );
        let indices = Tensor::<TestBackend, 2>::from_floats(
            [[0.2, 0.1, 0.0], [0.8, 0.9, 0.6], [7.0, -2.0, 0.0]],
            &device,
        );
        let values = NearestNeighborInterpolator::new()
            .interpolate(&data, indices)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(values, vec![0.0, 111.0, 1.0]);
    }
}
