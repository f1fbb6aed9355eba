use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;

/// Continuous indices of every voxel of a 3D grid.
///
/// Returns a tensor of shape `[N, 3]` holding `(x, y, z)` rows in the same
/// order as a flattened `[D, H, W]` tensor, so row `i` addresses element `i`
/// of `data.reshape([N])`.
///
/// # Arguments
/// * `shape` - The grid shape `[D, H, W]`
/// * `device` - The device to create the tensor on
pub fn generate_grid_3d<B: Backend>(shape: [usize; 3], device: &B::Device) -> Tensor<B, 2> {
    let [d, h, w] = shape;
    let total = d * h * w;

    let mut grid = Vec::with_capacity(total * 3);
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                grid.push(x as f32);
                grid.push(y as f32);
                grid.push(z as f32);
            }
        }
    }

    Tensor::<B, 2>::from_data(TensorData::new(grid, [total, 3]), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_grid_order_matches_flattening() {
        let device = Default::default();
        let grid = generate_grid_3d::<TestBackend>([2, 3, 4], &device);
        assert_eq!(grid.dims(), [24, 3]);

        let values = grid.into_data().to_vec::<f32>().unwrap();
        // Row 0 is (0, 0, 0), row 1 advances x, row 4 advances y, row 12 advances z.
        assert_eq!(&values[0..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&values[3..6], &[1.0, 0.0, 0.0]);
        assert_eq!(&values[12..15], &[0.0, 1.0, 0.0]);
        assert_eq!(&values[36..39], &[0.0, 0.0, 1.0]);
        assert_eq!(&values[69..72], &[3.0, 2.0, 1.0]);
    }
}
