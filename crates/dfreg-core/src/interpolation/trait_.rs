//! Interpolator trait for sampling volumes at continuous coordinates.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

/// Samples a volume at non-integer voxel coordinates.
///
/// Samples outside the grid are clamped to the border voxels.
pub trait Interpolator<B: Backend> {
    /// Interpolate `data` (`[D, H, W]`) at `indices` (`[Batch, 3]`, `(x, y, z)` rows).
    ///
    /// Returns the sampled values as a `[Batch]` tensor.
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1>;
}

/// 1.0 where an `(x, y, z)` index row lies on the grid of `sizes` (`[W, H, D]`), 0.0 elsewhere.
///
/// Indices within 1e-3 voxels of the border count as inside.
pub fn inside_mask<B: Backend>(indices: Tensor<B, 2>, sizes: [usize; 3]) -> Tensor<B, 1> {
    let n = indices.dims()[0];
    let device = indices.device();
    (0..3).fold(Tensor::<B, 1>::ones([n], &device), |mask, axis| {
        let column = indices.clone().narrow(1, axis, 1).reshape([n]);
        let upper = sizes[axis].saturating_sub(1) as f64 + 1e-3;
        mask * column.clone().greater_equal_elem(-1e-3).float() * column.lower_equal_elem(upper).float()
    })
}

/// Split `[Batch, 3]` indices into their x, y and z columns.
pub(crate) fn split_columns<B: Backend>(indices: Tensor<B, 2>) -> [Tensor<B, 1>; 3] {
    let x = indices.clone().narrow(1, 0, 1).squeeze::<1>(1);
    let y = indices.clone().narrow(1, 1, 1).squeeze::<1>(1);
    let z = indices.narrow(1, 2, 1).squeeze::<1>(1);
    [x, y, z]
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_inside_mask_marks_out_of_grid_rows() {
        let indices = Tensor::<TestBackend, 2>::from_floats(
            [[0.0, 0.0, 0.0], [3.0, 1.0, 2.0], [3.5, 1.0, 0.0], [1.0, -0.5, 0.0], [1.0, 1.0, 2.0005]],
            &Default::default(),
        );
        let mask = inside_mask(indices, [4, 2, 3]).into_data().to_vec::<f32>().unwrap();
        assert_eq!(mask, vec![1.0, 1.0, 0.0, 0.0, 1.0]);
    }
}
