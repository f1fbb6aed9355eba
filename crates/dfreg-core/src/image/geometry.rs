//! Grid geometry shared by images and displacement fields.
//!
//! A geometry describes a regular voxel grid in physical space: its shape,
//! the physical position of voxel `(0, 0, 0)`, the spacing between voxels
//! and the orientation of the index axes.
//!
//! # Axis conventions
//! * `shape` follows tensor order `[D, H, W]` (z, y, x), x being contiguous.
//! * `origin`, `spacing` and continuous indices follow physical order `(x, y, z)`.
//!
//! Tensor axis `a` therefore pairs with physical axis `D - 1 - a`; see
//! [`ImageGeometry::physical_axis`].

use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;
use crate::spatial::{Direction, Point, Spacing, Vector};
use super::grid::generate_grid_3d;

/// Physical layout of a voxel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageGeometry<const D: usize> {
    shape: [usize; D],
    origin: Point<D>,
    spacing: Spacing<D>,
    direction: Direction<D>,
    inverse_direction: Direction<D>,
}

impl<const D: usize> ImageGeometry<D> {
    /// Create a new geometry.
    ///
    /// # Panics
    /// Panics if a spacing component is not strictly positive or the
    /// direction matrix is singular.
    pub fn new(shape: [usize; D], origin: Point<D>, spacing: Spacing<D>, direction: Direction<D>) -> Self {
        assert!(spacing.is_valid(), "Spacing must be finite and positive, got {:?}", spacing.to_array());
        let inverse_direction = direction
            .try_inverse()
            .unwrap_or_else(|| panic!("Direction matrix must be invertible: {:?}", direction));
        Self {
            shape,
            origin,
            spacing,
            direction,
            inverse_direction,
        }
    }

    /// Unit spacing, zero origin, identity direction.
    pub fn with_shape(shape: [usize; D]) -> Self {
        Self::new(shape, Point::origin(), Spacing::uniform(1.0), Direction::identity())
    }

    /// Grid shape in tensor order.
    pub fn shape(&self) -> [usize; D] {
        self.shape
    }

    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    /// Total number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.shape.iter().product()
    }

    /// Physical axis paired with tensor axis `tensor_axis`.
    pub fn physical_axis(tensor_axis: usize) -> usize {
        D - 1 - tensor_axis
    }

    /// Number of voxels along physical axis `axis` (0 = x).
    pub fn size_along(&self, axis: usize) -> usize {
        self.shape[D - 1 - axis]
    }

    /// Same geometry on a different grid shape.
    pub fn with_new_shape(&self, shape: [usize; D]) -> Self {
        Self { shape, ..*self }
    }

    /// True when both grids sample the same physical locations.
    ///
    /// Shapes must be identical; origin, spacing and direction are compared
    /// within `tolerance`.
    pub fn same_grid(&self, other: &Self, tolerance: f64) -> bool {
        self.shape == other.shape
            && self.origin.approx_eq(&other.origin, tolerance)
            && self.spacing.approx_eq(&other.spacing, tolerance)
            && self.direction.approx_eq(&other.direction, tolerance)
    }

    /// Map a physical point to a continuous index.
    ///
    /// `index = (Direction^-1 * (point - origin)) / spacing`
    pub fn transform_physical_point_to_continuous_index(&self, point: &Point<D>) -> Point<D> {
        let rotated = self.inverse_direction * (*point - self.origin);
        let mut index = Point::<D>::origin();
        for i in 0..D {
            index[i] = rotated[i] / self.spacing[i];
        }
        index
    }

    /// Map a continuous index to a physical point.
    ///
    /// `point = origin + Direction * (index * spacing)`
    pub fn transform_continuous_index_to_physical_point(&self, index: &Point<D>) -> Point<D> {
        let mut scaled = Vector::<D>::zeros();
        for i in 0..D {
            scaled[i] = index[i] * self.spacing[i];
        }
        self.origin + self.direction * scaled
    }

    /// Batch version of [`transform_physical_point_to_continuous_index`](Self::transform_physical_point_to_continuous_index).
    ///
    /// `points` is `[Batch, D]`; the result is `[Batch, D]`.
    pub fn world_to_index_tensor<B: Backend>(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = points.device();
        let origin = self.origin_tensor::<B>(&device);

        // I = (P - O) @ T with T[r, c] = (D^-1)[c, r] / S[c]
        let mut t_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                t_data.push((self.inverse_direction[(c, r)] / self.spacing[c]) as f32);
            }
        }
        let t = Tensor::<B, 2>::from_data(TensorData::new(t_data, [D, D]), &device);

        (points - origin).matmul(t)
    }

    /// Batch version of [`transform_continuous_index_to_physical_point`](Self::transform_continuous_index_to_physical_point).
    pub fn index_to_world_tensor<B: Backend>(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = indices.device();
        let origin = self.origin_tensor::<B>(&device);

        // P = O + I @ M with M[r, c] = S[r] * D[c, r]
        let mut m_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                m_data.push((self.spacing[r] * self.direction[(c, r)]) as f32);
            }
        }
        let m = Tensor::<B, 2>::from_data(TensorData::new(m_data, [D, D]), &device);

        indices.matmul(m) + origin
    }

    fn origin_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let origin: Vec<f32> = (0..D).map(|i| self.origin[i] as f32).collect();
        Tensor::<B, 2>::from_data(TensorData::new(origin, [1, D]), device)
    }
}

impl ImageGeometry<3> {
    /// Physical coordinates of every voxel centre, `[N, 3]` in flattening order.
    pub fn physical_points<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        self.index_to_world_tensor(generate_grid_3d::<B>(self.shape, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn rotated_geometry() -> ImageGeometry<3> {
        // 90 degrees around z: x -> y, y -> -x
        let mut direction = Direction::<3>::identity();
        direction[(0, 0)] = 0.0;
        direction[(0, 1)] = -1.0;
        direction[(1, 0)] = 1.0;
        direction[(1, 1)] = 0.0;
        ImageGeometry::new(
            [4, 5, 6],
            Point::new([10.0, -5.0, 2.0]),
            Spacing::new([0.5, 2.0, 1.5]),
            direction,
        )
    }

    #[test]
    fn test_point_index_roundtrip() {
        let geometry = rotated_geometry();
        let index = Point::new([1.5, 2.0, 3.25]);
        let point = geometry.transform_continuous_index_to_physical_point(&index);
        let back = geometry.transform_physical_point_to_continuous_index(&point);
        assert!(back.approx_eq(&index, 1e-9));
    }

    #[test]
    fn test_tensor_mapping_matches_scalar_mapping() {
        let device = Default::default();
        let geometry = rotated_geometry();

        let index = Point::new([2.0, 1.0, 3.0]);
        let expected = geometry.transform_continuous_index_to_physical_point(&index);

        let indices = Tensor::<TestBackend, 2>::from_floats([[2.0, 1.0, 3.0]], &device);
        let points = geometry.index_to_world_tensor(indices);
        let values = points.clone().into_data().to_vec::<f32>().unwrap();
        for i in 0..3 {
            assert!((values[i] as f64 - expected[i]).abs() < 1e-4);
        }

        let recovered = geometry.world_to_index_tensor(points).into_data().to_vec::<f32>().unwrap();
        assert!((recovered[0] - 2.0).abs() < 1e-4);
        assert!((recovered[1] - 1.0).abs() < 1e-4);
        assert!((recovered[2] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_physical_points_layout() {
        let device = Default::default();
        let geometry = ImageGeometry::new(
            [2, 2, 3],
            Point::new([1.0, 2.0, 3.0]),
            Spacing::new([2.0, 1.0, 1.0]),
            Direction::identity(),
        );
        let points = geometry.physical_points::<TestBackend>(&device);
        assert_eq!(points.dims(), [12, 3]);
        let values = points.into_data().to_vec::<f32>().unwrap();
        // Second voxel advances x by one spacing
        assert_eq!(&values[3..6], &[3.0, 2.0, 3.0]);
        // Last voxel is (x=2, y=1, z=1)
        assert_eq!(&values[33..36], &[5.0, 3.0, 4.0]);
    }

    #[test]
    fn test_same_grid_and_axes() {
        let a = ImageGeometry::<3>::with_shape([4, 5, 6]);
        let mut b = a;
        assert!(a.same_grid(&b, 1e-9));
        b = b.with_new_shape([4, 5, 7]);
        assert!(!a.same_grid(&b, 1e-9));

        assert_eq!(ImageGeometry::<3>::physical_axis(0), 2);
        assert_eq!(a.size_along(0), 6);
        assert_eq!(a.size_along(2), 4);
        assert_eq!(a.num_voxels(), 120);
    }

    #[test]
    #[should_panic]
    fn test_zero_spacing_rejected() {
        let _ = ImageGeometry::new(
            [2, 2, 2],
            Point::origin(),
            Spacing::new([1.0, 0.0, 1.0]),
            Direction::identity(),
        );
    }
}
