//! Dense displacement fields.
//!
//! A [`DisplacementField`] stores one displacement vector per voxel of a
//! reference grid. Vectors are expressed in physical units (mm) and
//! `(x, y, z)` order, so a field keeps its meaning when it is resampled onto
//! a coarser or finer grid: only the sampling changes, never the values.

use burn::tensor::{ElementConversion, Tensor};
use burn::tensor::backend::Backend;
use crate::image::ImageGeometry;
use crate::interpolation::{Interpolator, LinearInterpolator};
use crate::spatial::{Point, Vector};
use super::trait_::Transform;

/// Dense 3D displacement field.
///
/// Data has shape `[3, D, H, W]`; component 0 is the x displacement.
/// The field maps a point `p` of the reference (fixed) space to `p + u(p)`
/// in the moving space.
#[derive(Debug, Clone)]
pub struct DisplacementField<B: Backend> {
    data: Tensor<B, 4>,
    geometry: ImageGeometry<3>,
}

impl<B: Backend> DisplacementField<B> {
    /// Create a field from a `[3, D, H, W]` tensor.
    ///
    /// # Panics
    /// Panics if the tensor shape does not match the geometry.
    pub fn new(data: Tensor<B, 4>, geometry: ImageGeometry<3>) -> Self {
        let [c, d, h, w] = data.dims();
        assert_eq!(c, 3, "Displacement field needs 3 components");
        assert_eq!([d, h, w], geometry.shape(), "Displacement field shape must match geometry");
        Self { data, geometry }
    }

    /// The zero field on a grid.
    pub fn zeros(geometry: ImageGeometry<3>, device: &B::Device) -> Self {
        let [d, h, w] = geometry.shape();
        Self::new(Tensor::zeros([3, d, h, w], device), geometry)
    }

    /// Assemble a field from its x, y and z component volumes.
    pub fn from_components(components: [Tensor<B, 3>; 3], geometry: ImageGeometry<3>) -> Self {
        let [d, h, w] = geometry.shape();
        let stacked = Tensor::cat(
            components.into_iter().map(|c| c.reshape([1, d, h, w])).collect(),
            0,
        );
        Self::new(stacked, geometry)
    }

    /// Build a field from `[N, 3]` vectors listed in flattening order.
    pub fn from_vectors(vectors: Tensor<B, 2>, geometry: ImageGeometry<3>) -> Self {
        let [d, h, w] = geometry.shape();
        Self::new(vectors.transpose().reshape([3, d, h, w]), geometry)
    }

    pub fn data(&self) -> &Tensor<B, 4> {
        &self.data
    }

    pub fn geometry(&self) -> &ImageGeometry<3> {
        &self.geometry
    }

    /// Spatial shape `[D, H, W]`.
    pub fn shape(&self) -> [usize; 3] {
        self.geometry.shape()
    }

    pub fn device(&self) -> B::Device {
        self.data.device()
    }

    /// One displacement component (0 = x) as a `[D, H, W]` volume.
    pub fn component(&self, axis: usize) -> Tensor<B, 3> {
        let [d, h, w] = self.shape();
        self.data.clone().narrow(0, axis, 1).reshape([d, h, w])
    }

    pub fn components(&self) -> [Tensor<B, 3>; 3] {
        [self.component(0), self.component(1), self.component(2)]
    }

    /// All vectors as `[N, 3]` rows in flattening order.
    pub fn vectors(&self) -> Tensor<B, 2> {
        let n = self.geometry.num_voxels();
        self.data.clone().reshape([3, n]).transpose()
    }

    /// Per-voxel vector length.
    pub fn magnitude(&self) -> Tensor<B, 3> {
        let [d, h, w] = self.shape();
        self.data
            .clone()
            .powf_scalar(2.0)
            .sum_dim(0)
            .sqrt()
            .reshape([d, h, w])
    }

    /// Largest vector length.
    pub fn max_magnitude(&self) -> f64 {
        self.magnitude().max().into_scalar().elem::<f64>()
    }

    /// Root mean square vector length.
    pub fn rms_magnitude(&self) -> f64 {
        let n = self.geometry.num_voxels().max(1) as f64;
        let sum = self.data.clone().powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        (sum / n).sqrt()
    }

    /// False if any component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.data.clone().abs().sum().into_scalar().elem::<f64>().is_finite()
    }

    /// Displacement stored at voxel `[z, y, x]`.
    pub fn vector_at_index(&self, index: [usize; 3]) -> Vector<3> {
        let [z, y, x] = index;
        let values = self
            .data
            .clone()
            .slice([0..3, z..z + 1, y..y + 1, x..x + 1])
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap_or_default();
        let mut v = Vector::zeros();
        for (i, value) in values.iter().take(3).enumerate() {
            v[i] = *value as f64;
        }
        v
    }

    /// Trilinearly interpolated displacement at a physical point.
    pub fn sample_at(&self, point: &Point<3>) -> Vector<3> {
        let device = self.device();
        let p: Vec<f32> = point.to_array().iter().map(|&c| c as f32).collect();
        let points = Tensor::<B, 2>::from_data(burn::tensor::TensorData::new(p, [1, 3]), &device);
        let values = self
            .sample(points)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap_or_default();
        let mut v = Vector::zeros();
        for (i, value) in values.iter().take(3).enumerate() {
            v[i] = *value as f64;
        }
        v
    }

    /// Interpolate the field at `[N, 3]` physical points.
    ///
    /// Points outside the grid take the displacement of the nearest border
    /// voxel.
    pub fn sample(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let n = points.dims()[0];
        let indices = self.geometry.world_to_index_tensor(points);
        let interpolator = LinearInterpolator::new();
        let columns = self
            .components()
            .iter()
            .map(|component| interpolator.interpolate(component, indices.clone()).reshape([n, 1]))
            .collect();
        Tensor::cat(columns, 1)
    }

    /// Resample the field onto another grid.
    ///
    /// Displacements are physical, so a coarse field upsampled to a finer
    /// grid describes the same deformation without rescaling.
    pub fn resample(&self, target: &ImageGeometry<3>) -> Self {
        if self.geometry.same_grid(target, 1e-9) {
            return self.clone();
        }
        let points = target.physical_points::<B>(&self.device());
        Self::from_vectors(self.sample(points), *target)
    }

    /// Add another field on the same grid.
    pub fn add(&self, other: &Self) -> Self {
        Self::new(self.data.clone() + other.data.clone(), self.geometry)
    }
}

/// Transform view of a displacement field: `p -> p + u(p)`.
#[derive(Debug, Clone)]
pub struct DisplacementFieldTransform<B: Backend> {
    field: DisplacementField<B>,
}

impl<B: Backend> DisplacementFieldTransform<B> {
    pub fn new(field: DisplacementField<B>) -> Self {
        Self { field }
    }

    pub fn field(&self) -> &DisplacementField<B> {
        &self.field
    }
}

impl<B: Backend> Transform<B, 3> for DisplacementFieldTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let displacement = self.field.sample(points.clone());
        points + displacement
    }
}
