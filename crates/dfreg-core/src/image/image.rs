//! Image type with physical metadata.
//!
//! An [`Image`] pairs voxel data (a burn tensor, potentially on GPU) with the
//! [`ImageGeometry`] that maps voxel indices to physical space. Images are
//! values: filters return new images and never modify their inputs.

use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;
use crate::spatial::{Direction, Point, Spacing};
use super::geometry::ImageGeometry;

/// Medical image with physical metadata.
///
/// # Type Parameters
/// * `B` - The backend (CPU or GPU) for tensor operations
/// * `D` - The dimensionality of the image
///
/// # Examples
/// ```rust
/// use dfreg_core::Image;
/// use dfreg_core::spatial::{Point3, Spacing3, Direction3};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 3>::zeros([10, 10, 10], &device);
/// let image = Image::new(
///     data,
///     Point3::new([0.0, 0.0, 0.0]),
///     Spacing3::new([1.0, 1.0, 1.0]),
///     Direction3::identity(),
/// );
/// assert_eq!(image.shape(), [10, 10, 10]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend, const D: usize> {
    data: Tensor<B, D>,
    geometry: ImageGeometry<D>,
}

impl<B: Backend, const D: usize> Image<B, D> {
    /// Create a new image with the given data and metadata.
    ///
    /// # Arguments
    /// * `data` - Voxel data in tensor order `[D, H, W]`
    /// * `origin` - Physical coordinate of the first voxel
    /// * `spacing` - Physical distance between voxels along each axis
    /// * `direction` - Orientation matrix of the image axes
    pub fn new(
        data: Tensor<B, D>,
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Self {
        let geometry = ImageGeometry::new(data.dims(), origin, spacing, direction);
        Self { data, geometry }
    }

    /// Create an image from data and a geometry describing it.
    ///
    /// # Panics
    /// Panics if the tensor shape differs from the geometry shape.
    pub fn from_geometry(data: Tensor<B, D>, geometry: ImageGeometry<D>) -> Self {
        assert_eq!(data.dims(), geometry.shape(), "Tensor shape must match geometry shape");
        Self { data, geometry }
    }

    /// Create an image from voxel values laid out in tensor order.
    pub fn from_vec(values: Vec<f32>, geometry: ImageGeometry<D>, device: &B::Device) -> Self {
        let data = Tensor::<B, D>::from_data(TensorData::new(values, geometry.shape()), device);
        Self::from_geometry(data, geometry)
    }

    /// Same geometry, new voxel data.
    pub fn with_data(&self, data: Tensor<B, D>) -> Self {
        Self::from_geometry(data, self.geometry)
    }

    pub fn data(&self) -> &Tensor<B, D> {
        &self.data
    }

    pub fn into_data(self) -> Tensor<B, D> {
        self.data
    }

    pub fn geometry(&self) -> &ImageGeometry<D> {
        &self.geometry
    }

    pub fn origin(&self) -> &Point<D> {
        self.geometry.origin()
    }

    pub fn spacing(&self) -> &Spacing<D> {
        self.geometry.spacing()
    }

    pub fn direction(&self) -> &Direction<D> {
        self.geometry.direction()
    }

    /// Image shape in tensor order.
    pub fn shape(&self) -> [usize; D] {
        self.geometry.shape()
    }

    pub fn device(&self) -> B::Device {
        self.data.device()
    }

    /// Copy the voxel values to host memory, in tensor order.
    pub fn to_vec(&self) -> Vec<f32> {
        // convert::<f32> fixes the element type, so the extraction cannot fail
        self.data
            .clone()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap_or_default()
    }

    pub fn transform_physical_point_to_continuous_index(&self, point: &Point<D>) -> Point<D> {
        self.geometry.transform_physical_point_to_continuous_index(point)
    }

    pub fn transform_continuous_index_to_physical_point(&self, index: &Point<D>) -> Point<D> {
        self.geometry.transform_continuous_index_to_physical_point(index)
    }

    /// Batch map `[Batch, D]` physical points to continuous indices.
    pub fn world_to_index_tensor(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        self.geometry.world_to_index_tensor(points)
    }

    /// Batch map `[Batch, D]` continuous indices to physical points.
    pub fn index_to_world_tensor(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        self.geometry.index_to_world_tensor(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;
    type Point3 = Point<3>;
    type Spacing3 = Spacing<3>;
    type Direction3 = Direction<3>;

    #[test]
    fn test_image_creation() {
        let device = Default::default();
        let data = Tensor::<Backend, 3>::zeros([4, 5, 6], &device);
        let origin = Point3::new([1.0, 2.0, 3.0]);
        let spacing = Spacing3::new([0.5, 1.0, 2.0]);
        let direction = Direction3::identity();

        let image = Image::new(data, origin, spacing, direction);

        assert_eq!(image.shape(), [4, 5, 6]);
        assert_eq!(image.origin(), &origin);
        assert_eq!(image.spacing(), &spacing);
        assert_eq!(image.direction(), &direction);
    }

    #[test]
    fn test_non_unit_spacing_and_origin() {
        let device = Default::default();
        let data = Tensor::<Backend, 3>::zeros([10, 10, 10], &device);
        let image = Image::new(
            data,
            Point3::new([10.0, 20.0, 30.0]),
            Spacing3::new([2.0, 2.0, 2.0]),
            Direction3::identity(),
        );

        let index = image.transform_physical_point_to_continuous_index(&Point3::new([20.0, 30.0, 40.0]));
        assert!(index.approx_eq(&Point3::new([5.0, 5.0, 5.0]), 1e-9));
    }

    #[test]
    fn test_from_vec_roundtrip() {
        let device = Default::default();
        let geometry = ImageGeometry::<3>::with_shape([2, 3, 4]);
        let values: Vec<f32> = (0..24).map(|v| v as f32).collect();

        let image = Image::<Backend, 3>::from_vec(values.clone(), geometry, &device);
        assert_eq!(image.shape(), [2, 3, 4]);
        assert_eq!(image.to_vec(), values);

        let doubled = image.with_data(image.data().clone().mul_scalar(2.0));
        assert_eq!(doubled.geometry(), image.geometry());
        assert_eq!(doubled.to_vec()[5], 10.0);
    }
}
