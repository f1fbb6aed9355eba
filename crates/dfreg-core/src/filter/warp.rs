use burn::tensor::backend::Backend;
use crate::image::Image;
use crate::interpolation::Interpolation;
use crate::transform::{DisplacementField, DisplacementFieldTransform};
use super::resample::ResampleImageFilter;

/// Warps a moving image into the space of a fixed image through a
/// displacement field.
///
/// Output voxel `p` of the fixed grid takes the moving intensity at
/// `p + u(p)`. The moving image may live on any grid; the field is resampled
/// onto the fixed grid first when the two differ. Points that leave the
/// moving grid take the edge padding value, 0 by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarpImageFilter {
    interpolation: Interpolation,
    edge_padding_value: f32,
}

impl WarpImageFilter {
    pub fn new(interpolation: Interpolation) -> Self {
        Self {
            interpolation,
            edge_padding_value: 0.0,
        }
    }

    pub fn with_edge_padding_value(mut self, value: f32) -> Self {
        self.edge_padding_value = value;
        self
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn edge_padding_value(&self) -> f32 {
        self.edge_padding_value
    }

    pub fn apply<B: Backend>(&self, moving: &Image<B, 3>, field: &DisplacementField<B>, fixed: &Image<B, 3>) -> Image<B, 3> {
        let field = if field.geometry().same_grid(fixed.geometry(), 1e-9) {
            field.clone()
        } else {
            tracing::debug!(
                field_shape = ?field.shape(),
                fixed_shape = ?fixed.shape(),
                "Resampling displacement field onto fixed grid"
            );
            field.resample(fixed.geometry())
        };

        ResampleImageFilter::new_from_reference(fixed, DisplacementFieldTransform::new(field), self.interpolation)
            .with_default_value(self.edge_padding_value)
            .apply(moving)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use crate::image::ImageGeometry;
    use crate::spatial::{Direction, Point, Spacing};

    type TestBackend = NdArray<f32>;

    fn ramp(geometry: ImageGeometry<3>) -> Image<TestBackend, 3> {
        let [d, h, w] = geometry.shape();
        let values = (0..d * h * w).map(|i| (i % w) as f32).collect();
        Image::from_vec(values, geometry, &Default::default())
    }

    #[test]
    fn test_zero_field_is_identity() {
        let device = Default::default();
        let image = ramp(ImageGeometry::with_shape([4, 5, 6]));
        let field = DisplacementField::zeros(*image.geometry(), &device);

        let warped = WarpImageFilter::default().apply(&image, &field, &image);
        assert_eq!(warped.geometry(), image.geometry());
        for (a, b) in warped.to_vec().iter().zip(image.to_vec().iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_constant_field_shifts_content() {
        let device = Default::default();
        let geometry = ImageGeometry::with_shape([4, 4, 8]);
        let image = ramp(geometry);
        let components = [
            Tensor::<TestBackend, 3>::ones([4, 4, 8], &device).mul_scalar(2.0),
            Tensor::zeros([4, 4, 8], &device),
            Tensor::zeros([4, 4, 8], &device),
        ];
        let field = DisplacementField::from_components(components, geometry);

        let warped = WarpImageFilter::new(Interpolation::NearestNeighbor).apply(&image, &field, &image).to_vec();
        // Output x samples moving x + 2; the last two columns leave the grid
        assert_eq!(&warped[0..8], &[2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 0.0, 0.0]);
    }

    #[test]
    fn test_field_leaving_the_grid_writes_edge_padding() {
        let device = Default::default();
        let geometry = ImageGeometry::with_shape([4, 4, 8]);
        let values = (0..4 * 4 * 8).map(|i| (i % 8) as f32 + 1.0).collect();
        let image = Image::<TestBackend, 3>::from_vec(values, geometry, &device);
        let components = [
            Tensor::<TestBackend, 3>::ones([4, 4, 8], &device).mul_scalar(20.0),
            Tensor::zeros([4, 4, 8], &device),
            Tensor::zeros([4, 4, 8], &device),
        ];
        let field = DisplacementField::from_components(components, geometry);

        let warped = WarpImageFilter::default().apply(&image, &field, &image);
        assert!(warped.to_vec().iter().all(|&v| v == 0.0));

        let padded = WarpImageFilter::new(Interpolation::NearestNeighbor).with_edge_padding_value(-3.0);
        assert_eq!(padded.edge_padding_value(), -3.0);
        assert!(padded.apply(&image, &field, &image).to_vec().iter().all(|&v| v == -3.0));
    }

    #[test]
    fn test_coarse_field_is_resampled_to_fixed_grid() {
        let device = Default::default();
        let fixed = ramp(ImageGeometry::with_shape([8, 8, 8]));
        let coarse = ImageGeometry::new([4, 4, 4], Point::origin(), Spacing::uniform(2.0), Direction::identity());
        let field = DisplacementField::<TestBackend>::zeros(coarse, &device);

        let warped = WarpImageFilter::default().apply(&fixed, &field, &fixed);
        assert_eq!(warped.shape(), [8, 8, 8]);
        assert_eq!(warped.to_vec(), fixed.to_vec());
    }
}
