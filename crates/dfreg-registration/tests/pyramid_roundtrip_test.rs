use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use dfreg_core::filter::MultiResolutionPyramid;
use dfreg_core::image::{Image, ImageGeometry};
use dfreg_core::spatial::Vector;
use dfreg_core::transform::DisplacementField;

type B = NdArray<f32>;

#[test]
fn test_coarsest_field_resamples_to_finest_level() {
    let geometry = ImageGeometry::with_shape([64, 64, 64]);
    let image = Image::<B, 3>::from_vec(vec![0.0; geometry.num_voxels()], geometry, &Default::default());
    let pyramid = MultiResolutionPyramid::with_levels(&image, 4);

    assert_eq!(pyramid.levels(), 4);
    assert_eq!(pyramid.get_level(0).shape(), [8, 8, 8]);
    assert_eq!(pyramid.get_level(3).shape(), [64, 64, 64]);
    assert_eq!(pyramid.finest().map(|level| level.shape()), Some([64, 64, 64]));

    let coarse = pyramid.get_level(0).geometry();
    let field = DisplacementField::<B>::from_vectors(
        Tensor::<B, 1>::from_floats([0.5, -1.0, 2.0], &Default::default())
            .reshape([1, 3])
            .repeat_dim(0, coarse.num_voxels()),
        *coarse,
    );

    let finest = pyramid.get_level(3).geometry();
    let resampled = field.resample(finest);

    assert_eq!(resampled.shape(), [64, 64, 64]);
    assert_eq!(resampled.shape(), pyramid.get_level(3).shape());
    assert_eq!(resampled.data().dims(), [3, 64, 64, 64]);
    assert_eq!(resampled.geometry(), finest);

    // A constant field stays constant in physical units
    let v = resampled.vector_at_index([40, 7, 63]);
    assert!(v.approx_eq(&Vector::new([0.5, -1.0, 2.0]), 1e-5));
}

#[test]
fn test_each_level_doubles_resolution() {
    let geometry = ImageGeometry::with_shape([64, 64, 64]);
    let image = Image::<B, 3>::from_vec(vec![1.0; geometry.num_voxels()], geometry, &Default::default());
    let pyramid = MultiResolutionPyramid::with_levels(&image, 4);

    for level in 1..4 {
        let coarse = pyramid.get_level(level - 1);
        let fine = pyramid.get_level(level);
        assert_eq!(coarse.shape().map(|s| s * 2), fine.shape());
        assert!((coarse.spacing()[0] - 2.0 * fine.spacing()[0]).abs() < 1e-12);
        assert_eq!(coarse.origin(), fine.origin());
    }
}
