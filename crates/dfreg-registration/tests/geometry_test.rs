use burn_ndarray::NdArray;
use dfreg_core::image::{Image, ImageGeometry};
use dfreg_core::spatial::{Direction, Point, Spacing};
use dfreg_registration::{DeformableRegistration, RegistrationConfig};

type B = NdArray<f32>;

/// Soft ball centred at `center` in physical coordinates.
fn ball(geometry: ImageGeometry<3>, center: [f64; 3], radius: f64) -> Image<B, 3> {
    let [d, h, w] = geometry.shape();
    let mut values = Vec::with_capacity(d * h * w);
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let p = geometry.transform_continuous_index_to_physical_point(&Point::new([x as f64, y as f64, z as f64]));
                let r = (0..3).map(|a| (p[a] - center[a]).powi(2)).sum::<f64>().sqrt();
                values.push((60.0 / (1.0 + (r - radius).exp())) as f32);
            }
        }
    }
    Image::from_vec(values, geometry, &Default::default())
}

fn rotated_about_z(angle: f64) -> Direction<3> {
    let (s, c) = angle.sin_cos();
    let mut direction = Direction::identity();
    direction[(0, 0)] = c;
    direction[(0, 1)] = -s;
    direction[(1, 0)] = s;
    direction[(1, 1)] = c;
    direction
}

fn quick_config() -> RegistrationConfig {
    RegistrationConfig {
        iterations: vec![5, 5, 5, 5],
        ..RegistrationConfig::default()
    }
}

#[test]
fn test_outputs_share_oriented_fixed_geometry() {
    let fixed_geometry = ImageGeometry::new(
        [16, 18, 20],
        Point::new([10.0, -5.0, 2.0]),
        Spacing::new([1.2, 0.9, 1.5]),
        rotated_about_z(0.3),
    );
    let fixed = ball(fixed_geometry, [19.0, 5.0, 14.0], 5.0);
    let moving = ball(fixed_geometry, [20.0, 5.5, 13.0], 5.0);

    let output = DeformableRegistration::new(quick_config()).execute(&fixed, &moving).unwrap();

    assert_eq!(output.warped.geometry(), fixed.geometry());
    assert_eq!(output.field.geometry(), fixed.geometry());
    assert_eq!(output.field.shape(), [16, 18, 20]);
    assert_eq!(output.field.data().dims(), [3, 16, 18, 20]);
    assert!(output.field.is_finite());
    assert!(output.warped.to_vec().iter().all(|v| v.is_finite()));
}

#[test]
fn test_moving_on_coarser_grid_is_warped_onto_fixed_grid() {
    let fixed_geometry = ImageGeometry::new(
        [24, 20, 16],
        Point::new([0.0, 0.0, 0.0]),
        Spacing::new([1.0, 1.0, 1.5]),
        Direction::identity(),
    );
    let moving_geometry = ImageGeometry::new(
        [12, 12, 12],
        Point::new([-2.0, -1.0, 0.5]),
        Spacing::new([2.0, 2.0, 2.0]),
        Direction::identity(),
    );
    let fixed = ball(fixed_geometry, [11.0, 9.5, 11.0], 5.0);
    let moving = ball(moving_geometry, [12.0, 9.0, 11.0], 5.0);

    let output = DeformableRegistration::new(quick_config()).execute(&fixed, &moving).unwrap();

    assert_eq!(output.warped.geometry(), fixed.geometry());
    assert_eq!(output.warped.shape(), fixed.shape());
    assert_eq!(output.field.geometry(), fixed.geometry());
    assert_eq!(output.summary.levels.len(), 4);
    assert_eq!(output.summary.levels[3].shape, fixed.shape());
}
