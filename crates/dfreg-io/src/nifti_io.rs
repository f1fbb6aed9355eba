use anyhow::{anyhow, bail, Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use dfreg_core::image::{Image, ImageGeometry};
use dfreg_core::spatial::{Direction, Point, Spacing, Vector};
use dfreg_core::transform::DisplacementField;
use nalgebra::SMatrix;
use ndarray::{Array3, Array5, ArrayD};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, NiftiType, ReaderOptions};
use std::path::Path;

/// NIfTI intent code for a vector per voxel.
pub const NIFTI_INTENT_VECTOR: i16 = 1007;

/// Read a scalar volume. Voxels are converted to `f32`.
pub fn read_nifti<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B, 3>> {
    read_nifti_with_datatype(path, device).map(|(image, _)| image)
}

/// Read a scalar volume together with the voxel type it is stored as.
pub fn read_nifti_with_datatype<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<(Image<B, 3>, NiftiType)> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
    let header = obj.header().clone();
    let datatype = header
        .data_type()
        .with_context(|| format!("Unsupported datatype {} in {}", header.datatype, path.display()))?;

    let array = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert volume to ndarray")?;

    // Trailing singleton axes (e.g. a time axis of length 1) are dropped
    let shape: Vec<usize> = array.shape().to_vec();
    if shape.len() < 3 || shape[3..].iter().any(|&n| n != 1) {
        bail!("Expected a 3D scalar volume in {}, found shape {:?}", path.display(), shape);
    }
    let array = array
        .into_shape(ndarray::IxDyn(&shape[..3]))
        .context("Failed to drop singleton axes")?;

    let [nx, ny, nz] = [shape[0], shape[1], shape[2]];
    let geometry = geometry_from_header(&header, [nz, ny, nx]).with_context(|| format!("Invalid geometry in {}", path.display()))?;
    let values = to_tensor_order(array);

    tracing::debug!(path = %path.display(), shape = ?geometry.shape(), ?datatype, "Read NIfTI volume");
    Ok((Image::from_vec(values, geometry, device), datatype))
}

/// Write a scalar volume as float32 with sform geometry.
pub fn write_nifti<B: Backend, P: AsRef<Path>>(path: P, image: &Image<B, 3>) -> Result<()> {
    write_nifti_as(path, image, NiftiType::Float32)
}

/// Write a scalar volume stored as `datatype`.
///
/// Integer types are rounded and saturate at the type's range. Types without
/// a scalar integer or float counterpart are written as float32.
pub fn write_nifti_as<B: Backend, P: AsRef<Path>>(path: P, image: &Image<B, 3>, datatype: NiftiType) -> Result<()> {
    let path = path.as_ref();
    let [nz, ny, nx] = image.shape();
    let values = image.to_vec();

    // NIfTI indexes (x, y, z); tensor data is [z][y][x]
    let at = |(x, y, z): (usize, usize, usize)| values[(z * ny + y) * nx + x];
    let dims = (nx, ny, nz);

    let header = header_for(image.geometry());
    let options = WriterOptions::new(path).reference_header(&header);
    let written = match datatype {
        NiftiType::Uint8 => options.write_nifti(&Array3::from_shape_fn(dims, |i| at(i).round() as u8)),
        NiftiType::Int8 => options.write_nifti(&Array3::from_shape_fn(dims, |i| at(i).round() as i8)),
        NiftiType::Uint16 => options.write_nifti(&Array3::from_shape_fn(dims, |i| at(i).round() as u16)),
        NiftiType::Int16 => options.write_nifti(&Array3::from_shape_fn(dims, |i| at(i).round() as i16)),
        NiftiType::Uint32 => options.write_nifti(&Array3::from_shape_fn(dims, |i| at(i).round() as u32)),
        NiftiType::Int32 => options.write_nifti(&Array3::from_shape_fn(dims, |i| at(i).round() as i32)),
        NiftiType::Float64 => options.write_nifti(&Array3::from_shape_fn(dims, |i| at(i) as f64)),
        _ => options.write_nifti(&Array3::from_shape_fn(dims, at)),
    };
    written.with_context(|| format!("Failed to write NIfTI file {}", path.display()))?;

    tracing::debug!(path = %path.display(), shape = ?image.shape(), ?datatype, "Wrote NIfTI volume");
    Ok(())
}

/// Read a displacement field stored as `[nx, ny, nz, 1, 3]` (or `[nx, ny, nz, 3]`).
pub fn read_displacement_field<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<DisplacementField<B>> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
    let header = obj.header().clone();
    if header.intent_code != NIFTI_INTENT_VECTOR {
        tracing::warn!(path = %path.display(), intent = header.intent_code, "Displacement field without vector intent");
    }

    let array = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert field to ndarray")?;
    let shape: Vec<usize> = array.shape().to_vec();
    let array = match shape.as_slice() {
        [nx, ny, nz, 1, 3] | [nx, ny, nz, 3] => array
            .into_shape(ndarray::IxDyn(&[*nx, *ny, *nz, 3]))
            .context("Failed to reshape displacement field")?,
        _ => bail!("Expected a displacement field of shape [nx, ny, nz, 1, 3] in {}, found {:?}", path.display(), shape),
    };

    let [nx, ny, nz] = [shape[0], shape[1], shape[2]];
    let geometry = geometry_from_header(&header, [nz, ny, nx]).with_context(|| format!("Invalid geometry in {}", path.display()))?;

    // Component-major, then z, y, x
    let values: Vec<f32> = array.permuted_axes(ndarray::IxDyn(&[3, 2, 1, 0])).iter().copied().collect();
    let data = Tensor::<B, 4>::from_data(TensorData::new(values, [3, nz, ny, nx]), device);

    tracing::debug!(path = %path.display(), shape = ?geometry.shape(), "Read displacement field");
    Ok(DisplacementField::new(data, geometry))
}

/// Write a displacement field as a float32 vector volume `[nx, ny, nz, 1, 3]`.
pub fn write_displacement_field<B: Backend, P: AsRef<Path>>(path: P, field: &DisplacementField<B>) -> Result<()> {
    let path = path.as_ref();
    let [nz, ny, nx] = field.shape();
    let values = field
        .data()
        .clone()
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Failed to read displacement field data: {:?}", e))?;

    let voxels = nz * ny * nx;
    let array = Array5::from_shape_fn((nx, ny, nz, 1, 3), |(x, y, z, _, c)| values[c * voxels + (z * ny + y) * nx + x]);

    let mut header = header_for(field.geometry());
    header.intent_code = NIFTI_INTENT_VECTOR;
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&array)
        .with_context(|| format!("Failed to write displacement field {}", path.display()))?;

    tracing::debug!(path = %path.display(), shape = ?field.shape(), "Wrote displacement field");
    Ok(())
}

/// Reorder an `(x, y, z)` indexed array into tensor order, x fastest.
fn to_tensor_order(array: ArrayD<f32>) -> Vec<f32> {
    array.reversed_axes().iter().copied().collect()
}

/// Voxel-to-world affine rows from sform, qform or pixdim, in that order of preference.
fn header_affine(header: &NiftiHeader) -> [[f64; 4]; 3] {
    let row = |r: [f32; 4]| r.map(f64::from);
    if header.sform_code > 0 {
        return [row(header.srow_x), row(header.srow_y), row(header.srow_z)];
    }

    let [dx, dy, dz] = [1, 2, 3].map(|i| if header.pixdim[i] > 0.0 { header.pixdim[i] as f64 } else { 1.0 });
    if header.qform_code > 0 {
        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let dz = dz * qfac;

        return [
            [(a * a + b * b - c * c - d * d) * dx, (2.0 * b * c - 2.0 * a * d) * dy, (2.0 * b * d + 2.0 * a * c) * dz, header.quatern_x as f64],
            [(2.0 * b * c + 2.0 * a * d) * dx, (a * a + c * c - b * b - d * d) * dy, (2.0 * c * d - 2.0 * a * b) * dz, header.quatern_y as f64],
            [(2.0 * b * d - 2.0 * a * c) * dx, (2.0 * c * d + 2.0 * a * b) * dy, (a * a + d * d - c * c - b * b) * dz, header.quatern_z as f64],
        ];
    }

    [[dx, 0.0, 0.0, 0.0], [0.0, dy, 0.0, 0.0], [0.0, 0.0, dz, 0.0]]
}

fn geometry_from_header(header: &NiftiHeader, shape: [usize; 3]) -> Result<ImageGeometry<3>> {
    let affine = header_affine(header);
    let origin = Point::new([affine[0][3], affine[1][3], affine[2][3]]);

    let columns = [0, 1, 2].map(|c| Vector::new([affine[0][c], affine[1][c], affine[2][c]]));
    let spacing = Spacing::new(columns.map(|col| col.norm()));

    let fallback = [
        nalgebra::Vector3::x_axis().into_inner(),
        nalgebra::Vector3::y_axis().into_inner(),
        nalgebra::Vector3::z_axis().into_inner(),
    ];
    let unit = |i: usize| {
        let s = spacing[i];
        if s > 1e-9 {
            columns[i].0 / s
        } else {
            fallback[i]
        }
    };
    let direction = Direction(SMatrix::<f64, 3, 3>::from_columns(&[unit(0), unit(1), unit(2)]));
    if direction.0.determinant().abs() < 1e-6 || direction.try_inverse().is_none() {
        bail!("Voxel axes are collinear (direction {:?})", direction.0);
    }

    // Degenerate columns fall back to unit spacing
    let spacing = Spacing::new([0, 1, 2].map(|i| if spacing[i] > 1e-9 { spacing[i] } else { 1.0 }));

    Ok(ImageGeometry::new(shape, origin, spacing, direction))
}

/// Header carrying the geometry as an sform; dimensions and datatype come from the data.
fn header_for(geometry: &ImageGeometry<3>) -> NiftiHeader {
    let spacing = geometry.spacing();
    let origin = geometry.origin();
    let direction = geometry.direction();

    let srow = |r: usize| {
        [
            (direction[(r, 0)] * spacing[0]) as f32,
            (direction[(r, 1)] * spacing[1]) as f32,
            (direction[(r, 2)] * spacing[2]) as f32,
            origin[r] as f32,
        ]
    };

    let mut header = NiftiHeader::default();
    header.pixdim[0] = 1.0;
    header.pixdim[1] = spacing[0] as f32;
    header.pixdim[2] = spacing[1] as f32;
    header.pixdim[3] = spacing[2] as f32;
    header.sform_code = 1;
    header.qform_code = 0;
    header.srow_x = srow(0);
    header.srow_y = srow(1);
    header.srow_z = srow(2);
    header
}
