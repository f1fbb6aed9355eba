//! NIfTI-1 input and output for volumes and displacement fields.

pub mod naming;
pub mod nifti_io;

pub use naming::OutputNaming;
pub use nifti::NiftiType;
pub use nifti_io::{
    read_displacement_field, read_nifti, read_nifti_with_datatype, write_displacement_field, write_nifti, write_nifti_as,
    NIFTI_INTENT_VECTOR,
};
