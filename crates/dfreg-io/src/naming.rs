use std::path::{Path, PathBuf};

/// Where the displacement field is written relative to the warped output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNaming {
    pub field_prefix: String,
}

impl Default for OutputNaming {
    fn default() -> Self {
        Self::new("deformed_")
    }
}

impl OutputNaming {
    pub fn new(field_prefix: impl Into<String>) -> Self {
        Self {
            field_prefix: field_prefix.into(),
        }
    }

    /// Field path next to `output`, its file name prefixed.
    ///
    /// `out/warped.nii.gz` becomes `out/deformed_warped.nii.gz` with the
    /// default prefix.
    pub fn field_path(&self, output: &Path) -> PathBuf {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output.nii.gz".to_string());
        output.with_file_name(format!("{}{}", self.field_prefix, name))
    }
}
