use anyhow::{Context, Result};
use burn_ndarray::NdArray;
use clap::{Args, Parser, Subcommand};
use dfreg_core::filter::WarpImageFilter;
use dfreg_core::interpolation::Interpolation;
use dfreg_io::{
    read_displacement_field, read_nifti, read_nifti_with_datatype, write_displacement_field, write_nifti_as, NiftiType,
    OutputNaming,
};
use dfreg_registration::{DeformableRegistration, RegistrationConfig};
use std::path::{Path, PathBuf};
use tracing::info;

mod error;

use error::PipelineError;

type Backend = NdArray<f32>;

#[derive(Parser)]
#[command(name = "dfreg")]
#[command(about = "Multi-resolution Demons deformable registration of 3D volumes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a moving volume to a fixed volume
    Register(RegisterArgs),

    /// Apply an existing displacement field to a volume
    Warp(WarpArgs),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    /// Fixed (reference) volume
    #[arg(long)]
    fixed: PathBuf,

    /// Moving volume
    #[arg(long)]
    moving: PathBuf,

    /// Warped output volume; the field is written next to it
    #[arg(short, long)]
    output: PathBuf,

    /// JSON configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of pyramid levels
    #[arg(long)]
    levels: Option<usize>,

    /// Iterations per level, coarsest first
    #[arg(long, value_delimiter = ',')]
    iterations: Option<Vec<usize>>,

    /// RMS change thresholds per level, coarsest first
    #[arg(long, value_delimiter = ',')]
    thresholds: Option<Vec<f64>>,

    /// Standard deviation of the displacement field smoothing, in voxels
    #[arg(long)]
    sigma: Option<f64>,

    /// Histogram bins
    #[arg(long)]
    bins: Option<usize>,

    /// Histogram match points
    #[arg(long)]
    match_points: Option<usize>,

    /// Keep voxels below the mean intensity in the histograms
    #[arg(long)]
    no_threshold_at_mean: bool,

    /// Skip histogram matching
    #[arg(long)]
    no_histogram_matching: bool,

    /// Interpolation of the final warp (linear, nearest)
    #[arg(long)]
    interpolation: Option<Interpolation>,

    /// Prefix of the displacement field file name
    #[arg(long, default_value = "deformed_")]
    field_prefix: String,
}

#[derive(Args, Debug)]
struct WarpArgs {
    /// Volume to warp
    #[arg(long)]
    moving: PathBuf,

    /// Displacement field
    #[arg(long)]
    field: PathBuf,

    /// Volume whose grid the output takes
    #[arg(long)]
    reference: PathBuf,

    /// Warped output volume
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value = "linear")]
    interpolation: Interpolation,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register(args) => register(&args)?,
        Commands::Warp(args) => warp(&args)?,
    }

    Ok(())
}

impl RegisterArgs {
    /// Configuration from the file (or defaults) with flags applied on top.
    fn configuration(&self) -> Result<RegistrationConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str::<RegistrationConfig>(&text)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            None => RegistrationConfig::default(),
        };

        if let Some(levels) = self.levels {
            config = config.with_levels(levels);
        }
        if let Some(iterations) = &self.iterations {
            config.iterations = iterations.clone();
        }
        if let Some(thresholds) = &self.thresholds {
            config.thresholds = thresholds.clone();
        }
        if let Some(sigma) = self.sigma {
            config.demons.standard_deviation = sigma;
        }
        if let Some(bins) = self.bins {
            config.histogram.bins = bins;
        }
        if let Some(match_points) = self.match_points {
            config.histogram.match_points = match_points;
        }
        if self.no_threshold_at_mean {
            config.histogram.threshold_at_mean = false;
        }
        if self.no_histogram_matching {
            config.histogram.enabled = false;
        }
        if let Some(interpolation) = self.interpolation {
            config.interpolation = interpolation;
        }
        Ok(config)
    }
}

fn register(args: &RegisterArgs) -> Result<(), PipelineError> {
    let config = args.configuration().map_err(|e| PipelineError::read("configuration", e))?;
    let device = Default::default();

    info!(fixed = %args.fixed.display(), moving = %args.moving.display(), "Loading volumes");
    let fixed = read_nifti::<Backend, _>(&args.fixed, &device).map_err(|e| PipelineError::read("fixed volume", e))?;
    let (moving, datatype) =
        read_nifti_with_datatype::<Backend, _>(&args.moving, &device).map_err(|e| PipelineError::read("moving volume", e))?;

    let output = DeformableRegistration::new(config).execute(&fixed, &moving)?;
    info!(
        total_iterations = output.summary.total_iterations(),
        converged_levels = output.summary.converged_levels(),
        levels = output.summary.levels.len(),
        "Registration finished"
    );

    let field_path = OutputNaming::new(args.field_prefix.clone()).field_path(&args.output);
    let failures: Vec<PipelineError> = [
        write_nifti_as(&args.output, &output.warped, datatype).map_err(|e| PipelineError::write("warped volume", e)),
        write_displacement_field(&field_path, &output.field).map_err(|e| PipelineError::write("displacement field", e)),
    ]
    .into_iter()
    .filter_map(|r| r.err())
    .collect();

    if !failures.is_empty() {
        return Err(PipelineError::Outputs(failures));
    }

    info!(warped = %args.output.display(), field = %field_path.display(), "Wrote outputs");
    Ok(())
}

fn warp(args: &WarpArgs) -> Result<(), PipelineError> {
    let device = Default::default();
    let (moving, datatype) =
        read_nifti_with_datatype::<Backend, _>(&args.moving, &device).map_err(|e| PipelineError::read("moving volume", e))?;
    let reference =
        read_nifti::<Backend, _>(&args.reference, &device).map_err(|e| PipelineError::read("reference volume", e))?;
    let field = read_displacement_field::<Backend, _>(&args.field, &device)
        .map_err(|e| PipelineError::read("displacement field", e))?;

    let warped = WarpImageFilter::new(args.interpolation).apply(&moving, &field, &reference);
    write_output(&args.output, &warped, datatype)
}

/// Warped volumes keep the voxel type of the moving volume.
fn write_output(path: &Path, image: &dfreg_core::image::Image<Backend, 3>, datatype: NiftiType) -> Result<(), PipelineError> {
    write_nifti_as(path, image, datatype).map_err(|e| PipelineError::write("warped volume", e))?;
    info!(path = %path.display(), "Wrote warped volume");
    Ok(())
}
