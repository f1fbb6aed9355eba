//! Histogram matching.
//!
//! Maps the intensities of a source volume so that its histogram matches a
//! reference volume. Both histograms are summarised by a quantile table and
//! intensities are remapped piecewise-linearly between matching quantiles.

use burn::tensor::backend::Backend;
use rayon::prelude::*;
use crate::error::FilterError;
use crate::image::Image;

const CHUNK: usize = 1 << 14;

/// Summary statistics of one volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl IntensityStats {
    pub fn compute(values: &[f32]) -> Self {
        let (min, max, sum) = values
            .par_chunks(CHUNK)
            .map(|chunk| {
                chunk.iter().fold((f64::INFINITY, f64::NEG_INFINITY, 0.0), |(lo, hi, s), &v| {
                    let v = v as f64;
                    (lo.min(v), hi.max(v), s + v)
                })
            })
            .reduce(
                || (f64::INFINITY, f64::NEG_INFINITY, 0.0),
                |a, b| (a.0.min(b.0), a.1.max(b.1), a.2 + b.2),
            );
        let n = values.len().max(1) as f64;
        Self { min, max, mean: sum / n }
    }
}

/// Fixed-width histogram over `[lower, upper]`.
#[derive(Debug, Clone)]
struct Histogram {
    lower: f64,
    upper: f64,
    counts: Vec<u64>,
}

impl Histogram {
    /// Count the samples `>= lower`; accumulation is split over rayon chunks.
    fn build(values: &[f32], bins: usize, lower: f64, upper: f64) -> Self {
        let width = upper - lower;
        let counts = values
            .par_chunks(CHUNK)
            .map(|chunk| {
                let mut local = vec![0u64; bins];
                for &v in chunk {
                    let v = v as f64;
                    if v < lower || v > upper {
                        continue;
                    }
                    let bin = if width > 0.0 {
                        (((v - lower) / width) * bins as f64) as usize
                    } else {
                        0
                    };
                    local[bin.min(bins - 1)] += 1;
                }
                local
            })
            .reduce(
                || vec![0u64; bins],
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                    a
                },
            );
        Self { lower, upper, counts }
    }

    fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    fn bin_bounds(&self, bin: usize) -> (f64, f64) {
        let width = (self.upper - self.lower) / self.counts.len() as f64;
        let lo = self.lower + bin as f64 * width;
        (lo, lo + width)
    }

    /// Intensity below which a fraction `p` of the counted samples lies,
    /// interpolated linearly inside the bin that crosses `p`.
    fn quantile(&self, p: f64) -> f64 {
        let total = self.total();
        if total == 0 {
            return self.lower;
        }
        let total = total as f64;

        let mut cumulated = 0.0;
        let mut p_n = 0.0;
        let mut p_prev = 0.0;
        let mut bin = 0;
        let mut frequency = 0.0;
        while bin < self.counts.len() {
            frequency = self.counts[bin] as f64;
            cumulated += frequency;
            p_prev = p_n;
            p_n = cumulated / total;
            bin += 1;
            if p_n >= p {
                break;
            }
        }

        let (lo, hi) = self.bin_bounds(bin - 1);
        let proportion = frequency / total;
        if proportion <= 0.0 {
            return lo;
        }
        lo + ((p - p_prev) / proportion) * (hi - lo)
    }
}

/// Piecewise-linear intensity mapping built from two quantile tables.
#[derive(Debug, Clone)]
pub struct QuantileMapping {
    source: Vec<f64>,
    reference: Vec<f64>,
    gradients: Vec<f64>,
    lower_gradient: f64,
    upper_gradient: f64,
}

impl QuantileMapping {
    fn gradient(num: f64, den: f64) -> f64 {
        if den == 0.0 {
            0.0
        } else {
            num / den
        }
    }

    /// Quantile table row: threshold, interior quantiles, maximum.
    pub fn source_table(&self) -> &[f64] {
        &self.source
    }

    pub fn reference_table(&self) -> &[f64] {
        &self.reference
    }

    /// Map a single intensity.
    pub fn map(&self, value: f64) -> f64 {
        let last = self.source.len() - 1;
        let j = self.source.iter().position(|&q| value < q).unwrap_or(self.source.len());
        if j == 0 {
            self.reference[0] + (value - self.source[0]) * self.lower_gradient
        } else if j > last {
            self.reference[last] + (value - self.source[last]) * self.upper_gradient
        } else {
            self.reference[j - 1] + (value - self.source[j - 1]) * self.gradients[j - 1]
        }
    }
}

/// Histogram matching filter.
///
/// # Examples
/// ```rust,ignore
/// let matched = HistogramMatchingFilter::default().apply(&moving, &fixed)?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HistogramMatchingFilter {
    bins: usize,
    match_points: usize,
    threshold_at_mean: bool,
}

impl Default for HistogramMatchingFilter {
    fn default() -> Self {
        Self::new(1024, 7)
    }
}

impl HistogramMatchingFilter {
    pub fn new(bins: usize, match_points: usize) -> Self {
        Self {
            bins,
            match_points,
            threshold_at_mean: true,
        }
    }

    /// Exclude voxels below the mean intensity (background) from the histograms.
    pub fn with_threshold_at_mean(mut self, enabled: bool) -> Self {
        self.threshold_at_mean = enabled;
        self
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn match_points(&self) -> usize {
        self.match_points
    }

    pub fn threshold_at_mean(&self) -> bool {
        self.threshold_at_mean
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.bins < 2 {
            return Err(FilterError::InvalidParameter(format!(
                "histogram needs at least 2 bins, got {}",
                self.bins
            )));
        }
        if self.match_points == 0 {
            return Err(FilterError::InvalidParameter("at least one match point is required".into()));
        }
        Ok(())
    }

    /// Build the intensity mapping between two sets of samples.
    pub fn build_mapping(&self, source: &[f32], reference: &[f32]) -> Result<QuantileMapping, FilterError> {
        self.validate()?;
        if source.is_empty() || reference.is_empty() {
            return Err(FilterError::EmptyInput);
        }

        let src = IntensityStats::compute(source);
        let refr = IntensityStats::compute(reference);
        let src_threshold = if self.threshold_at_mean { src.mean } else { src.min };
        let ref_threshold = if self.threshold_at_mean { refr.mean } else { refr.min };

        let src_hist = Histogram::build(source, self.bins, src_threshold, src.max);
        let ref_hist = Histogram::build(reference, self.bins, ref_threshold, refr.max);

        let columns = self.match_points + 2;
        let delta = 1.0 / (self.match_points as f64 + 1.0);
        let mut source_table = vec![0.0; columns];
        let mut reference_table = vec![0.0; columns];
        source_table[0] = src_threshold;
        reference_table[0] = ref_threshold;
        source_table[columns - 1] = src.max;
        reference_table[columns - 1] = refr.max;
        for j in 1..columns - 1 {
            source_table[j] = src_hist.quantile(j as f64 * delta);
            reference_table[j] = ref_hist.quantile(j as f64 * delta);
        }

        let gradients = (0..columns - 1)
            .map(|j| {
                QuantileMapping::gradient(
                    reference_table[j + 1] - reference_table[j],
                    source_table[j + 1] - source_table[j],
                )
            })
            .collect();
        let lower_gradient = QuantileMapping::gradient(refr.min - ref_threshold, src.min - src_threshold);
        let upper_gradient = QuantileMapping::gradient(refr.max - reference_table[columns - 1], src.max - source_table[columns - 1]);

        tracing::debug!(?source_table, ?reference_table, "Histogram quantile tables");

        Ok(QuantileMapping {
            source: source_table,
            reference: reference_table,
            gradients,
            lower_gradient,
            upper_gradient,
        })
    }

    /// Remap `source` intensities to match `reference`.
    ///
    /// The result has the geometry of `source`.
    pub fn apply<B: Backend>(&self, source: &Image<B, 3>, reference: &Image<B, 3>) -> Result<Image<B, 3>, FilterError> {
        let source_values = source.to_vec();
        let reference_values = reference.to_vec();
        let mapping = self.build_mapping(&source_values, &reference_values)?;

        let constant = mapping.source[mapping.source.len() - 1] <= mapping.source[0];
        let mapped: Vec<f32> = if constant {
            tracing::debug!("Source volume has no intensity range above threshold");
            vec![mapping.reference[0] as f32; source_values.len()]
        } else {
            source_values
                .par_iter()
                .map(|&v| mapping.map(v as f64) as f32)
                .collect()
        };

        Ok(Image::from_vec(mapped, *source.geometry(), &source.device()))
    }
}
