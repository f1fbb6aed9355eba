//! Spacing between adjacent voxels along each physical axis.

use super::Vector;

/// Physical distance between neighbouring voxels, in `(x, y, z)` order.
pub type Spacing<const D: usize> = Vector<D>;

impl<const D: usize> Spacing<D> {
    /// Same spacing along every axis.
    pub fn uniform(value: f64) -> Self {
        Self::new([value; D])
    }

    /// Smallest component.
    pub fn min_spacing(&self) -> f64 {
        (0..D).map(|i| self[i]).fold(f64::INFINITY, f64::min)
    }

    /// Largest component.
    pub fn max_spacing(&self) -> f64 {
        (0..D).map(|i| self[i]).fold(f64::NEG_INFINITY, f64::max)
    }

    /// Mean of the squared components.
    ///
    /// Used as the Demons normalizer that keeps the intensity term of the
    /// force denominator in squared physical units.
    pub fn mean_squared(&self) -> f64 {
        if D == 0 {
            return 0.0;
        }
        (0..D).map(|i| self[i] * self[i]).sum::<f64>() / D as f64
    }

    /// Spacing after shrinking each axis by an integer factor.
    pub fn scaled_by(&self, factors: [usize; D]) -> Self {
        let mut out = *self;
        for i in 0..D {
            out[i] *= factors[i] as f64;
        }
        out
    }

    /// True when every component is finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        (0..D).all(|i| self[i].is_finite() && self[i] > 0.0)
    }
}
