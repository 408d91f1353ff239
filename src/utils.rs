use nalgebra::{Cholesky, ComplexField, DefaultAllocator, Dim, OMatrix, allocator::Allocator};

/// A type that can provide a positive substitute value
/// for inverse operations like [`Cholesky::new_with_substitute`]
pub trait Substitutive: ComplexField {
    fn substitute() -> Self;
}

impl<T: ComplexField> Substitutive for T {
    #[inline]
    fn substitute() -> Self {
        nalgebra::convert(1e-9)
    }
}

/// Largest reconstruction error, relative to the largest entry, accepted as semi-definite.
const SEMI_DEFINITE_TOLERANCE: f64 = 1e-6;

pub(crate) trait InverseWithSubstitute: Sized {
    /// Inverts a symmetric positive semi-definite matrix, replacing zero pivots.
    ///
    /// Returns `None` when the matrix is indefinite.
    fn cholesky_inverse_with_substitute(self) -> Option<Self>;
}

impl<D: Dim> InverseWithSubstitute for OMatrix<f64, D, D>
where
    DefaultAllocator: Allocator<D, D>,
{
    fn cholesky_inverse_with_substitute(self) -> Option<Self> {
        let scale = 1.0 + self.amax();
        let cholesky = Cholesky::new_with_substitute(self.clone(), f64::substitute())?;
        let l = cholesky.l();
        // a substituted negative pivot no longer reproduces the matrix
        if (&l * l.transpose() - self).amax() > SEMI_DEFINITE_TOLERANCE * scale {
            return None;
        }
        Some(cholesky.inverse())
    }
}
