use nalgebra::{DVector, Matrix2, Matrix2x3, Matrix3x2, Point3, Vector3};

use super::{Evaluation, ParamBlock, PointObservation, ResidualBlock};
use crate::trajectory::Knot;

/// Two vectors completing the unit `direction` to an orthonormal basis.
pub(crate) fn orthonormal_complement(direction: &Vector3<f64>) -> Matrix3x2<f64> {
    let seed = if direction.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = direction.cross(&seed).normalize();
    let v = direction.cross(&u);
    Matrix3x2::from_columns(&[u, v])
}

/// `S^-1/2` of a symmetric positive definite 2x2 matrix.
fn inverse_sqrt(matrix: Matrix2<f64>) -> Option<Matrix2<f64>> {
    let eigen = matrix.symmetric_eigen();
    if eigen.eigenvalues.iter().any(|&value| value <= 0.0) {
        return None;
    }
    let scaled = eigen.eigenvalues.map(|value| value.sqrt().recip());
    Some(eigen.eigenvectors * Matrix2::from_diagonal(&scaled) * eigen.eigenvectors.transpose())
}

/// Distance of a point to the line through two map points, as its two components in the plane
/// normal to the line.
#[derive(Debug, Clone)]
pub struct PointToLine {
    observation: PointObservation,
    origin: Point3<f64>,
    /// `W U^T`, the whitened projection onto the normal plane.
    projection: Matrix2x3<f64>,
    weight: f64,
}

impl PointToLine {
    /// The whitening is fixed from the point covariance at `knots`, the linearization point.
    ///
    /// `None` for coincident line points or a singular covariance.
    pub fn new(
        observation: PointObservation,
        a: Point3<f64>,
        b: Point3<f64>,
        knots: &[Knot],
        use_weighting: bool,
    ) -> Option<Self> {
        let direction = (b - a).try_normalize(f64::EPSILON)?;
        let basis = orthonormal_complement(&direction);
        let whitening = if use_weighting {
            let cov = observation.project(knots)?.cov;
            inverse_sqrt(basis.transpose() * cov * basis)?
        } else {
            Matrix2::identity()
        };
        Some(Self {
            observation,
            origin: a,
            projection: whitening * basis.transpose(),
            weight: whitening.trace(),
        })
    }
}

impl ResidualBlock for PointToLine {
    fn dim(&self) -> usize {
        2
    }

    fn params(&self) -> Vec<ParamBlock> {
        self.observation.params()
    }

    fn evaluate(&self, knots: &[Knot], want_jacobians: bool) -> Option<Evaluation> {
        let projected = self.observation.project(knots)?;
        let residual = self.projection * (projected.position - self.origin);
        if !residual.iter().all(|v| v.is_finite()) {
            return None;
        }
        let jacobians = if want_jacobians {
            self.observation.chain(&projected, &self.projection)
        } else {
            Vec::new()
        };
        Some(Evaluation {
            residual: DVector::from_column_slice(residual.as_slice()),
            weight: self.weight,
            jacobians,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::residual::tests::{check_jacobians, sample_knots, sample_observation};

    #[test]
    fn test_complement_is_orthonormal() {
        for direction in [Vector3::x(), Vector3::new(0.3, -0.4, 0.5).normalize()] {
            let basis = orthonormal_complement(&direction);
            assert_relative_eq!(basis.transpose() * basis, Matrix2::identity(), epsilon = 1e-12);
            assert_relative_eq!(basis.transpose() * direction, nalgebra::Vector2::zeros(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_unweighted_distance() {
        let knots = [Knot::default(); 3];
        let observation = sample_observation(Point3::new(2.0, 0.5, 0.0));
        let line = PointToLine::new(
            observation,
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            &knots,
            false,
        )
        .unwrap();
        let evaluation = line.evaluate(&knots, false).unwrap();
        assert_relative_eq!(evaluation.residual.norm(), 0.5, epsilon = 1e-12);
        assert_eq!(evaluation.weight, 2.0);
    }

    #[test]
    fn test_degenerate_line() {
        let knots = [Knot::default(); 3];
        let observation = sample_observation(Point3::new(2.0, 0.5, 0.0));
        let a = Point3::new(1.0, 1.0, 1.0);
        assert!(PointToLine::new(observation, a, a, &knots, true).is_none());
    }

    #[test]
    fn test_jacobians() {
        let knots = sample_knots();
        let observation = sample_observation(Point3::new(3.0, -1.0, 0.5));
        let line = PointToLine::new(
            observation,
            Point3::new(3.0, -0.8, 0.0),
            Point3::new(3.1, -0.7, 1.0),
            &knots,
            true,
        )
        .unwrap();
        assert!(line.weight > 0.0);
        check_jacobians(&line, &knots, 1e-3);
    }
}
