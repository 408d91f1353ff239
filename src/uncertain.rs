use std::ops::Deref;

use nalgebra::{IsometryMatrix3, Matrix3};

use crate::frame::{Framed, FramedPoint};

/// A value with the covariance of its error.
#[derive(Debug, Clone)]
pub struct Uncertained<S, C> {
    pub state: S,
    /// The covariance matrix of the state.
    pub cov: C,
}

impl<S, C> Deref for Uncertained<S, C> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<S, C> Uncertained<S, C> {
    pub const fn new_with_cov(state: S, cov: C) -> Self {
        Self { state, cov }
    }
}

pub type UncertainPoint<F> = Uncertained<FramedPoint<f64, F>, Matrix3<f64>>;

impl<F1> UncertainPoint<F1> {
    /// Moves the point into another frame, rotating its covariance along.
    pub fn transform<F2>(
        &self,
        transform: &Framed<IsometryMatrix3<f64>, fn(F1) -> F2>,
    ) -> UncertainPoint<F2> {
        let rotation = transform.rotation.matrix();
        Uncertained {
            state: &self.state * transform,
            cov: rotation * self.cov * rotation.transpose(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    use super::*;
    use crate::frame::frames;

    #[test]
    fn test_covariance_follows_rotation() {
        let point = Uncertained::new_with_cov(
            Framed::new_with_frame(Point3::new(2.0, 0.0, 0.0), frames::Lidar),
            Matrix3::from_diagonal(&Vector3::new(4.0, 1.0, 1.0)),
        );
        let quarter_turn = Framed::new_transform(
            IsometryMatrix3::new(Vector3::zeros(), Vector3::z() * std::f64::consts::FRAC_PI_2),
            frames::Lidar,
            frames::Map,
        );
        let moved = point.transform(&quarter_turn);
        assert_relative_eq!(*moved.state, Point3::new(0.0, 2.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(moved.cov[(1, 1)], 4.0, epsilon = 1e-12);
        assert_relative_eq!(moved.cov[(0, 0)], 1.0, epsilon = 1e-12);
    }
}
