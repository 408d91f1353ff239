use nalgebra::{DVector, Matrix6, stack};

use super::{Evaluation, ParamBlock, ResidualBlock, to_dynamic};
use crate::{
    lie,
    trajectory::{Knot, MotionPrior, gp::Matrix12},
};

/// Anchors the first knot to the state the previous window ended in.
#[derive(Debug, Clone)]
pub struct KnotPrior {
    target: Knot,
    sqrt_information: Matrix12,
}

impl KnotPrior {
    /// Weighted by the motion prior over one knot interval of `spacing` seconds.
    pub fn new(target: Knot, prior: &MotionPrior, spacing: f64) -> Option<Self> {
        Some(Self {
            target,
            sqrt_information: prior.sqrt_information(spacing)?,
        })
    }
}

impl ResidualBlock for KnotPrior {
    fn dim(&self) -> usize {
        12
    }

    fn params(&self) -> Vec<ParamBlock> {
        vec![ParamBlock::Pose(0), ParamBlock::Velocity(0)]
    }

    fn evaluate(&self, knots: &[Knot], want_jacobians: bool) -> Option<Evaluation> {
        let knot = knots.first()?;
        let xi = lie::between(&knot.pose, &self.target.pose);
        let error = stack![xi; knot.velocity - self.target.velocity];
        let residual = self.sqrt_information * error;
        if !residual.iter().all(|v| v.is_finite()) {
            return None;
        }

        let jacobians = if want_jacobians {
            let zero = Matrix6::zeros();
            let d_pose = stack![lie::left_jacobian_inv(&xi); zero];
            let d_velocity = stack![zero; Matrix6::identity()];
            vec![
                (
                    ParamBlock::Pose(0),
                    to_dynamic(&(self.sqrt_information * d_pose)),
                ),
                (
                    ParamBlock::Velocity(0),
                    to_dynamic(&(self.sqrt_information * d_velocity)),
                ),
            ]
        } else {
            Vec::new()
        };
        Some(Evaluation {
            residual: DVector::from_column_slice(residual.as_slice()),
            weight: 1.0,
            jacobians,
        })
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector6;

    use super::*;
    use crate::residual::tests::check_jacobians;

    #[test]
    fn test_zero_at_target() {
        let target = Knot {
            pose: lie::exp(&Vector6::new(0.5, 0.1, 0.0, 0.0, 0.0, 0.3)),
            velocity: Vector6::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.1),
        };
        let prior = KnotPrior::new(target, &MotionPrior::default(), 0.05).unwrap();
        let evaluation = prior.evaluate(&[target, Knot::default()], false).unwrap();
        assert!(evaluation.residual.norm() < 1e-9);
        assert!(evaluation.jacobians.is_empty());
    }

    #[test]
    fn test_jacobians() {
        let target = Knot {
            pose: lie::exp(&Vector6::new(0.5, 0.1, 0.0, 0.0, 0.0, 0.3)),
            velocity: Vector6::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.1),
        };
        let current = Knot {
            pose: lie::exp(&Vector6::new(0.1, 0.05, 0.02, 0.01, -0.02, 0.2)) * target.pose,
            velocity: Vector6::new(0.8, 0.1, 0.0, 0.0, 0.05, 0.1),
        };
        let prior = KnotPrior::new(target, &MotionPrior::default(), 0.05).unwrap();
        check_jacobians(&prior, &[current, Knot::default()], 1e-3);
    }
}
