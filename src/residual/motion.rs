use nalgebra::{DVector, Matrix6, stack};

use super::{Evaluation, ParamBlock, ResidualBlock, to_dynamic};
use crate::{
    lie,
    trajectory::{Knot, MotionPrior, gp::Matrix12},
};

/// Constant-velocity prior between knots `k` and `k + 1`:
/// `[log(T_k+1 T_k^-1) - dt w_k; w_k+1 - w_k]`.
#[derive(Debug, Clone)]
pub struct MotionResidual {
    k: usize,
    dt: f64,
    sqrt_information: Matrix12,
}

impl MotionResidual {
    pub fn new(k: usize, dt: f64, prior: &MotionPrior) -> Option<Self> {
        Some(Self {
            k,
            dt,
            sqrt_information: prior.sqrt_information(dt)?,
        })
    }
}

impl ResidualBlock for MotionResidual {
    fn dim(&self) -> usize {
        12
    }

    fn params(&self) -> Vec<ParamBlock> {
        let k = self.k;
        vec![
            ParamBlock::Pose(k),
            ParamBlock::Pose(k + 1),
            ParamBlock::Velocity(k),
            ParamBlock::Velocity(k + 1),
        ]
    }

    fn evaluate(&self, knots: &[Knot], want_jacobians: bool) -> Option<Evaluation> {
        let (a, b) = (knots.get(self.k)?, knots.get(self.k + 1)?);
        let xi = lie::between(&b.pose, &a.pose);
        let error = stack![xi - a.velocity * self.dt; b.velocity - a.velocity];
        let residual = self.sqrt_information * error;
        if !residual.iter().all(|v| v.is_finite()) {
            return None;
        }

        let mut jacobians = Vec::new();
        if want_jacobians {
            let zero = Matrix6::zeros();
            let identity = Matrix6::identity();
            let blocks = [
                stack![-lie::right_jacobian_inv(&xi); zero],
                stack![lie::left_jacobian_inv(&xi); zero],
                stack![-identity * self.dt; -identity],
                stack![zero; identity],
            ];
            jacobians = self
                .params()
                .into_iter()
                .zip(blocks)
                .map(|(param, block)| (param, to_dynamic(&(self.sqrt_information * block))))
                .collect();
        }
        Some(Evaluation {
            residual: DVector::from_column_slice(residual.as_slice()),
            weight: 1.0,
            jacobians,
        })
    }
}
