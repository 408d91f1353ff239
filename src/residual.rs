//! Residual blocks over the window knots.
//!
//! Every block returns its residual already whitened, together with the Jacobians with respect to
//! the parameter blocks it touches. Pose blocks are perturbed on the left.

pub mod loss;
pub mod motion;
pub mod point_to_line;
pub mod point_to_plane;
pub mod prior;

use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x6, Point3, SMatrix};

pub use loss::Loss;
pub use motion::MotionResidual;
pub use point_to_line::PointToLine;
pub use point_to_plane::PointToPlane;
pub use prior::KnotPrior;

use crate::{
    frame::{Framed, LidarToMap, frames::Lidar},
    lie::skew,
    trajectory::{Interpolation, Knot, KnotSpan, MotionPrior, gp},
    uncertain::UncertainPoint,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamBlock {
    Pose(usize),
    Velocity(usize),
}

impl ParamBlock {
    pub const DIM: usize = 6;

    #[inline]
    pub fn knot(&self) -> usize {
        match *self {
            ParamBlock::Pose(knot) | ParamBlock::Velocity(knot) => knot,
        }
    }

    /// Offset in the stacked tangent vector, `[pose_0, velocity_0, pose_1, ...]`.
    #[inline]
    pub fn offset(&self) -> usize {
        match *self {
            ParamBlock::Pose(knot) => 12 * knot,
            ParamBlock::Velocity(knot) => 12 * knot + 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub residual: DVector<f64>,
    /// Intrinsic weight of the block, scaling its outlier gate and robust loss.
    pub weight: f64,
    /// `dim x 6` per touched block, empty when not requested.
    pub jacobians: Vec<(ParamBlock, DMatrix<f64>)>,
}

/// The outlier gate and robust loss of a block, both scaled by its squared intrinsic weight.
///
/// `None` when the residual norm exceeds `weight^2 * max_residual_val`.
pub fn admit(evaluation: &Evaluation, max_residual_val: f64, robust_param: f64) -> Option<Loss> {
    let scale = evaluation.weight * evaluation.weight;
    (evaluation.residual.norm() <= scale * max_residual_val)
        .then(|| Loss::bisquare(scale * robust_param))
}

pub trait ResidualBlock {
    fn dim(&self) -> usize;

    fn params(&self) -> Vec<ParamBlock>;

    /// `None` when the block cannot be evaluated at `knots`, such as a degenerate primitive or a
    /// non-finite value.
    fn evaluate(&self, knots: &[Knot], want_jacobians: bool) -> Option<Evaluation>;
}

#[inline]
fn to_dynamic<const R: usize>(block: &SMatrix<f64, R, 6>) -> DMatrix<f64> {
    DMatrix::from_column_slice(R, ParamBlock::DIM, block.as_slice())
}

/// A lidar point, the knot interval its tick falls in, and the prior joining the knots.
#[derive(Debug, Clone)]
pub struct PointObservation {
    pub point: UncertainPoint<Lidar>,
    pub span: KnotSpan,
    pub prior: MotionPrior,
}

/// A point observation moved into the map frame at one linearization point.
struct Projected {
    interpolation: Interpolation,
    position: Point3<f64>,
    cov: Matrix3<f64>,
}

impl PointObservation {
    fn params(&self) -> Vec<ParamBlock> {
        let k = self.span.index;
        vec![
            ParamBlock::Pose(k),
            ParamBlock::Pose(k + 1),
            ParamBlock::Velocity(k),
            ParamBlock::Velocity(k + 1),
        ]
    }

    fn project(&self, knots: &[Knot]) -> Option<Projected> {
        let (a, b) = (knots.get(self.span.index)?, knots.get(self.span.index + 1)?);
        let interpolation = gp::interpolate(
            &self.prior,
            a,
            b,
            self.span.t_a,
            self.span.t_b,
            self.span.tau,
        );
        let to_map: LidarToMap<f64> = Framed::new(interpolation.pose);
        let in_map = self.point.transform(&to_map);
        Some(Projected {
            position: *in_map.state,
            cov: in_map.cov,
            interpolation,
        })
    }

    /// Chains `d residual / d map point` through the interpolation Jacobians.
    fn chain<const R: usize>(
        &self,
        projected: &Projected,
        d_point: &SMatrix<f64, R, 3>,
    ) -> Vec<(ParamBlock, DMatrix<f64>)> {
        // a left perturbation moves the point by delta_rho - [p]x delta_phi
        let mut d_pose = Matrix3x6::zeros();
        d_pose.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
        d_pose
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&-skew(&projected.position.coords));
        let d_residual = d_point * d_pose;
        self.params()
            .into_iter()
            .zip(&projected.interpolation.jacobians)
            .map(|(block, jacobian)| (block, to_dynamic(&(d_residual * jacobian))))
            .collect()
    }
}
