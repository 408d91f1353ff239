//! White-noise-on-acceleration Gaussian process prior and its interpolation.

use nalgebra::{Matrix6, SMatrix, SVector, Vector6, stack};
use serde::Deserialize;

use super::knot::Knot;
use crate::lie::{self, Pose, Tangent};

pub type Matrix12 = SMatrix<f64, 12, 12>;
pub type Vector12 = SVector<f64, 12>;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotionPrior {
    /// Constant velocity, driven by white noise on the body acceleration with power spectral
    /// density `qc`, ordered like the tangent space.
    ConstantVelocity { qc: [f64; 6] },
}

impl Default for MotionPrior {
    fn default() -> Self {
        MotionPrior::ConstantVelocity { qc: [1.0; 6] }
    }
}

fn blocks(a: Matrix6<f64>, b: Matrix6<f64>, c: Matrix6<f64>, d: Matrix6<f64>) -> Matrix12 {
    stack![
        a, b;
        c, d
    ]
}

impl MotionPrior {
    fn qc(&self) -> Matrix6<f64> {
        match self {
            MotionPrior::ConstantVelocity { qc } => {
                Matrix6::from_diagonal(&Vector6::from_column_slice(qc))
            }
        }
    }

    /// `Phi(t + dt, t)`
    pub fn transition(&self, dt: f64) -> Matrix12 {
        match self {
            MotionPrior::ConstantVelocity { .. } => {
                let identity = Matrix6::identity();
                blocks(identity, identity * dt, Matrix6::zeros(), identity)
            }
        }
    }

    /// `Q(dt)`
    pub fn process_cov(&self, dt: f64) -> Matrix12 {
        let qc = self.qc();
        let dt2 = dt * dt;
        blocks(
            qc * (dt2 * dt / 3.0),
            qc * (dt2 / 2.0),
            qc * (dt2 / 2.0),
            qc * dt,
        )
    }

    /// `Q(dt)^-1`, in closed form. `dt` must be positive.
    pub fn process_information(&self, dt: f64) -> Matrix12 {
        let qc_inv = Matrix6::from_diagonal(&self.qc().diagonal().map(f64::recip));
        let dt2 = dt * dt;
        blocks(
            qc_inv * (12.0 / (dt2 * dt)),
            qc_inv * (-6.0 / dt2),
            qc_inv * (-6.0 / dt2),
            qc_inv * (4.0 / dt),
        )
    }

    /// Upper triangular `S` with `S^T S = Q(dt)^-1`, whitening a 12-dim prior error.
    pub fn sqrt_information(&self, dt: f64) -> Option<Matrix12> {
        let cholesky = self.process_information(dt).cholesky()?;
        Some(cholesky.l().transpose())
    }

    /// The interpolation matrices `(Lambda, Psi)` at `tau` inside `[t_a, t_b]`.
    pub fn interpolation_matrices(&self, t_a: f64, t_b: f64, tau: f64) -> (Matrix12, Matrix12) {
        let psi = self.process_cov(tau - t_a)
            * self.transition(t_b - tau).transpose()
            * self.process_information(t_b - t_a);
        let lambda = self.transition(tau - t_a) - psi * self.transition(t_b - t_a);
        (lambda, psi)
    }
}

/// Pose and velocity at a query time, with the left Jacobians of the pose with respect to
/// `[pose_a, pose_b, velocity_a, velocity_b]`.
#[derive(Debug, Clone)]
pub struct Interpolation {
    pub pose: Pose,
    pub velocity: Tangent,
    pub jacobians: [Matrix6<f64>; 4],
}

/// Interpolates between the bounding knots `a` at `t_a` and `b` at `t_b`.
///
/// The pose Jacobians treat `J_l^-1(xi) * velocity_b` as constant in the poses, which is exact
/// when the end velocity vanishes.
pub fn interpolate(
    prior: &MotionPrior,
    a: &Knot,
    b: &Knot,
    t_a: f64,
    t_b: f64,
    tau: f64,
) -> Interpolation {
    let (lambda, psi) = prior.interpolation_matrices(t_a, t_b, tau);

    let xi = lie::between(&b.pose, &a.pose);
    let jacobian_inv = lie::left_jacobian_inv(&xi);
    let gamma_a: Vector12 = stack![Tangent::zeros(); a.velocity];
    let gamma_b: Vector12 = stack![xi; jacobian_inv * b.velocity];
    let gamma = lambda * gamma_a + psi * gamma_b;

    let xi_tau: Tangent = gamma.fixed_rows::<6>(0).into_owned();
    let jacobian_tau = lie::left_jacobian(&xi_tau);
    let pose = lie::exp(&xi_tau) * a.pose;
    let velocity = jacobian_tau * gamma.fixed_rows::<6>(6);

    let psi11 = psi.fixed_view::<6, 6>(0, 0);
    let psi12 = psi.fixed_view::<6, 6>(0, 6);
    let lambda12 = lambda.fixed_view::<6, 6>(0, 6);
    let jacobians = [
        lie::adjoint(&lie::exp(&xi_tau)) - jacobian_tau * psi11 * lie::right_jacobian_inv(&xi),
        jacobian_tau * psi11 * jacobian_inv,
        jacobian_tau * lambda12,
        jacobian_tau * psi12 * jacobian_inv,
    ];

    Interpolation {
        pose,
        velocity,
        jacobians,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn prior() -> MotionPrior {
        MotionPrior::ConstantVelocity {
            qc: [0.5, 0.7, 0.9, 1.1, 1.3, 1.5],
        }
    }

    fn knots(end_velocity: Tangent) -> (Knot, Knot) {
        let a = Knot {
            pose: lie::exp(&Vector6::new(0.3, -0.6, 0.2, 0.4, -0.1, 0.7)),
            velocity: Vector6::new(1.0, 0.5, -0.2, 0.2, -0.3, 0.5),
        };
        let b = Knot {
            pose: lie::exp(&Vector6::new(0.1, 0.05, -0.02, 0.02, -0.03, 0.05)) * a.pose,
            velocity: end_velocity,
        };
        (a, b)
    }

    #[test]
    fn test_information_inverts_covariance() {
        let prior = prior();
        let product = prior.process_cov(0.05) * prior.process_information(0.05);
        assert_relative_eq!(product, Matrix12::identity(), epsilon = 1e-9);

        let sqrt = prior.sqrt_information(0.05).unwrap();
        assert_relative_eq!(
            sqrt.transpose() * sqrt,
            prior.process_information(0.05),
            epsilon = 1e-6,
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_endpoints_reproduce_knots() {
        let (a, b) = knots(Vector6::new(1.1, 0.4, -0.25, 0.25, -0.28, 0.45));
        let start = interpolate(&prior(), &a, &b, 0.0, 0.05, 0.0);
        assert_relative_eq!(lie::between(&start.pose, &a.pose), Tangent::zeros(), epsilon = 1e-12);
        assert_relative_eq!(start.velocity, a.velocity, epsilon = 1e-9);

        let end = interpolate(&prior(), &a, &b, 0.0, 0.05, 0.05);
        assert_relative_eq!(lie::between(&end.pose, &b.pose), Tangent::zeros(), epsilon = 1e-9);
        assert_relative_eq!(end.velocity, b.velocity, epsilon = 1e-9);
    }

    #[test]
    fn test_constant_velocity_is_followed_exactly() {
        let velocity = Vector6::new(1.0, -0.5, 0.2, 0.1, 0.3, -0.2);
        let a = Knot {
            pose: Pose::identity(),
            velocity,
        };
        let b = a.extrapolate(0.05);
        let mid = interpolate(&prior(), &a, &b, 0.0, 0.05, 0.02);
        let expected = a.extrapolate(0.02);
        assert_relative_eq!(
            lie::between(&mid.pose, &expected.pose),
            Tangent::zeros(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_jacobians_finite_difference() {
        let h = 1e-6;
        let (t_a, t_b, tau) = (0.0, 0.05, 0.02);
        // the pose blocks are exact for a vanishing end velocity
        let (a, b) = knots(Tangent::zeros());
        let prior = prior();
        let base = interpolate(&prior, &a, &b, t_a, t_b, tau);

        for block in 0..4 {
            for k in 0..6 {
                let mut delta = Tangent::zeros();
                delta[k] = h;
                let (mut a, mut b) = (a, b);
                match block {
                    0 => a.pose = lie::oplus(&a.pose, &delta),
                    1 => b.pose = lie::oplus(&b.pose, &delta),
                    2 => a.velocity += delta,
                    _ => b.velocity += delta,
                }
                let perturbed = interpolate(&prior, &a, &b, t_a, t_b, tau);
                let numeric = lie::between(&perturbed.pose, &base.pose) / h;
                assert_relative_eq!(
                    numeric,
                    base.jacobians[block].column(k).into_owned(),
                    epsilon = 1e-5
                );
            }
        }
    }
}
