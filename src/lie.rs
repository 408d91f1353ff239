//! SE3 helpers on [`IsometryMatrix3`].
//!
//! Tangent vectors are ordered `[rho; phi]`, translation first. All Jacobians are left Jacobians
//! unless stated otherwise and perturbations are applied on the left, `T <- exp(delta) * T`.

use std::f64::consts::PI;

use nalgebra::{
    IsometryMatrix3, Matrix3, Matrix6, Rotation3, Translation3, Vector3, Vector6, stack,
};

pub type Pose = IsometryMatrix3<f64>;
pub type Tangent = Vector6<f64>;

/// Below this angle the closed forms are replaced by their Taylor series.
const SMALL_ANGLE: f64 = 1e-3;

#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    v.cross_matrix()
}

pub fn so3_left_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let k = skew(phi);
    let (a, b) = if theta < SMALL_ANGLE {
        let theta2 = theta * theta;
        (0.5 - theta2 / 24.0, 1.0 / 6.0 - theta2 / 120.0)
    } else {
        let theta2 = theta * theta;
        (
            (1.0 - theta.cos()) / theta2,
            (theta - theta.sin()) / (theta2 * theta),
        )
    };
    Matrix3::identity() + k * a + k * k * b
}

pub fn so3_left_jacobian_inv(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let k = skew(phi);
    let b = if theta < SMALL_ANGLE {
        1.0 / 12.0 + theta * theta / 720.0
    } else {
        1.0 / (theta * theta) - (1.0 + theta.cos()) / (2.0 * theta * theta.sin())
    };
    Matrix3::identity() - k * 0.5 + k * k * b
}

/// The coupling block `Q(rho, phi)` of the SE3 left Jacobian.
fn se3_q(rho: &Vector3<f64>, phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let theta2 = theta * theta;
    let (c1, c2, c3) = if theta < SMALL_ANGLE {
        (
            1.0 / 6.0 - theta2 / 120.0,
            1.0 / 24.0 - theta2 / 720.0,
            1.0 / 120.0 - theta2 / 2520.0,
        )
    } else {
        let (sin, cos) = theta.sin_cos();
        let theta3 = theta2 * theta;
        (
            (theta - sin) / theta3,
            (theta2 + 2.0 * cos - 2.0) / (2.0 * theta3 * theta),
            (2.0 * theta - 3.0 * sin + theta * cos) / (2.0 * theta3 * theta2),
        )
    };
    let p = skew(phi);
    let r = skew(rho);
    let pr = p * r;
    let rp = r * p;
    let prp = pr * p;
    let pp = p * p;

    r * 0.5 + (pr + rp + prp) * c1 + (pp * r + r * pp - prp * 3.0) * c2 + (prp * p + pp * rp) * c3
}

/// Rotation vector of `rotation`.
///
/// The angle comes from `atan2` of the skew and trace parts, which keeps full relative precision
/// for tiny rotations where `acos` of the trace does not.
pub fn so3_log(rotation: &Rotation3<f64>) -> Vector3<f64> {
    let m = rotation.matrix();
    let w = Vector3::new(
        m[(2, 1)] - m[(1, 2)],
        m[(0, 2)] - m[(2, 0)],
        m[(1, 0)] - m[(0, 1)],
    ) * 0.5;
    let sin = w.norm();
    let cos = (m.trace() - 1.0) * 0.5;
    let theta = sin.atan2(cos);
    if theta < SMALL_ANGLE {
        w * (1.0 + theta * theta / 6.0)
    } else if PI - theta < SMALL_ANGLE {
        // the skew part vanishes near a half turn
        rotation.scaled_axis()
    } else {
        w * (theta / sin)
    }
}

pub fn exp(xi: &Tangent) -> Pose {
    let rho: Vector3<f64> = xi.fixed_rows::<3>(0).into_owned();
    let phi: Vector3<f64> = xi.fixed_rows::<3>(3).into_owned();
    let rotation = Rotation3::new(phi);
    let translation = so3_left_jacobian(&phi) * rho;
    IsometryMatrix3::from_parts(Translation3::from(translation), rotation)
}

pub fn log(pose: &Pose) -> Tangent {
    let phi = so3_log(&pose.rotation);
    let rho = so3_left_jacobian_inv(&phi) * pose.translation.vector;
    stack![rho; phi]
}

/// `log(a * b^-1)`
#[inline]
pub fn between(a: &Pose, b: &Pose) -> Tangent {
    log(&(a * b.inverse()))
}

pub fn adjoint(pose: &Pose) -> Matrix6<f64> {
    let rotation = *pose.rotation.matrix();
    let coupling = skew(&pose.translation.vector) * rotation;
    let zero = Matrix3::<f64>::zeros();
    stack![
        rotation, coupling;
        zero, rotation
    ]
}

pub fn left_jacobian(xi: &Tangent) -> Matrix6<f64> {
    let rho: Vector3<f64> = xi.fixed_rows::<3>(0).into_owned();
    let phi: Vector3<f64> = xi.fixed_rows::<3>(3).into_owned();
    let jacobian = so3_left_jacobian(&phi);
    let q = se3_q(&rho, &phi);
    let zero = Matrix3::<f64>::zeros();
    stack![
        jacobian, q;
        zero, jacobian
    ]
}

pub fn left_jacobian_inv(xi: &Tangent) -> Matrix6<f64> {
    let rho: Vector3<f64> = xi.fixed_rows::<3>(0).into_owned();
    let phi: Vector3<f64> = xi.fixed_rows::<3>(3).into_owned();
    let jacobian_inv = so3_left_jacobian_inv(&phi);
    let q = se3_q(&rho, &phi);
    let coupling = -(jacobian_inv * q * jacobian_inv);
    let zero = Matrix3::<f64>::zeros();
    stack![
        jacobian_inv, coupling;
        zero, jacobian_inv
    ]
}

/// `J_r^-1(xi) = J_l^-1(xi) * Ad(exp(xi))`
#[inline]
pub fn right_jacobian_inv(xi: &Tangent) -> Matrix6<f64> {
    left_jacobian_inv(xi) * adjoint(&exp(xi))
}

/// Applies a left perturbation.
#[inline]
pub fn oplus(pose: &Pose, delta: &Tangent) -> Pose {
    exp(delta) * pose
}

/// Whether two poses differ by less than `tolerance` in the tangent space.
#[inline]
pub fn is_near(a: &Pose, b: &Pose, tolerance: f64) -> bool {
    between(a, b).norm() < tolerance
}
