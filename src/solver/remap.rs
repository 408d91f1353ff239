//! Keeps only the well-constrained part of a solve.
//!
//! The update from the seed to the solution is projected onto the eigenvectors of the solution
//! covariance whose information reaches a threshold, so directions the residuals cannot see stay
//! at the seed.

use nalgebra::{DMatrix, DVector};

use super::Summary;
use crate::{lie, residual::ParamBlock, trajectory::Knot, utils::InverseWithSubstitute};

/// Replaces `solved` with `seed` plus the projected update. Returns how many directions were
/// suppressed, or `None` when the information could not be inverted and `solved` was kept.
pub fn remap(
    seed: &[Knot],
    solved: &mut [Knot],
    summary: &Summary,
    min_eigen: f64,
) -> Option<usize> {
    let Some(cov) = summary.information.clone().cholesky_inverse_with_substitute() else {
        log::warn!("solution information is indefinite, skipping remapping");
        return None;
    };
    let eigen = cov.symmetric_eigen();

    let n = summary.information.nrows();
    let mut projection = DMatrix::zeros(n, n);
    let mut suppressed = 0;
    for (i, &variance) in eigen.eigenvalues.iter().enumerate() {
        // information along the direction is 1 / variance
        if variance <= 0.0 || variance.recip() >= min_eigen {
            let direction = eigen.eigenvectors.column(i);
            projection += direction * direction.transpose();
        } else {
            suppressed += 1;
        }
    }

    let mut update = DVector::zeros(n);
    for (i, param) in summary.free.iter().enumerate() {
        let (from, to) = (&seed[param.knot()], &solved[param.knot()]);
        let diff = match param {
            ParamBlock::Pose(_) => lie::between(&to.pose, &from.pose),
            ParamBlock::Velocity(_) => to.velocity - from.velocity,
        };
        update.fixed_rows_mut::<6>(i * ParamBlock::DIM).copy_from(&diff);
    }
    let projected = projection * update;

    solved.copy_from_slice(seed);
    for (i, param) in summary.free.iter().enumerate() {
        let step = projected.fixed_rows::<6>(i * ParamBlock::DIM).into_owned();
        let knot = &mut solved[param.knot()];
        match param {
            ParamBlock::Pose(_) => knot.pose = lie::oplus(&knot.pose, &step),
            ParamBlock::Velocity(_) => knot.velocity += step,
        }
    }
    Some(suppressed)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector6;

    use super::*;

    fn summary(diagonal: [f64; 12]) -> Summary {
        Summary {
            iterations: 1,
            initial_cost: 1.0,
            final_cost: 0.0,
            converged: true,
            free: vec![ParamBlock::Pose(1), ParamBlock::Velocity(1)],
            information: DMatrix::from_diagonal(&DVector::from_row_slice(&diagonal)),
        }
    }

    fn knots() -> (Vec<Knot>, Vec<Knot>) {
        let seed = vec![Knot::default(); 2];
        let mut solved = seed.clone();
        solved[1] = Knot {
            pose: lie::exp(&Vector6::new(0.1, 0.2, 0.3, 0.01, 0.02, 0.03)),
            velocity: Vector6::repeat(1.0),
        };
        (seed, solved)
    }

    #[test]
    fn test_well_constrained_update_is_kept() {
        let (seed, mut solved) = knots();
        let expected = solved.clone();
        assert_eq!(remap(&seed, &mut solved, &summary([1e4; 12]), 100.0), Some(0));
        assert_relative_eq!(
            lie::between(&solved[1].pose, &expected[1].pose),
            Vector6::zeros(),
            epsilon = 1e-9
        );
        assert_relative_eq!(solved[1].velocity, expected[1].velocity, epsilon = 1e-9);
    }

    #[test]
    fn test_weak_directions_stay_at_seed() {
        let (seed, mut solved) = knots();
        let mut diagonal = [1e4; 12];
        // x translation and the z velocity component are barely observed
        diagonal[0] = 1.0;
        diagonal[8] = 1.0;
        assert_eq!(remap(&seed, &mut solved, &summary(diagonal), 100.0), Some(2));
        let xi = lie::log(&solved[1].pose);
        assert_relative_eq!(xi[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(xi[5], 0.03, epsilon = 1e-9);
        assert_relative_eq!(solved[1].velocity[2], 0.0, epsilon = 1e-9);
        assert_relative_eq!(solved[1].velocity[0], 1.0, epsilon = 1e-9);
        assert_eq!(solved[0], seed[0]);
    }

    #[test]
    fn test_indefinite_information_is_skipped() {
        let (seed, mut solved) = knots();
        let expected = solved.clone();
        let mut diagonal = [1e4; 12];
        diagonal[3] = -1.0;
        assert_eq!(remap(&seed, &mut solved, &summary(diagonal), 100.0), None);
        assert_eq!(solved, expected);
    }
}
