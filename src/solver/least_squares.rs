//! The window problem as a [`LeastSquaresProblem`].

use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::{DMatrix, DVector, Dyn, Matrix6, storage::Owned};
use rayon::prelude::*;

use super::{Layout, Problem};
use crate::{
    lie,
    residual::{Evaluation, ParamBlock, ResidualBlock},
    trajectory::Knot,
};

/// Stacked, IRLS-weighted residuals of a [`Problem`] over its free blocks.
///
/// The parameters are the tangent offsets of the free blocks from `base`, so the solve starts at
/// zero. Poses move as `exp(delta) * T`, velocities additively. The robust weights are fixed at
/// `base` for the whole solve.
pub(super) struct WindowProblem<'a> {
    problem: &'a Problem,
    layout: &'a Layout,
    pool: Option<&'a rayon::ThreadPool>,
    base: Vec<Knot>,
    knots: Vec<Knot>,
    params: DVector<f64>,
    /// `sqrt(rho'(|r|^2))` per term, zero for terms that failed at `base`.
    scales: Vec<f64>,
    /// First row of each term.
    rows: Vec<usize>,
    row_count: usize,
}

impl<'a> WindowProblem<'a> {
    pub fn new(
        problem: &'a Problem,
        layout: &'a Layout,
        pool: Option<&'a rayon::ThreadPool>,
        base: &[Knot],
    ) -> Self {
        let mut rows = Vec::with_capacity(problem.len());
        let mut row_count = 0;
        for term in problem.terms() {
            rows.push(row_count);
            row_count += term.residual.dim();
        }
        let mut window = Self {
            problem,
            layout,
            pool,
            base: base.to_vec(),
            knots: base.to_vec(),
            params: DVector::zeros(layout.dim()),
            scales: Vec::new(),
            rows,
            row_count,
        };
        window.scales = window
            .evaluate(false)
            .iter()
            .zip(problem.terms())
            .map(|(evaluation, term)| {
                evaluation.as_ref().map_or(0.0, |evaluation| {
                    term.loss
                        .weight(evaluation.residual.norm_squared())
                        .max(0.0)
                        .sqrt()
                })
            })
            .collect();
        window
    }

    #[inline]
    pub fn knots(&self) -> &[Knot] {
        &self.knots
    }

    fn evaluate(&self, want_jacobians: bool) -> Vec<Option<Evaluation>> {
        let evaluate = || {
            self.problem
                .terms()
                .par_iter()
                .map(|term| term.residual.evaluate(&self.knots, want_jacobians))
                .collect::<Vec<_>>()
        };
        match self.pool {
            Some(pool) => pool.install(evaluate),
            None => evaluate(),
        }
    }

    /// The weighted evaluations that contribute, with their first row and scale.
    fn weighted(&self, want_jacobians: bool) -> impl Iterator<Item = (usize, f64, Evaluation)> {
        self.evaluate(want_jacobians)
            .into_iter()
            .zip(self.rows.iter().zip(&self.scales))
            .filter_map(|(evaluation, (&row, &scale))| {
                Some((row, scale, evaluation.filter(|_| scale > 0.0)?))
            })
    }

    /// `J^T W J` at the current parameters.
    pub fn information(&self) -> DMatrix<f64> {
        match self.jacobian() {
            Some(jacobian) => jacobian.tr_mul(&jacobian),
            None => DMatrix::zeros(self.layout.dim(), self.layout.dim()),
        }
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for WindowProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
        self.knots.copy_from_slice(&self.base);
        self.layout.apply(&mut self.knots, x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut residuals = DVector::zeros(self.row_count);
        for (row, scale, evaluation) in self.weighted(false) {
            residuals
                .rows_mut(row, evaluation.residual.len())
                .copy_from(&(evaluation.residual * scale));
        }
        Some(residuals)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut jacobian = DMatrix::zeros(self.row_count, self.layout.dim());
        for (row, scale, evaluation) in self.weighted(true) {
            let dim = evaluation.residual.len();
            for (param, block) in &evaluation.jacobians {
                let Some(col) = self.layout.offset(param) else {
                    continue;
                };
                // exp(delta + e) = exp(J_l(delta) e) exp(delta) to first order
                let correction = match param {
                    ParamBlock::Pose(_) => {
                        lie::left_jacobian(&self.params.fixed_rows::<6>(col).into_owned())
                    }
                    ParamBlock::Velocity(_) => Matrix6::identity(),
                };
                jacobian
                    .view_mut((row, col), (dim, ParamBlock::DIM))
                    .copy_from(&(block * correction * scale));
            }
        }
        Some(jacobian)
    }
}
