//! Levenberg-Marquardt over the window knots, driven by [`levenberg_marquardt`].
//!
//! Pose blocks are updated with a left perturbation, `T <- exp(delta) * T`, velocity blocks
//! additively. Robust losses enter through IRLS: each block's Jacobian and residual are weighted
//! by `rho'(|r|^2)` at the point the solve starts from.

mod least_squares;
pub mod remap;

use levenberg_marquardt::LevenbergMarquardt;
use nalgebra::{DMatrix, DVector};

use crate::{
    lie,
    residual::{
        Evaluation, KnotPrior, Loss, MotionResidual, ParamBlock, PointToLine, PointToPlane,
        ResidualBlock,
    },
    trajectory::Knot,
};

use least_squares::WindowProblem;

#[derive(Debug, Clone)]
pub enum Residual {
    Prior(KnotPrior),
    Motion(MotionResidual),
    Line(PointToLine),
    Plane(PointToPlane),
}

impl ResidualBlock for Residual {
    fn dim(&self) -> usize {
        match self {
            Residual::Prior(block) => block.dim(),
            Residual::Motion(block) => block.dim(),
            Residual::Line(block) => block.dim(),
            Residual::Plane(block) => block.dim(),
        }
    }

    fn params(&self) -> Vec<ParamBlock> {
        match self {
            Residual::Prior(block) => block.params(),
            Residual::Motion(block) => block.params(),
            Residual::Line(block) => block.params(),
            Residual::Plane(block) => block.params(),
        }
    }

    fn evaluate(&self, knots: &[Knot], want_jacobians: bool) -> Option<Evaluation> {
        match self {
            Residual::Prior(block) => block.evaluate(knots, want_jacobians),
            Residual::Motion(block) => block.evaluate(knots, want_jacobians),
            Residual::Line(block) => block.evaluate(knots, want_jacobians),
            Residual::Plane(block) => block.evaluate(knots, want_jacobians),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Term {
    pub residual: Residual,
    pub loss: Loss,
}

#[derive(Debug, Default, Clone)]
pub struct Problem {
    terms: Vec<Term>,
    constant: Vec<ParamBlock>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, residual: Residual, loss: Loss) {
        self.terms.push(Term { residual, loss });
    }

    /// Holds `param` at its current value.
    pub fn set_constant(&mut self, param: ParamBlock) {
        if !self.constant.contains(&param) {
            self.constant.push(param);
        }
    }

    #[inline]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// `sum rho(|r|^2) / 2`, skipping blocks that fail to evaluate.
    pub fn cost(&self, knots: &[Knot]) -> f64 {
        self.terms
            .iter()
            .filter_map(|term| {
                let evaluation = term.residual.evaluate(knots, false)?;
                Some(term.loss.rho(evaluation.residual.norm_squared()))
            })
            .sum::<f64>()
            * 0.5
    }
}

/// Where each free parameter block sits in the stacked update.
#[derive(Debug, Clone)]
struct Layout {
    free: Vec<ParamBlock>,
    offsets: Vec<Option<usize>>,
}

impl Layout {
    fn new(knot_count: usize, constant: &[ParamBlock]) -> Self {
        let free = (0..knot_count)
            .flat_map(|k| [ParamBlock::Pose(k), ParamBlock::Velocity(k)])
            .filter(|param| !constant.contains(param))
            .collect::<Vec<_>>();
        let mut offsets = vec![None; 2 * knot_count];
        for (i, param) in free.iter().enumerate() {
            offsets[Self::slot(param)] = Some(i * ParamBlock::DIM);
        }
        Self { free, offsets }
    }

    #[inline]
    fn slot(param: &ParamBlock) -> usize {
        match *param {
            ParamBlock::Pose(k) => 2 * k,
            ParamBlock::Velocity(k) => 2 * k + 1,
        }
    }

    #[inline]
    fn offset(&self, param: &ParamBlock) -> Option<usize> {
        self.offsets.get(Self::slot(param)).copied().flatten()
    }

    #[inline]
    fn dim(&self) -> usize {
        self.free.len() * ParamBlock::DIM
    }

    /// Moves every free block of `knots` by its slice of `delta`.
    fn apply(&self, knots: &mut [Knot], delta: &DVector<f64>) {
        for (i, param) in self.free.iter().enumerate() {
            let step = delta.fixed_rows::<6>(i * ParamBlock::DIM).into_owned();
            let knot = &mut knots[param.knot()];
            match param {
                ParamBlock::Pose(_) => knot.pose = lie::oplus(&knot.pose, &step),
                ParamBlock::Velocity(_) => knot.velocity += step,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Levenberg-Marquardt patience, in residual evaluations per free parameter.
    pub max_iterations: usize,
    /// Worker threads used to evaluate the residual blocks, 0 for the global rayon pool.
    pub threads: usize,
    /// Initial trust region bound, relative to the scaled parameters.
    pub step_bound: f64,
    /// Relative cost decrease below which the solve stops.
    pub function_tolerance: f64,
    /// Relative step size below which the solve stops.
    pub parameter_tolerance: f64,
    /// Cosine between the residuals and the Jacobian columns below which the solve stops.
    pub gradient_tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            threads: 0,
            step_bound: 100.0,
            function_tolerance: 1e-10,
            parameter_tolerance: 1e-10,
            gradient_tolerance: 1e-10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Summary {
    /// Residual evaluations spent by the solve.
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub converged: bool,
    /// The free parameter blocks, in the order of the rows of `information`.
    pub free: Vec<ParamBlock>,
    /// Undamped `J^T W J` at the solution.
    pub information: DMatrix<f64>,
}

pub struct Solver {
    options: SolverOptions,
    pool: Option<rayon::ThreadPool>,
}

impl Solver {
    pub fn new(options: SolverOptions) -> Self {
        let pool = (options.threads > 0)
            .then(|| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(options.threads)
                    .build()
                    .inspect_err(|err| {
                        log::warn!("falling back to the global thread pool: {err}");
                    })
                    .ok()
            })
            .flatten();
        Self { options, pool }
    }

    #[inline]
    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    fn minimizer(&self) -> LevenbergMarquardt<f64> {
        LevenbergMarquardt::new()
            .with_ftol(self.options.function_tolerance)
            .with_xtol(self.options.parameter_tolerance)
            .with_gtol(self.options.gradient_tolerance)
            .with_stepbound(self.options.step_bound)
            .with_patience(self.options.max_iterations.max(1))
    }

    /// Minimizes `problem` starting from `knots`, which hold the solution on return.
    ///
    /// A solve that ends above the starting cost leaves `knots` untouched.
    pub fn solve(&self, problem: &Problem, knots: &mut [Knot]) -> Summary {
        let layout = Layout::new(knots.len(), &problem.constant);
        let initial_cost = problem.cost(knots);
        let mut final_cost = initial_cost;
        let mut converged = true;
        let mut iterations = 0;

        if layout.dim() > 0 && !problem.is_empty() {
            let window = WindowProblem::new(problem, &layout, self.pool.as_ref(), knots);
            let (window, report) = self.minimizer().minimize(window);
            iterations = report.number_of_evaluations;
            converged = report.termination.was_successful();
            if !converged {
                log::debug!("solver stopped early: {:?}", report.termination);
            }
            let cost = problem.cost(window.knots());
            if cost.is_finite() && cost <= initial_cost {
                knots.copy_from_slice(window.knots());
                final_cost = cost;
            } else {
                log::warn!("solve raised the cost from {initial_cost:.3e} to {cost:.3e}, discarded");
                converged = false;
            }
        }

        let information = WindowProblem::new(problem, &layout, self.pool.as_ref(), knots)
            .information();
        log::trace!(
            "solved {} blocks in {iterations} evaluations, cost {initial_cost:.3e} -> {final_cost:.3e}",
            problem.len()
        );
        Summary {
            iterations,
            initial_cost,
            final_cost,
            converged,
            free: layout.free,
            information,
        }
    }
}
