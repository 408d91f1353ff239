use nalgebra::Point3;

use super::{LaserOdom, WindowOutcome};
use crate::{
    error::{Error, Result},
    frame::{Framed, LidarToMap},
    lie,
    local_map::Primitive,
    residual::{
        KnotPrior, Loss, MotionResidual, ParamBlock, PointObservation, PointToLine, PointToPlane,
        ResidualBlock, admit,
    },
    solver::{Problem, Residual, remap::remap},
    trajectory::Knot,
};

/// A feature of the current window matched against the local map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub feature_type: usize,
    pub ring: usize,
    /// Index of the feature within its ring.
    pub index: usize,
    pub tick: u64,
    pub primitive: Primitive,
}

/// The residual set of one linearization.
pub(super) struct Linearization {
    pub problem: Problem,
    pub correspondences: Vec<Correspondence>,
    /// Matches dropped by the outlier gate.
    pub rejected: usize,
}

impl LaserOdom {
    /// Builds the residuals at the current knots: the window prior, the motion prior between
    /// consecutive knots and one geometric residual per matched feature.
    pub(super) fn linearize(&self) -> Linearization {
        let optimizer = &self.config.optimizer;
        let correspondence = &self.config.correspondence;
        let knots = self.trajectory.knots();
        let prior = *self.trajectory.prior();
        let spacing = self.trajectory.spacing();

        let mut problem = Problem::new();
        if optimizer.motion_prior {
            match KnotPrior::new(self.window_prior, &prior, spacing) {
                Some(block) => problem.add(Residual::Prior(block), Loss::Trivial),
                None => log::warn!("singular window prior information, skipping it"),
            }
        }
        for k in 0..knots.len() - 1 {
            match MotionResidual::new(k, spacing, &prior) {
                Some(block) => problem.add(Residual::Motion(block), Loss::Trivial),
                None => log::warn!("singular motion prior information after knot {k}"),
            }
        }

        let mut correspondences = Vec::new();
        let mut rejected = 0;
        for feature_type in 0..self.features.type_count() {
            let map = self.local_map.map(feature_type);
            if map.is_empty() {
                continue;
            }
            let at = |index: usize| *map.points()[index].position;
            for (ring, index, feature) in self.features.iter_type(feature_type) {
                let span = self.trajectory.span(feature.tick);
                let interpolation = self.trajectory.interpolate_with(knots, &span);
                let viewpoint = Point3::from(interpolation.pose.translation.vector);
                let to_map: LidarToMap<f64> = Framed::new(interpolation.pose);
                let query = feature.position * to_map;

                let Some(primitive) = map.find_correspondence(&query, &viewpoint, correspondence)
                else {
                    continue;
                };
                if correspondence.no_extrapolation
                    && map.extrapolates(&query, &primitive, correspondence)
                {
                    continue;
                }

                let observation = PointObservation {
                    point: self.sensor.measure(feature.position),
                    span,
                    prior,
                };
                let weighting = optimizer.use_weighting;
                let residual = match primitive {
                    Primitive::Line([a, b]) if optimizer.treat_lines_as_planes => {
                        PointToPlane::from_line(observation, [at(a), at(b)], knots, weighting)
                            .map(Residual::Plane)
                    }
                    Primitive::Line([a, b]) => {
                        PointToLine::new(observation, at(a), at(b), knots, weighting)
                            .map(Residual::Line)
                    }
                    Primitive::Plane(indices) => {
                        PointToPlane::new(observation, indices.map(at), knots, weighting)
                            .map(Residual::Plane)
                    }
                };
                let Some(evaluation) = residual
                    .as_ref()
                    .and_then(|residual| residual.evaluate(knots, false))
                else {
                    log::warn!(
                        "skipping a degenerate match on ring {ring} at tick {}",
                        feature.tick
                    );
                    continue;
                };
                let (Some(residual), Some(loss)) = (
                    residual,
                    admit(&evaluation, optimizer.max_residual_val, optimizer.robust_param),
                ) else {
                    rejected += 1;
                    continue;
                };
                problem.add(residual, loss);
                correspondences.push(Correspondence {
                    feature_type,
                    ring,
                    index,
                    tick: feature.tick,
                    primitive,
                });
            }
        }

        Linearization {
            problem,
            correspondences,
            rejected,
        }
    }

    /// Re-linearizes and solves until the end of the window settles.
    ///
    /// Too few residuals reset the trajectory and drop the initialization.
    pub(super) fn optimize(&mut self) -> Result<WindowOutcome> {
        let optimizer = self.config.optimizer.clone();
        let mut iterations = 0;
        let mut residuals = 0;

        for iteration in 0..optimizer.opt_iters {
            let Linearization {
                mut problem,
                correspondences,
                rejected,
            } = self.linearize();
            let committed = problem.len();
            if committed < optimizer.min_residuals {
                log::warn!(
                    "only {committed} residuals committed, {rejected} rejected, resetting the trajectory"
                );
                self.trajectory.reset();
                self.window_prior = Knot::default();
                self.correspondences.clear();
                self.initialized = false;
                return Err(Error::InsufficientResiduals {
                    committed,
                    required: optimizer.min_residuals,
                });
            }
            iterations += 1;
            residuals = committed;
            self.correspondences = correspondences;
            if optimizer.only_extract_features {
                break;
            }

            if optimizer.lock_first {
                problem.set_constant(ParamBlock::Pose(0));
                problem.set_constant(ParamBlock::Velocity(0));
            }
            let seed = self.trajectory.knots().to_vec();
            let mut knots = seed.clone();
            let summary = self.solver.solve(&problem, &mut knots);
            if optimizer.solution_remapping {
                if let Some(suppressed) = remap(&seed, &mut knots, &summary, optimizer.min_eigen) {
                    log::debug!("remapping suppressed {suppressed} directions");
                }
            }
            self.trajectory.set_knots(&knots);
            log::debug!(
                "iteration {iteration}: {committed} residuals, {rejected} rejected, cost {:.6} -> {:.6} in {} evaluations",
                summary.initial_cost,
                summary.final_cost,
                summary.iterations
            );

            // the seed of this iteration is where the previous one ended
            let settled = seed.last().is_some_and(|start| {
                lie::is_near(&self.trajectory.last().pose, &start.pose, optimizer.diff_tol)
            });
            if iteration > 0 && settled {
                break;
            }
        }

        for correspondence in &self.correspondences {
            self.local_map
                .map_mut(correspondence.feature_type)
                .mark_corresponded(&correspondence.primitive);
        }
        Ok(WindowOutcome::Solved {
            iterations,
            residuals,
        })
    }
}
