//! Windowed continuous-time laser odometry.

pub mod config;
pub mod output;

mod advance;
mod dump;
mod ingest;
mod optimize;

pub use config::{Config, OptimizerConfig, OutputConfig, ScanConfig};
pub use ingest::RawPoint;
pub use optimize::Correspondence;
pub use output::{MatchedFeature, OutputHandoff, Snapshot, UndistortedPoint};

use dump::Dump;

use crate::{
    error::{Error, Result},
    feature::{FeatureExtractor, Features},
    frame::{Framed, LidarPoint, MapFramePoint, WindowEndPoint, frames},
    local_map::LocalMap,
    sensor::RangeSensor,
    signal::{Ring, SignalExtractor},
    solver::{Solver, SolverOptions},
    trajectory::{Knot, Trajectory},
};

/// What a completed window produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// The map is still being built, nothing was solved.
    Initializing,
    Solved {
        /// Re-linearizations run.
        iterations: usize,
        /// Committed residual blocks in the last problem.
        residuals: usize,
    },
    /// Too few residuals, the trajectory was reset.
    Degenerate { committed: usize, required: usize },
}

/// # Input
/// ```text
/// ├─ points(tick) ─ points(tick) ─ ... ─ wrap ─ ... ─ wrap ─┤ n_window scans
///                                                            │
///              features ─> correspondences ─> solve ─> advance window
/// ```
pub struct LaserOdom {
    config: Config,
    signal: SignalExtractor,
    extractor: FeatureExtractor,
    sensor: RangeSensor,
    solver: Solver,
    rings: Vec<Ring>,
    features: Features,
    correspondences: Vec<Correspondence>,
    local_map: LocalMap,
    trajectory: Trajectory,
    /// The knots of the last completed window.
    previous: Vec<Knot>,
    /// Where the current window starts, as estimated by the last one.
    window_prior: Knot,
    scans_in_window: usize,
    previous_tick: Option<u64>,
    stamp: f64,
    full_window: bool,
    initialized: bool,
    output: Option<OutputHandoff>,
    dump: Dump,
}

impl LaserOdom {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let scan = &config.scan;
        let trajectory = Trajectory::new(
            &config.trajectory,
            scan.window_duration(),
            scan.window_ticks(),
        )?;
        let extractor = FeatureExtractor::new(&config.features, scan.max_ticks, scan.n_window);
        let local_map = LocalMap::new(
            config.map.clone(),
            extractor.definitions().iter().map(|d| d.residual),
        );
        let solver = Solver::new(SolverOptions {
            max_iterations: config.optimizer.max_inner_iters,
            threads: config.optimizer.solver_threads,
            ..Default::default()
        });
        log::info!(
            "laser odometry with {} rings, {} feature types and {} knots",
            scan.n_ring,
            extractor.definitions().len(),
            config.trajectory.knot_count
        );

        Ok(Self {
            signal: SignalExtractor::new(scan.min_intensity, scan.max_intensity),
            sensor: RangeSensor::new(&config.sensor),
            rings: vec![Ring::default(); scan.n_ring],
            features: Features::default(),
            correspondences: Vec::new(),
            previous: trajectory.knots().to_vec(),
            window_prior: Knot::default(),
            scans_in_window: 0,
            previous_tick: None,
            stamp: 0.0,
            full_window: false,
            initialized: false,
            output: None,
            dump: Dump::new(&config.output),
            extractor,
            local_map,
            solver,
            trajectory,
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The knots of the window being accumulated, seeded from the last solve.
    #[inline]
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// The knots of the last completed window.
    #[inline]
    pub fn previous(&self) -> &[Knot] {
        &self.previous
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn local_map(&self) -> &LocalMap {
        &self.local_map
    }

    /// The features of the last completed window.
    #[inline]
    pub fn features(&self) -> &Features {
        &self.features
    }

    /// The correspondences of the last solve.
    #[inline]
    pub fn correspondences(&self) -> &[Correspondence] {
        &self.correspondences
    }

    /// Moves a point captured at `tick` of the current window into the map frame.
    #[inline]
    pub fn to_map(&self, point: LidarPoint<f64>, tick: u64) -> MapFramePoint<f64> {
        point * self.trajectory.pose_at(tick)
    }

    /// Moves a point captured at `tick` into the sensor frame at the end of the window.
    pub fn to_window_end(&self, point: LidarPoint<f64>, tick: u64) -> WindowEndPoint<f64> {
        let map_to_end = Framed::new_transform(
            self.trajectory.last().pose.inverse(),
            frames::Map,
            frames::WindowEnd,
        );
        self.to_map(point, tick) * map_to_end
    }

    /// Runs the pipeline over the buffered scans as if the window had ended.
    pub fn complete_window(&mut self) -> Result<WindowOutcome> {
        let features = match self.extractor.extract(&self.rings) {
            Ok(features) => features,
            Err(err) => {
                self.clear_rings();
                return Err(err);
            }
        };
        self.features = features;

        let outcome = if self.initialized && self.full_window {
            match self.optimize() {
                Ok(outcome) => outcome,
                Err(Error::InsufficientResiduals {
                    committed,
                    required,
                }) => WindowOutcome::Degenerate {
                    committed,
                    required,
                },
                Err(err) => {
                    self.clear_rings();
                    return Err(err);
                }
            }
        } else {
            WindowOutcome::Initializing
        };

        self.advance(&outcome);
        Ok(outcome)
    }

    fn clear_rings(&mut self) {
        self.rings.iter_mut().for_each(Ring::clear);
    }
}
