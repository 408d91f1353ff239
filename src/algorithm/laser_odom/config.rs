use std::{fs, path::Path, path::PathBuf};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    feature::FeatureConfig,
    local_map::{CorrespondenceConfig, LocalMapConfig},
    sensor::RangeSensorConfig,
    trajectory::TrajectoryConfig,
};

/// The configuration of the laser odometry, loadable from TOML.
///
/// Every section and field is optional and falls back to its [`Default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub features: FeatureConfig,
    pub map: LocalMapConfig,
    pub correspondence: CorrespondenceConfig,
    pub trajectory: TrajectoryConfig,
    pub optimizer: OptimizerConfig,
    pub sensor: RangeSensorConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub n_ring: usize,
    /// Ticks in one revolution.
    pub max_ticks: u64,
    /// Revolutions accumulated per window.
    pub n_window: usize,
    /// Seconds per revolution.
    pub scan_period: f64,
    /// A tick drop larger than this starts a new revolution.
    pub wraparound_ticks: u64,
    pub min_intensity: f64,
    pub max_intensity: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            n_ring: 16,
            max_ticks: 36000,
            n_window: 1,
            scan_period: 0.1,
            wraparound_ticks: 200,
            min_intensity: 0.0,
            max_intensity: 255.0,
        }
    }
}

impl ScanConfig {
    #[inline]
    pub fn window_ticks(&self) -> u64 {
        self.max_ticks * self.n_window as u64
    }

    #[inline]
    pub fn window_duration(&self) -> f64 {
        self.scan_period * self.n_window as f64
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Anchor the first knot to the end of the previous window.
    pub motion_prior: bool,
    /// Hold the first knot constant during the solve.
    pub lock_first: bool,
    /// Whiten correspondence residuals with the range sensor covariance.
    pub use_weighting: bool,
    /// Build plane residuals from line matches.
    pub treat_lines_as_planes: bool,
    pub robust_param: f64,
    pub max_residual_val: f64,
    /// Fewer committed residual blocks than this resets the trajectory.
    pub min_residuals: usize,
    /// Re-linearizations per window.
    pub opt_iters: usize,
    /// Solver iterations per re-linearization.
    pub max_inner_iters: usize,
    /// Tangent-space change of the last knot below which re-linearization stops.
    pub diff_tol: f64,
    /// 0 uses every core.
    pub solver_threads: usize,
    pub solution_remapping: bool,
    /// Information below which a direction is left at the seed when remapping.
    pub min_eigen: f64,
    /// Build the problem but never solve it.
    pub only_extract_features: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            motion_prior: true,
            lock_first: true,
            use_weighting: true,
            treat_lines_as_planes: false,
            robust_param: 0.002,
            max_residual_val: 0.004,
            min_residuals: 30,
            opt_iters: 25,
            max_inner_iters: 100,
            diff_tol: 1e-5,
            solver_threads: 0,
            solution_remapping: false,
            min_eigen: 100.0,
            only_extract_features: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Include every buffered point, motion compensated, in the published snapshot.
    pub undistort: bool,
    /// Appends the final pose of every solved window.
    pub trajectory_file: Option<PathBuf>,
    /// Receives the correspondences of every solved window, one file per feature type.
    pub correspondence_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            undistort: true,
            trajectory_file: None,
            correspondence_dir: None,
        }
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::Configuration(message()))
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = basic_toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        let scan = &self.scan;
        ensure(scan.n_ring > 0, || "scan.n_ring must be positive".into())?;
        ensure(scan.max_ticks > 0, || "scan.max_ticks must be positive".into())?;
        ensure(scan.n_window > 0, || "scan.n_window must be positive".into())?;
        ensure(scan.scan_period > 0.0, || {
            format!("scan.scan_period must be positive, got {}", scan.scan_period)
        })?;
        ensure(scan.min_intensity <= scan.max_intensity, || {
            "scan.min_intensity exceeds scan.max_intensity".into()
        })?;

        let features = &self.features;
        ensure(
            features.variance_window >= 3 && features.variance_window % 2 == 1,
            || {
                format!(
                    "features.variance_window must be odd and at least 3, got {}",
                    features.variance_window
                )
            },
        )?;
        ensure(features.angular_bins > 0, || {
            "features.angular_bins must be positive".into()
        })?;
        let definitions = features.definitions();
        ensure(!definitions.is_empty(), || "no feature types defined".into())?;
        if let Some(definition) = definitions.iter().find(|d| d.criteria.is_empty()) {
            return Err(Error::Configuration(format!(
                "feature type `{}` has no criteria",
                definition.name
            )));
        }

        ensure(self.trajectory.knot_count >= 2, || {
            format!(
                "a window needs at least 2 knots, got {}",
                self.trajectory.knot_count
            )
        })?;
        ensure(self.map.ttl > 0, || "map.ttl must be positive".into())?;
        ensure(
            self.correspondence.max_correspondence_dist > 0.0
                && self.correspondence.azimuth_tol > 0.0,
            || "correspondence radius and azimuth tolerance must be positive".into(),
        )?;
        ensure(self.optimizer.opt_iters > 0, || {
            "optimizer.opt_iters must be positive".into()
        })?;
        Ok(())
    }
}
