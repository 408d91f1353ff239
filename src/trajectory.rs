//! The window trajectory: time-ordered knots joined by a continuous-time motion prior.

pub mod gp;
pub mod knot;

use serde::Deserialize;

pub use gp::{Interpolation, MotionPrior};
pub use knot::Knot;

use crate::{
    error::{Error, Result},
    frame::{Framed, LidarToMap},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Knots per window, at least two.
    pub knot_count: usize,
    pub prior: MotionPrior,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            knot_count: 3,
            prior: MotionPrior::default(),
        }
    }
}

/// Where a tick falls between two knots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnotSpan {
    /// Index of the earlier knot.
    pub index: usize,
    pub t_a: f64,
    pub t_b: f64,
    pub tau: f64,
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    knots: Vec<Knot>,
    stamps: Vec<f64>,
    prior: MotionPrior,
    duration: f64,
    window_ticks: u64,
}

impl Trajectory {
    /// Knots are spread evenly over `duration` seconds, which span `window_ticks` ticks.
    pub fn new(config: &TrajectoryConfig, duration: f64, window_ticks: u64) -> Result<Self> {
        let count = config.knot_count;
        if count < 2 {
            return Err(Error::Configuration(format!(
                "a window needs at least 2 knots, got {count}"
            )));
        }
        if duration.is_nan() || duration <= 0.0 || window_ticks == 0 {
            return Err(Error::Configuration(
                "window duration and tick span must be positive".into(),
            ));
        }
        let spacing = duration / (count - 1) as f64;
        Ok(Self {
            knots: vec![Knot::default(); count],
            stamps: (0..count).map(|i| i as f64 * spacing).collect(),
            prior: config.prior,
            duration,
            window_ticks,
        })
    }

    #[inline]
    pub fn knots(&self) -> &[Knot] {
        &self.knots
    }

    #[inline]
    pub fn knots_mut(&mut self) -> &mut [Knot] {
        &mut self.knots
    }

    #[inline]
    pub fn stamps(&self) -> &[f64] {
        &self.stamps
    }

    #[inline]
    pub fn prior(&self) -> &MotionPrior {
        &self.prior
    }

    #[inline]
    pub fn spacing(&self) -> f64 {
        self.stamps[1] - self.stamps[0]
    }

    #[inline]
    pub fn last(&self) -> &Knot {
        // at least two knots by construction
        &self.knots[self.knots.len() - 1]
    }

    /// Replaces the knots, keeping the count.
    pub fn set_knots(&mut self, knots: &[Knot]) {
        self.knots.copy_from_slice(knots);
    }

    /// Identity poses and zero velocities.
    pub fn reset(&mut self) {
        self.knots.fill(Knot::default());
    }

    /// Starts a new window at `start`, extrapolating its velocity over every knot.
    pub fn reseed(&mut self, start: Knot) {
        let spacing = self.spacing();
        let mut knot = start;
        for slot in &mut self.knots {
            *slot = knot;
            knot = knot.extrapolate(spacing);
        }
    }

    pub fn span(&self, tick: u64) -> KnotSpan {
        let tau = tick as f64 / self.window_ticks as f64 * self.duration;
        let index = ((tau / self.spacing()) as usize).min(self.knots.len() - 2);
        KnotSpan {
            index,
            t_a: self.stamps[index],
            t_b: self.stamps[index + 1],
            tau,
        }
    }

    /// Interpolates `knots`, which share this trajectory's stamps, at `span`.
    pub fn interpolate_with(&self, knots: &[Knot], span: &KnotSpan) -> Interpolation {
        gp::interpolate(
            &self.prior,
            &knots[span.index],
            &knots[span.index + 1],
            span.t_a,
            span.t_b,
            span.tau,
        )
    }

    #[inline]
    pub fn interpolate(&self, tick: u64) -> Interpolation {
        self.interpolate_with(&self.knots, &self.span(tick))
    }

    #[inline]
    pub fn pose_at(&self, tick: u64) -> LidarToMap<f64> {
        Framed::new(self.interpolate(tick).pose)
    }
}
