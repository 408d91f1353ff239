//! A spinning multi-ring sensor inside a box room.

use std::f64::consts::TAU;

use ctlo::{
    LaserOdom, RawPoint, Result, WindowOutcome,
    lie::{self, Pose, Tangent},
};
use nalgebra::{Point3, Vector3};
use rand::{Rng, SeedableRng, rngs::StdRng};

pub const MAX_TICKS: u64 = 36000;
/// One packet per degree of azimuth.
pub const TICK_STEP: u64 = 100;
pub const SCAN_PERIOD: f64 = 0.1;

/// An axis-aligned room around the origin.
pub struct BoxRoom {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Default for BoxRoom {
    fn default() -> Self {
        Self {
            min: Point3::new(-5.0, -4.0, -1.0),
            max: Point3::new(6.0, 4.5, 2.0),
        }
    }
}

impl BoxRoom {
    /// Distance along `direction` from `origin`, inside the room, to the first wall.
    pub fn cast(&self, origin: &Point3<f64>, direction: &Vector3<f64>) -> Option<f64> {
        (0..3)
            .filter(|&axis| direction[axis].abs() > 1e-12)
            .map(|axis| {
                let bound = if direction[axis] > 0.0 {
                    self.max[axis]
                } else {
                    self.min[axis]
                };
                (bound - origin[axis]) / direction[axis]
            })
            .filter(|t| *t > 0.0)
            .min_by(f64::total_cmp)
    }
}

pub struct SpinningSensor {
    elevations: Vec<f64>,
    noise: f64,
    rng: StdRng,
}

impl SpinningSensor {
    /// 16 rings from -30 to +15 degrees with uniform range noise of `noise` meters.
    pub fn new(noise: f64, seed: u64) -> Self {
        let elevations = (0..16).map(|i| -30.0 + 3.0 * i as f64).collect::<Vec<_>>();
        Self::with_elevations(&elevations, noise, seed)
    }

    /// One ring per elevation, given in degrees.
    pub fn with_elevations(elevations: &[f64], noise: f64, seed: u64) -> Self {
        Self {
            elevations: elevations.iter().map(|e| e.to_radians()).collect(),
            noise,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn ring_count(&self) -> usize {
        self.elevations.len()
    }

    /// The returns of every ring at `tick` for a sensor at `pose`, in the sensor frame.
    pub fn packet(&mut self, room: &BoxRoom, pose: &Pose, tick: u64) -> Vec<RawPoint> {
        let azimuth = (tick % MAX_TICKS) as f64 / MAX_TICKS as f64 * TAU;
        let origin = Point3::from(pose.translation.vector);
        let mut points = Vec::with_capacity(self.elevations.len());
        for (ring, &elevation) in self.elevations.iter().enumerate() {
            let direction = Vector3::new(
                elevation.cos() * azimuth.cos(),
                elevation.cos() * azimuth.sin(),
                elevation.sin(),
            );
            let Some(range) = room.cast(&origin, &(pose.rotation * direction)) else {
                continue;
            };
            let range = range + self.rng.random_range(-self.noise..=self.noise);
            points.push(RawPoint::new(Point3::from(direction * range), 60.0, ring));
        }
        points
    }
}

/// Feeds `revolutions` revolutions of a sensor resting at the origin, then the first packet of
/// the next one so the last window completes. Returns the outcome of every window.
pub fn run_stationary(
    odom: &mut LaserOdom,
    revolutions: usize,
    seed: u64,
) -> Result<Vec<WindowOutcome>> {
    let mut sensor = SpinningSensor::new(0.005, seed);
    run(odom, &mut sensor, &Tangent::zeros(), revolutions)
}

/// Like [`run_stationary`], for a sensor starting at the origin and moving at the constant
/// map-frame `velocity`.
pub fn run(
    odom: &mut LaserOdom,
    sensor: &mut SpinningSensor,
    velocity: &Tangent,
    revolutions: usize,
) -> Result<Vec<WindowOutcome>> {
    let room = BoxRoom::default();
    let mut outcomes = Vec::new();
    for revolution in 0..=revolutions as u64 {
        let ticks = if revolution == revolutions as u64 {
            0..1
        } else {
            0..MAX_TICKS / TICK_STEP
        };
        for step in ticks {
            let tick = step * TICK_STEP;
            let stamp = (revolution as f64 + tick as f64 / MAX_TICKS as f64) * SCAN_PERIOD;
            let pose: Pose = lie::exp(&(velocity * stamp));
            let packet = sensor.packet(&room, &pose, tick);
            if let Some(outcome) = odom.add_points(tick, stamp, &packet)? {
                outcomes.push(outcome);
            }
        }
    }
    Ok(outcomes)
}
