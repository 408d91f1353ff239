//! Drives the odometry with a simulated 16-ring sensor moving through a box room.
//!
//! `cargo run --example synthetic_room [config.toml]`

use std::f64::consts::TAU;

use ctlo::{Config, LaserOdom, RawPoint, WindowOutcome, lie};
use nalgebra::{Point3, Vector3, Vector6};
use rand::{Rng, SeedableRng, rngs::StdRng};

const MAX_TICKS: u64 = 36000;
const TICK_STEP: u64 = 50;
const REVOLUTIONS: u64 = 20;

fn cast(origin: &Point3<f64>, direction: &Vector3<f64>) -> Option<f64> {
    let (min, max) = (Point3::new(-6.0, -4.0, -1.2), Point3::new(8.0, 5.0, 2.5));
    (0..3)
        .filter(|&axis| direction[axis].abs() > 1e-12)
        .map(|axis| {
            let bound = if direction[axis] > 0.0 { max[axis] } else { min[axis] };
            (bound - origin[axis]) / direction[axis]
        })
        .filter(|t| *t > 0.0)
        .min_by(f64::total_cmp)
}

fn main() -> ctlo::Result<()> {
    env_logger::init();
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let scan_period = config.scan.scan_period;
    let mut odom = LaserOdom::new(config)?;
    odom.register_output(|snapshot| {
        if let Some(end) = snapshot.knots.last() {
            println!(
                "{:>6.2}s  end {:?}  {} undistorted points",
                snapshot.stamp,
                end.pose.translation.vector.as_slice(),
                snapshot.undistorted.len()
            );
        }
    })?;

    // half a metre per second forward while turning slowly
    let velocity = Vector6::new(0.5, 0.0, 0.0, 0.0, 0.0, 0.05);
    let elevations = (0..16)
        .map(|i| (-30.0_f64 + 3.0 * i as f64).to_radians())
        .collect::<Vec<_>>();
    let mut rng = StdRng::seed_from_u64(0);

    for revolution in 0..REVOLUTIONS {
        for step in 0..MAX_TICKS / TICK_STEP {
            let tick = step * TICK_STEP;
            let stamp = (revolution as f64 + tick as f64 / MAX_TICKS as f64) * scan_period;
            let pose = lie::exp(&(velocity * stamp));
            let origin = Point3::from(pose.translation.vector);
            let azimuth = tick as f64 / MAX_TICKS as f64 * TAU;

            let points = elevations
                .iter()
                .enumerate()
                .filter_map(|(ring, elevation)| {
                    let direction = Vector3::new(
                        elevation.cos() * azimuth.cos(),
                        elevation.cos() * azimuth.sin(),
                        elevation.sin(),
                    );
                    let range = cast(&origin, &(pose.rotation * direction))?;
                    let range = range + rng.random_range(-0.01..=0.01);
                    Some(RawPoint::new(Point3::from(direction * range), 40.0, ring))
                })
                .collect::<Vec<_>>();

            match odom.add_points(tick, stamp, &points)? {
                Some(WindowOutcome::Degenerate { committed, required }) => {
                    println!("window {revolution}: degenerate, {committed} of {required} residuals");
                }
                Some(outcome) => log::info!("window {revolution}: {outcome:?}"),
                None => {}
            }
        }
    }

    odom.shutdown_output();
    let truth = lie::exp(&(velocity * (REVOLUTIONS - 1) as f64 * scan_period));
    println!(
        "last window ends at {:?}, truth {:?}",
        odom.previous()
            .last()
            .map(|knot| knot.pose.translation.vector.as_slice().to_vec()),
        truth.translation.vector.as_slice()
    );
    Ok(())
}
