use nalgebra::Point3;

use super::{LaserOdom, WindowOutcome};
use crate::{
    error::{Error, Result},
    frame::Framed,
    signal::ScanPoint,
};

/// A return as delivered by the driver, in the sensor frame.
#[derive(Debug, Clone, Copy)]
pub struct RawPoint {
    pub position: Point3<f64>,
    pub intensity: f64,
    pub ring: usize,
}

impl RawPoint {
    pub fn new(position: Point3<f64>, intensity: f64, ring: usize) -> Self {
        Self {
            position,
            intensity,
            ring,
        }
    }
}

impl LaserOdom {
    /// Buffers the points captured at `tick` of the current revolution.
    ///
    /// A tick drop larger than `wraparound_ticks` starts a new revolution. Every `n_window`
    /// revolutions the buffered window is processed before the new points are added, and its
    /// outcome is returned.
    ///
    /// A packet whose tick is behind the last point of one of its rings is rejected whole with
    /// [`Error::OrderingViolation`], leaving the buffers as they were.
    pub fn add_points(
        &mut self,
        tick: u64,
        stamp: f64,
        points: &[RawPoint],
    ) -> Result<Option<WindowOutcome>> {
        let wraparound_ticks = self.config.scan.wraparound_ticks;
        let n_window = self.config.scan.n_window;
        let max_ticks = self.config.scan.max_ticks;

        let completed = match self.previous_tick {
            None => {
                self.full_window = tick <= wraparound_ticks;
                self.stamp = stamp;
                None
            }
            Some(previous) if previous > tick + wraparound_ticks => {
                self.scans_in_window += 1;
                if self.scans_in_window == n_window {
                    self.scans_in_window = 0;
                    let completed = self.complete_window();
                    self.stamp = stamp;
                    Some(completed)
                } else {
                    None
                }
            }
            Some(_) => None,
        };
        let window_tick = tick + self.scans_in_window as u64 * max_ticks;
        if completed.is_none() {
            self.check_ordering(window_tick, points)?;
        }
        self.previous_tick = Some(tick);
        let outcome = completed.transpose()?;

        let tick = window_tick;
        for point in points {
            let Some(ring) = self.rings.get_mut(point.ring) else {
                log::warn!(
                    "dropping a point on ring {}, only {} rings configured",
                    point.ring,
                    self.config.scan.n_ring
                );
                continue;
            };
            self.signal.push(
                ring,
                ScanPoint {
                    position: Framed::new(point.position),
                    intensity: point.intensity,
                    tick,
                },
            );
        }
        Ok(outcome)
    }

    fn check_ordering(&self, tick: u64, points: &[RawPoint]) -> Result<()> {
        for point in points {
            let Some(ring) = self.rings.get(point.ring) else {
                continue;
            };
            if let Some(last) = ring.points().last()
                && last.tick > tick
            {
                return Err(Error::OrderingViolation {
                    ring: point.ring,
                    index: ring.len(),
                    previous: last.tick,
                    tick,
                });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn add_point(&mut self, tick: u64, stamp: f64, point: RawPoint) -> Result<Option<WindowOutcome>> {
        self.add_points(tick, stamp, std::slice::from_ref(&point))
    }
}
