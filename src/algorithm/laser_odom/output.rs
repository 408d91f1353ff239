//! Hands solved windows to a consumer thread through a single slot.
//!
//! A snapshot the consumer has not taken yet is overwritten by the next one.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use super::LaserOdom;
use crate::{
    error::Result,
    frame::{Framed, WindowEndPoint, frames},
    trajectory::Knot,
};

/// A buffered return moved to the sensor frame at the end of its window.
#[derive(Debug, Clone, Copy)]
pub struct UndistortedPoint {
    pub position: WindowEndPoint<f64>,
    pub intensity: f64,
    pub ring: usize,
    pub tick: u64,
}

/// A matched feature and the map points it was matched against, at the end of the window.
#[derive(Debug, Clone)]
pub struct MatchedFeature {
    pub feature_type: usize,
    pub point: WindowEndPoint<f64>,
    pub map_points: Vec<WindowEndPoint<f64>>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Stamp of the first packet of the window.
    pub stamp: f64,
    pub knots: Vec<Knot>,
    /// Empty unless undistortion is enabled.
    pub undistorted: Vec<UndistortedPoint>,
    pub correspondences: Vec<MatchedFeature>,
}

pub struct OutputHandoff {
    sender: Option<Sender<Snapshot>>,
    /// Lets the producer take back a snapshot the consumer has not picked up.
    drain: Receiver<Snapshot>,
    overwrites: usize,
    handle: Option<JoinHandle<()>>,
}

impl OutputHandoff {
    /// Runs `callback` on a dedicated thread for every published snapshot.
    pub fn spawn<F>(mut callback: F) -> Result<Self>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        let drain = receiver.clone();
        let handle = thread::Builder::new()
            .name("ctlo-output".into())
            .spawn(move || {
                for snapshot in receiver {
                    callback(snapshot);
                }
            })?;
        Ok(Self {
            sender: Some(sender),
            drain,
            overwrites: 0,
            handle: Some(handle),
        })
    }

    pub fn publish(&mut self, mut snapshot: Snapshot) {
        let Some(sender) = &self.sender else {
            return;
        };
        loop {
            match sender.try_send(snapshot) {
                Ok(()) => return,
                Err(TrySendError::Full(returned)) => {
                    if self.drain.try_recv().is_ok() {
                        self.overwrites += 1;
                        log::error!("Overwriting previous output");
                    }
                    snapshot = returned;
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::warn!("output consumer is gone, dropping the snapshot");
                    return;
                }
            }
        }
    }

    /// Snapshots dropped because the consumer was late.
    #[inline]
    pub fn overwrite_count(&self) -> usize {
        self.overwrites
    }

    /// Stops the consumer once it has handled the pending snapshot and joins it.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("output consumer panicked");
            }
        }
    }
}

impl Drop for OutputHandoff {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl LaserOdom {
    /// Delivers every solved window to `callback`, replacing any previous consumer.
    pub fn register_output<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        self.output = Some(OutputHandoff::spawn(callback)?);
        Ok(())
    }

    /// Snapshots overwritten before the consumer took them.
    pub fn overwrite_count(&self) -> usize {
        self.output.as_ref().map_or(0, OutputHandoff::overwrite_count)
    }

    /// Stops and joins the consumer, if any.
    pub fn shutdown_output(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.shutdown();
        }
    }

    pub(super) fn snapshot(&self) -> Snapshot {
        let map_to_end = Framed::new_transform(
            self.trajectory.last().pose.inverse(),
            frames::Map,
            frames::WindowEnd,
        );

        let undistorted = if self.config.output.undistort {
            self.rings
                .iter()
                .enumerate()
                .flat_map(|(ring, points)| {
                    points.points().iter().map(move |point| UndistortedPoint {
                        position: self.to_window_end(point.position, point.tick),
                        intensity: point.intensity,
                        ring,
                        tick: point.tick,
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        let correspondences = self
            .correspondences
            .iter()
            .map(|correspondence| {
                let feature = &self.features.rings(correspondence.feature_type)
                    [correspondence.ring][correspondence.index];
                let map = self.local_map.map(correspondence.feature_type);
                MatchedFeature {
                    feature_type: correspondence.feature_type,
                    point: self.to_window_end(feature.position, feature.tick),
                    map_points: correspondence
                        .primitive
                        .indices()
                        .iter()
                        .map(|&index| map.points()[index].position * map_to_end)
                        .collect(),
                }
            })
            .collect();

        Snapshot {
            stamp: self.stamp,
            knots: self.trajectory.knots().to_vec(),
            undistorted,
            correspondences,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, mpsc};

    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector6};

    use super::*;
    use crate::{
        algorithm::laser_odom::{Config, RawPoint},
        lie,
    };

    fn snapshot(stamp: f64) -> Snapshot {
        Snapshot {
            stamp,
            knots: Vec::new(),
            undistorted: Vec::new(),
            correspondences: Vec::new(),
        }
    }

    #[test]
    fn test_delivered_in_order() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let mut output = OutputHandoff::spawn(move |snapshot: Snapshot| {
            sink.lock().unwrap().push(snapshot.stamp);
        })
        .unwrap();
        output.publish(snapshot(1.0));
        output.shutdown();
        assert_eq!(*received.lock().unwrap(), vec![1.0]);
    }

    #[test]
    fn test_slow_consumer_overwritten() {
        let (release, gate) = mpsc::channel::<()>();
        let (seen, handled) = mpsc::channel();
        let mut output = OutputHandoff::spawn(move |snapshot: Snapshot| {
            seen.send(snapshot.stamp).ok();
            gate.recv().ok();
        })
        .unwrap();

        output.publish(snapshot(1.0));
        // the consumer is now blocked on the first snapshot with the slot free
        assert_eq!(handled.recv(), Ok(1.0));
        output.publish(snapshot(2.0));
        output.publish(snapshot(3.0));
        assert_eq!(output.overwrite_count(), 1);

        drop(release);
        output.shutdown();
        assert_eq!(handled.try_iter().collect::<Vec<_>>(), vec![3.0]);
    }

    #[test]
    fn test_undistorted_at_window_end() {
        let mut config = Config::default();
        config.scan.n_ring = 1;
        let mut odom = LaserOdom::new(config).unwrap();
        let velocity = Vector6::new(2.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        odom.trajectory.reseed(Knot {
            pose: lie::Pose::identity(),
            velocity,
        });
        let point = RawPoint::new(Point3::new(5.0, 0.0, 0.0), 10.0, 0);
        odom.add_point(0, 0.0, point).unwrap();

        let snapshot = odom.snapshot();
        assert_eq!(snapshot.knots.len(), 3);
        assert_eq!(snapshot.undistorted.len(), 1);
        // captured at the start, the sensor moved 0.2m forward by the end
        assert_relative_eq!(
            *snapshot.undistorted[0].position,
            Point3::new(4.8, 0.0, 0.0),
            epsilon = 1e-9
        );
    }
}
