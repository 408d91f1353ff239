use nalgebra::Point3;

use super::{LaserOdom, WindowOutcome};
use crate::{frame::MapFramePoint, lie::Pose};

impl LaserOdom {
    /// Closes the current window: publishes the solve, refreshes the local map with the window's
    /// features and seeds the next window from the end of this one.
    pub(super) fn advance(&mut self, outcome: &WindowOutcome) {
        if matches!(outcome, WindowOutcome::Solved { .. }) {
            self.dump_window();
            if self.output.is_some() {
                let snapshot = self.snapshot();
                if let Some(output) = &mut self.output {
                    output.publish(snapshot);
                }
            }
        }
        self.previous = self.trajectory.knots().to_vec();

        let features = (0..self.features.type_count())
            .map(|feature_type| {
                self.features
                    .iter_type(feature_type)
                    .map(|(_, _, feature)| self.to_map(feature.position, feature.tick))
                    .collect::<Vec<MapFramePoint<f64>>>()
            })
            .collect::<Vec<_>>();
        let origin = Point3::from(self.trajectory.last().pose.translation.vector);
        let maintenance = self.local_map.maintain(&origin, features);
        log::debug!(
            "window closed: {} features, {} map points evicted, {} inserted, {} total",
            self.features.total(),
            maintenance.evicted,
            maintenance.inserted,
            self.local_map.total_points()
        );
        self.clear_rings();

        // a degenerate window waits one more window before initializing again
        let degenerate = matches!(outcome, WindowOutcome::Degenerate { .. });
        if !self.initialized && !degenerate {
            // never initialize against a partial revolution
            let map_points = self.local_map.total_points();
            if self.full_window && map_points >= self.local_map.config().min_init_features {
                self.initialized = true;
                log::info!("initialized with {map_points} map points");
            }
            self.full_window = true;
        }

        let last = *self.trajectory.last();
        self.window_prior = last;
        self.trajectory.reseed(last);
    }

    fn dump_window(&mut self) {
        let end: Pose = self.trajectory.last().pose;
        self.dump.pose(&end);
        if !self.dump.wants_correspondences() {
            return;
        }
        let mut per_type = vec![Vec::new(); self.features.type_count()];
        for correspondence in &self.correspondences {
            let feature = &self.features.rings(correspondence.feature_type)[correspondence.ring]
                [correspondence.index];
            let map = self.local_map.map(correspondence.feature_type);
            let row = std::iter::once(*self.to_map(feature.position, feature.tick))
                .chain(
                    correspondence
                        .primitive
                        .indices()
                        .iter()
                        .map(|&index| *map.points()[index].position),
                )
                .collect::<Vec<_>>();
            per_type[correspondence.feature_type].push(row);
        }
        self.dump.correspondences(&per_type);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector6;

    use super::*;
    use crate::{
        algorithm::laser_odom::Config,
        feature::{FeaturePoint, Features},
        frame::Framed,
        trajectory::Knot,
    };

    fn odom() -> LaserOdom {
        let mut config = Config::default();
        config.map.min_init_features = 3;
        LaserOdom::new(config).unwrap()
    }

    fn features(points: &[Point3<f64>]) -> Features {
        let ring = points
            .iter()
            .enumerate()
            .map(|(i, &point)| FeaturePoint {
                position: Framed::new(point),
                tick: i as u64 * 1000,
            })
            .collect();
        let mut per_type = vec![vec![Vec::new()]; 5];
        per_type[2] = vec![ring];
        Features::new(per_type)
    }

    #[test]
    fn test_initialization_waits_for_full_window() {
        let mut odom = odom();
        odom.features = features(&[
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(0.0, 3.0, 0.0),
            Point3::new(0.0, 0.0, 3.0),
        ]);
        odom.advance(&WindowOutcome::Initializing);
        assert_eq!(odom.local_map.map(2).len(), 3);
        assert!(!odom.is_initialized());
        assert!(odom.full_window);

        odom.features = features(&[]);
        odom.advance(&WindowOutcome::Initializing);
        assert!(odom.is_initialized());
    }

    #[test]
    fn test_too_few_features_stay_uninitialized() {
        let mut odom = odom();
        odom.full_window = true;
        odom.features = features(&[Point3::new(3.0, 0.0, 0.0)]);
        odom.advance(&WindowOutcome::Initializing);
        assert!(!odom.is_initialized());
    }

    #[test]
    fn test_degenerate_window_does_not_reinitialize() {
        let mut odom = odom();
        odom.full_window = true;
        odom.features = features(&[
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(0.0, 3.0, 0.0),
            Point3::new(0.0, 0.0, 3.0),
        ]);
        odom.advance(&WindowOutcome::Degenerate {
            committed: 3,
            required: 30,
        });
        assert!(!odom.is_initialized());
        odom.advance(&WindowOutcome::Initializing);
        assert!(odom.is_initialized());
    }

    #[test]
    fn test_reseed_from_last_knot() {
        let mut odom = odom();
        let velocity = Vector6::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.2);
        odom.trajectory.reseed(Knot {
            pose: Pose::identity(),
            velocity,
        });
        let end = *odom.trajectory.last();
        odom.features = features(&[Point3::new(3.0, 0.0, 0.0)]);
        odom.advance(&WindowOutcome::Solved {
            iterations: 1,
            residuals: 40,
        });

        assert_eq!(odom.previous().last(), Some(&end));
        assert_eq!(odom.window_prior, end);
        let knots = odom.trajectory.knots();
        assert_eq!(knots[0], end);
        assert!(knots.iter().all(|k| k.velocity == velocity));
        let spacing = odom.trajectory.spacing();
        assert_relative_eq!(
            knots[1].pose.to_homogeneous(),
            end.extrapolate(spacing).pose.to_homogeneous(),
            epsilon = 1e-12
        );
        // the feature went in at its own time along the old window
        let inserted = *odom.local_map.map(2).points()[0].position;
        assert_relative_eq!(inserted.x, 3.0, epsilon = 1e-12);
    }
}
