use crate::lie::{self, Pose, Tangent};

/// A trajectory state: the lidar-to-map pose and the twist, expressed in the map frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Knot {
    pub pose: Pose,
    pub velocity: Tangent,
}

impl Default for Knot {
    fn default() -> Self {
        Self {
            pose: Pose::identity(),
            velocity: Tangent::zeros(),
        }
    }
}

impl Knot {
    /// The state reached after `dt` seconds at constant velocity.
    pub fn extrapolate(&self, dt: f64) -> Self {
        Self {
            pose: lie::exp(&(self.velocity * dt)) * self.pose,
            velocity: self.velocity,
        }
    }
}
