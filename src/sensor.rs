//! Spherical noise model of a spinning range sensor.

use nalgebra::{Matrix3, Vector3};
use serde::Deserialize;

use crate::{
    frame::{LidarPoint, frames},
    uncertain::{UncertainPoint, Uncertained},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RangeSensorConfig {
    /// Standard deviation of the range reading, in meters.
    pub sigma_range: f64,
    /// Standard deviation of the beam azimuth, in radians.
    pub sigma_azimuth: f64,
    /// Standard deviation of the beam elevation, in radians.
    pub sigma_elevation: f64,
}

impl Default for RangeSensorConfig {
    fn default() -> Self {
        Self {
            sigma_range: 0.02,
            sigma_azimuth: 0.001,
            sigma_elevation: 0.001,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangeSensor {
    spherical_variance: Vector3<f64>,
}

impl RangeSensor {
    pub fn new(config: &RangeSensorConfig) -> Self {
        Self {
            spherical_variance: Vector3::new(
                config.sigma_range.powi(2),
                config.sigma_azimuth.powi(2),
                config.sigma_elevation.powi(2),
            ),
        }
    }

    /// Euclidean covariance of a point measured at `point` in the sensor frame.
    pub fn covariance(&self, point: &Vector3<f64>) -> Matrix3<f64> {
        let range = point.norm();
        if range <= f64::EPSILON {
            return Matrix3::from_diagonal_element(self.spherical_variance.x);
        }
        let azimuth = point.y.atan2(point.x);
        let elevation = point.z.atan2(point.xy().norm());
        let (sin_az, cos_az) = azimuth.sin_cos();
        let (sin_el, cos_el) = elevation.sin_cos();

        // d(x, y, z) / d(range, azimuth, elevation)
        let jacobian = Matrix3::new(
            cos_el * cos_az,
            -range * cos_el * sin_az,
            -range * sin_el * cos_az,
            cos_el * sin_az,
            range * cos_el * cos_az,
            -range * sin_el * sin_az,
            sin_el,
            0.0,
            range * cos_el,
        );
        jacobian * Matrix3::from_diagonal(&self.spherical_variance) * jacobian.transpose()
    }

    #[inline]
    pub fn measure(&self, point: LidarPoint<f64>) -> UncertainPoint<frames::Lidar> {
        let cov = self.covariance(&point.coords);
        Uncertained::new_with_cov(point, cov)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_range_variance_along_ray() {
        let sensor = RangeSensor::new(&RangeSensorConfig::default());
        let cov = sensor.covariance(&Vector3::new(10.0, 0.0, 0.0));
        assert_relative_eq!(cov[(0, 0)], 0.02f64.powi(2), epsilon = 1e-12);
        // angular noise grows with range
        assert_relative_eq!(cov[(1, 1)], (10.0 * 0.001f64).powi(2), epsilon = 1e-12);
        assert_relative_eq!(cov[(2, 2)], (10.0 * 0.001f64).powi(2), epsilon = 1e-12);
        assert_relative_eq!(cov[(0, 1)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_covariance_symmetric_positive() {
        let sensor = RangeSensor::new(&RangeSensorConfig::default());
        let cov = sensor.covariance(&Vector3::new(3.0, -4.0, 1.5));
        assert_relative_eq!(cov, cov.transpose(), epsilon = 1e-15);
        assert!(cov.symmetric_eigenvalues().iter().all(|&value| value > 0.0));
    }
}
