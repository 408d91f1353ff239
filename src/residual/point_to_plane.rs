use nalgebra::{DVector, Point3, RowVector3, Vector3};

use super::{
    Evaluation, ParamBlock, PointObservation, ResidualBlock, point_to_line::orthonormal_complement,
};
use crate::trajectory::Knot;

/// Signed distance of a point to a plane through map points.
#[derive(Debug, Clone)]
pub struct PointToPlane {
    observation: PointObservation,
    origin: Point3<f64>,
    /// Unit normal scaled by the weight.
    projection: RowVector3<f64>,
    weight: f64,
}

impl PointToPlane {
    /// The plane through `a`, `b` and `c`. `None` when they are collinear.
    pub fn new(
        observation: PointObservation,
        [a, b, c]: [Point3<f64>; 3],
        knots: &[Knot],
        use_weighting: bool,
    ) -> Option<Self> {
        let normal = (b - a).cross(&(c - a)).try_normalize(f64::EPSILON)?;
        Self::with_normal(observation, a, normal, knots, use_weighting)
    }

    /// A line match used as a plane: the plane containing the line and facing the point, as
    /// observed at `knots`.
    pub fn from_line(
        observation: PointObservation,
        [a, b]: [Point3<f64>; 2],
        knots: &[Knot],
        use_weighting: bool,
    ) -> Option<Self> {
        let direction = (b - a).try_normalize(f64::EPSILON)?;
        let offset = observation.project(knots)?.position - a;
        let normal = (offset - direction * direction.dot(&offset))
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(|| orthonormal_complement(&direction).column(0).into_owned());
        Self::with_normal(observation, a, normal, knots, use_weighting)
    }

    fn with_normal(
        observation: PointObservation,
        origin: Point3<f64>,
        normal: Vector3<f64>,
        knots: &[Knot],
        use_weighting: bool,
    ) -> Option<Self> {
        let weight = if use_weighting {
            let cov = observation.project(knots)?.cov;
            let variance = normal.dot(&(cov * normal));
            if variance <= 0.0 {
                return None;
            }
            variance.sqrt().recip()
        } else {
            1.0
        };
        Some(Self {
            observation,
            origin,
            projection: normal.transpose() * weight,
            weight,
        })
    }
}

impl ResidualBlock for PointToPlane {
    fn dim(&self) -> usize {
        1
    }

    fn params(&self) -> Vec<ParamBlock> {
        self.observation.params()
    }

    fn evaluate(&self, knots: &[Knot], want_jacobians: bool) -> Option<Evaluation> {
        let projected = self.observation.project(knots)?;
        let residual = self.projection.dot(&(projected.position - self.origin).transpose());
        if !residual.is_finite() {
            return None;
        }
        let jacobians = if want_jacobians {
            self.observation.chain(&projected, &self.projection)
        } else {
            Vec::new()
        };
        Some(Evaluation {
            residual: DVector::from_element(1, residual),
            weight: self.weight,
            jacobians,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::residual::tests::{check_jacobians, sample_knots, sample_observation};

    fn floor() -> [Point3<f64>; 3] {
        [
            Point3::new(0.0, 0.0, -1.5),
            Point3::new(1.0, 0.0, -1.5),
            Point3::new(0.0, 1.0, -1.5),
        ]
    }

    #[test]
    fn test_signed_distance() {
        let knots = [Knot::default(); 3];
        let above = PointToPlane::new(
            sample_observation(Point3::new(2.0, 3.0, -1.0)),
            floor(),
            &knots,
            false,
        )
        .unwrap();
        let residual = above.evaluate(&knots, false).unwrap().residual[0];
        assert_relative_eq!(residual, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_collinear_points() {
        let knots = [Knot::default(); 3];
        let line = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ];
        let observation = sample_observation(Point3::new(2.0, 3.0, -1.0));
        assert!(PointToPlane::new(observation, line, &knots, true).is_none());
    }

    #[test]
    fn test_line_as_plane_faces_point() {
        let knots = [Knot::default(); 3];
        let plane = PointToPlane::from_line(
            sample_observation(Point3::new(1.0, 0.3, 0.4)),
            [Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)],
            &knots,
            false,
        )
        .unwrap();
        let residual = plane.evaluate(&knots, false).unwrap().residual[0];
        assert_relative_eq!(residual, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_weighting_uses_normal_variance() {
        let knots = [Knot::default(); 3];
        let observation = sample_observation(Point3::new(0.0, 0.0, -2.0));
        let sigma_range = (observation.point.cov[(2, 2)]).sqrt();
        let plane = PointToPlane::new(observation, floor(), &knots, true).unwrap();
        // the beam is along the normal, so only the range noise counts
        assert_relative_eq!(plane.weight, sigma_range.recip(), max_relative = 1e-9);
    }

    #[test]
    fn test_jacobians() {
        let knots = sample_knots();
        let plane = PointToPlane::new(
            sample_observation(Point3::new(2.0, 1.0, -1.3)),
            floor(),
            &knots,
            true,
        )
        .unwrap();
        check_jacobians(&plane, &knots, 1e-3);
    }
}
