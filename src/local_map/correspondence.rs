//! Nearest-neighbour line and plane matching against a [`FeatureMap`].

use kiddo::SquaredEuclidean;
use nalgebra::{Point3, Vector3};
use serde::Deserialize;

use super::{FeatureMap, as_query};
use crate::feature::ResidualType;

/// Where the elevation used for bin diversity is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationOrigin {
    /// The map frame origin.
    #[default]
    Map,
    /// The sensor position at the query's tick.
    Sensor,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrespondenceConfig {
    /// Search radius around the query point, in meters.
    pub max_correspondence_dist: f64,
    /// Bin width of the candidates' elevation angle, in radians.
    pub azimuth_tol: f64,
    pub elevation_origin: ElevationOrigin,
    /// Skip matches whose primitive does not span the query point.
    pub no_extrapolation: bool,
    /// Allowed overshoot past the primitive, as a fraction of its extent.
    pub max_extrapolation: f64,
    /// Also apply the extrapolation test to planes.
    pub plane_extrapolation_guard: bool,
}

impl Default for CorrespondenceConfig {
    fn default() -> Self {
        Self {
            max_correspondence_dist: 0.8,
            azimuth_tol: 0.01,
            elevation_origin: ElevationOrigin::Map,
            no_extrapolation: true,
            max_extrapolation: 0.1,
            plane_extrapolation_guard: false,
        }
    }
}

/// Indices of the map points forming a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Line([usize; 2]),
    Plane([usize; 3]),
}

impl Primitive {
    #[inline]
    pub fn indices(&self) -> &[usize] {
        match self {
            Primitive::Line(indices) => indices,
            Primitive::Plane(indices) => indices,
        }
    }

    #[inline]
    pub fn residual(&self) -> ResidualType {
        match self {
            Primitive::Line(_) => ResidualType::Line,
            Primitive::Plane(_) => ResidualType::Plane,
        }
    }
}

/// Elevation of `point` as seen from `viewpoint`.
#[inline]
fn elevation(point: &Point3<f64>, viewpoint: &Point3<f64>) -> f64 {
    let d = point - viewpoint;
    d.z.atan2(d.x.hypot(d.y))
}

/// Barycentric coordinates of the projection of `q` onto the triangle `abc`.
fn barycentric(q: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> Option<[f64; 3]> {
    let (ab, ac, aq) = (b - a, c - a, q - a);
    let (d00, d01, d11) = (ab.dot(&ab), ab.dot(&ac), ac.dot(&ac));
    let (d20, d21) = (aq.dot(&ab), aq.dot(&ac));
    let denominator = d00 * d11 - d01 * d01;
    if denominator <= f64::EPSILON {
        return None;
    }
    let v = (d11 * d20 - d01 * d21) / denominator;
    let w = (d00 * d21 - d01 * d20) / denominator;
    Some([1.0 - v - w, v, w])
}

impl FeatureMap {
    /// Picks the closest map points around `query` that span more than one elevation bin, so the
    /// primitive does not lie along a single scan ring.
    ///
    /// `viewpoint` is the sensor position, used when elevations are measured from the sensor.
    pub fn find_correspondence(
        &self,
        query: &Point3<f64>,
        viewpoint: &Point3<f64>,
        config: &CorrespondenceConfig,
    ) -> Option<Primitive> {
        let index = self.index.as_ref()?;
        let origin = match config.elevation_origin {
            ElevationOrigin::Map => Point3::origin(),
            ElevationOrigin::Sensor => *viewpoint,
        };
        let required = self.residual.required_points();
        let radius_squared = config.max_correspondence_dist * config.max_correspondence_dist;
        let mut candidates = index.within::<SquaredEuclidean>(&as_query(query), radius_squared);
        if candidates.len() < required {
            return None;
        }
        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let mut picked = Vec::with_capacity(required);
        let mut reference = None;
        let mut spread = false;
        for candidate in candidates {
            let index = candidate.item as usize;
            let angle = elevation(&self.points[index].position, &origin);
            let reference_angle = *reference.get_or_insert(angle);
            let bin = ((angle - reference_angle) / config.azimuth_tol).round() as i64;
            if bin != 0 {
                spread = true;
            }
            // the last slot is reserved for a point off the reference bin
            if picked.len() + 1 != required || spread {
                picked.push(index);
            }
            if picked.len() == required {
                break;
            }
        }
        match *picked.as_slice() {
            [a, b] if required == 2 => Some(Primitive::Line([a, b])),
            [a, b, c] if required == 3 => Some(Primitive::Plane([a, b, c])),
            _ => None,
        }
    }

    /// Whether `query` falls outside the matched primitive by more than the allowed margin.
    pub fn extrapolates(
        &self,
        query: &Point3<f64>,
        primitive: &Primitive,
        config: &CorrespondenceConfig,
    ) -> bool {
        let margin = config.max_extrapolation;
        let at = |i: usize| self.points[i].position.coords;
        match *primitive {
            Primitive::Line([a, b]) => {
                let (a, b) = (at(a), at(b));
                let direction = b - a;
                let length_squared = direction.norm_squared();
                if length_squared <= f64::EPSILON {
                    return true;
                }
                let eta = (query.coords - a).dot(&direction) / length_squared;
                eta < -margin || eta > 1.0 + margin
            }
            Primitive::Plane([a, b, c]) => {
                if !config.plane_extrapolation_guard {
                    return false;
                }
                barycentric(&query.coords, &at(a), &at(b), &at(c)).is_none_or(|weights| {
                    weights
                        .iter()
                        .any(|&weight| weight < -margin || weight > 1.0 + margin)
                })
            }
        }
    }
}
