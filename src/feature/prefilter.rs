use crate::{
    error::{Error, Result},
    signal::{Ring, SignalKind},
};

/// Points suppressed past the edge point on the far side of an occlusion.
const OCCLUSION_RUN: usize = 5;

/// Marks returns whose neighbourhood makes them unreliable features.
#[derive(Debug, Clone)]
pub struct Prefilter {
    /// Range jump between neighbours that counts as an occlusion edge, in meters.
    pub occlusion_range_tol: f64,
    /// Largest angular gap, as a fraction of a revolution, for neighbours to count as adjacent.
    pub occlusion_angle_tol: f64,
    /// Grazing threshold on the squared neighbour distance relative to the squared range.
    pub parallel_tol: f64,
    pub max_ticks: u64,
}

impl Prefilter {
    /// Per-point validity of `ring`. Fails when ticks go backwards.
    pub fn validity(&self, ring_index: usize, ring: &Ring) -> Result<Vec<bool>> {
        let points = ring.points();
        let range = ring.signal(SignalKind::Range);
        let n = points.len();
        let mut valid = vec![true; n];

        for (index, pair) in points.windows(2).enumerate() {
            if pair[1].tick < pair[0].tick {
                return Err(Error::OrderingViolation {
                    ring: ring_index,
                    index: index + 1,
                    previous: pair[0].tick,
                    tick: pair[1].tick,
                });
            }
        }

        for j in 1..n.saturating_sub(1) {
            let angular_gap = (points[j + 1].tick - points[j].tick) as f64 / self.max_ticks as f64;
            if (range[j] - range[j + 1]).abs() > self.occlusion_range_tol
                && angular_gap < self.occlusion_angle_tol
            {
                // the farther side is the occluded background; it keeps its edge point too
                let run = if range[j] > range[j + 1] {
                    j.saturating_sub(OCCLUSION_RUN)..=j
                } else {
                    j + 1..=(j + OCCLUSION_RUN).min(n - 1)
                };
                valid[run].fill(false);
            }
        }

        for j in 1..n.saturating_sub(1) {
            let threshold = self.parallel_tol * range[j] * range[j];
            let position = &points[j].position;
            let to_next = (points[j + 1].position.coords - position.coords).norm_squared();
            let to_previous = (points[j - 1].position.coords - position.coords).norm_squared();
            if to_next > threshold && to_previous > threshold {
                valid[j] = false;
            }
        }

        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Point3;

    use super::*;
    use crate::{
        frame::Framed,
        signal::{ScanPoint, SignalExtractor},
    };

    fn prefilter() -> Prefilter {
        Prefilter {
            occlusion_range_tol: 0.3,
            occlusion_angle_tol: 0.01,
            parallel_tol: 0.002,
            max_ticks: 1000,
        }
    }

    /// Points on a circle of the given ranges, one degree apart.
    fn ring(ranges: &[f64]) -> Ring {
        let extractor = SignalExtractor::new(0.0, 255.0);
        let mut ring = Ring::default();
        for (i, &range) in ranges.iter().enumerate() {
            let angle = (i as f64).to_radians();
            extractor.push(
                &mut ring,
                ScanPoint {
                    position: Framed::new(Point3::new(
                        range * angle.cos(),
                        range * angle.sin(),
                        0.0,
                    )),
                    intensity: 0.0,
                    tick: i as u64 * 3,
                },
            );
        }
        ring
    }

    #[test]
    fn test_smooth_ring_is_valid() {
        let valid = prefilter().validity(0, &ring(&[5.0; 20])).unwrap();
        assert!(valid.iter().all(|&v| v));
    }

    #[test]
    fn test_occlusion_suppresses_far_side() {
        // background at 8m, foreground wall at 3m from index 10 on
        let mut ranges = vec![8.0; 10];
        ranges.extend([3.0; 10]);
        let valid = prefilter().validity(0, &ring(&ranges)).unwrap();
        for j in 0..20 {
            assert_eq!(valid[j], !(4..=9).contains(&j), "index {j}");
        }

        let mut ranges = vec![3.0; 10];
        ranges.extend([8.0; 10]);
        let valid = prefilter().validity(0, &ring(&ranges)).unwrap();
        for j in 0..20 {
            assert_eq!(valid[j], !(10..=14).contains(&j), "index {j}");
        }
    }

    #[test]
    fn test_occlusion_run_clipped_at_ring_start() {
        // the edge at j = 2 reaches past the first point
        let mut ranges = vec![8.0; 3];
        ranges.extend([3.0; 10]);
        let valid = prefilter().validity(0, &ring(&ranges)).unwrap();
        assert_eq!(&valid[..4], &[false, false, false, true]);
        assert!(valid[3..].iter().all(|&v| v));
    }

    #[test]
    fn test_wide_angular_gap_is_not_occlusion() {
        let mut ranges = vec![8.0; 10];
        ranges.extend([3.0; 10]);
        let filter = Prefilter {
            occlusion_angle_tol: 0.001,
            ..prefilter()
        };
        let valid = filter.validity(0, &ring(&ranges)).unwrap();
        // the jump itself is not grazing either
        assert_eq!(valid.iter().filter(|&&v| !v).count(), 0);
    }

    #[test]
    fn test_grazing_point_invalid() {
        let ranges = [5.0, 5.0, 5.0, 6.0, 5.0, 5.0, 5.0];
        let filter = Prefilter {
            occlusion_range_tol: 10.0,
            ..prefilter()
        };
        let valid = filter.validity(0, &ring(&ranges)).unwrap();
        assert_eq!(valid, vec![true, true, true, false, true, true, true]);
    }

    #[test]
    fn test_ordering_violation() {
        let mut ring = ring(&[5.0; 5]);
        let extractor = SignalExtractor::new(0.0, 255.0);
        extractor.push(
            &mut ring,
            ScanPoint {
                position: Framed::new(Point3::new(5.0, 0.0, 0.0)),
                intensity: 0.0,
                tick: 1,
            },
        );
        let err = prefilter().validity(2, &ring).unwrap_err();
        assert!(matches!(
            err,
            Error::OrderingViolation {
                ring: 2,
                index: 5,
                previous: 12,
                tick: 1
            }
        ));
    }
}
