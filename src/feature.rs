//! Feature extraction: scoring, prefiltering and per-type selection.

pub mod definition;
pub mod prefilter;
pub mod selector;

use serde::Deserialize;

pub use definition::{Criterion, FeatureDefinition, ResidualType, SelectionPolicy};
use prefilter::Prefilter;
use selector::FeatureSelector;

use crate::{
    error::Result,
    frame::LidarPoint,
    signal::{Kernel, Ring, ScoreComputer},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Width of the sliding variance kernels, odd.
    pub variance_window: usize,
    pub occlusion_range_tol: f64,
    pub occlusion_angle_tol: f64,
    pub parallel_tol: f64,
    pub key_radius: usize,
    pub angular_bins: usize,

    pub edge_tol: f64,
    pub flat_tol: f64,
    pub int_edge_tol: f64,
    pub int_flat_tol: f64,
    pub variance_limit_rng: f64,
    pub n_edge: usize,
    pub n_flat: usize,
    pub n_int_edge: usize,

    /// Replaces the built-in feature types when given.
    pub definitions: Option<Vec<FeatureDefinition>>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            variance_window: 11,
            occlusion_range_tol: 0.3,
            occlusion_angle_tol: 0.002,
            parallel_tol: 0.002,
            key_radius: 5,
            angular_bins: 12,
            edge_tol: 1.0,
            flat_tol: 0.1,
            int_edge_tol: 40.0,
            int_flat_tol: 0.1,
            variance_limit_rng: 0.05,
            n_edge: 24,
            n_flat: 48,
            n_int_edge: 12,
            definitions: None,
        }
    }
}

impl FeatureConfig {
    pub fn definitions(&self) -> Vec<FeatureDefinition> {
        if let Some(definitions) = &self.definitions {
            return definitions.clone();
        }
        use Kernel::*;
        use SelectionPolicy::*;

        let intensity_edge = |name: &str, policy| FeatureDefinition {
            name: name.into(),
            criteria: vec![
                Criterion::new(Fog, policy, self.int_edge_tol),
                Criterion::new(Loam, NearZero, self.int_flat_tol),
                Criterion::new(RangeVariance, NearZero, self.variance_limit_rng),
            ],
            residual: ResidualType::Line,
            quota: self.n_int_edge,
        };
        vec![
            FeatureDefinition {
                name: "edge_high".into(),
                criteria: vec![Criterion::new(Loam, HighPos, self.edge_tol)],
                residual: ResidualType::Line,
                quota: self.n_edge,
            },
            FeatureDefinition {
                name: "edge_low".into(),
                criteria: vec![Criterion::new(Loam, HighNeg, self.edge_tol)],
                residual: ResidualType::Line,
                quota: self.n_edge,
            },
            FeatureDefinition {
                name: "flat".into(),
                criteria: vec![Criterion::new(Loam, NearZero, self.flat_tol)],
                residual: ResidualType::Plane,
                quota: self.n_flat,
            },
            intensity_edge("intensity_edge_high", HighPos),
            intensity_edge("intensity_edge_low", HighNeg),
        ]
    }
}

/// A selected return, still in the sensor frame at its own capture time.
#[derive(Debug, Clone, Copy)]
pub struct FeaturePoint {
    pub position: LidarPoint<f64>,
    pub tick: u64,
}

/// The features of one window, indexed `[feature type][ring]`.
#[derive(Debug, Default, Clone)]
pub struct Features {
    per_type: Vec<Vec<Vec<FeaturePoint>>>,
}

impl Features {
    /// Features indexed `[feature type][ring]`.
    pub fn new(per_type: Vec<Vec<Vec<FeaturePoint>>>) -> Self {
        Self { per_type }
    }

    #[inline]
    pub fn type_count(&self) -> usize {
        self.per_type.len()
    }

    #[inline]
    pub fn rings(&self, feature_type: usize) -> &[Vec<FeaturePoint>] {
        &self.per_type[feature_type]
    }

    /// `(ring, index in ring, point)` of one feature type.
    pub fn iter_type(
        &self,
        feature_type: usize,
    ) -> impl Iterator<Item = (usize, usize, &FeaturePoint)> {
        self.per_type[feature_type]
            .iter()
            .enumerate()
            .flat_map(|(ring, points)| {
                points
                    .iter()
                    .enumerate()
                    .map(move |(index, point)| (ring, index, point))
            })
    }

    pub fn count(&self, feature_type: usize) -> usize {
        self.per_type[feature_type].iter().map(Vec::len).sum()
    }

    pub fn total(&self) -> usize {
        (0..self.type_count()).map(|t| self.count(t)).sum()
    }
}

/// Scores, prefilters and selects the features of every ring.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    scores: ScoreComputer,
    prefilter: Prefilter,
    selector: FeatureSelector,
    definitions: Vec<FeatureDefinition>,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig, max_ticks: u64, n_window: usize) -> Self {
        Self {
            scores: ScoreComputer::new(config.variance_window),
            prefilter: Prefilter {
                occlusion_range_tol: config.occlusion_range_tol,
                occlusion_angle_tol: config.occlusion_angle_tol,
                parallel_tol: config.parallel_tol,
                max_ticks,
            },
            selector: FeatureSelector {
                key_radius: config.key_radius,
                angular_bins: config.angular_bins,
                window_ticks: max_ticks * n_window as u64,
            },
            definitions: config.definitions(),
        }
    }

    #[inline]
    pub fn definitions(&self) -> &[FeatureDefinition] {
        &self.definitions
    }

    pub fn extract(&self, rings: &[Ring]) -> Result<Features> {
        let mut per_type = vec![vec![Vec::new(); rings.len()]; self.definitions.len()];
        for (ring_index, ring) in rings.iter().enumerate() {
            let valid = self.prefilter.validity(ring_index, ring)?;
            let scores = self.scores.compute(ring);
            for (definition, features) in self.definitions.iter().zip(per_type.iter_mut()) {
                features[ring_index] = self
                    .selector
                    .select(definition, ring, &scores, &valid)
                    .into_iter()
                    .map(|index| {
                        let point = &ring.points()[index];
                        FeaturePoint {
                            position: point.position,
                            tick: point.tick,
                        }
                    })
                    .collect();
            }
        }
        Ok(Features { per_type })
    }
}
