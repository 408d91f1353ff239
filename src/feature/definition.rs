use serde::Deserialize;

use crate::signal::{Kernel, RingScores};

/// How a score is compared against a criterion threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// `|s| < t`
    NearZero,
    /// `s > t`
    HighPos,
    /// `s < -t`
    HighNeg,
}

impl SelectionPolicy {
    #[inline]
    pub fn accepts(self, score: f64, threshold: f64) -> bool {
        match self {
            SelectionPolicy::NearZero => score.abs() < threshold,
            SelectionPolicy::HighPos => score > threshold,
            SelectionPolicy::HighNeg => score < -threshold,
        }
    }

    /// Candidates are visited best first.
    #[inline]
    pub fn sorts_descending(self) -> bool {
        matches!(self, SelectionPolicy::HighPos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Criterion {
    pub kernel: Kernel,
    pub policy: SelectionPolicy,
    pub threshold: f64,
}

impl Criterion {
    pub const fn new(kernel: Kernel, policy: SelectionPolicy, threshold: f64) -> Self {
        Self {
            kernel,
            policy,
            threshold,
        }
    }

    /// Unscored points never pass.
    #[inline]
    pub fn accepts(&self, scores: &RingScores, index: usize) -> bool {
        scores
            .at_point(self.kernel, index)
            .is_some_and(|score| self.policy.accepts(score, self.threshold))
    }
}

/// The geometric primitive a feature is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualType {
    Line,
    Plane,
}

impl ResidualType {
    /// Number of map points spanning the primitive.
    #[inline]
    pub const fn required_points(self) -> usize {
        match self {
            ResidualType::Line => 2,
            ResidualType::Plane => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureDefinition {
    pub name: String,
    /// AND-combined, the first one orders the candidates.
    pub criteria: Vec<Criterion>,
    pub residual: ResidualType,
    /// Maximum number of features per ring and window.
    pub quota: usize,
}

impl FeatureDefinition {
    #[inline]
    pub fn primary(&self) -> Option<&Criterion> {
        self.criteria.first()
    }

    #[inline]
    pub fn accepts(&self, scores: &RingScores, index: usize) -> bool {
        self.criteria
            .iter()
            .all(|criterion| criterion.accepts(scores, index))
    }
}
