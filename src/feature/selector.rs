use itertools::Itertools;

use super::definition::FeatureDefinition;
use crate::signal::{Ring, RingScores};

/// Picks the best scored points of a ring, spread over angular bins.
#[derive(Debug, Clone)]
pub struct FeatureSelector {
    /// Neighbours suppressed on each side of an accepted point.
    pub key_radius: usize,
    pub angular_bins: usize,
    /// Ticks spanned by a whole window.
    pub window_ticks: u64,
}

impl FeatureSelector {
    #[inline]
    fn bin_of(&self, tick: u64) -> usize {
        let fraction = tick as f64 / self.window_ticks as f64;
        ((fraction * self.angular_bins as f64) as usize).min(self.angular_bins - 1)
    }

    /// Indices into `ring` of the selected points, best first.
    pub fn select(
        &self,
        definition: &FeatureDefinition,
        ring: &Ring,
        scores: &RingScores,
        valid: &[bool],
    ) -> Vec<usize> {
        let Some(primary) = definition.primary() else {
            return Vec::new();
        };
        let capacity = definition.quota / self.angular_bins;
        if capacity == 0 {
            return Vec::new();
        }

        let candidates = (0..ring.len())
            .filter(|&index| valid[index] && definition.accepts(scores, index))
            .filter_map(|index| Some((index, scores.at_point(primary.kernel, index)?)));
        let candidates = if primary.policy.sorts_descending() {
            candidates
                .sorted_by(|(_, a), (_, b)| b.total_cmp(a))
                .collect_vec()
        } else {
            candidates
                .sorted_by(|(_, a), (_, b)| a.total_cmp(b))
                .collect_vec()
        };

        // suppression is local to this feature type
        let mut available = valid.to_vec();
        let mut bin_counts = vec![0; self.angular_bins];
        let mut selected = Vec::new();
        let points = ring.points();
        for (index, _) in candidates {
            let bin = self.bin_of(points[index].tick);
            if bin_counts[bin] >= capacity || !available[index] {
                continue;
            }
            bin_counts[bin] += 1;
            selected.push(index);

            let start = index.saturating_sub(self.key_radius);
            let end = (index + self.key_radius).min(available.len() - 1);
            available[start..=end].fill(false);

            if selected.len() == capacity * self.angular_bins {
                break;
            }
        }
        selected
    }
}
