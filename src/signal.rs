//! Per-ring point buffers and the scalar signals derived from them.

pub mod kernel;
pub mod score;

pub use kernel::Kernel;
pub use score::{RingScores, ScoreComputer};

use crate::frame::LidarPoint;

/// A buffered return. The tick already carries the offset of its scan within the window.
#[derive(Debug, Clone, Copy)]
pub struct ScanPoint {
    pub position: LidarPoint<f64>,
    pub intensity: f64,
    pub tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Range,
    Intensity,
}

/// The points of one ring in arrival order with their signals, index-aligned.
#[derive(Debug, Default, Clone)]
pub struct Ring {
    points: Vec<ScanPoint>,
    range: Vec<f64>,
    intensity: Vec<f64>,
}

impl Ring {
    #[inline]
    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    #[inline]
    pub fn signal(&self, kind: SignalKind) -> &[f64] {
        match kind {
            SignalKind::Range => &self.range,
            SignalKind::Intensity => &self.intensity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.range.clear();
        self.intensity.clear();
    }
}

/// Appends points to their ring, deriving range and clamped intensity.
#[derive(Debug, Clone)]
pub struct SignalExtractor {
    min_intensity: f64,
    max_intensity: f64,
}

impl SignalExtractor {
    pub fn new(min_intensity: f64, max_intensity: f64) -> Self {
        Self {
            min_intensity,
            max_intensity,
        }
    }

    pub fn push(&self, ring: &mut Ring, point: ScanPoint) {
        let intensity = point.intensity.clamp(self.min_intensity, self.max_intensity);
        ring.range.push(point.position.coords.norm());
        ring.intensity.push(intensity);
        ring.points.push(ScanPoint { intensity, ..point });
    }
}
