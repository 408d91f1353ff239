use super::{Kernel, Ring};

/// Valid-mode correlation, `out[i] = sum_k signal[i + k] * kernel[k]`.
///
/// Score `i` belongs to the sample `i + kernel.len() / 2`.
pub fn correlate(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    signal
        .windows(kernel.len())
        .map(|window| window.iter().zip(kernel).map(|(s, k)| s * k).sum())
        .collect()
}

/// Sliding unbiased sample variance over `width` samples.
pub fn sliding_variance(signal: &[f64], width: usize) -> Vec<f64> {
    let ones = vec![1.0; width];
    let squared = signal.iter().map(|x| x * x).collect::<Vec<_>>();
    let sum = correlate(signal, &ones);
    let square_sum = correlate(&squared, &ones);

    let n = width as f64;
    let scale = 1.0 / (n - 1.0);
    square_sum
        .into_iter()
        .zip(sum)
        .map(|(square_sum, sum)| (square_sum - sum * sum / n) * scale)
        .collect()
}

/// Scores of one ring for every kernel that fits.
#[derive(Debug, Default, Clone)]
pub struct RingScores {
    scores: [Option<Vec<f64>>; Kernel::COUNT],
    half_widths: [usize; Kernel::COUNT],
}

impl RingScores {
    #[inline]
    pub fn get(&self, kernel: Kernel) -> Option<&[f64]> {
        self.scores[kernel.index()].as_deref()
    }

    /// The score of `kernel` at the ring's point `index`, if that point is scored at all.
    pub fn at_point(&self, kernel: Kernel, index: usize) -> Option<f64> {
        let scores = self.get(kernel)?;
        let offset = index.checked_sub(self.half_widths[kernel.index()])?;
        scores.get(offset).copied()
    }
}

#[derive(Debug, Clone)]
pub struct ScoreComputer {
    variance_window: usize,
}

impl ScoreComputer {
    pub fn new(variance_window: usize) -> Self {
        Self { variance_window }
    }

    #[inline]
    pub fn half_width(&self, kernel: Kernel) -> usize {
        kernel.half_width(self.variance_window)
    }

    pub fn compute(&self, ring: &Ring) -> RingScores {
        let mut scores = RingScores::default();
        for kernel in Kernel::ALL {
            let width = kernel.width(self.variance_window);
            scores.half_widths[kernel.index()] = width / 2;

            let signal = ring.signal(kernel.signal());
            if signal.len() <= width {
                continue;
            }
            let values = match kernel.taps() {
                Some(taps) => correlate(signal, taps),
                None => sliding_variance(signal, width),
            };
            scores.scores[kernel.index()] = Some(values);
        }
        scores
    }
}
