//! Robust losses on the squared residual norm `s`, used through IRLS.

/// The cost of a block is `rho(|r|^2) / 2` and its IRLS weight is `rho'(|r|^2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Loss {
    /// Plain least squares, `rho(s) = s`.
    Trivial,
    /// Tukey's biweight on the squared norm, with transition `scale`.
    ///
    /// `rho(s) = scale / 3 * (1 - (1 - s / scale)^3)` up to `scale`, constant beyond.
    Bisquare { scale: f64 },
}

impl Loss {
    /// Falls back to [`Loss::Trivial`] for a non-positive scale.
    pub fn bisquare(scale: f64) -> Self {
        if scale > 0.0 {
            Loss::Bisquare { scale }
        } else {
            Loss::Trivial
        }
    }

    pub fn rho(&self, s: f64) -> f64 {
        match *self {
            Loss::Trivial => s,
            Loss::Bisquare { scale } => {
                if s <= scale {
                    let v = 1.0 - s / scale;
                    scale / 3.0 * (1.0 - v * v * v)
                } else {
                    scale / 3.0
                }
            }
        }
    }

    /// `rho'(s)`, in `[0, 1]`.
    pub fn weight(&self, s: f64) -> f64 {
        match *self {
            Loss::Trivial => 1.0,
            Loss::Bisquare { scale } => {
                if s <= scale {
                    let v = 1.0 - s / scale;
                    v * v
                } else {
                    0.0
                }
            }
        }
    }
}
