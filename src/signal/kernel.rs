use std::str::FromStr;

use serde::Deserialize;

use super::SignalKind;
use crate::error::Error;

const LOAM: [f64; 11] = [1.0, 1.0, 1.0, 1.0, 1.0, -10.0, 1.0, 1.0, 1.0, 1.0, 1.0];

/// Laplacian of Gaussian
const LOG: [f64; 11] = [
    0.021242, 0.093047, 0.215713, 0.169998, -0.235255, -0.52949, -0.235255, 0.169998, 0.215713,
    0.093047, 0.021242,
];

/// First derivative of Gaussian
const FOG: [f64; 9] = [
    0.001472, 0.036548, 0.29683, 0.66515, 0.0, -0.66515, -0.29683, -0.036548, -0.001472,
];

/// The fixed scoring kernels. Variance kernels take their width from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Kernel {
    /// Curvature of the range signal.
    Loam,
    /// Laplacian of the intensity signal.
    Log,
    /// Gradient of the intensity signal.
    Fog,
    RangeVariance,
    IntensityVariance,
}

impl Kernel {
    pub const COUNT: usize = 5;
    pub const ALL: [Kernel; Self::COUNT] = [
        Kernel::Loam,
        Kernel::Log,
        Kernel::Fog,
        Kernel::RangeVariance,
        Kernel::IntensityVariance,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn signal(self) -> SignalKind {
        match self {
            Kernel::Loam | Kernel::RangeVariance => SignalKind::Range,
            Kernel::Log | Kernel::Fog | Kernel::IntensityVariance => SignalKind::Intensity,
        }
    }

    /// Taps of the fixed kernels, `None` for the sliding variance ones.
    pub fn taps(self) -> Option<&'static [f64]> {
        match self {
            Kernel::Loam => Some(&LOAM),
            Kernel::Log => Some(&LOG),
            Kernel::Fog => Some(&FOG),
            Kernel::RangeVariance | Kernel::IntensityVariance => None,
        }
    }

    pub fn width(self, variance_window: usize) -> usize {
        match self.taps() {
            Some(taps) => taps.len(),
            None => variance_window,
        }
    }

    #[inline]
    pub fn half_width(self, variance_window: usize) -> usize {
        self.width(variance_window) / 2
    }
}

impl FromStr for Kernel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "loam" => Ok(Kernel::Loam),
            "log" => Ok(Kernel::Log),
            "fog" => Ok(Kernel::Fog),
            "range_variance" | "rng_var" => Ok(Kernel::RangeVariance),
            "intensity_variance" | "int_var" => Ok(Kernel::IntensityVariance),
            _ => Err(Error::UnrecognizedKernel(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Kernel {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
