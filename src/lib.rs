#![deny(clippy::unwrap_used)]
#![deny(clippy::undocumented_unsafe_blocks)]
#![deny(unused_must_use)]
pub mod algorithm;
pub mod error;
pub mod feature;
pub mod frame;
pub mod lie;
pub mod local_map;
pub mod residual;
pub mod sensor;
pub mod signal;
pub mod solver;
pub mod trajectory;
pub mod uncertain;
mod utils;

pub use algorithm::laser_odom::{Config, LaserOdom, RawPoint, Snapshot, WindowOutcome};
pub use error::{Error, Result};
