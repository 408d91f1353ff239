use nalgebra::{IsometryMatrix3, Point3};

use super::Framed;

/// The sensor frame at the point's own capture time.
#[derive(Debug, Clone, Copy)]
pub struct Lidar;

/// The fixed odometry frame the local map lives in.
#[derive(Debug, Clone, Copy)]
pub struct Map;

/// The sensor frame at the end of the current window.
#[derive(Debug, Clone, Copy)]
pub struct WindowEnd;

pub type IsometryFramed<T, F> = Framed<IsometryMatrix3<T>, F>;

pub type FramedPoint<T, F> = Framed<Point3<T>, F>;
pub type LidarPoint<T> = FramedPoint<T, Lidar>;
pub type MapFramePoint<T> = FramedPoint<T, Map>;
pub type WindowEndPoint<T> = FramedPoint<T, WindowEnd>;

pub type LidarToMap<T> = IsometryFramed<T, fn(Lidar) -> Map>;
