//! Best-effort text dumps. A failed write is logged and disables that dump.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
};

use itertools::Itertools;
use nalgebra::Point3;

use super::OutputConfig;
use crate::lie::Pose;

pub(super) struct Dump {
    trajectory: Option<BufWriter<File>>,
    correspondence_dir: Option<PathBuf>,
    window: usize,
}

impl Dump {
    pub fn new(config: &OutputConfig) -> Self {
        let trajectory = config.trajectory_file.as_ref().and_then(|path| {
            File::create(path)
                .inspect_err(|err| {
                    log::warn!("cannot create trajectory file {}: {err}", path.display())
                })
                .ok()
                .map(BufWriter::new)
        });
        let correspondence_dir = config.correspondence_dir.clone().filter(|dir| {
            fs::create_dir_all(dir)
                .inspect_err(|err| {
                    log::warn!("cannot create correspondence directory {}: {err}", dir.display())
                })
                .is_ok()
        });
        Self {
            trajectory,
            correspondence_dir,
            window: 0,
        }
    }

    #[inline]
    pub fn wants_correspondences(&self) -> bool {
        self.correspondence_dir.is_some()
    }

    /// Appends the pose as a row-major 3x4 matrix.
    pub fn pose(&mut self, pose: &Pose) {
        let Some(writer) = &mut self.trajectory else {
            return;
        };
        let matrix = pose.to_homogeneous();
        let line = (0..3)
            .cartesian_product(0..4)
            .map(|(row, col)| matrix[(row, col)])
            .join(" ");
        if let Err(err) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            log::warn!("trajectory dump disabled: {err}");
            self.trajectory = None;
        }
    }

    /// One file per feature type, one line per match: the feature and then the map points, all
    /// in the map frame.
    pub fn correspondences(&mut self, per_type: &[Vec<Vec<Point3<f64>>>]) {
        let Some(dir) = &self.correspondence_dir else {
            return;
        };
        let window = self.window;
        self.window += 1;
        for (feature_type, rows) in per_type.iter().enumerate() {
            let path = dir.join(format!("window_{window:06}_type_{feature_type}.txt"));
            let text = rows
                .iter()
                .map(|row| row.iter().flat_map(|p| p.coords.iter()).join(" "))
                .join("\n");
            if let Err(err) = fs::write(&path, text) {
                log::warn!("correspondence dump disabled, {}: {err}", path.display());
                self.correspondence_dir = None;
                return;
            }
        }
    }
}
