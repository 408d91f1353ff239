//! TTL-aged, density-filtered store of feature points in the map frame, one per feature type.

pub mod correspondence;

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use nalgebra::Point3;
use serde::Deserialize;

pub use correspondence::{CorrespondenceConfig, ElevationOrigin, Primitive};

use crate::{feature::ResidualType, frame::MapFramePoint};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalMapConfig {
    /// Windows a point survives without being matched.
    pub ttl: i32,
    /// Points farther than this from the sensor are dropped, in meters.
    pub local_map_range: f64,
    /// Squared distance below which a new line feature duplicates a map point.
    pub edge_map_density: f64,
    /// Squared distance below which a new plane feature duplicates a map point.
    pub flat_map_density: f64,
    /// Apply the unconditional second TTL decrement on every aging pass.
    pub double_decrement: bool,
    /// Map points needed, over all types, before windows are registered against the map.
    pub min_init_features: usize,
}

impl Default for LocalMapConfig {
    fn default() -> Self {
        Self {
            ttl: 5,
            local_map_range: 100.0,
            edge_map_density: 0.01,
            flat_map_density: 0.04,
            double_decrement: true,
            min_init_features: 72,
        }
    }
}

impl LocalMapConfig {
    #[inline]
    pub fn density(&self, residual: ResidualType) -> f64 {
        match residual {
            ResidualType::Line => self.edge_map_density,
            ResidualType::Plane => self.flat_map_density,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Association {
    Uncorresponded,
    Corresponded,
}

#[derive(Debug, Clone, Copy)]
pub struct MapPoint {
    pub position: MapFramePoint<f64>,
    pub ttl: i32,
    pub association: Association,
}

#[inline]
fn as_query(point: &Point3<f64>) -> [f64; 3] {
    [point.x, point.y, point.z]
}

/// The map points of one feature type and their spatial index.
///
/// The index is rebuilt after every mutation batch, so queries always see the current points.
/// It is `None` while the map is empty.
pub struct FeatureMap {
    residual: ResidualType,
    points: Vec<MapPoint>,
    index: Option<ImmutableKdTree<f64, 3>>,
}

impl FeatureMap {
    pub fn new(residual: ResidualType) -> Self {
        Self {
            residual,
            points: Vec::new(),
            index: None,
        }
    }

    #[inline]
    pub fn residual(&self) -> ResidualType {
        self.residual
    }

    #[inline]
    pub fn points(&self) -> &[MapPoint] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn rebuild_index(&mut self) {
        // items are positions in `points`; many points may share an axis value on flat surfaces
        self.index = (!self.points.is_empty()).then(|| {
            let positions = self
                .points
                .iter()
                .map(|point| as_query(&point.position))
                .collect::<Vec<_>>();
            ImmutableKdTree::new_from_slice(&positions)
        });
    }

    /// Ages every point and drops the expired or out of range ones. Returns how many went.
    pub fn evict(&mut self, origin: &Point3<f64>, config: &LocalMapConfig) -> usize {
        let range_squared = config.local_map_range * config.local_map_range;
        let before = self.points.len();
        let mut i = 0;
        while i < self.points.len() {
            let point = &mut self.points[i];
            let in_range = (point.position.coords - origin.coords).norm_squared() < range_squared;
            if in_range {
                match point.association {
                    Association::Corresponded => {
                        point.association = Association::Uncorresponded;
                        point.ttl = config.ttl;
                    }
                    Association::Uncorresponded => point.ttl -= 1,
                }
                if config.double_decrement {
                    point.ttl -= 1;
                }
            }
            if !in_range || point.ttl <= 0 {
                // the swapped-in point is examined next
                self.points.swap_remove(i);
            } else {
                i += 1;
            }
        }
        self.rebuild_index();
        before - self.points.len()
    }

    /// Squared distance to the closest map point.
    pub fn nearest_squared(&self, point: &Point3<f64>) -> Option<f64> {
        self.index.as_ref().map(|index| {
            index
                .nearest_one::<SquaredEuclidean>(&as_query(point))
                .distance
        })
    }

    /// Adds every candidate that is farther than `density` (squared) from the existing points.
    ///
    /// Candidates are tested against the map as it was before this batch.
    pub fn insert(
        &mut self,
        candidates: impl IntoIterator<Item = MapFramePoint<f64>>,
        density: f64,
        ttl: i32,
    ) -> usize {
        let accepted = candidates
            .into_iter()
            .filter(|candidate| {
                self.nearest_squared(candidate)
                    .is_none_or(|distance| distance > density)
            })
            .collect::<Vec<_>>();
        let inserted = accepted.len();
        self.points
            .extend(accepted.into_iter().map(|position| MapPoint {
                position,
                ttl,
                association: Association::Uncorresponded,
            }));
        self.rebuild_index();
        inserted
    }

    pub fn mark_corresponded(&mut self, primitive: &Primitive) {
        for &index in primitive.indices() {
            self.points[index].association = Association::Corresponded;
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Maintenance {
    pub evicted: usize,
    pub inserted: usize,
}

pub struct LocalMap {
    config: LocalMapConfig,
    maps: Vec<FeatureMap>,
}

impl LocalMap {
    pub fn new(config: LocalMapConfig, residuals: impl IntoIterator<Item = ResidualType>) -> Self {
        Self {
            config,
            maps: residuals.into_iter().map(FeatureMap::new).collect(),
        }
    }

    #[inline]
    pub fn config(&self) -> &LocalMapConfig {
        &self.config
    }

    #[inline]
    pub fn maps(&self) -> &[FeatureMap] {
        &self.maps
    }

    #[inline]
    pub fn map(&self, feature_type: usize) -> &FeatureMap {
        &self.maps[feature_type]
    }

    #[inline]
    pub fn map_mut(&mut self, feature_type: usize) -> &mut FeatureMap {
        &mut self.maps[feature_type]
    }

    pub fn total_points(&self) -> usize {
        self.maps.iter().map(FeatureMap::len).sum()
    }

    /// Ages every map around `origin`, then adds the window's features, given per type in map
    /// order and already in the map frame.
    pub fn maintain<I>(&mut self, origin: &Point3<f64>, features: I) -> Maintenance
    where
        I: IntoIterator<Item = Vec<MapFramePoint<f64>>>,
    {
        let mut maintenance = Maintenance::default();
        for (map, candidates) in self.maps.iter_mut().zip(features) {
            maintenance.evicted += map.evict(origin, &self.config);
            let density = self.config.density(map.residual());
            maintenance.inserted += map.insert(candidates, density, self.config.ttl);
        }
        maintenance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Framed;

    fn point(x: f64, y: f64, z: f64) -> MapFramePoint<f64> {
        Framed::new(Point3::new(x, y, z))
    }

    fn config() -> LocalMapConfig {
        LocalMapConfig {
            ttl: 5,
            local_map_range: 10.0,
            double_decrement: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_density_filter() {
        let mut map = FeatureMap::new(ResidualType::Plane);
        assert_eq!(map.insert([point(0.0, 0.0, 0.0)], 0.04, 5), 1);
        // 0.1m away is a duplicate, 0.3m is not
        let inserted = map.insert([point(0.1, 0.0, 0.0), point(0.0, 0.3, 0.0)], 0.04, 5);
        assert_eq!(inserted, 1);
        assert_eq!(map.len(), 2);
        assert!(
            map.points()
                .iter()
                .all(|p| p.association == Association::Uncorresponded && p.ttl == 5)
        );
    }

    #[test]
    fn test_ttl_decreases_until_eviction() {
        let origin = Point3::origin();
        let config = config();
        let mut map = FeatureMap::new(ResidualType::Line);
        map.insert([point(1.0, 0.0, 0.0)], 0.01, config.ttl);

        let mut previous = config.ttl;
        for _ in 0..config.ttl - 1 {
            assert_eq!(map.evict(&origin, &config), 0);
            let ttl = map.points()[0].ttl;
            assert!(ttl < previous && ttl > 0);
            previous = ttl;
        }
        assert_eq!(map.evict(&origin, &config), 1);
        assert!(map.is_empty());
        assert_eq!(map.nearest_squared(&origin), None);
    }

    #[test]
    fn test_correspondence_refreshes_ttl() {
        let origin = Point3::origin();
        let config = config();
        let mut map = FeatureMap::new(ResidualType::Line);
        map.insert([point(1.0, 0.0, 0.0), point(2.0, 0.0, 0.0)], 0.01, config.ttl);
        map.evict(&origin, &config);
        map.evict(&origin, &config);
        map.mark_corresponded(&Primitive::Line([0, 1]));
        map.evict(&origin, &config);
        assert!(map.points().iter().all(|p| p.ttl == config.ttl));
        assert!(
            map.points()
                .iter()
                .all(|p| p.association == Association::Uncorresponded)
        );
    }

    #[test]
    fn test_double_decrement() {
        let origin = Point3::origin();
        let config = LocalMapConfig {
            double_decrement: true,
            ..config()
        };
        let mut map = FeatureMap::new(ResidualType::Line);
        map.insert([point(1.0, 0.0, 0.0), point(2.0, 0.0, 0.0)], 0.01, config.ttl);
        map.mark_corresponded(&Primitive::Line([0, 0]));
        map.evict(&origin, &config);
        let ttls = map.points().iter().map(|p| p.ttl).collect::<Vec<_>>();
        assert!(ttls.contains(&(config.ttl - 1)));
        assert!(ttls.contains(&(config.ttl - 2)));
    }

    #[test]
    fn test_out_of_range_evicted_and_index_consistent() {
        let config = config();
        let mut map = FeatureMap::new(ResidualType::Plane);
        let points = [
            point(1.0, 0.0, 0.0),
            point(20.0, 0.0, 0.0),
            point(0.0, 2.0, 0.0),
            point(0.0, 30.0, 0.0),
            point(0.0, 0.0, 3.0),
        ];
        map.insert(points, 0.04, config.ttl);
        assert_eq!(map.evict(&Point3::origin(), &config), 2);
        assert_eq!(map.len(), 3);
        let index = map.index.as_ref().expect("map is not empty");
        for (i, map_point) in map.points().iter().enumerate() {
            let nearest = index.nearest_one::<SquaredEuclidean>(&as_query(&map_point.position));
            assert_eq!(nearest.item, i as u64);
            assert_eq!(nearest.distance, 0.0);
        }
    }

    #[test]
    fn test_coplanar_points_sharing_an_axis_value() {
        let config = config();
        let mut map = FeatureMap::new(ResidualType::Plane);
        // a wall at x = 2, sampled on a regular grid
        let wall = (0..12)
            .flat_map(|i| (0..12).map(move |j| point(2.0, i as f64 * 0.25, j as f64 * 0.25)));
        assert_eq!(map.insert(wall, 0.01, config.ttl), 144);
        assert_eq!(map.nearest_squared(&Point3::new(2.0, 0.25, 0.5)), Some(0.0));
        assert_eq!(map.evict(&Point3::new(2.0, 0.0, 0.0), &config), 0);
        assert_eq!(map.insert([point(2.0, 0.1, 0.1)], 0.01, config.ttl), 1);
        assert_eq!(map.len(), 145);
    }

    #[test]
    fn test_range_boundary_is_exclusive() {
        let config = config();
        let mut map = FeatureMap::new(ResidualType::Line);
        map.insert([point(10.0, 0.0, 0.0), point(9.5, 0.0, 0.0)], 0.01, config.ttl);
        assert_eq!(map.evict(&Point3::origin(), &config), 1);
        assert_eq!(map.points()[0].position.x, 9.5);
    }

    #[test]
    fn test_maintain_per_type() {
        let mut local_map = LocalMap::new(config(), [ResidualType::Line, ResidualType::Plane]);
        let maintenance = local_map.maintain(
            &Point3::origin(),
            [
                vec![point(1.0, 0.0, 0.0)],
                vec![point(0.0, 1.0, 0.0), point(0.0, 2.0, 0.0)],
            ],
        );
        assert_eq!(
            maintenance,
            Maintenance {
                evicted: 0,
                inserted: 3
            }
        );
        assert_eq!(local_map.map(0).len(), 1);
        assert_eq!(local_map.map(1).len(), 2);
        assert_eq!(local_map.total_points(), 3);
    }
}
