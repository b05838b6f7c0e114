#![allow(dead_code)]

use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::collections::BTreeMap;
use vmap::*;

pub fn init() {
    let _ = pretty_env_logger::try_init();
}

pub fn camera() -> CameraPinholeParams {
    CameraPinholeParams::new(500.0, 500.0, 320.0, 240.0, 640, 480)
}

/// Where a camera at `position` looking down +z sees `point`.
pub fn observe(position: Vector3<f64>, point: Vector3<f64>) -> Point2<f64> {
    let world_to_camera =
        Isometry3::from_parts(Translation3::from(position), UnitQuaternion::identity()).inverse();
    camera()
        .project((world_to_camera * Point3::from(point)).coords)
        .unwrap()
}

/// Landmarks in front of the origin with a distinct random descriptor each.
pub struct Scene {
    pub points: Vec<Vector3<f64>>,
    pub descriptors: Vec<Descriptor>,
}

impl Scene {
    pub fn random(n: usize, seed: u64) -> Self {
        let mut rng = Pcg64::seed_from_u64(seed);
        let points = (0..n)
            .map(|_| {
                Vector3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-0.7..0.7),
                    rng.gen_range(4.0..6.0),
                )
            })
            .collect();
        let descriptors = (0..n).map(|_| Descriptor::new(rng.gen())).collect();
        Self {
            points,
            descriptors,
        }
    }

    /// The features a camera at `position` extracts, feature `i` observing landmark `i`.
    pub fn features(&self, position: Vector3<f64>) -> Vec<Feature> {
        self.points
            .iter()
            .zip(&self.descriptors)
            .map(|(&point, &descriptor)| Feature::new(observe(position, point), descriptor))
            .collect()
    }
}

pub fn add_keyframe(
    map: &VMap,
    camera: CameraId,
    features: Vec<Feature>,
    position: Vector3<f64>,
) -> KeyFrameId {
    map.create_keyframe(
        features,
        position,
        UnitQuaternion::identity(),
        camera,
        DataItemId(0),
        None,
    )
    .unwrap()
}

/// Returns a fixed list of correspondences and places each new landmark at the position
/// registered for the feature of the first keyframe.
#[derive(Default)]
pub struct ScriptedMatcher {
    pub pairs: Vec<FeaturePair>,
    pub positions: BTreeMap<KeyPointId, Vector3<f64>>,
}

impl ScriptedMatcher {
    pub fn identity(n: usize) -> Self {
        Self {
            pairs: (0..n).map(|i| FeaturePair(i, i)).collect(),
            positions: BTreeMap::new(),
        }
    }

    pub fn with_positions(mut self, points: &[Vector3<f64>]) -> Self {
        self.positions = points.iter().copied().enumerate().collect();
        self
    }
}

impl FeatureMatcher for ScriptedMatcher {
    fn match_subset(
        &self,
        _: KeyFrameView<'_>,
        _: KeyFrameView<'_>,
        field_a: &KeyPointField,
        field_b: &KeyPointField,
    ) -> Vec<FeaturePair> {
        self.pairs
            .iter()
            .copied()
            .filter(|&FeaturePair(a, b)| {
                field_a.get(a).copied().unwrap_or(false) && field_b.get(b).copied().unwrap_or(false)
            })
            .collect()
    }

    fn triangulate(
        &self,
        _: KeyFrameView<'_>,
        _: KeyFrameView<'_>,
        pairs: &[FeaturePair],
        forward_a: &mut FramePoints,
        forward_b: &mut FramePoints,
        store: &dyn MapPointStore,
    ) -> Vec<MapPointId> {
        pairs
            .iter()
            .filter_map(|&FeaturePair(a, b)| {
                let mp = store.create_map_point(*self.positions.get(&a)?);
                forward_a.insert(mp, a);
                forward_b.insert(mp, b);
                Some(mp)
            })
            .collect()
    }
}

/// Asserts that the index agrees with itself and with the entity store.
pub fn assert_consistent(map: &VMap) {
    let violations = map.verify_index();
    assert!(violations.is_empty(), "index violations: {:?}", violations);
    for kf in map.all_keyframes() {
        let forward = map.all_map_points_at_keyframe(kf).unwrap();
        assert_eq!(map.frame_points_inv(kf).unwrap(), invert(&forward));
        for &mp in forward.keys() {
            assert!(map.map_point_appearances(mp).unwrap().contains(&kf));
        }
    }
}
