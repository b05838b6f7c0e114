//! The boundary to the pixel-level feature matching and triangulation routines.
//!
//! The map only owns the bookkeeping around matching. Which features correspond and where
//! new landmarks lie is decided by a [`FeatureMatcher`]. [`BruteForceMatcher`] is a simple
//! implementation working on binary descriptors with known keyframe poses.

use crate::index::{FramePoints, KeyPointField};
use crate::{CameraPinholeParams, Descriptor, KeyFrame, KeyPointId, MapPointId};
use bitarray::Hamming;
use log::*;
use nalgebra::{Matrix4, Point2, RowVector4, Vector3};
use space::{Knn, LinearKnn};

/// A keyframe bound to the camera that took it.
#[derive(Debug, Clone, Copy)]
pub struct KeyFrameView<'a> {
    pub keyframe: &'a KeyFrame,
    pub camera: &'a CameraPinholeParams,
}

impl<'a> KeyFrameView<'a> {
    pub fn new(keyframe: &'a KeyFrame, camera: &'a CameraPinholeParams) -> Self {
        Self { keyframe, camera }
    }

    /// Projects a world point into the image, see [`KeyFrame::project`].
    pub fn project(&self, point: Vector3<f64>) -> Option<Point2<f64>> {
        self.keyframe.project(self.camera, point)
    }

    /// The pixel position of feature `kp`.
    pub fn keypoint(&self, kp: KeyPointId) -> Option<Point2<f64>> {
        self.keyframe.feature(kp).map(|feature| feature.keypoint)
    }

    pub fn full_field(&self) -> KeyPointField {
        KeyPointField::new(self.keyframe.num_features(), true)
    }
}

/// A correspondence between feature `.0` of the first keyframe and feature `.1` of the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeaturePair(pub KeyPointId, pub KeyPointId);

/// Allocates landmarks while a matcher triangulates.
pub trait MapPointStore {
    fn create_map_point(&self, position: Vector3<f64>) -> MapPointId;
}

pub trait FeatureMatcher {
    /// Matches every feature of `a` against every feature of `b`.
    fn match_all(&self, a: KeyFrameView<'_>, b: KeyFrameView<'_>) -> Vec<FeaturePair> {
        self.match_subset(a, b, &a.full_field(), &b.full_field())
    }

    /// Matches only the features whose slot is set in the respective field.
    fn match_subset(
        &self,
        a: KeyFrameView<'_>,
        b: KeyFrameView<'_>,
        field_a: &KeyPointField,
        field_b: &KeyPointField,
    ) -> Vec<FeaturePair>;

    /// Triangulates landmarks from `pairs`.
    ///
    /// Every landmark must be allocated through `store`, and for each of them the
    /// observing features must be inserted into `forward_a` and `forward_b`. Pairs that
    /// do not yield a good point are skipped. Returns the ids of the new landmarks.
    fn triangulate(
        &self,
        a: KeyFrameView<'_>,
        b: KeyFrameView<'_>,
        pairs: &[FeaturePair],
        forward_a: &mut FramePoints,
        forward_b: &mut FramePoints,
        store: &dyn MapPointStore,
    ) -> Vec<MapPointId>;
}

/// Exhaustive Hamming matcher with linear two-view triangulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BruteForceMatcher {
    /// The largest descriptor distance accepted for a match.
    pub max_distance: u32,
    /// The best match must beat the second best by at least this distance.
    pub better_by: u32,
    /// Only keep matches that are also the best match from `b` to `a`.
    pub cross_check: bool,
    /// Largest reprojection error, in pixels, of a triangulated point in either keyframe.
    pub max_reprojection_error: f64,
}

impl Default for BruteForceMatcher {
    fn default() -> Self {
        Self {
            max_distance: 64,
            better_by: 24,
            cross_check: true,
            max_reprojection_error: 4.0,
        }
    }
}

impl BruteForceMatcher {
    pub fn new() -> Self {
        Default::default()
    }

    /// Best sufficient match in `to` for every set slot of `from`.
    fn matching(
        &self,
        from: &KeyFrame,
        to: &KeyFrame,
        field_from: &KeyPointField,
        field_to: &KeyPointField,
    ) -> Vec<Option<KeyPointId>> {
        let mut matches = vec![None; from.num_features()];
        let candidates: Vec<KeyPointId> = field_to.positive().collect();
        let descriptors: Vec<Descriptor> = candidates
            .iter()
            .map(|&kp| to.features()[kp].descriptor)
            .collect();
        let knn_to = LinearKnn {
            metric: Hamming,
            iter: descriptors.iter(),
        };
        for kp in field_from.positive() {
            let knn: Vec<_> = knn_to
                .knn(&from.features()[kp].descriptor, 2)
                .into_iter()
                .collect();
            let sufficient = match knn.as_slice() {
                [] => false,
                [best] => best.distance <= self.max_distance,
                [best, second, ..] => {
                    best.distance <= self.max_distance
                        && best.distance + self.better_by <= second.distance
                }
            };
            if sufficient {
                matches[kp] = Some(candidates[knn[0].index]);
            }
        }
        matches
    }

    /// Linear triangulation of one correspondence, minimizing the algebraic error of
    /// both projections through a symmetric eigen decomposition.
    fn triangulate_pair(
        &self,
        a: KeyFrameView<'_>,
        b: KeyFrameView<'_>,
        pa: Point2<f64>,
        pb: Point2<f64>,
    ) -> Option<Vector3<f64>> {
        let projection_a = a.keyframe.projection_matrix(a.camera);
        let projection_b = b.keyframe.projection_matrix(b.camera);
        let rows: [RowVector4<f64>; 4] = [
            pa.x * projection_a.row(2) - projection_a.row(0),
            pa.y * projection_a.row(2) - projection_a.row(1),
            pb.x * projection_b.row(2) - projection_b.row(0),
            pb.y * projection_b.row(2) - projection_b.row(1),
        ];
        let design = Matrix4::from_rows(&rows);
        let eigen = (design.transpose() * design).symmetric_eigen();
        let homogeneous = eigen.eigenvectors.column(eigen.eigenvalues.imin()).into_owned();
        if homogeneous.w.abs() < 1e-12 {
            return None;
        }
        let point = homogeneous.xyz() / homogeneous.w;
        let error_a = (a.project(point)? - pa).norm();
        let error_b = (b.project(point)? - pb).norm();
        if error_a < self.max_reprojection_error && error_b < self.max_reprojection_error {
            Some(point)
        } else {
            None
        }
    }
}

impl FeatureMatcher for BruteForceMatcher {
    fn match_subset(
        &self,
        a: KeyFrameView<'_>,
        b: KeyFrameView<'_>,
        field_a: &KeyPointField,
        field_b: &KeyPointField,
    ) -> Vec<FeaturePair> {
        let forward = self.matching(a.keyframe, b.keyframe, field_a, field_b);
        let reverse = if self.cross_check {
            Some(self.matching(b.keyframe, a.keyframe, field_b, field_a))
        } else {
            None
        };
        let pairs: Vec<FeaturePair> = forward
            .into_iter()
            .enumerate()
            .filter_map(|(kpa, kpb)| kpb.map(|kpb| FeaturePair(kpa, kpb)))
            .filter(|&FeaturePair(kpa, kpb)| {
                reverse
                    .as_ref()
                    .map_or(true, |reverse| reverse[kpb] == Some(kpa))
            })
            .collect();
        debug!(
            "matched {} pairs between {} and {}",
            pairs.len(),
            a.keyframe.id(),
            b.keyframe.id()
        );
        pairs
    }

    fn triangulate(
        &self,
        a: KeyFrameView<'_>,
        b: KeyFrameView<'_>,
        pairs: &[FeaturePair],
        forward_a: &mut FramePoints,
        forward_b: &mut FramePoints,
        store: &dyn MapPointStore,
    ) -> Vec<MapPointId> {
        let mut created = vec![];
        for &FeaturePair(kpa, kpb) in pairs {
            let (pa, pb) = match (a.keypoint(kpa), b.keypoint(kpb)) {
                (Some(pa), Some(pb)) => (pa, pb),
                _ => continue,
            };
            if let Some(point) = self.triangulate_pair(a, b, pa, pb) {
                let mp = store.create_map_point(point);
                forward_a.insert(mp, kpa);
                forward_b.insert(mp, kpb);
                created.push(mp);
            }
        }
        debug!(
            "triangulated {} of {} pairs between {} and {}",
            created.len(),
            pairs.len(),
            a.keyframe.id(),
            b.keyframe.id()
        );
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataItemId, Feature, KeyFrameId};
    use nalgebra::{UnitQuaternion, Vector3};

    fn descriptor(byte: u8, ones: usize) -> Descriptor {
        let mut descriptor = Descriptor::new([byte; 32]);
        for bit in 0..ones {
            descriptor.bytes_mut()[bit / 8] ^= 1 << (bit % 8);
        }
        descriptor
    }

    fn keyframe(id: u64, descriptors: &[Descriptor]) -> KeyFrame {
        let features = descriptors
            .iter()
            .map(|&descriptor| Feature::new(Point2::new(10.0, 10.0), descriptor))
            .collect();
        KeyFrame::new(
            KeyFrameId(id),
            features,
            Vector3::zeros(),
            UnitQuaternion::identity(),
            0,
            DataItemId(id),
            None,
        )
    }

    #[test]
    fn ambiguous_and_distant_matches_are_dropped() {
        let camera = CameraPinholeParams::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let a = keyframe(0, &[descriptor(0x00, 0), descriptor(0xff, 0), descriptor(0x0f, 0)]);
        let b = keyframe(
            1,
            &[
                descriptor(0x00, 3),
                descriptor(0xff, 10),
                descriptor(0xff, 20),
                descriptor(0xf0, 0),
            ],
        );
        let (va, vb) = (KeyFrameView::new(&a, &camera), KeyFrameView::new(&b, &camera));
        let matcher = BruteForceMatcher::default();
        // 0xff is 10 bits from one candidate and 20 from another, which is too close to call.
        // 0x0f is more than 64 bits away from every candidate.
        assert_eq!(matcher.match_all(va, vb), vec![FeaturePair(0, 0)]);

        let mut field_b = KeyPointField::new(4, true);
        field_b.set(2, false);
        let pairs = matcher.match_subset(va, vb, &KeyPointField::new(3, true), &field_b);
        assert_eq!(pairs, vec![FeaturePair(0, 0), FeaturePair(1, 1)]);
    }

    #[test]
    fn margin_is_inclusive() {
        let camera = CameraPinholeParams::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let a = keyframe(0, &[descriptor(0x00, 0)]);
        let exact = keyframe(1, &[descriptor(0x00, 2), descriptor(0x00, 26)]);
        let short = keyframe(2, &[descriptor(0x00, 2), descriptor(0x00, 25)]);
        let matcher = BruteForceMatcher::default();
        let va = KeyFrameView::new(&a, &camera);
        assert_eq!(
            matcher.match_all(va, KeyFrameView::new(&exact, &camera)),
            vec![FeaturePair(0, 0)]
        );
        assert!(matcher
            .match_all(va, KeyFrameView::new(&short, &camera))
            .is_empty());
    }

    #[test]
    fn cross_check_requires_mutual_best() {
        let camera = CameraPinholeParams::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let a = keyframe(0, &[descriptor(0x00, 2), descriptor(0x00, 40)]);
        let b = keyframe(1, &[descriptor(0x00, 0)]);
        let (va, vb) = (KeyFrameView::new(&a, &camera), KeyFrameView::new(&b, &camera));

        let mut matcher = BruteForceMatcher {
            better_by: 0,
            ..Default::default()
        };
        assert_eq!(matcher.match_all(va, vb), vec![FeaturePair(0, 0)]);
        matcher.cross_check = false;
        assert_eq!(
            matcher.match_all(va, vb),
            vec![FeaturePair(0, 0), FeaturePair(1, 0)]
        );
    }

    #[test]
    fn triangulates_exact_observations() {
        struct Counter(std::cell::Cell<u64>);
        impl MapPointStore for Counter {
            fn create_map_point(&self, _: Vector3<f64>) -> MapPointId {
                let id = self.0.get();
                self.0.set(id + 1);
                MapPointId(id)
            }
        }

        let camera = CameraPinholeParams::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let point = Vector3::new(0.4, -0.2, 5.0);
        let mut a = keyframe(0, &[Descriptor::zeros()]);
        let mut b = keyframe(1, &[Descriptor::zeros()]);
        b.position = Vector3::new(0.5, 0.0, 0.0);
        a.features[0].keypoint = a.project(&camera, point).unwrap();
        b.features[0].keypoint = b.project(&camera, point).unwrap();
        let (va, vb) = (KeyFrameView::new(&a, &camera), KeyFrameView::new(&b, &camera));

        let matcher = BruteForceMatcher::default();
        let (pa, pb) = (a.features[0].keypoint, b.features[0].keypoint);
        let triangulated = matcher.triangulate_pair(va, vb, pa, pb);
        approx::assert_relative_eq!(triangulated.unwrap(), point, epsilon = 1e-6);

        let store = Counter(Default::default());
        let (mut forward_a, mut forward_b) = (FramePoints::new(), FramePoints::new());
        let created = matcher.triangulate(
            va,
            vb,
            &[FeaturePair(0, 0)],
            &mut forward_a,
            &mut forward_b,
            &store,
        );
        assert_eq!(created, vec![MapPointId(0)]);
        assert_eq!(forward_a.get(&MapPointId(0)), Some(&0));
        assert_eq!(forward_b.get(&MapPointId(0)), Some(&0));

        // Rays that do not meet.
        let skewed = Point2::new(pb.x, 0.0);
        assert!(matcher.triangulate_pair(va, vb, pa, skewed).is_none());
    }
}
