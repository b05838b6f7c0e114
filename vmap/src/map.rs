use crate::covisibility::CovisibilityGraph;
use crate::index::{FramePointIndex, FramePoints, FramePointsInv, IndexViolation, KeyPointField};
use crate::matcher::{FeatureMatcher, FeaturePair, KeyFrameView, MapPointStore};
use crate::{
    CameraId, CameraPinholeParams, DataItemId, DescriptorMatcherKind, Error, Feature,
    FeatureDetectorKind, ImageMask, KeyFrame, KeyFrameId, KeyPointId, MapPoint, MapPointId,
    Result, VMapSettings,
};
use log::*;
use nalgebra::{Point3, UnitQuaternion, Vector3};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// The outcome of one of the matching and tracking operations of [`VMap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingReport {
    /// Existing map points that were found in the second keyframe.
    pub tracked: usize,
    /// Map points that were triangulated by this call.
    pub created: Vec<MapPointId>,
    /// Whether the covisibility of the first keyframe was recomputed.
    pub covisibility_updated: bool,
}

/// The map: keyframes, map points, the index between them and the covisibility graph.
///
/// Every collection sits behind its own lock so that the map can be shared between
/// threads. When more than one lock is needed they are always taken in this order:
/// keyframes, cameras, index, map points, covisibility.
pub struct VMap {
    /// Policy used by the tracking operations.
    pub settings: VMapSettings,
    pub(crate) feature_detector: FeatureDetectorKind,
    pub(crate) descriptor_matcher: DescriptorMatcherKind,
    pub(crate) keyframes: RwLock<BTreeMap<KeyFrameId, KeyFrame>>,
    pub(crate) cameras: RwLock<Vec<CameraPinholeParams>>,
    pub(crate) index: RwLock<FramePointIndex>,
    pub(crate) map_points: RwLock<BTreeMap<MapPointId, MapPoint>>,
    pub(crate) covisibility: RwLock<CovisibilityGraph>,
    pub(crate) mask: RwLock<Option<ImageMask>>,
    pub(crate) key_values: RwLock<BTreeMap<String, String>>,
    pub(crate) place_database: RwLock<Vec<u8>>,
    pub(crate) next_keyframe: AtomicU64,
    pub(crate) next_map_point: AtomicU64,
    covisibility_recomputes: AtomicU64,
}

impl Default for VMap {
    fn default() -> Self {
        Self::new(FeatureDetectorKind::Orb, DescriptorMatcherKind::BruteForce)
    }
}

impl VMap {
    pub fn new(
        feature_detector: FeatureDetectorKind,
        descriptor_matcher: DescriptorMatcherKind,
    ) -> Self {
        Self {
            settings: VMapSettings::default(),
            feature_detector,
            descriptor_matcher,
            keyframes: Default::default(),
            cameras: Default::default(),
            index: Default::default(),
            map_points: Default::default(),
            covisibility: Default::default(),
            mask: Default::default(),
            key_values: Default::default(),
            place_database: Default::default(),
            next_keyframe: AtomicU64::new(0),
            next_map_point: AtomicU64::new(0),
            covisibility_recomputes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_settings(self, settings: VMapSettings) -> Self {
        Self { settings, ..self }
    }

    pub fn feature_detector(&self) -> FeatureDetectorKind {
        self.feature_detector
    }

    pub fn descriptor_matcher(&self) -> DescriptorMatcherKind {
        self.descriptor_matcher
    }

    /// Sets the mask applied to the features of keyframes created from now on.
    pub fn set_mask(&self, mask: Option<ImageMask>) {
        *self.mask.write() = mask;
    }

    pub fn mask(&self) -> Option<ImageMask> {
        self.mask.read().clone()
    }

    /// Registers a camera and returns the id keyframes use to refer to it.
    pub fn add_camera_parameter(&self, camera: CameraPinholeParams) -> CameraId {
        let mut cameras = self.cameras.write();
        cameras.push(camera);
        cameras.len() - 1
    }

    pub fn camera(&self, camera_id: CameraId) -> Result<CameraPinholeParams> {
        self.cameras
            .read()
            .get(camera_id)
            .copied()
            .ok_or(Error::InvalidCamera(camera_id))
    }

    pub fn cameras(&self) -> Vec<CameraPinholeParams> {
        self.cameras.read().clone()
    }

    pub fn set_info(&self, key: impl Into<String>, value: impl Into<String>) {
        self.key_values.write().insert(key.into(), value.into());
    }

    pub fn info(&self, key: &str) -> Option<String> {
        self.key_values.read().get(key).cloned()
    }

    pub fn info_map(&self) -> BTreeMap<String, String> {
        self.key_values.read().clone()
    }

    /// The serialized place-recognition database stored alongside the map.
    pub fn place_database(&self) -> Vec<u8> {
        self.place_database.read().clone()
    }

    pub fn set_place_database(&self, database: Vec<u8>) {
        *self.place_database.write() = database;
    }

    /// Adds a keyframe seen by the camera `camera_id`.
    ///
    /// If a mask is set, the features it excludes are dropped before the keyframe is built,
    /// so the [`KeyPointId`](crate::KeyPointId)s refer to the surviving features.
    pub fn create_keyframe(
        &self,
        features: Vec<Feature>,
        position: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
        camera_id: CameraId,
        source: DataItemId,
        timestamp: Option<u64>,
    ) -> Result<KeyFrameId> {
        if camera_id >= self.cameras.read().len() {
            return Err(Error::InvalidCamera(camera_id));
        }
        let features = match &*self.mask.read() {
            Some(mask) => features
                .into_iter()
                .filter(|feature| mask.allows(feature.keypoint))
                .collect(),
            None => features,
        };
        let id = KeyFrameId(self.next_keyframe.fetch_add(1, Ordering::SeqCst));
        debug!("creating keyframe {} with {} features", id, features.len());
        let keyframe = KeyFrame::new(
            id,
            features,
            position,
            orientation,
            camera_id,
            source,
            timestamp,
        );
        let mut keyframes = self.keyframes.write();
        let mut index = self.index.write();
        let mut covisibility = self.covisibility.write();
        keyframes.insert(id, keyframe);
        index.add_keyframe(id);
        covisibility.add_keyframe(id);
        Ok(id)
    }

    /// Adds a landmark that no keyframe observes yet.
    pub fn create_map_point(&self, position: Vector3<f64>) -> MapPointId {
        let id = MapPointId(self.next_map_point.fetch_add(1, Ordering::SeqCst));
        self.map_points
            .write()
            .insert(id, MapPoint::new(id, position));
        id
    }

    pub fn keyframe(&self, kf: KeyFrameId) -> Result<MappedRwLockReadGuard<'_, KeyFrame>> {
        RwLockReadGuard::try_map(self.keyframes.read(), |keyframes| keyframes.get(&kf))
            .map_err(|_| Error::InvalidKeyFrame(kf))
    }

    pub fn map_point(&self, mp: MapPointId) -> Result<MapPoint> {
        self.map_points
            .read()
            .get(&mp)
            .cloned()
            .ok_or(Error::InvalidMapPoint(mp))
    }

    /// Ids of every keyframe, in ascending order.
    pub fn all_keyframes(&self) -> Vec<KeyFrameId> {
        self.keyframes.read().keys().copied().collect()
    }

    /// Ids of every map point, in ascending order.
    pub fn all_map_points(&self) -> Vec<MapPointId> {
        self.map_points.read().keys().copied().collect()
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes.read().len()
    }

    pub fn num_map_points(&self) -> usize {
        self.map_points.read().len()
    }

    /// Removes a map point and every reference to it.
    ///
    /// The covisibility of each keyframe that observed the point is recomputed once.
    pub fn remove_map_point(&self, mp: MapPointId) -> Result<()> {
        let mut index = self.index.write();
        if self.map_points.write().remove(&mp).is_none() {
            return Err(Error::InvalidMapPoint(mp));
        }
        let observers = index.remove_point(mp);
        debug!("removed {} observed by {} keyframes", mp, observers.len());
        for kf in observers {
            self.recompute_covisibility(&index, kf);
        }
        Ok(())
    }

    /// Removes many map points at once.
    ///
    /// Nothing is removed if any of the ids is unknown. Each affected keyframe gets exactly
    /// one covisibility recompute, no matter how many of its points were removed.
    pub fn remove_map_points_batch(&self, mps: &[MapPointId]) -> Result<()> {
        let mut index = self.index.write();
        let mps: BTreeSet<MapPointId> = mps.iter().copied().collect();
        {
            let mut map_points = self.map_points.write();
            if let Some(&missing) = mps.iter().find(|mp| !map_points.contains_key(mp)) {
                return Err(Error::InvalidMapPoint(missing));
            }
            for mp in &mps {
                map_points.remove(mp);
            }
        }
        let mut modified = BTreeSet::new();
        for &mp in &mps {
            modified.extend(index.remove_point(mp));
        }
        debug!(
            "removed {} map points affecting {} keyframes",
            mps.len(),
            modified.len()
        );
        for kf in modified {
            self.recompute_covisibility(&index, kf);
        }
        Ok(())
    }

    /// Removes every keyframe, map point and index entry.
    ///
    /// Cameras, the mask and the metadata are kept, and ids keep counting from where they were.
    pub fn reset(&self) {
        info!("resetting map");
        let mut keyframes = self.keyframes.write();
        let mut index = self.index.write();
        let mut map_points = self.map_points.write();
        let mut covisibility = self.covisibility.write();
        keyframes.clear();
        index.clear();
        map_points.clear();
        covisibility.clear();
    }

    /// The map points observed by `kf` and the feature observing each.
    ///
    /// An empty map is returned while the map has no keyframes at all.
    pub fn all_map_points_at_keyframe(&self, kf: KeyFrameId) -> Result<FramePoints> {
        let index = self.index.read();
        if index.is_empty() {
            return Ok(FramePoints::new());
        }
        index
            .frame_points(kf)
            .cloned()
            .ok_or(Error::InvalidKeyFrame(kf))
    }

    /// The feature of `kf` backing each map point, keyed by feature.
    pub fn frame_points_inv(&self, kf: KeyFrameId) -> Result<FramePointsInv> {
        self.index
            .read()
            .frame_points_inv(kf)
            .cloned()
            .ok_or(Error::InvalidKeyFrame(kf))
    }

    /// The keyframes observing `mp`.
    pub fn map_point_appearances(&self, mp: MapPointId) -> Result<BTreeSet<KeyFrameId>> {
        let index = self.index.read();
        if !self.map_points.read().contains_key(&mp) {
            return Err(Error::InvalidMapPoint(mp));
        }
        Ok(index.appearances(mp).cloned().unwrap_or_default())
    }

    /// A field with every feature slot of `kf` set.
    pub fn make_field(&self, kf: KeyFrameId) -> Result<KeyPointField> {
        Ok(KeyPointField::new(self.keyframe(kf)?.num_features(), true))
    }

    /// A field with the slots of `kf` that back a map point set.
    pub fn visible_field(&self, kf: KeyFrameId) -> Result<KeyPointField> {
        let len = self.keyframe(kf)?.num_features();
        Ok(visible_field(&self.index.read(), kf, len))
    }

    /// Rebuilds every backward map from the forward maps.
    pub fn fix_frame_points_inv(&self) {
        self.index.write().rebuild_all_backward();
    }

    /// Reports every inconsistency of the frame-point index.
    pub fn verify_index(&self) -> Vec<IndexViolation> {
        let keyframes = self.keyframes.read();
        let index = self.index.read();
        let map_points = self.map_points.read();
        index.verify(
            |kf| keyframes.contains_key(&kf),
            |mp| map_points.contains_key(&mp),
        )
    }

    /// Recomputes the covisibility edges leaving `kf` from its current map points.
    pub fn update_covisibility_graph(&self, kf: KeyFrameId) -> Result<()> {
        let index = self.index.read();
        if index.frame_points(kf).is_none() {
            return Err(Error::InvalidKeyFrame(kf));
        }
        self.recompute_covisibility(&index, kf);
        Ok(())
    }

    fn recompute_covisibility(&self, index: &FramePointIndex, kf: KeyFrameId) {
        self.covisibility_recomputes.fetch_add(1, Ordering::SeqCst);
        let mut counter: BTreeMap<KeyFrameId, u32> = BTreeMap::new();
        for mp in index.frame_points(kf).into_iter().flat_map(|forward| forward.keys()) {
            for &other in index.appearances(*mp).into_iter().flatten() {
                if other != kf {
                    *counter.entry(other).or_default() += 1;
                }
            }
        }
        let mut graph = self.covisibility.write();
        if self.settings.clear_incident_edges_before_recompute {
            graph.clear_out_edges(kf);
        }
        for (other, weight) in counter {
            graph.add_edge(kf, other, weight);
        }
    }

    /// The number of covisibility recomputes performed since the map was created.
    pub fn covisibility_recompute_count(&self) -> u64 {
        self.covisibility_recomputes.load(Ordering::SeqCst)
    }

    /// Keyframes with an edge pointing at `kf`.
    pub fn key_frames_come_into(&self, kf: KeyFrameId) -> Result<Vec<KeyFrameId>> {
        self.covisibility
            .read()
            .key_frames_come_into(kf)
            .ok_or(Error::InvalidKeyFrame(kf))
    }

    /// Neighbors of `kf` by non-increasing covisibility weight, at most `limit` of them.
    ///
    /// A negative `limit` returns every neighbor.
    pub fn ordered_related_key_frames_from(
        &self,
        kf: KeyFrameId,
        limit: isize,
    ) -> Result<Vec<KeyFrameId>> {
        self.covisibility
            .read()
            .ordered_related_key_frames_from(kf, limit)
            .ok_or(Error::InvalidKeyFrame(kf))
    }

    /// The edges leaving `kf` as `(target, weight)`, in insertion order.
    pub fn covisibility_edges(&self, kf: KeyFrameId) -> Result<Vec<(KeyFrameId, u32)>> {
        self.covisibility
            .read()
            .out_edges(kf)
            .ok_or(Error::InvalidKeyFrame(kf))
    }

    pub fn covisibility_weight(&self, a: KeyFrameId, b: KeyFrameId) -> Option<u32> {
        self.covisibility.read().weight(a, b)
    }

    pub fn num_covisibility_edges(&self) -> usize {
        self.covisibility.read().num_edges()
    }

    /// Matches all features of two keyframes and triangulates new map points from the
    /// matches that are not backed by a map point yet.
    pub fn estimate_structure<M>(
        &self,
        matcher: &M,
        kf1: KeyFrameId,
        kf2: KeyFrameId,
    ) -> Result<TrackingReport>
    where
        M: FeatureMatcher + ?Sized,
    {
        let keyframes = self.keyframes.read();
        let cameras = self.cameras.read();
        let (a, b) = (
            view(&keyframes, &cameras, kf1)?,
            view(&keyframes, &cameras, kf2)?,
        );
        if kf1 == kf2 {
            warn!("refusing to match {} with itself", kf1);
            return Ok(TrackingReport::default());
        }
        let mut index = self.index.write();

        let pairs = matcher.match_all(a, b);
        let created = self.triangulate_new(&mut index, matcher, a, b, &pairs);
        self.recompute_covisibility(&index, kf1);
        info!(
            "estimated structure between {} and {}: {} matches, {} new map points",
            kf1,
            kf2,
            pairs.len(),
            created.len()
        );
        Ok(TrackingReport {
            tracked: 0,
            created,
            covisibility_updated: true,
        })
    }

    /// Tracks the map points of `kf1` into `kf2`, then triangulates new map points from
    /// the features neither keyframe has a map point for.
    pub fn estimate_and_track<M>(
        &self,
        matcher: &M,
        kf1: KeyFrameId,
        kf2: KeyFrameId,
    ) -> Result<TrackingReport>
    where
        M: FeatureMatcher + ?Sized,
    {
        let keyframes = self.keyframes.read();
        let cameras = self.cameras.read();
        let (a, b) = (
            view(&keyframes, &cameras, kf1)?,
            view(&keyframes, &cameras, kf2)?,
        );
        if kf1 == kf2 {
            warn!("refusing to match {} with itself", kf1);
            return Ok(TrackingReport::default());
        }
        let mut index = self.index.write();

        let tracked = self.track_visible(&mut index, matcher, a, b);

        let untracked_a = !visible_field(&index, kf1, a.keyframe.num_features());
        let untracked_b = !visible_field(&index, kf2, b.keyframe.num_features());
        let pairs = matcher.match_subset(a, b, &untracked_a, &untracked_b);
        let created = self.triangulate_new(&mut index, matcher, a, b, &pairs);

        self.recompute_covisibility(&index, kf1);
        info!(
            "tracked {} map points from {} into {} and created {} new ones",
            tracked,
            kf1,
            kf2,
            created.len()
        );
        Ok(TrackingReport {
            tracked,
            created,
            covisibility_updated: true,
        })
    }

    /// Tracks the map points of `kf1` into `kf2` without creating new ones.
    ///
    /// The covisibility of `kf1` is only recomputed when more than
    /// [`VMapSettings::track_match_threshold`] map points were tracked.
    pub fn track_map_points<M>(
        &self,
        matcher: &M,
        kf1: KeyFrameId,
        kf2: KeyFrameId,
    ) -> Result<TrackingReport>
    where
        M: FeatureMatcher + ?Sized,
    {
        let keyframes = self.keyframes.read();
        let cameras = self.cameras.read();
        let (a, b) = (
            view(&keyframes, &cameras, kf1)?,
            view(&keyframes, &cameras, kf2)?,
        );
        if kf1 == kf2 {
            warn!("refusing to match {} with itself", kf1);
            return Ok(TrackingReport::default());
        }
        let mut index = self.index.write();

        let tracked = self.track_visible(&mut index, matcher, a, b);
        let covisibility_updated = tracked > self.settings.track_match_threshold;
        if covisibility_updated {
            self.recompute_covisibility(&index, kf1);
        }
        info!("tracked {} map points from {} into {}", tracked, kf1, kf2);
        Ok(TrackingReport {
            tracked,
            created: vec![],
            covisibility_updated,
        })
    }

    /// Matches the features of `a` backing a map point against all features of `b` and
    /// records the matches that pass the reprojection check.
    fn track_visible<M>(
        &self,
        index: &mut FramePointIndex,
        matcher: &M,
        a: KeyFrameView<'_>,
        b: KeyFrameView<'_>,
    ) -> usize
    where
        M: FeatureMatcher + ?Sized,
    {
        let (kf1, kf2) = (a.keyframe.id(), b.keyframe.id());
        let visible = visible_field(index, kf1, a.keyframe.num_features());
        let pairs = matcher.match_subset(a, b, &visible, &b.full_field());
        let map_points = self.map_points.read();

        let mut accepted = 0;
        for FeaturePair(kp1, kp2) in pairs {
            let mp = match index.map_point_at(kf1, kp1) {
                Some(mp) => mp,
                None => continue,
            };
            let position = match map_points.get(&mp) {
                Some(map_point) => map_point.position(),
                None => continue,
            };
            let error = match (b.project(position), b.keypoint(kp2)) {
                (Some(projected), Some(observed)) => (projected - observed).norm(),
                _ => continue,
            };
            if error >= self.settings.reprojection_threshold {
                trace!("rejected {} in {} with reprojection error {}", mp, kf2, error);
                continue;
            }
            // A map point is observed at most once per keyframe and a feature backs at most one map point.
            let already_seen = index
                .frame_points(kf2)
                .map_or(false, |forward| forward.contains_key(&mp));
            if already_seen || index.map_point_at(kf2, kp2).is_some() {
                continue;
            }
            index.observe(kf2, mp, kp2);
            accepted += 1;
        }
        debug!(
            "{} of {} visible features of {} tracked into {}",
            accepted,
            visible.count_positive(),
            kf1,
            kf2
        );
        accepted
    }

    /// Triangulates the pairs where neither feature backs a map point and records the new
    /// map points in both keyframes.
    ///
    /// Each feature takes part in at most one pair, the first one it appears in. New map
    /// points that end up without any observation are dropped again.
    fn triangulate_new<M>(
        &self,
        index: &mut FramePointIndex,
        matcher: &M,
        a: KeyFrameView<'_>,
        b: KeyFrameView<'_>,
        pairs: &[FeaturePair],
    ) -> Vec<MapPointId>
    where
        M: FeatureMatcher + ?Sized,
    {
        let (kf1, kf2) = (a.keyframe.id(), b.keyframe.id());
        let mut taken_a = backed_features(index, kf1);
        let mut taken_b = backed_features(index, kf2);
        let (mut paired_a, mut paired_b) = (BTreeSet::new(), BTreeSet::new());
        let fresh: Vec<FeaturePair> = pairs
            .iter()
            .copied()
            .filter(|&FeaturePair(kp1, kp2)| {
                !taken_a.contains(&kp1)
                    && !taken_b.contains(&kp2)
                    && !paired_a.contains(&kp1)
                    && !paired_b.contains(&kp2)
                    && paired_a.insert(kp1)
                    && paired_b.insert(kp2)
            })
            .collect();
        if fresh.len() < pairs.len() {
            trace!(
                "{} of {} pairs between {} and {} reuse a backed or paired feature",
                pairs.len() - fresh.len(),
                pairs.len(),
                kf1,
                kf2
            );
        }
        if fresh.is_empty() {
            return vec![];
        }

        let mut forward_a = index.forward.remove(&kf1).unwrap_or_default();
        let mut forward_b = index.forward.remove(&kf2).unwrap_or_default();
        let created = matcher.triangulate(a, b, &fresh, &mut forward_a, &mut forward_b, self);

        let mut kept = vec![];
        let mut dropped = vec![];
        for mp in created {
            let in_a = claim_feature(&mut forward_a, &mut taken_a, mp);
            let in_b = claim_feature(&mut forward_b, &mut taken_b, mp);
            if in_a {
                index.add_appearance(mp, kf1);
            }
            if in_b {
                index.add_appearance(mp, kf2);
            }
            if in_a || in_b {
                kept.push(mp);
            } else {
                dropped.push(mp);
            }
        }
        if !dropped.is_empty() {
            warn!(
                "dropping {} triangulated map points between {} and {} without a free feature",
                dropped.len(),
                kf1,
                kf2
            );
            let mut map_points = self.map_points.write();
            for mp in &dropped {
                map_points.remove(mp);
            }
        }
        index.forward.insert(kf1, forward_a);
        index.forward.insert(kf2, forward_b);
        index.rebuild_backward(kf1);
        index.rebuild_backward(kf2);
        kept
    }

    /// The position of every map point, in id order.
    pub fn dump_point_cloud_from_map_points(&self) -> Vec<Point3<f64>> {
        self.map_points
            .read()
            .values()
            .map(MapPoint::point)
            .collect()
    }

    /// The position and orientation of every keyframe, in id order.
    pub fn dump_camera_poses(&self) -> Vec<(Vector3<f64>, UnitQuaternion<f64>)> {
        self.keyframes
            .read()
            .values()
            .map(|keyframe| (keyframe.position(), keyframe.orientation()))
            .collect()
    }
}

impl MapPointStore for VMap {
    fn create_map_point(&self, position: Vector3<f64>) -> MapPointId {
        VMap::create_map_point(self, position)
    }
}

fn view<'a>(
    keyframes: &'a BTreeMap<KeyFrameId, KeyFrame>,
    cameras: &'a [CameraPinholeParams],
    kf: KeyFrameId,
) -> Result<KeyFrameView<'a>> {
    let keyframe = keyframes.get(&kf).ok_or(Error::InvalidKeyFrame(kf))?;
    let camera = cameras
        .get(keyframe.camera_id())
        .ok_or(Error::InvalidCamera(keyframe.camera_id()))?;
    Ok(KeyFrameView::new(keyframe, camera))
}

fn backed_features(index: &FramePointIndex, kf: KeyFrameId) -> BTreeSet<KeyPointId> {
    index
        .frame_points_inv(kf)
        .map(|backward| backward.keys().copied().collect())
        .unwrap_or_default()
}

/// Keeps the entry of `mp` in `forward` only if its feature is not backing another map point.
fn claim_feature(
    forward: &mut FramePoints,
    taken: &mut BTreeSet<KeyPointId>,
    mp: MapPointId,
) -> bool {
    match forward.get(&mp) {
        Some(&kp) if taken.insert(kp) => true,
        Some(_) => {
            forward.remove(&mp);
            false
        }
        None => false,
    }
}

fn visible_field(index: &FramePointIndex, kf: KeyFrameId, len: usize) -> KeyPointField {
    let mut field = KeyPointField::new(len, false);
    for &kp in index.frame_points(kf).into_iter().flat_map(|forward| forward.values()) {
        if kp < len {
            field.set(kp, true);
        }
    }
    field
}
