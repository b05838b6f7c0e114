//! The bookkeeping between keyframe features and map points.
//!
//! For each keyframe the index keeps a forward map (`MapPointId -> KeyPointId`) and the
//! exact inverse of it (the backward map), and for each map point the set of keyframes
//! it appears in. Two invariants tie these together:
//!
//! * `backward[kf] == invert(forward[kf])` for every keyframe
//! * `kf ∈ appearances[mp] ⇔ mp ∈ forward[kf]`
//!
//! The index only stores ids. Whether those ids still exist in the map is checked by
//! [`FramePointIndex::verify`].

use crate::{KeyFrameId, KeyPointId, MapPointId};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, Not};

/// Map points observed by one keyframe and the feature observing each of them.
pub type FramePoints = BTreeMap<MapPointId, KeyPointId>;
/// The inverse of [`FramePoints`].
pub type FramePointsInv = BTreeMap<KeyPointId, MapPointId>;

/// Computes the inverse of a forward map.
pub fn invert(forward: &FramePoints) -> FramePointsInv {
    forward.iter().map(|(&mp, &kp)| (kp, mp)).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FramePointIndex {
    pub(crate) appearances: BTreeMap<MapPointId, BTreeSet<KeyFrameId>>,
    pub(crate) forward: BTreeMap<KeyFrameId, FramePoints>,
    pub(crate) backward: BTreeMap<KeyFrameId, FramePointsInv>,
}

impl FramePointIndex {
    pub(crate) fn add_keyframe(&mut self, kf: KeyFrameId) {
        self.forward.insert(kf, FramePoints::new());
        self.backward.insert(kf, FramePointsInv::new());
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn frame_points(&self, kf: KeyFrameId) -> Option<&FramePoints> {
        self.forward.get(&kf)
    }

    pub fn frame_points_inv(&self, kf: KeyFrameId) -> Option<&FramePointsInv> {
        self.backward.get(&kf)
    }

    pub fn appearances(&self, mp: MapPointId) -> Option<&BTreeSet<KeyFrameId>> {
        self.appearances.get(&mp)
    }

    /// The map point backed by feature `kp` of keyframe `kf`.
    pub fn map_point_at(&self, kf: KeyFrameId, kp: KeyPointId) -> Option<MapPointId> {
        self.backward.get(&kf)?.get(&kp).copied()
    }

    /// Records that feature `kp` of `kf` observes `mp`, updating all three maps.
    pub(crate) fn observe(&mut self, kf: KeyFrameId, mp: MapPointId, kp: KeyPointId) {
        self.forward.entry(kf).or_default().insert(mp, kp);
        self.backward.entry(kf).or_default().insert(kp, mp);
        self.appearances.entry(mp).or_default().insert(kf);
    }

    pub(crate) fn add_appearance(&mut self, mp: MapPointId, kf: KeyFrameId) {
        self.appearances.entry(mp).or_default().insert(kf);
    }

    /// Rebuilds the backward map of `kf` from its forward map.
    pub(crate) fn rebuild_backward(&mut self, kf: KeyFrameId) {
        let inverse = self.forward.get(&kf).map(invert).unwrap_or_default();
        self.backward.insert(kf, inverse);
    }

    /// Rebuilds every backward map from scratch.
    pub(crate) fn rebuild_all_backward(&mut self) {
        self.backward = self
            .forward
            .iter()
            .map(|(&kf, forward)| (kf, invert(forward)))
            .collect();
    }

    /// Drops every reference to `mp` and returns the keyframes that used to observe it.
    pub(crate) fn remove_point(&mut self, mp: MapPointId) -> BTreeSet<KeyFrameId> {
        let observers = self.appearances.remove(&mp).unwrap_or_default();
        for &kf in &observers {
            let kp = self.forward.get_mut(&kf).and_then(|forward| forward.remove(&mp));
            if let (Some(kp), Some(backward)) = (kp, self.backward.get_mut(&kf)) {
                if backward.get(&kp) == Some(&mp) {
                    backward.remove(&kp);
                }
            }
        }
        observers
    }

    pub(crate) fn clear(&mut self) {
        self.appearances.clear();
        self.forward.clear();
        self.backward.clear();
    }

    /// Checks both index invariants and that every id is known to the map.
    pub fn verify(
        &self,
        keyframe_exists: impl Fn(KeyFrameId) -> bool,
        map_point_exists: impl Fn(MapPointId) -> bool,
    ) -> Vec<IndexViolation> {
        let mut violations = vec![];
        for (&kf, forward) in &self.forward {
            if !keyframe_exists(kf) {
                violations.push(IndexViolation::DanglingKeyFrame(kf));
            }
            let inverse = invert(forward);
            if inverse.len() != forward.len() {
                violations.push(IndexViolation::SharedFeature(kf));
            }
            if self.backward.get(&kf).map_or(true, |backward| *backward != inverse) {
                violations.push(IndexViolation::StaleBackward(kf));
            }
            for &mp in forward.keys() {
                let appears = self
                    .appearances
                    .get(&mp)
                    .map_or(false, |keyframes| keyframes.contains(&kf));
                if !appears {
                    violations.push(IndexViolation::MissingAppearance { keyframe: kf, map_point: mp });
                }
            }
        }
        for (&mp, keyframes) in &self.appearances {
            if !map_point_exists(mp) {
                violations.push(IndexViolation::DanglingMapPoint(mp));
            }
            for &kf in keyframes {
                let observed = self
                    .forward
                    .get(&kf)
                    .map_or(false, |forward| forward.contains_key(&mp));
                if !observed {
                    violations.push(IndexViolation::MissingObservation { keyframe: kf, map_point: mp });
                }
            }
        }
        violations
    }
}

/// A breach of the frame-point index invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexViolation {
    /// The backward map of the keyframe is not the inverse of its forward map.
    StaleBackward(KeyFrameId),
    /// Two map points of the keyframe are backed by the same feature.
    SharedFeature(KeyFrameId),
    /// The keyframe observes the map point but is missing from its appearance set.
    MissingAppearance {
        keyframe: KeyFrameId,
        map_point: MapPointId,
    },
    /// The map point lists the keyframe as an appearance that does not observe it.
    MissingObservation {
        keyframe: KeyFrameId,
        map_point: MapPointId,
    },
    DanglingKeyFrame(KeyFrameId),
    DanglingMapPoint(MapPointId),
}

impl std::fmt::Display for IndexViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaleBackward(kf) => write!(f, "backward map of {} is stale", kf),
            Self::SharedFeature(kf) => write!(f, "{} backs several map points with one feature", kf),
            Self::MissingAppearance {
                keyframe,
                map_point,
            } => write!(f, "{} observes {} but is not in its appearances", keyframe, map_point),
            Self::MissingObservation {
                keyframe,
                map_point,
            } => write!(f, "{} lists {} as an appearance without observing it", map_point, keyframe),
            Self::DanglingKeyFrame(kf) => write!(f, "{} is indexed but not in the map", kf),
            Self::DanglingMapPoint(mp) => write!(f, "{} is indexed but not in the map", mp),
        }
    }
}

/// One flag per feature slot of a keyframe, used to restrict which features take part
/// in matching.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyPointField(Vec<bool>);

impl KeyPointField {
    pub fn new(len: usize, value: bool) -> Self {
        Self(vec![value; len])
    }

    pub fn set(&mut self, kp: KeyPointId, value: bool) {
        self.0[kp] = value;
    }

    /// Flips every slot.
    pub fn invert(&mut self) {
        for slot in &mut self.0 {
            *slot = !*slot;
        }
    }

    pub fn count_positive(&self) -> usize {
        self.0.iter().filter(|&&slot| slot).count()
    }

    /// The feature slots that are set.
    pub fn positive(&self) -> impl Iterator<Item = KeyPointId> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|&(_, &slot)| slot)
            .map(|(kp, _)| kp)
    }

    /// A `b.len() x a.len()` matrix with `1` where both the slot of `a` (column) and
    /// of `b` (row) are set.
    pub fn create_mask(a: &Self, b: &Self) -> DMatrix<u8> {
        DMatrix::from_fn(b.len(), a.len(), |row, col| (b[row] && a[col]) as u8)
    }
}

impl Deref for KeyPointField {
    type Target = [bool];

    fn deref(&self) -> &[bool] {
        &self.0
    }
}

impl Not for KeyPointField {
    type Output = Self;

    fn not(mut self) -> Self {
        self.invert();
        self
    }
}

impl From<Vec<bool>> for KeyPointField {
    fn from(slots: Vec<bool>) -> Self {
        Self(slots)
    }
}
