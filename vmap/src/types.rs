use serde::{Deserialize, Serialize};

/// Identifies a [`KeyFrame`](crate::KeyFrame) within one map.
///
/// Ids are handed out sequentially by the map and are never reused, even after the
/// entity they referred to is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyFrameId(pub u64);

impl std::fmt::Display for KeyFrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KF{}", self.0)
    }
}

/// Identifies a [`MapPoint`](crate::MapPoint) within one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapPointId(pub u64);

impl std::fmt::Display for MapPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MP{}", self.0)
    }
}

/// Opaque id of the dataset item (usually an image) a keyframe was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataItemId(pub u64);

/// Index of a feature inside a single keyframe.
pub type KeyPointId = usize;

/// Index of a camera in the map's camera list.
pub type CameraId = usize;

/// The feature detector that produced the keyframe features of a map.
///
/// Detection runs outside of this crate, but the kind is recorded so that a loaded map
/// can be extended with compatible features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureDetectorKind {
    Orb,
    Akaze,
}

impl Default for FeatureDetectorKind {
    fn default() -> Self {
        Self::Orb
    }
}

impl std::str::FromStr for FeatureDetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orb" => Ok(Self::Orb),
            "akaze" => Ok(Self::Akaze),
            _ => Err(format!("unknown feature detector {:?}", s)),
        }
    }
}

/// The descriptor matcher used between keyframes of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptorMatcherKind {
    BruteForce,
}

impl Default for DescriptorMatcherKind {
    fn default() -> Self {
        Self::BruteForce
    }
}
