use crate::{CameraId, CameraPinholeParams, DataItemId, KeyFrameId, KeyPointId};
use bitarray::BitArray;
use nalgebra::{Isometry3, Matrix3x4, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A 256-bit binary feature descriptor (ORB sized), compared by Hamming distance.
pub type Descriptor = BitArray<32>;

/// A keypoint in pixel coordinates and the descriptor extracted around it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub keypoint: Point2<f64>,
    pub descriptor: Descriptor,
}

impl Feature {
    pub fn new(keypoint: Point2<f64>, descriptor: Descriptor) -> Self {
        Self {
            keypoint,
            descriptor,
        }
    }
}

/// A camera observation anchored in the map.
///
/// The pose is stored as the position of the optical center in the world and the
/// orientation that rotates camera coordinates into world coordinates. The features
/// are owned by the keyframe and addressed by their [`KeyPointId`] (the index in
/// [`KeyFrame::features`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFrame {
    pub(crate) id: KeyFrameId,
    pub(crate) position: Vector3<f64>,
    pub(crate) orientation: UnitQuaternion<f64>,
    pub(crate) camera_id: CameraId,
    pub(crate) source: DataItemId,
    pub(crate) timestamp: Option<u64>,
    pub(crate) features: Vec<Feature>,
}

impl KeyFrame {
    pub(crate) fn new(
        id: KeyFrameId,
        features: Vec<Feature>,
        position: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
        camera_id: CameraId,
        source: DataItemId,
        timestamp: Option<u64>,
    ) -> Self {
        Self {
            id,
            position,
            orientation,
            camera_id,
            source,
            timestamp,
            features,
        }
    }

    pub fn id(&self) -> KeyFrameId {
        self.id
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub fn orientation(&self) -> UnitQuaternion<f64> {
        self.orientation
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn source(&self) -> DataItemId {
        self.source
    }

    /// Capture time in nanoseconds, if it was known when the keyframe was created.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature(&self, kp: KeyPointId) -> Option<&Feature> {
        self.features.get(kp)
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// The transform taking world coordinates into this camera's frame.
    pub fn world_to_camera(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position), self.orientation).inverse()
    }

    /// `K * [R | t]` for this keyframe viewed through `camera`.
    pub fn projection_matrix(&self, camera: &CameraPinholeParams) -> Matrix3x4<f64> {
        camera.to_matrix() * self.world_to_camera().to_homogeneous()
    }

    /// Projects a world point into this keyframe's image.
    ///
    /// Returns `None` when the point lies behind the camera.
    pub fn project(&self, camera: &CameraPinholeParams, point: Vector3<f64>) -> Option<Point2<f64>> {
        let camera_point = self.world_to_camera() * Point3::from(point);
        camera.project(camera_point.coords)
    }
}
