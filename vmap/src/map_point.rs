use crate::MapPointId;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A triangulated landmark.
///
/// Which keyframes observe the landmark is not stored here, but in the map's
/// frame-point index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub(crate) id: MapPointId,
    pub(crate) position: Vector3<f64>,
}

impl MapPoint {
    pub(crate) fn new(id: MapPointId, position: Vector3<f64>) -> Self {
        Self { id, position }
    }

    pub fn id(&self) -> MapPointId {
        self.id
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub fn point(&self) -> Point3<f64> {
        self.position.into()
    }
}
