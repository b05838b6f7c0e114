use crate::{CameraId, KeyFrameId, MapPointId};
use thiserror::Error;

/// Errors produced while manipulating or persisting a [`VMap`](crate::VMap).
#[derive(Debug, Error)]
pub enum Error {
    #[error("keyframe {0} does not exist in the map")]
    InvalidKeyFrame(KeyFrameId),
    #[error("map point {0} does not exist in the map")]
    InvalidMapPoint(MapPointId),
    #[error("camera {0} has not been registered")]
    InvalidCamera(CameraId),
    #[error("map file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("map archive could not be encoded or decoded: {0}")]
    Codec(#[from] bincode::Error),
    #[error("map file is inconsistent with its header: {0}")]
    CorruptMap(String),
    #[error("unable to read camera parameters: {0}")]
    CameraFile(String),
}

pub type Result<T> = std::result::Result<T, Error>;
