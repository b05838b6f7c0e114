//! The map of a keyframe based visual SLAM system.
//!
//! A [`VMap`] stores keyframes (camera poses with their features) and map points (3d
//! landmarks), keeps an index of which feature of which keyframe observes which map point,
//! and maintains a covisibility graph weighting every pair of keyframes by the number of
//! map points they share. Matching and triangulation are delegated to a
//! [`FeatureMatcher`]; the map takes care of the bookkeeping around it.
//!
//! ```
//! use nalgebra::{Point2, UnitQuaternion, Vector3};
//! use vmap::{CameraPinholeParams, DataItemId, Descriptor, Feature, VMap};
//!
//! let map = VMap::default();
//! let camera = map.add_camera_parameter(CameraPinholeParams::new(500.0, 500.0, 320.0, 240.0, 640, 480));
//! let features = vec![Feature::new(Point2::new(320.0, 240.0), Descriptor::zeros())];
//! let kf = map
//!     .create_keyframe(features, Vector3::zeros(), UnitQuaternion::identity(), camera, DataItemId(0), None)
//!     .unwrap();
//! assert!(map.all_map_points_at_keyframe(kf).unwrap().is_empty());
//! ```

mod camera;
mod covisibility;
mod error;
mod index;
mod keyframe;
mod map;
mod map_point;
mod mask;
mod matcher;
mod persist;
mod settings;
mod types;

pub use bitarray;
pub use camera::*;
pub use covisibility::{CovisibilityGraph, Edge, EdgeKey, KeyFrameGraph, VertexKey};
pub use error::*;
pub use index::*;
pub use keyframe::*;
pub use map::*;
pub use map_point::*;
pub use mask::*;
pub use matcher::*;
pub use persist::*;
pub use settings::*;
pub use types::*;
