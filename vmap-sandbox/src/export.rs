use serde::Serialize;
use std::io::Write;
use vmap::VMap;

#[derive(Serialize)]
struct ExportedPose {
    /// Position of the optical center in the world.
    position: [f64; 3],
    /// Camera to world rotation as `[i, j, k, w]`.
    orientation: [f64; 4],
}

#[derive(Serialize)]
struct ExportedMap {
    poses: Vec<ExportedPose>,
    points: Vec<[f64; 3]>,
}

/// Writes the keyframe poses and the map point cloud as JSON.
pub fn export(writer: impl Write, map: &VMap) -> serde_json::Result<()> {
    let poses = map
        .dump_camera_poses()
        .into_iter()
        .map(|(position, orientation)| ExportedPose {
            position: position.into(),
            orientation: orientation.coords.into(),
        })
        .collect();
    let points = map
        .dump_point_cloud_from_map_points()
        .into_iter()
        .map(|point| point.coords.into())
        .collect();
    serde_json::to_writer_pretty(writer, &ExportedMap { poses, points })
}
