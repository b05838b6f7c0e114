mod common;

use common::*;
use nalgebra::Vector3;
use serde::de::DeserializeOwned;
use slotmap::SecondaryMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use vmap::*;

fn populated_map() -> (VMap, Vec<KeyFrameId>) {
    let scene = Scene::random(24, 21);
    let all = ScriptedMatcher::identity(24).with_positions(&scene.points);
    let map = VMap::new(FeatureDetectorKind::Akaze, DescriptorMatcherKind::BruteForce);
    let cam = map.add_camera_parameter(camera());
    map.add_camera_parameter(camera() * 0.5);
    map.set_info("dataset", "kitti/00");
    map.set_place_database(vec![1, 2, 3, 4]);
    let kfs: Vec<KeyFrameId> = [
        Vector3::zeros(),
        Vector3::new(0.3, 0.0, 0.0),
        Vector3::new(0.1, 0.1, 0.0),
    ]
    .iter()
    .map(|&position| add_keyframe(&map, cam, scene.features(position), position))
    .collect();
    map.set_mask(ImageMask::new(2, 1, vec![0, 1]));
    map.estimate_structure(&all, kfs[0], kfs[1]).unwrap();
    map.track_map_points(&all, kfs[0], kfs[2]).unwrap();
    map.update_covisibility_graph(kfs[2]).unwrap();
    map.create_map_point(Vector3::new(0.0, 0.0, 10.0));
    (map, kfs)
}

#[test]
fn round_trip() {
    init();
    let (map, kfs) = populated_map();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bin");
    map.save(&path).unwrap();

    let header = MapFileHeader::read_from_file(&path).unwrap();
    assert_eq!(header, map.header().unwrap());
    assert_eq!(header.num_keyframes, 3);
    assert_eq!(header.num_map_points, 25);

    let loaded = VMap::open(&path).unwrap();
    assert_eq!(loaded.feature_detector(), FeatureDetectorKind::Akaze);
    assert_eq!(loaded.all_keyframes(), map.all_keyframes());
    assert_eq!(loaded.all_map_points(), map.all_map_points());
    assert_eq!(loaded.cameras(), map.cameras());
    assert_eq!(loaded.info_map(), map.info_map());
    assert_eq!(loaded.place_database(), vec![1, 2, 3, 4]);
    assert_eq!(loaded.mask(), map.mask());
    assert!(loaded.mask().is_some());
    for &kf in &kfs {
        assert_eq!(*loaded.keyframe(kf).unwrap(), *map.keyframe(kf).unwrap());
        assert_eq!(
            loaded.all_map_points_at_keyframe(kf).unwrap(),
            map.all_map_points_at_keyframe(kf).unwrap()
        );
        assert_eq!(loaded.frame_points_inv(kf).unwrap(), map.frame_points_inv(kf).unwrap());
        assert_eq!(loaded.covisibility_edges(kf).unwrap(), map.covisibility_edges(kf).unwrap());
        assert_eq!(loaded.key_frames_come_into(kf).unwrap(), map.key_frames_come_into(kf).unwrap());
    }
    for mp in map.all_map_points() {
        assert_eq!(loaded.map_point(mp).unwrap(), map.map_point(mp).unwrap());
        assert_eq!(
            loaded.map_point_appearances(mp).unwrap(),
            map.map_point_appearances(mp).unwrap()
        );
    }
    assert_eq!(loaded.dump_camera_poses(), map.dump_camera_poses());
    assert_consistent(&loaded);

    // New entities continue after the loaded ids.
    assert_eq!(loaded.create_map_point(Vector3::zeros()), MapPointId(25));
    assert_eq!(
        add_keyframe(&loaded, 1, vec![], Vector3::zeros()),
        KeyFrameId(3)
    );
}

#[test]
fn load_replaces_contents() {
    let (map, _) = populated_map();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bin");
    map.save(&path).unwrap();

    let mut other = VMap::default();
    other.add_camera_parameter(camera());
    other.create_map_point(Vector3::zeros());
    other.load(&path).unwrap();
    assert_eq!(other.num_map_points(), 25);
    assert_eq!(other.cameras().len(), 2);
}

#[test]
fn header_is_sixteen_bytes() {
    let map = VMap::default();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.bin");
    map.save(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..MapFileHeader::SIZE], &[0u8; 16]);

    let loaded = VMap::open(&path).unwrap();
    assert_eq!(loaded.num_keyframes(), 0);
    assert!(loaded.all_map_points_at_keyframe(KeyFrameId(0)).unwrap().is_empty());
}

#[test]
fn truncated_archive_is_corrupt() {
    init();
    let (map, _) = populated_map();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bin");
    map.save(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();

    let mut target = VMap::default();
    target.create_map_point(Vector3::zeros());
    assert!(matches!(target.load(&path), Err(Error::CorruptMap(_))));
    assert_eq!(target.num_map_points(), 1);
}

#[test]
fn trailing_bytes_are_corrupt() {
    let (map, _) = populated_map();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bin");
    map.save(&path).unwrap();
    OpenOptions::new()
        .append(true)
        .open(&path)
        .unwrap()
        .write_all(&[0xff])
        .unwrap();
    assert!(matches!(VMap::open(&path), Err(Error::CorruptMap(_))));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        VMap::open(dir.path().join("missing.bin")),
        Err(Error::Io(_))
    ));
}

fn next_item<T: DeserializeOwned>(reader: &mut impl Read) -> T {
    bincode::deserialize_from(reader).unwrap()
}

#[test]
fn keyframe_table_precedes_vertex_table() {
    let (map, kfs) = populated_map();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bin");
    map.save(&path).unwrap();

    let mut reader = BufReader::new(File::open(&path).unwrap());
    let header: MapFileHeader = next_item(&mut reader);
    assert_eq!(header.num_keyframes, 3);
    let _: BTreeMap<MapPointId, BTreeSet<KeyFrameId>> = next_item(&mut reader);
    let _: BTreeMap<KeyFrameId, FramePoints> = next_item(&mut reader);
    let _: BTreeMap<KeyFrameId, FramePointsInv> = next_item(&mut reader);
    let _: Option<ImageMask> = next_item(&mut reader);
    let _: Vec<u8> = next_item(&mut reader);
    let _: Vec<CameraPinholeParams> = next_item(&mut reader);
    let _: KeyFrameGraph = next_item(&mut reader);
    let keyframe_vertex: BTreeMap<KeyFrameId, VertexKey> = next_item(&mut reader);
    let vertex_keyframe: SecondaryMap<VertexKey, KeyFrameId> = next_item(&mut reader);

    assert_eq!(keyframe_vertex.keys().copied().collect::<Vec<_>>(), kfs);
    assert_eq!(vertex_keyframe.len(), kfs.len());
    for (kf, vertex) in keyframe_vertex {
        assert_eq!(vertex_keyframe.get(vertex), Some(&kf));
    }
}
