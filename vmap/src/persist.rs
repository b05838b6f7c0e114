//! Saving and loading a whole [`VMap`] to a single binary file.
//!
//! A map file starts with a fixed 16 byte [`MapFileHeader`], followed by a bincode stream
//! of the index, the metadata, the covisibility graph (the graph itself, then the keyframe to
//! vertex table, then the vertex to keyframe table) and finally every keyframe and map point
//! in id order.

use crate::covisibility::{CovisibilityGraph, KeyFrameGraph, VertexKey};
use crate::index::{FramePointIndex, FramePoints, FramePointsInv};
use crate::{
    CameraPinholeParams, DescriptorMatcherKind, Error, FeatureDetectorKind, ImageMask, KeyFrame,
    KeyFrameId, MapPoint, MapPointId, Result, VMap,
};
use log::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use slotmap::SecondaryMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// The fixed size prefix of a map file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFileHeader {
    pub num_keyframes: u32,
    pub num_map_points: u32,
    pub descriptor_matcher: DescriptorMatcherKind,
    pub feature_detector: FeatureDetectorKind,
}

impl MapFileHeader {
    /// The encoded size of the header in bytes.
    pub const SIZE: usize = 16;

    /// Reads just the header of the map file at `path`.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        read_item(&mut reader, "header")
    }
}

fn read_item<T: DeserializeOwned>(reader: &mut impl Read, what: &str) -> Result<T> {
    bincode::deserialize_from(reader).map_err(|e| {
        let truncated = matches!(
            &*e,
            bincode::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof
        );
        if truncated {
            Error::CorruptMap(format!("archive ended while reading {}", what))
        } else {
            Error::Codec(e)
        }
    })
}

fn count(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::CorruptMap(format!("too many {} for a map file", what)))
}

impl VMap {
    /// Writes the whole map to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let keyframes = self.keyframes.read();
        let cameras = self.cameras.read();
        let index = self.index.read();
        let map_points = self.map_points.read();
        let covisibility = self.covisibility.read();

        let header = MapFileHeader {
            num_keyframes: count(keyframes.len(), "keyframes")?,
            num_map_points: count(map_points.len(), "map points")?,
            descriptor_matcher: self.descriptor_matcher,
            feature_detector: self.feature_detector,
        };
        info!(
            "saving map with {} keyframes and {} map points to {}",
            header.num_keyframes,
            header.num_map_points,
            path.display()
        );

        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, &header)?;
        bincode::serialize_into(&mut writer, &index.appearances)?;
        bincode::serialize_into(&mut writer, &index.forward)?;
        bincode::serialize_into(&mut writer, &index.backward)?;
        bincode::serialize_into(&mut writer, &*self.mask.read())?;
        bincode::serialize_into(&mut writer, &*self.place_database.read())?;
        bincode::serialize_into(&mut writer, &*cameras)?;
        bincode::serialize_into(&mut writer, &covisibility.graph)?;
        bincode::serialize_into(&mut writer, &covisibility.keyframe_vertex)?;
        bincode::serialize_into(&mut writer, &covisibility.vertex_keyframe)?;
        bincode::serialize_into(&mut writer, &*self.key_values.read())?;
        for keyframe in keyframes.values() {
            bincode::serialize_into(&mut writer, keyframe)?;
        }
        for map_point in map_points.values() {
            bincode::serialize_into(&mut writer, map_point)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Replaces the contents of this map with the map stored at `path`.
    ///
    /// On error the map is left untouched.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);

        let header: MapFileHeader = read_item(&mut reader, "header")?;
        let appearances: BTreeMap<MapPointId, BTreeSet<KeyFrameId>> =
            read_item(&mut reader, "appearances")?;
        let forward: BTreeMap<KeyFrameId, FramePoints> = read_item(&mut reader, "frame points")?;
        let backward: BTreeMap<KeyFrameId, FramePointsInv> =
            read_item(&mut reader, "inverse frame points")?;
        let mask: Option<ImageMask> = read_item(&mut reader, "mask")?;
        let place_database: Vec<u8> = read_item(&mut reader, "place database")?;
        let cameras: Vec<CameraPinholeParams> = read_item(&mut reader, "cameras")?;
        let graph: KeyFrameGraph = read_item(&mut reader, "covisibility graph")?;
        let keyframe_vertex: BTreeMap<KeyFrameId, VertexKey> =
            read_item(&mut reader, "keyframe table")?;
        let vertex_keyframe: SecondaryMap<VertexKey, KeyFrameId> =
            read_item(&mut reader, "vertex table")?;
        let key_values: BTreeMap<String, String> = read_item(&mut reader, "metadata")?;

        let mut keyframes = BTreeMap::new();
        for _ in 0..header.num_keyframes {
            let keyframe: KeyFrame = read_item(&mut reader, "keyframes")?;
            if keyframe.camera_id() >= cameras.len() {
                return Err(Error::InvalidCamera(keyframe.camera_id()));
            }
            keyframes.insert(keyframe.id(), keyframe);
        }
        let mut map_points = BTreeMap::new();
        for _ in 0..header.num_map_points {
            let map_point: MapPoint = read_item(&mut reader, "map points")?;
            map_points.insert(map_point.id(), map_point);
        }
        if reader.read(&mut [0u8; 1])? != 0 {
            return Err(Error::CorruptMap(format!(
                "trailing data after {} keyframes and {} map points",
                header.num_keyframes, header.num_map_points
            )));
        }
        if keyframes.len() != header.num_keyframes as usize
            || map_points.len() != header.num_map_points as usize
        {
            return Err(Error::CorruptMap("duplicate ids in archive".to_owned()));
        }

        let next_keyframe = keyframes.keys().next_back().map_or(0, |kf| kf.0 + 1);
        let next_map_point = map_points.keys().next_back().map_or(0, |mp| mp.0 + 1);

        self.feature_detector = header.feature_detector;
        self.descriptor_matcher = header.descriptor_matcher;
        *self.keyframes.get_mut() = keyframes;
        *self.cameras.get_mut() = cameras;
        *self.index.get_mut() = FramePointIndex {
            appearances,
            forward,
            backward,
        };
        *self.map_points.get_mut() = map_points;
        *self.covisibility.get_mut() = CovisibilityGraph {
            graph,
            vertex_keyframe,
            keyframe_vertex,
        };
        *self.mask.get_mut() = mask;
        *self.key_values.get_mut() = key_values;
        *self.place_database.get_mut() = place_database;
        *self.next_keyframe.get_mut() = next_keyframe;
        *self.next_map_point.get_mut() = next_map_point;

        info!(
            "loaded map with {} keyframes and {} map points from {}",
            header.num_keyframes,
            header.num_map_points,
            path.display()
        );
        Ok(())
    }

    /// Loads a map from `path` into a fresh [`VMap`] with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut map = Self::default();
        map.load(path)?;
        Ok(map)
    }

    /// The header this map would be saved with.
    ///
    /// Fails like [`VMap::save`] when a count does not fit the header.
    pub fn header(&self) -> Result<MapFileHeader> {
        Ok(MapFileHeader {
            num_keyframes: count(self.num_keyframes(), "keyframes")?,
            num_map_points: count(self.num_map_points(), "map points")?,
            descriptor_matcher: self.descriptor_matcher,
            feature_detector: self.feature_detector,
        })
    }
}
