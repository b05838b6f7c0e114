use serde::{Deserialize, Serialize};

/// Tunable policy of a [`VMap`](crate::VMap).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct VMapSettings {
    /// A tracked match is accepted only if the landmark reprojects closer than this many
    /// pixels to the matched feature.
    #[serde(default = "default_reprojection_threshold")]
    pub reprojection_threshold: f64,
    /// `track_map_points` only recomputes covisibility when more matches than this were accepted.
    #[serde(default = "default_track_match_threshold")]
    pub track_match_threshold: usize,
    /// Remove the outgoing edges of a keyframe before recomputing its covisibility.
    ///
    /// When disabled, every recompute adds edges on top of the previous ones.
    #[serde(default)]
    pub clear_incident_edges_before_recompute: bool,
}

impl Default for VMapSettings {
    fn default() -> Self {
        Self {
            reprojection_threshold: default_reprojection_threshold(),
            track_match_threshold: default_track_match_threshold(),
            clear_incident_edges_before_recompute: false,
        }
    }
}

fn default_reprojection_threshold() -> f64 {
    4.0
}

fn default_track_match_threshold() -> usize {
    15
}
