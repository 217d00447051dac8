//! k-means content clustering.
//!
//! A cluster model holds one centroid table per speaker. Blending pulls each
//! content frame towards its nearest centroid, trading fidelity to the
//! source speaker's articulation for robustness of the target timbre.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SvcError};
use crate::inference::ContentFeatures;

pub trait ClusterModel: Send + Sync + 'static {
    /// Nearest centroid to `frame` in `speaker`'s table, if the speaker has one.
    fn nearest(&self, speaker: &str, frame: &[f32]) -> Option<&[f32]>;
}

/// Blend `content` towards centroids: `frame·(1−ratio) + centroid·ratio`.
///
/// Frames whose speaker has no table are left untouched. Returns the number
/// of frames blended.
pub fn blend_content(
    content: &mut ContentFeatures,
    cluster: &dyn ClusterModel,
    speaker: &str,
    ratio: f32,
) -> usize {
    let mut blended = 0;
    for i in 0..content.frames() {
        let Some(centroid) = cluster.nearest(speaker, content.frame(i)) else {
            continue;
        };
        if centroid.len() != content.dim() {
            continue;
        }
        for (v, c) in content.frame_mut(i).iter_mut().zip(centroid) {
            *v = *v * (1.0 - ratio) + c * ratio;
        }
        blended += 1;
    }
    blended
}

/// In-memory centroid tables, loadable from JSON
/// (`{"speaker": [[f32; dim], ...], ...}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KMeansCluster {
    centers: HashMap<String, Vec<Vec<f32>>>,
}

impl KMeansCluster {
    pub fn new(centers: HashMap<String, Vec<Vec<f32>>>) -> Self {
        Self { centers }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cluster: Self = serde_json::from_str(&raw)?;
        for (speaker, table) in &cluster.centers {
            let dim = table.first().map(Vec::len).unwrap_or(0);
            if table.iter().any(|c| c.len() != dim) {
                return Err(SvcError::config(format!(
                    "cluster table for '{speaker}' has ragged centroids"
                )));
            }
        }
        info!(
            path = %path.display(),
            speakers = cluster.centers.len(),
            "cluster model loaded"
        );
        Ok(cluster)
    }

    pub fn speakers(&self) -> impl Iterator<Item = &str> {
        self.centers.keys().map(String::as_str)
    }
}

impl ClusterModel for KMeansCluster {
    fn nearest(&self, speaker: &str, frame: &[f32]) -> Option<&[f32]> {
        self.centers
            .get(speaker)?
            .iter()
            .filter(|c| c.len() == frame.len())
            .min_by(|a, b| sq_dist(a, frame).total_cmp(&sq_dist(b, frame)))
            .map(Vec::as_slice)
    }
}

fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
