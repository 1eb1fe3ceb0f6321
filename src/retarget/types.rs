use nalgebra::{Point3, Vector3};
use serde::Serialize;

/// Per-axis scale factors for corrective driver rescaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ScaleFactors {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn uniform(value: f64) -> Self {
        Self {
            x: value,
            y: value,
            z: value,
        }
    }

    /// Multiplier per output channel of one joint.
    ///
    /// The X factor is squared on every row; existing driver data depends on it.
    pub fn channel_multipliers(&self) -> [f64; 9] {
        let x2 = self.x * self.x;
        [x2, self.y, self.z, x2, self.y, self.z, x2, self.y, self.z]
    }
}

/// Where one joint ended up after retargeting.
#[derive(Debug, Clone, Serialize)]
pub struct JointRetarget {
    pub joint: usize,
    pub name: String,
    pub nearest_vertex: Option<usize>,
    pub delta: [f64; 3],
    pub original_world: [f64; 3],
    pub new_world: [f64; 3],
    pub corrected_translation: [f64; 3],
    /// Joint groups rescaled for this joint's configured driver scale.
    pub rescaled_groups: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SkinTransferReport {
    pub bound_weights: usize,
    pub skipped_meshes: usize,
    pub skipped_joints: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LodReconciliation {
    pub retained_lods: Vec<u16>,
    pub deleted_meshes: Vec<String>,
}

/// Summary of one retarget run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetargetReport {
    pub joint_count: usize,
    pub retargeted_joints: usize,
    pub unmatched_joints: usize,
    pub lods: LodReconciliation,
    pub skin: SkinTransferReport,
    pub eye_joints_aligned: usize,
    pub mouth_processed: bool,
    pub recentered_nodes: usize,
    pub rescaled_groups: usize,
    pub transferred_meshes: usize,
    pub joints: Vec<JointRetarget>,
}

pub(super) fn point_array(point: &Point3<f64>) -> [f64; 3] {
    [point.x, point.y, point.z]
}

pub(super) fn vector_array(vector: &Vector3<f64>) -> [f64; 3] {
    [vector.x, vector.y, vector.z]
}
