use serde::{Deserialize, Serialize};

/// Output channels per joint in a joint group's output space.
pub const CHANNELS_PER_JOINT: u16 = 9;

/// Binary container magic.
pub(super) const ARCHIVE_MAGIC: [u8; 4] = *b"RIGA";

/// Binary container format version.
pub(super) const ARCHIVE_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigJoint {
    pub name: String,
    /// `None` for a root joint.
    pub parent: Option<u16>,
    pub neutral_translation: [f32; 3],
    /// Euler XYZ degrees.
    pub neutral_rotation: [f32; 3],
}

/// Skin influences of one vertex; both arrays have equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexSkin {
    pub weights: Vec<f32>,
    pub joint_indices: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigMesh {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    /// Empty, or one entry per position.
    #[serde(default)]
    pub skin: Vec<VertexSkin>,
}

/// Corrective driver: a sparse linear map from pose inputs to joint channels.
///
/// `values` is output-major: the coefficient for output position `p` and
/// input position `i` lives at `p * input_indices.len() + i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointGroup {
    pub joint_indices: Vec<u16>,
    pub input_indices: Vec<u16>,
    /// Each output encodes `joint_index * 9 + channel`.
    pub output_indices: Vec<u16>,
    pub values: Vec<f32>,
}

impl JointGroup {
    pub fn input_count(&self) -> usize {
        self.input_indices.len()
    }

    pub fn drives_joint(&self, joint: u16) -> bool {
        self.joint_indices.contains(&joint)
    }

    pub fn has_input(&self, input: u16) -> bool {
        self.input_indices.contains(&input)
    }
}

/// A named input slider of the driver system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawControl {
    pub name: String,
}

/// A level of detail: the meshes active at that tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lod {
    pub mesh_indices: Vec<u16>,
}
