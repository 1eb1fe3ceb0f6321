//! In-memory rig archive and its persistence.
//!
//! The archive is the authoritative source of joint hierarchy, neutral pose,
//! skin weights, LOD membership and corrective drivers. Positions are stored
//! in single precision; getters widen to `f64` and setters truncate.

mod types;

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{RigError, RigResult};

pub use types::{CHANNELS_PER_JOINT, JointGroup, Lod, RawControl, RigJoint, RigMesh, VertexSkin};
use types::{ARCHIVE_MAGIC, ARCHIVE_VERSION};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RigArchive {
    pub name: String,
    pub joints: Vec<RigJoint>,
    pub meshes: Vec<RigMesh>,
    pub lods: Vec<Lod>,
    pub joint_groups: Vec<JointGroup>,
    pub raw_controls: Vec<RawControl>,
}

fn widen(value: [f32; 3]) -> Vector3<f64> {
    Vector3::new(value[0] as f64, value[1] as f64, value[2] as f64)
}

fn narrow(value: &Vector3<f64>) -> [f32; 3] {
    [value.x as f32, value.y as f32, value.z as f32]
}

impl RigArchive {
    // ─── Joints ───────────────────────────────────────────────────────────────

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn joint_name(&self, joint: usize) -> Option<&str> {
        self.joints.get(joint).map(|j| j.name.as_str())
    }

    pub fn joint_parent_index(&self, joint: usize) -> Option<usize> {
        self.joints
            .get(joint)
            .and_then(|j| j.parent)
            .map(usize::from)
    }

    pub fn joint_index_by_name(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == name)
    }

    pub fn neutral_joint_translation(&self, joint: usize) -> Option<Vector3<f64>> {
        self.joints.get(joint).map(|j| widen(j.neutral_translation))
    }

    pub fn neutral_joint_rotation(&self, joint: usize) -> Option<Vector3<f64>> {
        self.joints.get(joint).map(|j| widen(j.neutral_rotation))
    }

    pub fn neutral_joint_translations(&self) -> Vec<Vector3<f64>> {
        self.joints
            .iter()
            .map(|j| widen(j.neutral_translation))
            .collect()
    }

    /// Replaces every joint's neutral translation in one batch.
    pub fn set_neutral_joint_translations(&mut self, translations: &[Vector3<f64>]) -> RigResult<()> {
        if translations.len() != self.joints.len() {
            return Err(RigError::precondition(format!(
                "neutral translation count {} does not match joint count {}",
                translations.len(),
                self.joints.len()
            )));
        }
        for (joint, translation) in self.joints.iter_mut().zip(translations) {
            joint.neutral_translation = narrow(translation);
        }
        Ok(())
    }

    // ─── Meshes ───────────────────────────────────────────────────────────────

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn mesh_name(&self, mesh: usize) -> Option<&str> {
        self.meshes.get(mesh).map(|m| m.name.as_str())
    }

    pub fn vertex_position_count(&self, mesh: usize) -> usize {
        self.meshes.get(mesh).map_or(0, |m| m.positions.len())
    }

    pub fn vertex_positions(&self, mesh: usize) -> Vec<Point3<f64>> {
        self.meshes.get(mesh).map_or_else(Vec::new, |m| {
            m.positions.iter().map(|p| Point3::from(widen(*p))).collect()
        })
    }

    /// One coordinate axis (0 = X, 1 = Y, 2 = Z) of every vertex of a mesh.
    pub fn vertex_position_axis(&self, mesh: usize, axis: usize) -> Vec<f32> {
        self.meshes.get(mesh).map_or_else(Vec::new, |m| {
            m.positions
                .iter()
                .filter_map(|p| p.get(axis).copied())
                .collect()
        })
    }

    pub fn set_vertex_positions(&mut self, mesh: usize, positions: &[Point3<f64>]) -> RigResult<()> {
        let target = self
            .meshes
            .get_mut(mesh)
            .ok_or_else(|| RigError::lookup("archive mesh", mesh.to_string()))?;
        if target.positions.len() != positions.len() {
            return Err(RigError::precondition(format!(
                "mesh '{}' has {} vertices, got {}",
                target.name,
                target.positions.len(),
                positions.len()
            )));
        }
        target.positions = positions.iter().map(|p| narrow(&p.coords)).collect();
        Ok(())
    }

    pub fn skin_weight_values(&self, mesh: usize, vertex: usize) -> &[f32] {
        self.meshes
            .get(mesh)
            .and_then(|m| m.skin.get(vertex))
            .map(|s| s.weights.as_slice())
            .unwrap_or(&[])
    }

    pub fn skin_weight_joint_indices(&self, mesh: usize, vertex: usize) -> &[u16] {
        self.meshes
            .get(mesh)
            .and_then(|m| m.skin.get(vertex))
            .map(|s| s.joint_indices.as_slice())
            .unwrap_or(&[])
    }

    /// Removes a mesh and renumbers the mesh references of every LOD.
    pub fn delete_mesh(&mut self, mesh: usize) -> RigResult<RigMesh> {
        if mesh >= self.meshes.len() {
            return Err(RigError::lookup("archive mesh", mesh.to_string()));
        }
        let removed = self.meshes.remove(mesh);
        let removed_index = mesh as u16;
        for lod in &mut self.lods {
            lod.mesh_indices.retain(|&index| index != removed_index);
            for index in &mut lod.mesh_indices {
                if *index > removed_index {
                    *index -= 1;
                }
            }
        }
        Ok(removed)
    }

    // ─── LODs ─────────────────────────────────────────────────────────────────

    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    pub fn mesh_indices_for_lod(&self, lod: usize) -> &[u16] {
        self.lods
            .get(lod)
            .map(|l| l.mesh_indices.as_slice())
            .unwrap_or(&[])
    }

    /// Keeps only the listed LODs, in the listed order.
    pub fn retain_lods(&mut self, lods: &[u16]) {
        let kept = lods
            .iter()
            .filter_map(|&lod| self.lods.get(lod as usize).cloned())
            .collect();
        self.lods = kept;
    }

    // ─── Joint groups ─────────────────────────────────────────────────────────

    pub fn joint_group_count(&self) -> usize {
        self.joint_groups.len()
    }

    pub fn joint_group(&self, group: usize) -> Option<&JointGroup> {
        self.joint_groups.get(group)
    }

    pub fn set_joint_group_values(&mut self, group: usize, values: Vec<f32>) -> RigResult<()> {
        let target = self
            .joint_groups
            .get_mut(group)
            .ok_or_else(|| RigError::lookup("joint group", group.to_string()))?;
        let expected = target.input_indices.len() * target.output_indices.len();
        if values.len() != expected {
            return Err(RigError::precondition(format!(
                "joint group {group} expects {expected} values, got {}",
                values.len()
            )));
        }
        target.values = values;
        Ok(())
    }

    // ─── Raw controls ─────────────────────────────────────────────────────────

    pub fn raw_control_count(&self) -> usize {
        self.raw_controls.len()
    }

    pub fn raw_control_name(&self, control: usize) -> Option<&str> {
        self.raw_controls.get(control).map(|c| c.name.as_str())
    }

    // ─── Validation ───────────────────────────────────────────────────────────

    /// Checks the structural invariants every later phase relies on.
    pub fn validate(&self) -> RigResult<()> {
        let joint_count = self.joints.len();
        for (index, joint) in self.joints.iter().enumerate() {
            if let Some(parent) = joint.parent
                && (parent as usize >= joint_count || parent as usize == index)
            {
                return Err(RigError::precondition(format!(
                    "joint '{}' has invalid parent index {parent}",
                    joint.name
                )));
            }
        }

        for mesh in &self.meshes {
            if !mesh.skin.is_empty() && mesh.skin.len() != mesh.positions.len() {
                return Err(RigError::precondition(format!(
                    "mesh '{}' has {} skin entries for {} vertices",
                    mesh.name,
                    mesh.skin.len(),
                    mesh.positions.len()
                )));
            }
            for (vertex, skin) in mesh.skin.iter().enumerate() {
                if skin.weights.len() != skin.joint_indices.len() {
                    return Err(RigError::precondition(format!(
                        "mesh '{}' vertex {vertex} has {} weights for {} joints",
                        mesh.name,
                        skin.weights.len(),
                        skin.joint_indices.len()
                    )));
                }
                if let Some(joint) = skin.joint_indices.iter().find(|&&j| j as usize >= joint_count) {
                    return Err(RigError::precondition(format!(
                        "mesh '{}' vertex {vertex} references joint {joint}",
                        mesh.name
                    )));
                }
            }
        }

        for (index, lod) in self.lods.iter().enumerate() {
            if let Some(mesh) = lod.mesh_indices.iter().find(|&&m| m as usize >= self.meshes.len()) {
                return Err(RigError::precondition(format!(
                    "LOD {index} references mesh {mesh}"
                )));
            }
        }

        for (index, group) in self.joint_groups.iter().enumerate() {
            let expected = group.input_indices.len() * group.output_indices.len();
            if group.values.len() != expected {
                return Err(RigError::precondition(format!(
                    "joint group {index} holds {} values for {} inputs x {} outputs",
                    group.values.len(),
                    group.input_indices.len(),
                    group.output_indices.len()
                )));
            }
        }
        Ok(())
    }

    // ─── Persistence ──────────────────────────────────────────────────────────

    /// Reads a binary archive from a stream and validates it.
    pub fn read<R: Read>(mut reader: R) -> RigResult<Self> {
        let mut header = [0u8; 6];
        reader.read_exact(&mut header)?;
        if header[..4] != ARCHIVE_MAGIC {
            return Err(RigError::precondition("stream is not a rig archive"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != ARCHIVE_VERSION {
            return Err(RigError::precondition(format!(
                "unsupported rig archive version {version}"
            )));
        }
        let archive: RigArchive = bincode::deserialize_from(reader)?;
        archive.validate()?;
        Ok(archive)
    }

    /// Writes the archive to a stream in the binary container format.
    pub fn write<W: Write>(&self, mut writer: W) -> RigResult<()> {
        writer.write_all(&ARCHIVE_MAGIC)?;
        writer.write_all(&ARCHIVE_VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads an archive from disk; a `.json` extension selects the JSON form.
    pub fn load(path: &Path) -> RigResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        if is_json_path(path) {
            let archive: RigArchive = serde_json::from_reader(reader)?;
            archive.validate()?;
            Ok(archive)
        } else {
            Self::read(reader)
        }
    }

    /// Saves an archive to disk; a `.json` extension selects the JSON form.
    pub fn save(&self, path: &Path) -> RigResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        if is_json_path(path) {
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
            Ok(())
        } else {
            self.write(writer)
        }
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn joint(name: &str, parent: Option<u16>, translation: [f32; 3]) -> RigJoint {
        RigJoint {
            name: name.to_string(),
            parent,
            neutral_translation: translation,
            neutral_rotation: [0.0; 3],
        }
    }

    pub(crate) fn mesh(name: &str, positions: Vec<[f32; 3]>) -> RigMesh {
        RigMesh {
            name: name.to_string(),
            positions,
            skin: Vec::new(),
        }
    }

    fn sample_archive() -> RigArchive {
        RigArchive {
            name: "sample".to_string(),
            joints: vec![
                joint("root", None, [0.0, 0.0, 0.0]),
                joint("jaw", Some(0), [0.0, -1.0, 0.5]),
            ],
            meshes: vec![
                mesh("head_lod0_mesh", vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]),
                mesh("teeth_lod0_mesh", vec![[0.0, 1.0, 0.0]]),
                mesh("head_lod1_mesh", vec![[0.0, 0.0, 1.0]]),
            ],
            lods: vec![
                Lod { mesh_indices: vec![0, 1] },
                Lod { mesh_indices: vec![2] },
            ],
            joint_groups: vec![JointGroup {
                joint_indices: vec![1],
                input_indices: vec![0, 1],
                output_indices: vec![9],
                values: vec![0.5, 0.25],
            }],
            raw_controls: vec![
                RawControl { name: "jawOpen".to_string() },
                RawControl { name: "jawLeft".to_string() },
            ],
        }
    }

    #[test]
    fn given_archive_when_writing_and_reading_binary_then_content_is_preserved() {
        let archive = sample_archive();
        let mut bytes = Vec::new();
        archive.write(&mut bytes).expect("write archive");
        assert_eq!(&bytes[..4], b"RIGA");

        let restored = RigArchive::read(bytes.as_slice()).expect("read archive");
        assert_eq!(restored, archive);
    }

    #[test]
    fn given_foreign_stream_when_reading_then_precondition_error_is_returned() {
        let result = RigArchive::read(&b"GLTF\x01\x00rest"[..]);
        assert!(matches!(result, Err(RigError::Precondition(_))));
    }

    #[test]
    fn given_json_path_when_saving_and_loading_then_json_form_is_used() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rig.json");
        let archive = sample_archive();
        archive.save(&path).expect("save json");

        let text = std::fs::read_to_string(&path).expect("read json");
        assert!(text.contains("\"jawOpen\""));
        assert_eq!(RigArchive::load(&path).expect("load json"), archive);
    }

    #[test]
    fn given_mesh_in_first_lod_when_deleting_then_later_lod_indices_shift_down() {
        let mut archive = sample_archive();
        let removed = archive.delete_mesh(1).expect("delete teeth");
        assert_eq!(removed.name, "teeth_lod0_mesh");
        assert_eq!(archive.mesh_indices_for_lod(0), &[0]);
        assert_eq!(archive.mesh_indices_for_lod(1), &[1]);
        assert_eq!(archive.mesh_name(1), Some("head_lod1_mesh"));
    }

    #[test]
    fn given_short_value_array_when_setting_group_values_then_precondition_error_is_returned() {
        let mut archive = sample_archive();
        let result = archive.set_joint_group_values(0, vec![1.0]);
        assert!(matches!(result, Err(RigError::Precondition(_))));
        assert_eq!(archive.joint_groups[0].values, vec![0.5, 0.25]);
    }

    #[test]
    fn given_malformed_group_when_validating_then_invariant_violation_is_reported() {
        let mut archive = sample_archive();
        archive.joint_groups[0].values.push(1.0);
        let error = archive.validate().expect_err("value size mismatch");
        assert!(error.to_string().contains("joint group 0"));
    }

    #[test]
    fn given_translations_when_setting_neutral_pose_then_values_are_truncated_to_f32() {
        let mut archive = sample_archive();
        archive
            .set_neutral_joint_translations(&[Vector3::new(0.1, 0.2, 0.3), Vector3::new(1.0, 2.0, 3.0)])
            .expect("two joints");
        assert_eq!(archive.joints[0].neutral_translation, [0.1f32, 0.2, 0.3]);
        assert!(archive.set_neutral_joint_translations(&[Vector3::zeros()]).is_err());
    }

    #[test]
    fn given_mesh_when_reading_axis_then_single_coordinate_is_returned() {
        let archive = sample_archive();
        assert_eq!(archive.vertex_position_axis(0, 0), vec![0.0, 1.0]);
        assert!(archive.vertex_position_axis(9, 0).is_empty());
    }

    #[test]
    fn given_lod_list_when_retaining_then_only_listed_lods_remain() {
        let mut archive = sample_archive();
        archive.retain_lods(&[1]);
        assert_eq!(archive.lod_count(), 1);
        assert_eq!(archive.mesh_indices_for_lod(0), &[2]);
    }
}
