use std::collections::HashMap;

use nalgebra::{Matrix4, Point3, Vector3};

use crate::error::RigResult;
use crate::rig::RigArchive;
use crate::scene::Scene;

/// State shared by every phase of one retarget-and-bake run.
///
/// Owns the rig archive and the target scene; dropped when the run ends.
#[derive(Debug, Clone)]
pub struct RigContext {
    pub archive: RigArchive,
    pub scene: Scene,
    /// LOD indices (archive numbering at load time) whose meshes exist in the scene.
    pub retained_lods: Vec<u16>,
    /// Corrected neutral local translation per joint.
    pub corrected_translations: Vec<Vector3<f64>>,
    /// Joint world positions as of the last scene evaluation.
    pub joint_world_positions: Vec<Point3<f64>>,
    joint_nodes: Vec<Option<usize>>,
    node_joints: HashMap<usize, usize>,
}

impl RigContext {
    pub fn new(archive: RigArchive, scene: Scene) -> Self {
        let joint_count = archive.joint_count();
        Self {
            corrected_translations: archive.neutral_joint_translations(),
            joint_world_positions: vec![Point3::origin(); joint_count],
            joint_nodes: vec![None; joint_count],
            node_joints: HashMap::new(),
            retained_lods: Vec::new(),
            archive,
            scene,
        }
    }

    pub(crate) fn link_joint(&mut self, joint: usize, node: usize) {
        if let Some(slot) = self.joint_nodes.get_mut(joint) {
            *slot = Some(node);
            self.node_joints.insert(node, joint);
        }
    }

    /// Scene node created for an archive joint.
    pub fn joint_node(&self, joint: usize) -> Option<usize> {
        self.joint_nodes.get(joint).copied().flatten()
    }

    /// Archive joint represented by a scene node.
    pub fn node_joint(&self, node: usize) -> Option<usize> {
        self.node_joints.get(&node).copied()
    }

    pub fn joint_node_by_name(&self, name: &str) -> Option<usize> {
        self.archive
            .joint_index_by_name(name)
            .and_then(|joint| self.joint_node(joint))
    }

    /// Stores a joint node's current local translation as its corrected neutral.
    pub fn record_corrected_translation(&mut self, node: usize) {
        if let Some(joint) = self.node_joint(node)
            && let Some(slot) = self.corrected_translations.get_mut(joint)
        {
            *slot = self.scene.local_translation(node);
        }
    }

    /// Records the corrected neutral of a node and all of its descendants.
    pub fn propagate_corrected_translations(&mut self, node: usize) {
        for current in self.scene.descendants_depth_first(node) {
            self.record_corrected_translation(current);
        }
    }

    /// Copies joint world positions out of a full scene evaluation.
    pub fn refresh_joint_world_positions(&mut self, worlds: &[Matrix4<f64>]) {
        for (joint, position) in self.joint_world_positions.iter_mut().enumerate() {
            if let Some(world) = self.joint_nodes[joint].and_then(|node| worlds.get(node)) {
                *position = world.transform_point(&Point3::origin());
            }
        }
    }

    /// Returns every joint to its corrected neutral translation with zero rotation.
    pub fn restore_neutral_pose(&mut self) {
        for (joint, node) in self.joint_nodes.iter().enumerate() {
            if let Some(node) = *node {
                self.scene
                    .set_local_translation(node, self.corrected_translations[joint]);
                self.scene.set_local_rotation(node, Vector3::zeros());
            }
        }
    }

    /// Writes the corrected neutral translations back to the archive.
    pub fn write_back(&mut self) -> RigResult<()> {
        self.archive
            .set_neutral_joint_translations(&self.corrected_translations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::tests::joint;

    fn context() -> RigContext {
        let archive = RigArchive {
            joints: vec![
                joint("root", None, [0.0, 1.0, 0.0]),
                joint("child", Some(0), [0.0, 0.0, 2.0]),
            ],
            ..RigArchive::default()
        };
        let mut scene = Scene::default();
        let root = scene.add_node("root", None);
        let child = scene.add_node("child", Some(root));
        let mut ctx = RigContext::new(archive, scene);
        ctx.link_joint(0, root);
        ctx.link_joint(1, child);
        ctx
    }

    #[test]
    fn given_new_context_when_created_then_corrected_translations_start_at_neutral() {
        let ctx = context();
        assert_eq!(ctx.corrected_translations[1], Vector3::new(0.0, 0.0, 2.0));
        assert_eq!(ctx.joint_node_by_name("child"), Some(1));
        assert_eq!(ctx.node_joint(0), Some(0));
    }

    #[test]
    fn given_moved_subtree_when_propagating_then_every_descendant_is_recorded() {
        let mut ctx = context();
        ctx.scene.set_local_translation(0, Vector3::new(5.0, 0.0, 0.0));
        ctx.scene.set_local_translation(1, Vector3::new(0.0, 7.0, 0.0));
        ctx.propagate_corrected_translations(0);
        assert_eq!(ctx.corrected_translations[0], Vector3::new(5.0, 0.0, 0.0));
        assert_eq!(ctx.corrected_translations[1], Vector3::new(0.0, 7.0, 0.0));
    }

    #[test]
    fn given_posed_joints_when_restoring_neutral_then_translation_and_rotation_reset() {
        let mut ctx = context();
        ctx.scene.set_local_translation(1, Vector3::new(9.0, 9.0, 9.0));
        ctx.scene.set_local_rotation(1, Vector3::new(0.0, 45.0, 0.0));
        ctx.restore_neutral_pose();
        assert_eq!(ctx.scene.local_translation(1), Vector3::new(0.0, 0.0, 2.0));
        assert_eq!(ctx.scene.local_rotation(1), Vector3::zeros());
    }

    #[test]
    fn given_evaluated_scene_when_refreshing_then_joint_world_cache_follows() {
        let mut ctx = context();
        ctx.scene.set_local_translation(0, Vector3::new(1.0, 0.0, 0.0));
        ctx.scene.set_local_translation(1, Vector3::new(0.0, 2.0, 0.0));
        let worlds = ctx.scene.evaluate_global_transforms();
        ctx.refresh_joint_world_positions(&worlds);
        assert_eq!(ctx.joint_world_positions[1], Point3::new(1.0, 2.0, 0.0));
    }
}
