use std::collections::BTreeMap;

use super::types::SkinTransferReport;
use crate::context::RigContext;
use crate::error::{RigError, RigResult};
use crate::{log_debug, log_warn};

/// Binds every positive archive skin weight to the matching scene cluster.
///
/// Meshes or joints missing from the scene are skipped.
pub(super) fn transfer_skin_weights(ctx: &mut RigContext) -> RigResult<SkinTransferReport> {
    let mut report = SkinTransferReport::default();

    for mesh in 0..ctx.archive.mesh_count() {
        let name = ctx.archive.mesh_name(mesh).unwrap_or_default().to_owned();
        let Some(scene_mesh) = ctx.scene.mesh_by_name(&name) else {
            log_warn!("Skipping skin transfer, scene mesh not found: {}", name);
            report.skipped_meshes += 1;
            continue;
        };

        let vertex_count = ctx.archive.vertex_position_count(mesh);
        let control_points = ctx
            .scene
            .mesh(scene_mesh)
            .map_or(0, |data| data.control_points.len());
        if vertex_count != control_points {
            return Err(RigError::precondition(format!(
                "mesh '{name}' has {vertex_count} archive vertices but {control_points} scene control points"
            )));
        }

        let mut by_bone: BTreeMap<usize, Vec<(usize, f64)>> = BTreeMap::new();
        for vertex in 0..vertex_count {
            let weights = ctx.archive.skin_weight_values(mesh, vertex);
            let joints = ctx.archive.skin_weight_joint_indices(mesh, vertex);
            for (&weight, &joint) in weights.iter().zip(joints) {
                if weight <= 0.0 {
                    continue;
                }
                let Some(bone) = ctx.joint_node(joint as usize) else {
                    report.skipped_joints += 1;
                    continue;
                };
                by_bone.entry(bone).or_default().push((vertex, weight as f64));
                report.bound_weights += 1;
            }
        }
        for (bone, weights) in &by_bone {
            ctx.scene.bind_skin_weights(scene_mesh, *bone, weights)?;
        }
        log_debug!("Transferred skin weights for mesh {}", name);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retarget::skeleton::build_skeleton;
    use crate::rig::tests::{joint, mesh};
    use crate::rig::{RigArchive, VertexSkin};
    use crate::scene::Scene;
    use nalgebra::Point3;

    fn context(skin: Vec<VertexSkin>) -> RigContext {
        let mut head = mesh("head_lod0_mesh", vec![[0.0; 3], [1.0, 0.0, 0.0]]);
        head.skin = skin;
        let archive = RigArchive {
            joints: vec![joint("root", None, [0.0; 3]), joint("jaw", Some(0), [0.0, -1.0, 0.0])],
            meshes: vec![head, mesh("teeth_lod0_mesh", vec![[0.0; 3]])],
            ..RigArchive::default()
        };
        let mut scene = Scene::default();
        let node = scene.add_node("head_lod0_mesh", None);
        scene
            .add_mesh(node, vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)], Vec::new(), Vec::new())
            .expect("mesh");
        let mut ctx = RigContext::new(archive, scene);
        build_skeleton(&mut ctx).expect("skeleton");
        ctx
    }

    #[test]
    fn given_zero_and_positive_weights_when_transferring_then_only_positive_weights_bind() {
        let mut ctx = context(vec![
            VertexSkin { weights: vec![1.0], joint_indices: vec![0] },
            VertexSkin { weights: vec![0.0, 0.6], joint_indices: vec![0, 1] },
        ]);

        let report = transfer_skin_weights(&mut ctx).expect("transfer");
        assert_eq!(report.bound_weights, 2);
        assert_eq!(report.skipped_meshes, 1);

        let head = ctx.scene.mesh_by_name("head_lod0_mesh").expect("head");
        let clusters = &ctx.scene.mesh(head).expect("mesh").clusters;
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].indices, vec![0]);
        assert_eq!(clusters[1].indices, vec![1]);
        assert!((clusters[1].weights[0] - 0.6).abs() < 1.0e-6);
    }
}
