use std::collections::BTreeMap;

use nalgebra::{Point3, Vector3};

use super::corrective::rescale_joint_group_drivers;
use super::types::{JointRetarget, ScaleFactors, point_array, vector_array};
use crate::context::RigContext;
use crate::correction::nearest_vertex;
use crate::error::{RigError, RigResult};
use crate::rig::RigArchive;
use crate::{log_debug, log_warn};

// ─── Skeleton construction ────────────────────────────────────────────────────

/// Creates one scene node per archive joint in its neutral pose.
///
/// Nodes are created first and linked afterwards, so parents may appear after
/// their children in archive order. An existing node with a joint's name is
/// reused.
pub(crate) fn build_skeleton(ctx: &mut RigContext) -> RigResult<usize> {
    let joint_count = ctx.archive.joint_count();
    for joint in 0..joint_count {
        let name = ctx.archive.joint_name(joint).unwrap_or_default().to_owned();
        let node = match ctx.scene.find_node(&name) {
            Some(existing) => {
                log_debug!("Reusing scene node for joint {}", name);
                ctx.scene.set_parent(existing, None)?;
                existing
            }
            None => ctx.scene.add_node(&name, None),
        };
        let translation = ctx.archive.neutral_joint_translation(joint).unwrap_or_else(Vector3::zeros);
        let rotation = ctx.archive.neutral_joint_rotation(joint).unwrap_or_else(Vector3::zeros);
        ctx.scene.set_local_translation(node, translation);
        ctx.scene.set_local_rotation(node, rotation);
        ctx.scene.set_pre_rotation(node, Vector3::zeros());
        ctx.scene.set_local_scale(node, Vector3::new(1.0, 1.0, 1.0));
        ctx.link_joint(joint, node);
    }

    for joint in 0..joint_count {
        let (Some(node), Some(parent)) = (
            ctx.joint_node(joint),
            ctx.archive
                .joint_parent_index(joint)
                .and_then(|parent| ctx.joint_node(parent)),
        ) else {
            continue;
        };
        ctx.scene.set_parent(node, Some(parent))?;
    }
    Ok(joint_count)
}

// ─── Baselines ────────────────────────────────────────────────────────────────

/// Positions captured before any joint moves.
#[derive(Debug, Clone, Default)]
pub struct RetargetBaseline {
    /// Archive neutral vertices of the first mesh.
    pub old_vertices: Vec<Point3<f64>>,
    /// Scene world vertices of the same mesh.
    pub new_vertices: Vec<Point3<f64>>,
    /// World position of every joint in the archive's neutral pose.
    pub original_world: Vec<Point3<f64>>,
    /// Archive neutral local translations.
    pub original_translations: Vec<Vector3<f64>>,
}

pub(crate) fn snapshot_baseline(ctx: &RigContext) -> RigResult<RetargetBaseline> {
    let original_world = (0..ctx.archive.joint_count())
        .map(|joint| {
            ctx.joint_node(joint)
                .map_or_else(Point3::origin, |node| ctx.scene.world_position(node))
        })
        .collect();
    let mut baseline = RetargetBaseline {
        original_world,
        original_translations: ctx.archive.neutral_joint_translations(),
        ..RetargetBaseline::default()
    };

    let Some(mesh_name) = ctx.archive.mesh_name(0) else {
        log_warn!("Rig archive has no meshes, joints keep their neutral placement");
        return Ok(baseline);
    };
    let Some(scene_mesh) = ctx.scene.mesh_by_name(mesh_name) else {
        log_warn!("Scene mesh not found for retarget baseline: {}", mesh_name);
        return Ok(baseline);
    };

    let old_vertices = ctx.archive.vertex_positions(0);
    let new_vertices = ctx.scene.world_control_points(scene_mesh);
    if old_vertices.len() != new_vertices.len() {
        return Err(RigError::precondition(format!(
            "mesh '{mesh_name}' has {} archive vertices but {} scene control points",
            old_vertices.len(),
            new_vertices.len()
        )));
    }
    baseline.old_vertices = old_vertices;
    baseline.new_vertices = new_vertices;
    Ok(baseline)
}

// ─── Joint retargeting ────────────────────────────────────────────────────────

/// Moves one joint by the surface displacement at its nearest vertex.
///
/// Direct children are placed at their original position minus the same
/// displacement; their own step (if any) later overrides this. The joint's
/// neutral rotation becomes its pre-rotation.
pub fn retarget_joint(ctx: &mut RigContext, baseline: &RetargetBaseline, joint: usize) -> RigResult<Option<JointRetarget>> {
    let name = ctx.archive.joint_name(joint).unwrap_or_default().to_owned();
    let Some(node) = ctx.joint_node(joint) else {
        log_warn!("Scene node not found for joint: {}", name);
        return Ok(None);
    };
    let original = baseline
        .original_world
        .get(joint)
        .copied()
        .unwrap_or_else(|| ctx.scene.world_position(node));

    let nearest = nearest_vertex(&baseline.old_vertices, &original);
    let delta = match nearest {
        Some(index) => baseline.new_vertices[index] - baseline.old_vertices[index],
        None => Vector3::zeros(),
    };

    if nearest.is_some() {
        ctx.scene.set_world_position(node, original + delta)?;
        for child in ctx.scene.children(node).to_vec() {
            let child_original = ctx
                .node_joint(child)
                .and_then(|child_joint| baseline.original_world.get(child_joint).copied())
                .unwrap_or_else(|| ctx.scene.world_position(child));
            ctx.scene.set_world_position(child, child_original - delta)?;
        }
    }

    ctx.record_corrected_translation(node);

    let neutral_rotation = ctx.archive.neutral_joint_rotation(joint).unwrap_or_else(Vector3::zeros);
    ctx.scene.set_pre_rotation(node, neutral_rotation);
    ctx.scene.set_local_rotation(node, Vector3::zeros());

    let new_world = ctx.scene.world_position(node);
    log_debug!(
        "Retargeted joint {} by ({:.4}, {:.4}, {:.4})",
        name,
        delta.x,
        delta.y,
        delta.z
    );
    Ok(Some(JointRetarget {
        joint,
        name,
        nearest_vertex: nearest,
        delta: vector_array(&delta),
        original_world: point_array(&original),
        new_world: point_array(&new_world),
        corrected_translation: vector_array(&ctx.corrected_translations[joint]),
        rescaled_groups: 0,
    }))
}

/// Joint indices ordered so every parent precedes its children.
///
/// Joints at equal depth keep their archive order. A parent chain longer than
/// the joint count is a cycle and stops counting there.
pub(crate) fn parent_first_order(archive: &RigArchive) -> Vec<usize> {
    let joint_count = archive.joint_count();
    let depth = |joint: usize| {
        let mut depth = 0;
        let mut current = archive.joint_parent_index(joint);
        while let Some(parent) = current
            && depth < joint_count
        {
            depth += 1;
            current = archive.joint_parent_index(parent);
        }
        depth
    };
    let mut order: Vec<usize> = (0..joint_count).collect();
    order.sort_by_cached_key(|&joint| depth(joint));
    order
}

/// Retargets every joint, parents before children.
///
/// A child's step runs after its parent has moved, so the child's recorded
/// translation is relative to the parent's final placement. Records come back
/// in archive order. A joint listed in `driver_scales` has its corrective
/// drivers rescaled as soon as its own placement is final.
pub fn retarget_joints(
    ctx: &mut RigContext,
    baseline: &RetargetBaseline,
    driver_scales: &BTreeMap<String, [f64; 3]>,
) -> RigResult<Vec<JointRetarget>> {
    let mut records = Vec::with_capacity(ctx.archive.joint_count());
    for joint in parent_first_order(&ctx.archive) {
        let Some(mut record) = retarget_joint(ctx, baseline, joint)? else {
            continue;
        };
        if let Some(&[x, y, z]) = driver_scales.get(&record.name) {
            record.rescaled_groups =
                rescale_joint_group_drivers(&mut ctx.archive, joint, ScaleFactors::new(x, y, z))?;
        }
        records.push(record);
    }
    records.sort_by_key(|record| record.joint);
    Ok(records)
}
