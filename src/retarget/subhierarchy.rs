use nalgebra::{Point3, Vector3};

use super::corrective::rescale_joint_group_drivers;
use super::types::ScaleFactors;
use crate::context::RigContext;
use crate::correction::{Recentered, recenter};
use crate::error::RigResult;
use crate::project::{EyeAssemblySettings, MouthSettings};
use crate::scene::Scene;
use crate::{log_debug, log_info, log_warn};

fn child_world_positions(scene: &Scene, node: usize) -> Vec<(usize, Point3<f64>)> {
    scene
        .children(node)
        .iter()
        .map(|&child| (child, scene.world_position(child)))
        .collect()
}

/// Moves a node, zeroes its rotation, then puts its children back where they
/// were with zero rotation.
fn place_preserving_children(
    scene: &mut Scene,
    node: usize,
    position: Point3<f64>,
    children: &[(usize, Point3<f64>)],
) -> RigResult<()> {
    scene.set_world_position(node, position)?;
    scene.set_local_rotation(node, Vector3::zeros());
    for &(child, child_position) in children {
        scene.set_world_position(child, child_position)?;
        scene.set_local_rotation(child, Vector3::zeros());
    }
    Ok(())
}

// ─── Eye assemblies ───────────────────────────────────────────────────────────

/// Anchors every joint of an eye assembly on the eye mesh's bounding-box center.
///
/// Returns the number of joints moved; a missing eye mesh skips the assembly.
pub fn align_eye_assembly(ctx: &mut RigContext, assembly: &EyeAssemblySettings, lod: u16) -> RigResult<usize> {
    let mesh_name = assembly.mesh_name(lod);
    let Some(center) = ctx
        .scene
        .mesh_by_name(&mesh_name)
        .and_then(|mesh| ctx.scene.mesh_bounds_center(mesh))
    else {
        log_warn!("Eye mesh not found or empty, skipping eye joints: {}", mesh_name);
        return Ok(0);
    };

    let mut aligned = 0;
    for name in &assembly.joints {
        let Some(node) = ctx.joint_node_by_name(name) else {
            log_warn!("Eye joint not found: {}", name);
            continue;
        };
        let children = child_world_positions(&ctx.scene, node);
        place_preserving_children(&mut ctx.scene, node, center, &children)?;
        ctx.propagate_corrected_translations(node);
        aligned += 1;
    }
    log_info!("Aligned {} joints on eye mesh {}", aligned, mesh_name);
    Ok(aligned)
}

// ─── Recentering ──────────────────────────────────────────────────────────────

/// Re-anchors every node of a subtree that has more than one child to the
/// middle of its children, deepest nodes first.
///
/// Returns the number of nodes moved.
pub fn recenter_subtree(scene: &mut Scene, node: usize) -> RigResult<usize> {
    let mut moved = 0;
    for child in scene.children(node).to_vec() {
        moved += recenter_subtree(scene, child)?;
    }

    let children = child_world_positions(scene, node);
    let positions: Vec<Point3<f64>> = children.iter().map(|(_, position)| *position).collect();
    let Some(Recentered {
        node_position,
        offset,
        children: restored,
    }) = recenter(&scene.world_position(node), &positions)
    else {
        return Ok(moved);
    };

    let restore: Vec<(usize, Point3<f64>)> = children
        .iter()
        .map(|(child, _)| *child)
        .zip(restored)
        .collect();
    place_preserving_children(scene, node, node_position, &restore)?;
    log_debug!(
        "Recentered node {} (offset {:.4}, {:.4}, {:.4})",
        node,
        offset.x,
        offset.y,
        offset.z
    );
    Ok(moved + 1)
}

// ─── Mouth ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MouthOutcome {
    pub recentered_nodes: usize,
    pub rescaled_groups: usize,
}

/// X extent and the Z of the right-most point.
#[derive(Debug, Clone, Copy)]
struct Span {
    min_x: f64,
    max_x: f64,
    z_at_max: f64,
}

impl Span {
    fn of(points: impl Iterator<Item = Vector3<f64>>) -> Option<Self> {
        points.fold(None, |span: Option<Span>, p| {
            Some(match span {
                None => Span {
                    min_x: p.x,
                    max_x: p.x,
                    z_at_max: p.z,
                },
                Some(mut span) => {
                    if p.x > span.max_x {
                        span.max_x = p.x;
                        span.z_at_max = p.z;
                    }
                    span.min_x = span.min_x.min(p.x);
                    span
                }
            })
        })
    }

    fn width(&self) -> f64 {
        self.max_x - self.min_x
    }
}

/// Re-seats the mouth joint pair to the corrected lip width.
///
/// The upper joint's children give the lip span before (archive neutral) and
/// after retargeting. Both mouth joints shift along Z so the span/depth ratio
/// is kept, children stay in place, multi-child children are recentered and
/// the drivers of the whole pair are rescaled by the span ratio.
pub fn process_mouth(ctx: &mut RigContext, settings: &MouthSettings, original_translations: &[Vector3<f64>]) -> RigResult<Option<MouthOutcome>> {
    let (Some(upper), Some(lower)) = (
        ctx.joint_node_by_name(&settings.upper_joint),
        ctx.joint_node_by_name(&settings.lower_joint),
    ) else {
        log_warn!(
            "Mouth joints not found: {}, {}",
            settings.upper_joint,
            settings.lower_joint
        );
        return Ok(None);
    };

    let upper_children = child_world_positions(&ctx.scene, upper);
    let lower_children = child_world_positions(&ctx.scene, lower);
    if upper_children.is_empty() || lower_children.is_empty() {
        log_warn!("Mouth joints have no children, skipping mouth pass");
        return Ok(None);
    }

    let child_joints: Vec<usize> = upper_children
        .iter()
        .filter_map(|(child, _)| ctx.node_joint(*child))
        .collect();
    let old = Span::of(child_joints.iter().filter_map(|&j| original_translations.get(j).copied()));
    let new = Span::of(child_joints.iter().filter_map(|&j| ctx.corrected_translations.get(j).copied()));
    let (Some(old), Some(new)) = (old, new) else {
        log_warn!("Upper mouth children are not rig joints, skipping mouth pass");
        return Ok(None);
    };
    if old.z_at_max == 0.0 || old.width() == 0.0 {
        log_warn!("Degenerate original lip span, skipping mouth pass");
        return Ok(None);
    }

    let depth_ratio = old.width() / old.z_at_max;
    let shift = new.z_at_max - new.width() / depth_ratio;
    let scale = new.width() / old.width();

    for node in [upper, lower] {
        let mut position = ctx.scene.world_position(node);
        position.z += shift;
        ctx.scene.set_world_position(node, position)?;
        ctx.scene.set_local_rotation(node, Vector3::zeros());
    }

    let mut outcome = MouthOutcome::default();
    for (child, position) in upper_children.iter().chain(&lower_children) {
        ctx.scene.set_world_position(*child, *position)?;
        ctx.scene.set_local_rotation(*child, Vector3::zeros());
        if ctx.scene.children(*child).len() > 1 {
            outcome.recentered_nodes += recenter_subtree(&mut ctx.scene, *child)?;
        }
        if let Some(joint) = ctx.node_joint(*child) {
            outcome.rescaled_groups +=
                rescale_joint_group_drivers(&mut ctx.archive, joint, ScaleFactors::uniform(scale))?;
        }
    }
    for node in [upper, lower] {
        if let Some(joint) = ctx.node_joint(node) {
            outcome.rescaled_groups +=
                rescale_joint_group_drivers(&mut ctx.archive, joint, ScaleFactors::uniform(scale))?;
        }
    }

    ctx.propagate_corrected_translations(upper);
    ctx.propagate_corrected_translations(lower);
    log_info!(
        "Mouth pass shifted joints by {:.4} along Z, driver scale {:.4}",
        shift,
        scale
    );
    Ok(Some(outcome))
}
