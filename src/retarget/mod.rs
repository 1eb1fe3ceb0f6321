//! Fits the rig archive's joints onto the target scene's sculpted surface.
//!
//! Phases run in a fixed order: LOD reconciliation, skeleton construction,
//! skin transfer, joint retargeting, eye and mouth passes, vertex transfer,
//! bind-pose refresh and the batched write-back.

mod corrective;
mod meshes;
mod skeleton;
mod skinning;
mod subhierarchy;
mod types;

use std::collections::HashSet;

use crate::context::RigContext;
use crate::error::RigResult;
use crate::project::RetargetSettings;
use crate::{log_info, log_warn};

pub use corrective::rescale_joint_group_drivers;
pub use skeleton::{RetargetBaseline, retarget_joint, retarget_joints};
pub use subhierarchy::{MouthOutcome, align_eye_assembly, process_mouth, recenter_subtree};
pub use types::{
    JointRetarget, LodReconciliation, RetargetReport, ScaleFactors, SkinTransferReport,
};

pub(crate) use skeleton::{build_skeleton, snapshot_baseline};

/// Runs every retarget phase against the context and writes the corrected
/// neutral translations back to its archive.
pub fn retarget(ctx: &mut RigContext, settings: &RetargetSettings) -> RigResult<RetargetReport> {
    let mut report = RetargetReport {
        joint_count: ctx.archive.joint_count(),
        ..RetargetReport::default()
    };

    let scene_meshes: HashSet<&str> = ctx.scene.mesh_names().collect();
    report.lods = meshes::reconcile_lods(&mut ctx.archive, &scene_meshes)?;
    ctx.retained_lods = report.lods.retained_lods.clone();
    log_info!(
        "Retained LODs {:?}, deleted {} archive meshes",
        ctx.retained_lods,
        report.lods.deleted_meshes.len()
    );

    build_skeleton(ctx)?;
    report.skin = skinning::transfer_skin_weights(ctx)?;
    log_info!("Bound {} skin weights", report.skin.bound_weights);

    let baseline = snapshot_baseline(ctx)?;
    report.joints = retarget_joints(ctx, &baseline, &settings.driver_scales)?;
    report.rescaled_groups = report.joints.iter().map(|record| record.rescaled_groups).sum();
    report.retargeted_joints = report
        .joints
        .iter()
        .filter(|record| record.nearest_vertex.is_some())
        .count();
    report.unmatched_joints = report.joint_count - report.retargeted_joints;

    match ctx.retained_lods.first().copied() {
        Some(lod) => {
            for assembly in &settings.eyes {
                report.eye_joints_aligned += align_eye_assembly(ctx, assembly, lod)?;
            }
        }
        None => log_warn!("No retained LOD, skipping eye alignment"),
    }

    if settings.mouth.enabled
        && let Some(outcome) = process_mouth(ctx, &settings.mouth, &baseline.original_translations)?
    {
        report.mouth_processed = true;
        report.recentered_nodes = outcome.recentered_nodes;
        report.rescaled_groups += outcome.rescaled_groups;
    }

    report.transferred_meshes =
        meshes::transfer_vertex_positions(&mut ctx.archive, &ctx.scene, settings.detect_up_axis)?;
    ctx.restore_neutral_pose();
    ctx.scene.rebind_skin_clusters();
    ctx.write_back()?;

    for record in &mut report.joints {
        if let Some(corrected) = ctx.corrected_translations.get(record.joint) {
            record.corrected_translation = [corrected.x, corrected.y, corrected.z];
        }
    }
    log_info!(
        "Retargeted {} of {} joints",
        report.retargeted_joints,
        report.joint_count
    );
    Ok(report)
}
