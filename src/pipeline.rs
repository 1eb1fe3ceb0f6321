use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::bake::{BakeReport, bake_poses};
use crate::context::RigContext;
use crate::logging::ResultExt;
use crate::project::ProjectSettings;
use crate::retarget::{RetargetReport, retarget};
use crate::rig::RigArchive;
use crate::scene::{load_scene, save_scene_glb};
use crate::{log_info, log_warn};

/// Outcome of one retarget-and-bake run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub archive_name: String,
    pub output_archive_path: PathBuf,
    pub output_scene_path: PathBuf,
    pub diagnostic_path: PathBuf,
    pub retarget: RetargetReport,
    pub bake: Option<BakeReport>,
    /// Why baking did not run, when it was enabled but skipped.
    pub bake_skipped: Option<String>,
}

// ─── Diagnostic log ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RunDiagnosticLog<'a> {
    generated_at: String,
    archive_path: String,
    scene_path: String,
    scene_node_count: usize,
    scene_meshes: Vec<String>,
    settings: &'a ProjectSettings,
    report: &'a RunReport,
}

fn write_run_diagnostic_log(
    path: &Path,
    archive_path: &Path,
    scene_path: &Path,
    ctx: &RigContext,
    settings: &ProjectSettings,
    report: &RunReport,
) -> Result<()> {
    let log = RunDiagnosticLog {
        generated_at: jiff::Timestamp::now().to_string(),
        archive_path: archive_path.display().to_string(),
        scene_path: scene_path.display().to_string(),
        scene_node_count: ctx.scene.node_count(),
        scene_meshes: ctx.scene.mesh_names().map(ToOwned::to_owned).collect(),
        settings,
        report,
    };
    let content = serde_json::to_string_pretty(&log).context("failed to serialize run diagnostic log")?;
    fs::write(path, content)
        .with_context(|| format!("failed to write run diagnostic log: {}", path.display()))?;
    Ok(())
}

// ─── Entry point ──────────────────────────────────────────────────────────────

/// Retargets a rig archive onto a target head, bakes the pose normal atlas and
/// writes every artifact into `output_dir`.
pub fn run_pipeline(
    archive_path: &Path,
    scene_path: &Path,
    output_dir: &Path,
    settings: &ProjectSettings,
) -> Result<RunReport> {
    let archive = RigArchive::load(archive_path)
        .with_context(|| format!("failed to load rig archive: {}", archive_path.display()))?;
    let scene = load_scene(scene_path)
        .with_context(|| format!("failed to load target scene: {}", scene_path.display()))?;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory: {}", output_dir.display()))?;
    log_info!(
        "Loaded rig '{}' ({} joints, {} meshes) and scene with {} meshes",
        archive.name,
        archive.joint_count(),
        archive.mesh_count(),
        scene.mesh_count()
    );

    let archive_name = archive.name.clone();
    let mut ctx = RigContext::new(archive, scene);
    let retarget_report = retarget(&mut ctx, &settings.retarget)
        .log_error(Some("retarget"))
        .context("failed to retarget rig onto target scene")?;

    let output_archive_path = output_dir.join(&settings.output.archive_file_name);
    ctx.archive
        .save(&output_archive_path)
        .with_context(|| format!("failed to save rig archive: {}", output_archive_path.display()))?;
    let output_scene_path = output_dir.join(&settings.output.scene_file_name);
    save_scene_glb(&ctx.scene, &output_scene_path)
        .with_context(|| format!("failed to write rigged scene: {}", output_scene_path.display()))?;

    let mut bake = None;
    let mut bake_skipped = None;
    if settings.bake.enabled {
        let atlas_path = output_dir.join(&settings.output.atlas_file_name);
        let diff_path = output_dir.join(&settings.output.angle_diff_file_name);
        match bake_poses(&mut ctx, &settings.bake, &atlas_path, &diff_path) {
            Ok(report) => bake = Some(report),
            Err(error) if error.is_lookup() => {
                log_warn!("Skipping pose bake: {}", error);
                bake_skipped = Some(error.to_string());
            }
            Err(error) => {
                return Err(error).log_error(Some("bake")).context("failed to bake pose normals");
            }
        }
    }

    let diagnostic_path = output_dir.join(&settings.output.diagnostic_file_name);
    let report = RunReport {
        archive_name,
        output_archive_path,
        output_scene_path,
        diagnostic_path: diagnostic_path.clone(),
        retarget: retarget_report,
        bake,
        bake_skipped,
    };
    write_run_diagnostic_log(&diagnostic_path, archive_path, scene_path, &ctx, settings, &report)?;
    log_info!("Run diagnostic log written: {}", diagnostic_path.display());

    Ok(report)
}
