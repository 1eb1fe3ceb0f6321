//! Pose simulation and normal-deviation baking.
//!
//! Each pose walks `Idle -> JointsApplied -> MeshEvaluated -> Baked`, and the
//! final pose additionally reaches `Exported`. Row 0 of the atlas is the
//! neutral pose; named pose `i` lands in row `i + 1`.

mod deform;
mod export;
mod normals;

use std::path::{Path, PathBuf};

use nalgebra::{Matrix4, Point3, Vector3};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;

use crate::context::RigContext;
use crate::correction::polygon_normal;
use crate::error::{RigError, RigResult};
use crate::project::BakeSettings;
use crate::rig::CHANNELS_PER_JOINT;
use crate::texture::{AngleAtlas, ReferenceTexture};
use crate::{log_debug, log_info, log_warn};

pub use deform::skin_control_points;
pub use export::{AngleDiff, AngleDiffMap, AngleDiffRecord};
pub use normals::{AngleTriple, FULL_ALPHA, angle_deviation, encode_pixel, quantize_component, quantize_normal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseState {
    Idle,
    JointsApplied,
    MeshEvaluated,
    Baked,
    Exported,
}

#[derive(Debug, Clone, Serialize)]
pub struct BakeReport {
    pub mesh_name: String,
    pub vertex_count: usize,
    pub polygon_count: usize,
    pub pose_count: usize,
    pub atlas_width: u32,
    pub atlas_height: u32,
    pub angle_diff_entries: usize,
    /// Per atlas row, the farthest any joint travelled from its neutral world position.
    pub max_joint_travel: Vec<f64>,
    pub atlas_path: PathBuf,
    pub angle_diff_path: PathBuf,
}

/// Adds the driver deltas of one pose to the joints it moves.
///
/// Translation channels accumulate, rotation channels overwrite. Returns the
/// number of channel writes.
pub fn apply_pose_to_joints(ctx: &mut RigContext, pose: u16) -> usize {
    let channels = CHANNELS_PER_JOINT as usize;
    let mut applied = 0;
    for group in ctx.archive.joint_groups.iter().filter(|group| group.has_input(pose)) {
        let input_count = group.input_count();
        for (slot, _) in group
            .input_indices
            .iter()
            .enumerate()
            .filter(|&(_, &input)| input == pose)
        {
            for (position, &output) in group.output_indices.iter().enumerate() {
                let Some(&value) = group.values.get(position * input_count + slot) else {
                    continue;
                };
                let joint = output as usize / channels;
                let channel = output as usize % channels;
                let Some(node) = ctx.joint_node(joint) else {
                    continue;
                };
                if channel < 3 {
                    let mut translation = ctx.scene.local_translation(node);
                    translation[channel] += value as f64;
                    ctx.scene.set_local_translation(node, translation);
                } else {
                    let mut rotation = ctx.scene.local_rotation(node);
                    rotation[channel % 3] = value as f64;
                    ctx.scene.set_local_rotation(node, rotation);
                }
                applied += 1;
            }
        }
    }
    applied
}

/// Bake-run state: the atlas, the diff record and the neutral baseline.
pub struct PoseBaker {
    mesh: usize,
    state: PoseState,
    atlas: AngleAtlas,
    diffs: AngleDiffRecord,
    reference: Option<ReferenceTexture>,
    neutral_normals: Option<Vec<Vector3<f64>>>,
    last_normals: Vec<Vector3<f64>>,
    evaluated: Vec<Matrix4<f64>>,
    noise_threshold: u32,
    pool: ThreadPool,
}

impl PoseBaker {
    /// Validates the bake mesh and allocates an atlas of
    /// `vertexCount x (poseCount + 1)`.
    pub fn new(ctx: &RigContext, settings: &BakeSettings) -> RigResult<Self> {
        let mesh = ctx
            .scene
            .mesh_by_name(&settings.mesh_name)
            .ok_or_else(|| RigError::lookup("bake mesh", settings.mesh_name.clone()))?;
        let data = ctx
            .scene
            .mesh(mesh)
            .ok_or_else(|| RigError::lookup("bake mesh", settings.mesh_name.clone()))?;
        if !data.has_uvs() {
            return Err(RigError::precondition(format!(
                "bake mesh '{}' has no UV layer",
                data.name
            )));
        }
        if !data.has_skin() {
            log_warn!("Bake mesh {} has no skin clusters; every pose bakes its bind shape", data.name);
        }
        let vertex_count = data.control_points.len();
        if let Some(polygon) = data
            .polygons
            .iter()
            .position(|polygon| polygon.iter().any(|&vertex| vertex >= vertex_count))
        {
            return Err(RigError::precondition(format!(
                "polygon {polygon} of '{}' references a missing control point",
                data.name
            )));
        }

        let width = u32::try_from(vertex_count)
            .map_err(|_| RigError::precondition("bake mesh has too many vertices for an atlas"))?;
        let height = ctx.archive.raw_control_count() as u32 + 1;
        let reference = settings
            .reference_texture_path
            .as_deref()
            .map(|path| ReferenceTexture::load(Path::new(path)))
            .transpose()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.worker_threads)
            .build()?;

        Ok(Self {
            mesh,
            state: PoseState::Idle,
            atlas: AngleAtlas::new(width, height)?,
            diffs: AngleDiffRecord::default(),
            reference,
            neutral_normals: None,
            last_normals: Vec::new(),
            evaluated: Vec::new(),
            noise_threshold: settings.noise_threshold,
            pool,
        })
    }

    pub fn state(&self) -> PoseState {
        self.state
    }

    pub fn atlas(&self) -> &AngleAtlas {
        &self.atlas
    }

    pub fn diffs(&self) -> &AngleDiffRecord {
        &self.diffs
    }

    fn advance(&mut self, from: &[PoseState], to: PoseState) -> RigResult<()> {
        if !from.contains(&self.state) {
            return Err(RigError::precondition(format!(
                "pose state {:?} cannot advance to {:?}",
                self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }

    /// Applies a pose's drivers; `None` keeps the neutral pose.
    pub fn begin_pose(&mut self, ctx: &mut RigContext, pose: Option<u16>) -> RigResult<usize> {
        self.advance(&[PoseState::Idle], PoseState::JointsApplied)?;
        Ok(pose.map_or(0, |pose| apply_pose_to_joints(ctx, pose)))
    }

    /// Re-evaluates every world transform for the posed skeleton.
    pub fn evaluate(&mut self, ctx: &mut RigContext) -> RigResult<()> {
        self.advance(&[PoseState::JointsApplied], PoseState::MeshEvaluated)?;
        self.evaluated = ctx.scene.evaluate_global_transforms();
        ctx.refresh_joint_world_positions(&self.evaluated);
        Ok(())
    }

    /// Skins the bake mesh and writes one atlas row.
    pub fn bake_row(&mut self, ctx: &RigContext, row: u32) -> RigResult<()> {
        self.advance(&[PoseState::MeshEvaluated], PoseState::Baked)?;
        let mesh = ctx
            .scene
            .mesh(self.mesh)
            .ok_or_else(|| RigError::lookup("bake mesh", self.mesh.to_string()))?;
        let positions = skin_control_points(mesh, &self.evaluated);

        let atlas = &self.atlas;
        let diffs = &self.diffs;
        let reference = self.reference.as_ref();
        let neutral = self.neutral_normals.as_deref();
        let threshold = self.noise_threshold;
        let width = atlas.width();

        let normals = self.pool.install(|| {
            mesh.polygons
                .par_iter()
                .enumerate()
                .map(|(index, polygon)| {
                    let [a, b, c] = match polygon.as_slice() {
                        [a, b, c, ..] => [*a, *b, *c],
                        _ => return Vector3::zeros(),
                    };
                    let normal = polygon_normal(&positions[a], &positions[b], &positions[c]);
                    let pose_angles = quantize_normal(&normal);
                    let neutral_angles = neutral.and_then(|normals| normals.get(index)).map(quantize_normal);
                    let angles = angle_deviation(pose_angles, neutral_angles, threshold);

                    for vertex in [a, b, c] {
                        let column = vertex as u32;
                        if angles != [0; 3]
                            && let Some(expected) =
                                reference.and_then(|texture| texture.lookup(column % width, column / width))
                        {
                            diffs.insert(
                                row,
                                vertex,
                                AngleDiff {
                                    x: angles[0] as f64 - expected.x,
                                    y: angles[1] as f64 - expected.y,
                                    z: angles[2] as f64 - expected.z,
                                },
                            );
                        }
                        atlas.write_pixel(row, column, encode_pixel(angles));
                    }
                    normal
                })
                .collect()
        });
        self.last_normals = normals;
        log_debug!("Baked atlas row {}", row);
        Ok(())
    }

    /// Keeps the normals of the last baked row as the neutral baseline.
    pub fn capture_neutral_baseline(&mut self) {
        self.neutral_normals = Some(self.last_normals.clone());
    }

    /// Persists the atlas and the diff record, then frees the atlas buffer.
    pub fn export(&mut self, atlas_path: &Path, diff_path: &Path) -> RigResult<()> {
        self.advance(&[PoseState::Baked], PoseState::Exported)?;
        self.atlas.save_png(atlas_path)?;
        self.diffs.save_json(diff_path)?;
        self.atlas.release();
        log_info!(
            "Exported normal atlas {} and angle diffs {}",
            atlas_path.display(),
            diff_path.display()
        );
        Ok(())
    }

    /// Returns the skeleton to its corrected neutral pose.
    pub fn finish_pose(&mut self, ctx: &mut RigContext) -> RigResult<()> {
        self.advance(&[PoseState::Baked, PoseState::Exported], PoseState::Idle)?;
        ctx.restore_neutral_pose();
        Ok(())
    }
}

fn joint_travel(neutral: &[Point3<f64>], posed: &[Point3<f64>]) -> f64 {
    neutral
        .iter()
        .zip(posed)
        .map(|(from, to)| (to - from).norm())
        .fold(0.0, f64::max)
}

/// Bakes the neutral row and every named pose, exporting after the last one.
pub fn bake_poses(ctx: &mut RigContext, settings: &BakeSettings, atlas_path: &Path, diff_path: &Path) -> RigResult<BakeReport> {
    let mut baker = PoseBaker::new(ctx, settings)?;
    let pose_count = ctx.archive.raw_control_count();
    let final_row = pose_count as u32;
    log_info!(
        "Baking {} poses on {} ({} atlas columns)",
        pose_count,
        settings.mesh_name,
        baker.atlas().width()
    );

    baker.begin_pose(ctx, None)?;
    baker.evaluate(ctx)?;
    let neutral_joints = ctx.joint_world_positions.clone();
    let mut max_joint_travel = Vec::with_capacity(pose_count + 1);
    max_joint_travel.push(0.0);
    baker.bake_row(ctx, 0)?;
    baker.capture_neutral_baseline();
    if final_row == 0 {
        baker.export(atlas_path, diff_path)?;
    }
    baker.finish_pose(ctx)?;

    for pose in 0..pose_count {
        let row = pose as u32 + 1;
        let input = u16::try_from(pose)
            .map_err(|_| RigError::precondition(format!("pose index {pose} exceeds the driver input range")))?;
        let applied = baker.begin_pose(ctx, Some(input))?;
        log_debug!(
            "Pose {} ({}) moved {} joint channels",
            pose,
            ctx.archive.raw_control_name(pose).unwrap_or_default(),
            applied
        );
        baker.evaluate(ctx)?;
        max_joint_travel.push(joint_travel(&neutral_joints, &ctx.joint_world_positions));
        baker.bake_row(ctx, row)?;
        if row == final_row {
            baker.export(atlas_path, diff_path)?;
        }
        baker.finish_pose(ctx)?;
    }

    let mesh = ctx.scene.mesh(baker.mesh);
    Ok(BakeReport {
        mesh_name: settings.mesh_name.clone(),
        vertex_count: mesh.map_or(0, |m| m.control_points.len()),
        polygon_count: mesh.map_or(0, |m| m.polygons.len()),
        pose_count,
        atlas_width: baker.atlas().width(),
        atlas_height: baker.atlas().height(),
        angle_diff_entries: baker.diffs().len(),
        max_joint_travel,
        atlas_path: atlas_path.to_path_buf(),
        angle_diff_path: diff_path.to_path_buf(),
    })
}
