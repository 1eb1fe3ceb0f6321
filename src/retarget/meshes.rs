use std::collections::HashSet;

use nalgebra::Point3;

use super::types::LodReconciliation;
use crate::error::{RigError, RigResult};
use crate::rig::RigArchive;
use crate::scene::Scene;
use crate::{log_info, log_warn};

/// Keeps the LODs that share at least one mesh with the scene and deletes
/// every archive mesh the scene does not contain.
pub(super) fn reconcile_lods(archive: &mut RigArchive, scene_meshes: &HashSet<&str>) -> RigResult<LodReconciliation> {
    let mut retained_lods = Vec::new();
    for lod in 0..archive.lod_count() {
        let kept = archive
            .mesh_indices_for_lod(lod)
            .iter()
            .any(|&mesh| archive.mesh_name(mesh as usize).is_some_and(|name| scene_meshes.contains(name)));
        let lod = lod as u16;
        if kept && !retained_lods.contains(&lod) {
            retained_lods.push(lod);
        }
    }

    let unmatched: Vec<usize> = (0..archive.mesh_count())
        .filter(|&mesh| archive.mesh_name(mesh).is_some_and(|name| !scene_meshes.contains(name)))
        .collect();
    let mut deleted_meshes = Vec::with_capacity(unmatched.len());
    for &mesh in unmatched.iter().rev() {
        let removed = archive.delete_mesh(mesh)?;
        log_info!("Deleted archive mesh absent from target scene: {}", removed.name);
        deleted_meshes.push(removed.name);
    }
    deleted_meshes.reverse();

    archive.retain_lods(&retained_lods);
    Ok(LodReconciliation {
        retained_lods,
        deleted_meshes,
    })
}

/// Converts a Z-up point to the Y-up convention.
fn z_up_to_y_up(point: &Point3<f64>) -> Point3<f64> {
    Point3::new(point.x, point.z, -point.y)
}

/// Copies the scene's control points into every archive mesh the scene holds.
///
/// When `detect_up_axis` is set and the first control point has `y < z`, the
/// mesh is taken as Z-up and converted.
pub(super) fn transfer_vertex_positions(archive: &mut RigArchive, scene: &Scene, detect_up_axis: bool) -> RigResult<usize> {
    let mut transferred = 0;
    for mesh in 0..archive.mesh_count() {
        let name = archive.mesh_name(mesh).unwrap_or_default().to_owned();
        let Some(data) = scene.mesh_by_name(&name).and_then(|index| scene.mesh(index)) else {
            log_warn!("Scene mesh not found for vertex transfer: {}", name);
            continue;
        };
        let expected = archive.vertex_position_count(mesh);
        if data.control_points.len() != expected {
            return Err(RigError::precondition(format!(
                "mesh '{name}' has {expected} archive vertices but {} scene control points",
                data.control_points.len()
            )));
        }

        let z_up = detect_up_axis && data.control_points.first().is_some_and(|p| p.y < p.z);
        let positions: Vec<Point3<f64>> = if z_up {
            data.control_points.iter().map(z_up_to_y_up).collect()
        } else {
            data.control_points.clone()
        };
        archive.set_vertex_positions(mesh, &positions)?;
        transferred += 1;
    }
    Ok(transferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::tests::mesh;
    use crate::rig::Lod;

    fn archive() -> RigArchive {
        RigArchive {
            meshes: vec![
                mesh("head_lod0_mesh", vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]),
                mesh("head_lod1_mesh", vec![[0.0, 0.0, 0.0]]),
            ],
            lods: vec![
                Lod { mesh_indices: vec![0] },
                Lod { mesh_indices: vec![1] },
            ],
            ..RigArchive::default()
        }
    }

    #[test]
    fn given_second_lod_without_scene_meshes_when_reconciling_then_only_first_lod_is_retained() {
        let mut archive = archive();
        let names = HashSet::from(["head_lod0_mesh"]);

        let result = reconcile_lods(&mut archive, &names).expect("reconcile");
        assert_eq!(result.retained_lods, vec![0]);
        assert_eq!(result.deleted_meshes, vec!["head_lod1_mesh".to_string()]);
        assert_eq!(archive.mesh_count(), 1);
        assert_eq!(archive.lod_count(), 1);
        assert_eq!(archive.mesh_indices_for_lod(0), &[0]);
    }

    #[test]
    fn given_mesh_shared_by_lods_when_reconciling_then_lods_keep_first_match_order() {
        let mut archive = archive();
        archive.lods = vec![
            Lod { mesh_indices: vec![1] },
            Lod { mesh_indices: vec![0, 1] },
            Lod { mesh_indices: vec![0] },
        ];
        let names = HashSet::from(["head_lod0_mesh"]);
        let result = reconcile_lods(&mut archive, &names).expect("reconcile");
        assert_eq!(result.retained_lods, vec![1, 2]);
    }

    fn scene_with_head(points: Vec<Point3<f64>>) -> Scene {
        let mut scene = Scene::default();
        let node = scene.add_node("head_lod0_mesh", None);
        scene
            .add_mesh(node, points, Vec::new(), Vec::new())
            .expect("mesh");
        scene
    }

    #[test]
    fn given_z_up_scene_when_transferring_vertices_then_axes_are_swapped() {
        let mut archive = archive();
        let scene = scene_with_head(vec![Point3::new(1.0, 2.0, 3.0), Point3::new(4.0, 5.0, 6.0)]);

        let transferred = transfer_vertex_positions(&mut archive, &scene, true).expect("transfer");
        assert_eq!(transferred, 1);
        assert_eq!(archive.meshes[0].positions, vec![[1.0, 3.0, -2.0], [4.0, 6.0, -5.0]]);
    }

    #[test]
    fn given_detection_disabled_when_transferring_vertices_then_positions_are_copied() {
        let mut archive = archive();
        let scene = scene_with_head(vec![Point3::new(1.0, 2.0, 3.0), Point3::new(4.0, 5.0, 6.0)]);
        transfer_vertex_positions(&mut archive, &scene, false).expect("transfer");
        assert_eq!(archive.meshes[0].positions[1], [4.0, 5.0, 6.0]);
    }

    #[test]
    fn given_vertex_count_mismatch_when_transferring_then_precondition_error_is_returned() {
        let mut archive = archive();
        let scene = scene_with_head(vec![Point3::origin()]);
        let result = transfer_vertex_positions(&mut archive, &scene, true);
        assert!(matches!(result, Err(RigError::Precondition(_))));
    }
}
