use std::collections::BTreeMap;
use std::path::Path;

use gltf::mesh::Mode;
use nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};

use super::Scene;
use crate::correction::rotation_to_euler_xyz_degrees;
use crate::error::RigResult;
use crate::log_warn;

// ─── Geometry extraction ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MeshGeometry {
    control_points: Vec<Point3<f64>>,
    polygons: Vec<Vec<usize>>,
    uvs: Vec<[f64; 2]>,
    has_uvs: bool,
    /// `(skin joint slot, weight)` pairs per control point.
    influences: Vec<Vec<(usize, f64)>>,
}

fn collect_mesh_geometry(mesh: &gltf::Mesh<'_>, buffers: &[gltf::buffer::Data]) -> MeshGeometry {
    let mut geometry = MeshGeometry::default();
    for primitive in mesh.primitives() {
        if primitive.mode() != Mode::Triangles {
            log_warn!(
                "Skipping non-triangle primitive {} of mesh {:?}",
                primitive.index(),
                mesh.name()
            );
            continue;
        }
        let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
        let Some(positions) = reader.read_positions() else {
            continue;
        };

        let base = geometry.control_points.len();
        geometry.control_points.extend(
            positions.map(|p| Point3::new(p[0] as f64, p[1] as f64, p[2] as f64)),
        );
        let count = geometry.control_points.len() - base;

        match reader.read_tex_coords(0) {
            Some(uvs) => {
                geometry.has_uvs = true;
                geometry
                    .uvs
                    .extend(uvs.into_f32().map(|uv| [uv[0] as f64, uv[1] as f64]));
            }
            None => geometry.uvs.extend(std::iter::repeat_n([0.0, 0.0], count)),
        }

        match (reader.read_joints(0), reader.read_weights(0)) {
            (Some(joints), Some(weights)) => {
                geometry
                    .influences
                    .extend(joints.into_u16().zip(weights.into_f32()).map(|(slots, weights)| {
                        slots
                            .iter()
                            .zip(weights)
                            .filter(|&(_, weight)| weight > 0.0)
                            .map(|(&slot, weight)| (slot as usize, weight as f64))
                            .collect()
                    }));
            }
            _ => geometry.influences.extend(std::iter::repeat_n(Vec::new(), count)),
        }

        let indices: Vec<usize> = match reader.read_indices() {
            Some(indices) => indices.into_u32().map(|i| base + i as usize).collect(),
            None => (base..base + count).collect(),
        };
        geometry
            .polygons
            .extend(indices.chunks_exact(3).map(|triangle| triangle.to_vec()));
    }
    if !geometry.has_uvs {
        geometry.uvs.clear();
    }
    geometry
}

fn euler_degrees_from_gltf(rotation: [f32; 4]) -> Vector3<f64> {
    let [x, y, z, w] = rotation.map(|c| c as f64);
    let quaternion = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
    rotation_to_euler_xyz_degrees(&quaternion.to_rotation_matrix())
}

/// Binds imported `JOINTS_0`/`WEIGHTS_0` influences as skin clusters captured
/// at the imported placement.
fn bind_skin_influences(
    scene: &mut Scene,
    mesh: usize,
    bones: &[usize],
    influences: &[Vec<(usize, f64)>],
) -> RigResult<()> {
    let mut by_bone: BTreeMap<usize, Vec<(usize, f64)>> = BTreeMap::new();
    for (vertex, pairs) in influences.iter().enumerate() {
        for &(slot, weight) in pairs {
            match bones.get(slot) {
                Some(&bone) => by_bone.entry(bone).or_default().push((vertex, weight)),
                None => log_warn!("Skin joint slot {} is out of range, weight dropped", slot),
            }
        }
    }
    for (bone, weights) in &by_bone {
        scene.bind_skin_weights(mesh, *bone, weights)?;
    }
    Ok(())
}

// ─── Import ───────────────────────────────────────────────────────────────────

/// Imports a `.gltf`/`.glb` target into a scene arena.
///
/// Mesh nodes keep their node name (falling back to the mesh name) so they
/// can be matched against archive mesh names. Skinned meshes get one cluster
/// per influencing joint.
pub fn load_scene(path: &Path) -> RigResult<Scene> {
    let (document, buffers, _images) = gltf::import(path)?;
    let mut scene = Scene::default();

    let node_map: Vec<usize> = document
        .nodes()
        .map(|node| {
            let name = node
                .name()
                .or_else(|| node.mesh().and_then(|mesh| mesh.name()))
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("node_{}", node.index()));
            let index = scene.add_node(&name, None);
            let (translation, rotation, scale) = node.transform().decomposed();
            scene.set_local_translation(index, Vector3::from(translation.map(|c| c as f64)));
            scene.set_local_rotation(index, euler_degrees_from_gltf(rotation));
            scene.set_local_scale(index, Vector3::from(scale.map(|c| c as f64)));
            index
        })
        .collect();

    for node in document.nodes() {
        for child in node.children() {
            scene.set_parent(node_map[child.index()], Some(node_map[node.index()]))?;
        }
    }

    for node in document.nodes() {
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let geometry = collect_mesh_geometry(&mesh, &buffers);
        let influences = geometry.influences;
        let index = scene.add_mesh(
            node_map[node.index()],
            geometry.control_points,
            geometry.polygons,
            geometry.uvs,
        )?;
        if let Some(skin) = node.skin() {
            let bones: Vec<usize> = skin.joints().map(|joint| node_map[joint.index()]).collect();
            bind_skin_influences(&mut scene, index, &bones, &influences)?;
        }
    }

    Ok(scene)
}
