use std::borrow::Cow;
use std::fs;
use std::path::Path;

use gltf::binary::{Glb, Header};
use nalgebra::{Matrix4, UnitQuaternion};
use serde_json::{Value, json};

use super::{Scene, SceneMesh};
use crate::correction::euler_xyz_degrees_to_rotation;
use crate::error::{RigError, RigResult};
use crate::log_info;

const COMPONENT_UNSIGNED_SHORT: u32 = 5123;
const COMPONENT_UNSIGNED_INT: u32 = 5125;
const COMPONENT_FLOAT: u32 = 5126;
/// Influences per vertex carried by `JOINTS_0`/`WEIGHTS_0`.
const MAX_INFLUENCES: usize = 4;

// ─── Binary chunk ─────────────────────────────────────────────────────────────

/// Accumulates the BIN chunk with its buffer views and accessors.
#[derive(Default)]
struct BinBuilder {
    bin: Vec<u8>,
    buffer_views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BinBuilder {
    fn push_view(&mut self, bytes: &[u8]) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let view = self.buffer_views.len();
        self.buffer_views.push(json!({
            "buffer": 0,
            "byteOffset": self.bin.len(),
            "byteLength": bytes.len(),
        }));
        self.bin.extend_from_slice(bytes);
        view
    }

    fn push_accessor(&mut self, bytes: &[u8], component_type: u32, count: usize, kind: &str) -> usize {
        let view = self.push_view(bytes);
        let accessor = self.accessors.len();
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": component_type,
            "count": count,
            "type": kind,
        }));
        accessor
    }

    fn push_f32(&mut self, values: &[f32], components: usize, kind: &str) -> usize {
        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        self.push_accessor(&bytes, COMPONENT_FLOAT, values.len() / components, kind)
    }

    fn push_positions(&mut self, positions: &[[f32; 3]]) -> usize {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for position in positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(position[axis]);
                max[axis] = max[axis].max(position[axis]);
            }
        }
        let flat: Vec<f32> = positions.iter().flatten().copied().collect();
        let accessor = self.push_f32(&flat, 3, "VEC3");
        if !positions.is_empty() {
            self.accessors[accessor]["min"] = json!(min);
            self.accessors[accessor]["max"] = json!(max);
        }
        accessor
    }

    fn push_mat4(&mut self, matrices: &[Matrix4<f32>]) -> usize {
        let flat: Vec<f32> = matrices
            .iter()
            .flat_map(|matrix| matrix.as_slice().iter().copied())
            .collect();
        self.push_f32(&flat, 16, "MAT4")
    }
}

// ─── Skin layout ──────────────────────────────────────────────────────────────

/// Per-vertex joint slots and normalized weights, strongest influences first.
fn vertex_influences(mesh: &SceneMesh) -> (Vec<[u16; 4]>, Vec<[f32; 4]>) {
    let mut influences: Vec<Vec<(u16, f64)>> = vec![Vec::new(); mesh.control_points.len()];
    for (slot, cluster) in mesh.clusters.iter().enumerate() {
        for (&vertex, &weight) in cluster.indices.iter().zip(&cluster.weights) {
            if weight > 0.0
                && let Some(list) = influences.get_mut(vertex)
            {
                list.push((slot as u16, weight));
            }
        }
    }

    let mut joints = Vec::with_capacity(influences.len());
    let mut weights = Vec::with_capacity(influences.len());
    for mut list in influences {
        list.sort_by(|a, b| b.1.total_cmp(&a.1));
        list.truncate(MAX_INFLUENCES);
        let total: f64 = list.iter().map(|(_, weight)| weight).sum();
        let mut vertex_joints = [0u16; 4];
        let mut vertex_weights = [0.0f32; 4];
        if total > 0.0 {
            for (index, (slot, weight)) in list.into_iter().enumerate() {
                vertex_joints[index] = slot;
                vertex_weights[index] = (weight / total) as f32;
            }
        } else {
            // Unbound vertices follow the first joint.
            vertex_weights[0] = 1.0;
        }
        joints.push(vertex_joints);
        weights.push(vertex_weights);
    }
    (joints, weights)
}

/// Inverse bind matrix of each cluster, mapping mesh-local bind positions into
/// the bone's bind space.
fn inverse_bind_matrices(mesh: &SceneMesh) -> RigResult<Vec<Matrix4<f32>>> {
    mesh.clusters
        .iter()
        .map(|cluster| {
            let inverse_link = cluster.transform_link.try_inverse().ok_or_else(|| {
                RigError::precondition(format!(
                    "bind matrix of bone {} in mesh '{}' is not invertible",
                    cluster.bone, mesh.name
                ))
            })?;
            Ok((inverse_link * cluster.transform).cast::<f32>())
        })
        .collect()
}

// ─── Export ───────────────────────────────────────────────────────────────────

fn node_json(scene: &Scene, node: usize) -> Value {
    let Some(data) = scene.node(node) else {
        return json!({});
    };
    let rotation = euler_xyz_degrees_to_rotation(&data.pre_rotation) * euler_xyz_degrees_to_rotation(&data.rotation);
    let quaternion = UnitQuaternion::from_rotation_matrix(&rotation).into_inner().coords;
    let mut value = json!({
        "name": data.name,
        "translation": [data.translation.x, data.translation.y, data.translation.z],
        "rotation": [quaternion.x, quaternion.y, quaternion.z, quaternion.w],
        "scale": [data.scale.x, data.scale.y, data.scale.z],
    });
    if !data.children.is_empty() {
        value["children"] = json!(data.children);
    }
    value
}

fn primitive_json(builder: &mut BinBuilder, mesh: &SceneMesh) -> Value {
    let positions: Vec<[f32; 3]> = mesh
        .control_points
        .iter()
        .map(|p| [p.x as f32, p.y as f32, p.z as f32])
        .collect();
    let mut attributes = serde_json::Map::new();
    attributes.insert("POSITION".to_string(), json!(builder.push_positions(&positions)));

    if mesh.has_uvs() {
        let uvs: Vec<f32> = mesh.uvs.iter().flat_map(|uv| [uv[0] as f32, uv[1] as f32]).collect();
        attributes.insert("TEXCOORD_0".to_string(), json!(builder.push_f32(&uvs, 2, "VEC2")));
    }

    if mesh.has_skin() {
        let (joints, weights) = vertex_influences(mesh);
        let joint_bytes: Vec<u8> = joints.iter().flatten().flat_map(|slot| slot.to_le_bytes()).collect();
        let joint_accessor = builder.push_accessor(&joint_bytes, COMPONENT_UNSIGNED_SHORT, joints.len(), "VEC4");
        let flat_weights: Vec<f32> = weights.iter().flatten().copied().collect();
        attributes.insert("JOINTS_0".to_string(), json!(joint_accessor));
        attributes.insert(
            "WEIGHTS_0".to_string(),
            json!(builder.push_f32(&flat_weights, 4, "VEC4")),
        );
    }

    // Polygons are fanned into triangles.
    let indices: Vec<u32> = mesh
        .polygons
        .iter()
        .filter(|polygon| polygon.len() >= 3)
        .flat_map(|polygon| {
            (1..polygon.len() - 1).flat_map(move |i| [polygon[0], polygon[i], polygon[i + 1]])
        })
        .map(|vertex| vertex as u32)
        .collect();
    let mut primitive = json!({ "attributes": attributes });
    if !indices.is_empty() {
        let index_bytes: Vec<u8> = indices.iter().flat_map(|index| index.to_le_bytes()).collect();
        let accessor = builder.push_accessor(&index_bytes, COMPONENT_UNSIGNED_INT, indices.len(), "SCALAR");
        primitive["indices"] = json!(accessor);
    }
    primitive
}

/// Writes the scene as a binary glTF: every node with its TRS, every mesh with
/// its skin (joints, inverse bind matrices and per-vertex influences).
///
/// A node's pre-rotation is folded into its glTF rotation.
pub fn save_scene_glb(scene: &Scene, path: &Path) -> RigResult<()> {
    let mut builder = BinBuilder::default();
    let mut nodes: Vec<Value> = (0..scene.node_count()).map(|node| node_json(scene, node)).collect();
    let mut meshes = Vec::with_capacity(scene.mesh_count());
    let mut skins = Vec::new();

    for index in 0..scene.mesh_count() {
        let Some(mesh) = scene.mesh(index) else {
            continue;
        };
        let primitive = primitive_json(&mut builder, mesh);
        meshes.push(json!({ "name": mesh.name, "primitives": [primitive] }));
        nodes[mesh.node]["mesh"] = json!(index);

        if mesh.has_skin() {
            let matrices = inverse_bind_matrices(mesh)?;
            let accessor = builder.push_mat4(&matrices);
            let joints: Vec<usize> = mesh.clusters.iter().map(|cluster| cluster.bone).collect();
            nodes[mesh.node]["skin"] = json!(skins.len());
            skins.push(json!({ "joints": joints, "inverseBindMatrices": accessor }));
        }
    }

    let roots: Vec<usize> = (0..scene.node_count())
        .filter(|&node| scene.parent(node).is_none())
        .collect();
    while builder.bin.len() % 4 != 0 {
        builder.bin.push(0);
    }

    let mut document = json!({
        "asset": { "version": "2.0", "generator": concat!("rigfit ", env!("CARGO_PKG_VERSION")) },
        "scene": 0,
        "scenes": [{ "nodes": roots }],
        "nodes": nodes,
    });
    if !meshes.is_empty() {
        document["meshes"] = json!(meshes);
    }
    if !skins.is_empty() {
        document["skins"] = json!(skins);
    }
    if !builder.bin.is_empty() {
        document["buffers"] = json!([{ "byteLength": builder.bin.len() }]);
        document["bufferViews"] = json!(builder.buffer_views);
        document["accessors"] = json!(builder.accessors);
    }

    let json_bytes = serde_json::to_vec(&document)?;
    let mut length = 12 + 8 + json_bytes.len().next_multiple_of(4);
    if !builder.bin.is_empty() {
        length += 8 + builder.bin.len();
    }
    let glb = Glb {
        header: Header {
            magic: *b"glTF",
            version: 2,
            length: u32::try_from(length)
                .map_err(|_| RigError::precondition("scene is too large for a GLB container"))?,
        },
        json: Cow::Owned(json_bytes),
        bin: if builder.bin.is_empty() {
            None
        } else {
            Some(Cow::Owned(builder.bin))
        },
    };

    let mut out = Vec::new();
    glb.to_writer(&mut out)?;
    fs::write(path, out)?;
    log_info!(
        "Wrote rigged scene {} ({} nodes, {} skins)",
        path.display(),
        scene.node_count(),
        skins.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::load_scene;
    use nalgebra::{Point3, Vector3};

    /// Rotated root joint with a jaw child, plus a quad face skinned to both.
    fn rigged_scene() -> Scene {
        let mut scene = Scene::default();
        let root = scene.add_node("root", None);
        let jaw = scene.add_node("jaw", Some(root));
        let face = scene.add_node("face", None);
        scene.set_local_translation(root, Vector3::new(1.0, 0.0, 0.0));
        scene.set_pre_rotation(root, Vector3::new(0.0, 0.0, 90.0));
        scene.set_local_translation(jaw, Vector3::new(0.0, 1.0, 0.0));
        scene.set_local_rotation(jaw, Vector3::new(30.0, 0.0, 0.0));
        scene.set_local_translation(face, Vector3::new(0.0, 0.0, 2.0));
        let mesh = scene
            .add_mesh(
                face,
                vec![
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(1.0, 0.0, 0.0),
                    Point3::new(1.0, 1.0, 0.0),
                    Point3::new(0.0, 1.0, 0.0),
                ],
                vec![vec![0, 1, 2, 3]],
                vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            )
            .expect("mesh");
        scene
            .bind_skin_weights(mesh, root, &[(0, 1.0), (1, 1.0), (2, 0.75)])
            .expect("bind root");
        scene
            .bind_skin_weights(mesh, jaw, &[(2, 0.25), (3, 1.0)])
            .expect("bind jaw");
        scene
    }

    #[test]
    fn given_rigged_scene_when_saved_and_reloaded_then_joints_and_skin_survive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rigged.glb");
        let scene = rigged_scene();
        save_scene_glb(&scene, &path).expect("save");

        let loaded = load_scene(&path).expect("load");
        assert_eq!(loaded.node_count(), 3);
        for name in ["root", "jaw", "face"] {
            let original = scene.find_node(name).expect("original node");
            let reloaded = loaded.find_node(name).expect("reloaded node");
            let delta = scene.global_transform(original) - loaded.global_transform(reloaded);
            assert!(delta.norm() < 1.0e-5, "{name} moved by {delta}");
        }
        assert_eq!(loaded.parent(loaded.find_node("jaw").expect("jaw")), loaded.find_node("root"));

        let mesh = loaded.mesh(loaded.mesh_by_name("face").expect("face")).expect("mesh");
        assert_eq!(mesh.polygons, vec![vec![0, 1, 2], vec![0, 2, 3]]);
        assert!(mesh.has_uvs());
        assert_eq!(mesh.clusters.len(), 2);
        assert_eq!(mesh.clusters[0].indices, vec![0, 1, 2]);
        assert_eq!(mesh.clusters[0].weights, vec![1.0, 1.0, 0.75]);
        assert_eq!(mesh.clusters[1].indices, vec![2, 3]);
        assert_eq!(mesh.clusters[1].weights, vec![0.25, 1.0]);
    }

    #[test]
    fn given_rigged_scene_when_saved_then_inverse_bind_matrices_follow_cluster_links() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rigged.glb");
        let scene = rigged_scene();
        save_scene_glb(&scene, &path).expect("save");

        let (document, buffers, _) = gltf::import(&path).expect("import");
        let skin = document.skins().next().expect("skin");
        let joint_names: Vec<_> = skin.joints().filter_map(|joint| joint.name().map(ToOwned::to_owned)).collect();
        assert_eq!(joint_names, vec!["root".to_string(), "jaw".to_string()]);

        let matrices: Vec<[[f32; 4]; 4]> = skin
            .reader(|buffer| Some(&buffers[buffer.index()]))
            .read_inverse_bind_matrices()
            .expect("inverse bind matrices")
            .collect();
        let face = scene.mesh(0).expect("face");
        for (cluster, columns) in face.clusters.iter().zip(&matrices) {
            let written = Matrix4::from_column_slice(columns.as_flattened()).cast::<f64>();
            let expected = cluster.transform_link.try_inverse().expect("invertible") * cluster.transform;
            assert!((written - expected).norm() < 1.0e-5);
        }
    }

    #[test]
    fn given_vertex_with_five_influences_when_laying_out_skin_then_four_strongest_are_normalized() {
        let mut scene = Scene::default();
        let node = scene.add_node("face", None);
        let mesh = scene
            .add_mesh(node, vec![Point3::origin(); 2], Vec::new(), Vec::new())
            .expect("mesh");
        for (bone, weight) in [0.1, 0.2, 0.3, 0.4, 0.5].into_iter().enumerate() {
            let bone = scene.add_node(&format!("bone_{bone}"), None);
            scene.bind_skin(mesh, bone, 0, weight).expect("bind");
        }

        let (joints, weights) = vertex_influences(scene.mesh(mesh).expect("mesh"));
        assert_eq!(joints[0], [4, 3, 2, 1]);
        let total: f32 = weights[0].iter().sum();
        assert!((total - 1.0).abs() < 1.0e-6);
        assert!((weights[0][0] - 0.5 / 1.4).abs() < 1.0e-6);
        assert_eq!((joints[1], weights[1]), ([0; 4], [1.0, 0.0, 0.0, 0.0]));
    }
}
