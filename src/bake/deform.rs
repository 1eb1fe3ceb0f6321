use nalgebra::{Matrix4, Point3, Vector3};

use crate::correction::skinning_matrix;
use crate::scene::SceneMesh;

/// Linear-blend-skins a mesh's bind-pose control points.
///
/// `worlds` holds the current world transform of every scene node. Vertices
/// without positive weight keep their bind-pose position.
pub fn skin_control_points(mesh: &SceneMesh, worlds: &[Matrix4<f64>]) -> Vec<Point3<f64>> {
    let count = mesh.control_points.len();
    let mut accumulated = vec![Vector3::zeros(); count];
    let mut totals = vec![0.0f64; count];

    for cluster in &mesh.clusters {
        let Some(current) = worlds.get(cluster.bone) else {
            continue;
        };
        let Some(matrix) = skinning_matrix(current, &cluster.transform_link, &cluster.transform) else {
            continue;
        };
        for (&vertex, &weight) in cluster.indices.iter().zip(&cluster.weights) {
            if weight <= 0.0 || vertex >= count {
                continue;
            }
            accumulated[vertex] += matrix.transform_point(&mesh.control_points[vertex]).coords * weight;
            totals[vertex] += weight;
        }
    }

    mesh.control_points
        .iter()
        .zip(accumulated.iter().zip(&totals))
        .map(|(bind, (sum, &total))| {
            if total > 0.0 {
                Point3::from(sum / total)
            } else {
                *bind
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Scene;

    fn scene() -> (Scene, usize) {
        let mut scene = Scene::default();
        let bone_a = scene.add_node("a", None);
        let bone_b = scene.add_node("b", None);
        let node = scene.add_node("head", None);
        let mesh = scene
            .add_mesh(
                node,
                vec![Point3::new(0.0, 1.0, 0.0), Point3::new(2.0, 0.0, 0.0), Point3::new(5.0, 5.0, 5.0)],
                Vec::new(),
                Vec::new(),
            )
            .expect("mesh");
        scene.bind_skin(mesh, bone_a, 0, 1.0).expect("bind");
        scene.bind_skin(mesh, bone_a, 1, 0.5).expect("bind");
        scene.bind_skin(mesh, bone_b, 1, 0.5).expect("bind");
        (scene, mesh)
    }

    #[test]
    fn given_bind_pose_when_skinning_then_points_are_unchanged() {
        let (scene, mesh) = scene();
        let worlds = scene.evaluate_global_transforms();
        let data = scene.mesh(mesh).expect("mesh");
        let skinned = skin_control_points(data, &worlds);
        assert_eq!(skinned, data.control_points);
    }

    #[test]
    fn given_moved_bone_when_skinning_then_weights_blend_and_unweighted_vertex_stays() {
        let (mut scene, mesh) = scene();
        scene.set_local_translation(0, Vector3::new(0.0, 0.0, 2.0));
        let worlds = scene.evaluate_global_transforms();
        let skinned = skin_control_points(scene.mesh(mesh).expect("mesh"), &worlds);

        assert!((skinned[0] - Point3::new(0.0, 1.0, 2.0)).norm() < 1.0e-9);
        assert!((skinned[1] - Point3::new(2.0, 0.0, 1.0)).norm() < 1.0e-9);
        assert_eq!(skinned[2], Point3::new(5.0, 5.0, 5.0));
    }
}
