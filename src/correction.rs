use nalgebra::{Matrix4, Point3, Rotation3, Translation3, Vector3};

/// Builds a rotation from Euler angles in degrees applied X, then Y, then Z.
///
/// # Arguments
///
/// * `degrees` - Rotation about X, Y and Z in degrees.
///
/// # Returns
///
/// The rotation `Rz * Ry * Rx`.
pub fn euler_xyz_degrees_to_rotation(degrees: &Vector3<f64>) -> Rotation3<f64> {
    Rotation3::from_euler_angles(
        degrees.x.to_radians(),
        degrees.y.to_radians(),
        degrees.z.to_radians(),
    )
}

/// Inverse of [`euler_xyz_degrees_to_rotation`].
pub fn rotation_to_euler_xyz_degrees(rotation: &Rotation3<f64>) -> Vector3<f64> {
    let (x, y, z) = rotation.euler_angles();
    Vector3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

/// Composes a node-local matrix from its transform channels.
///
/// # Arguments
///
/// * `translation` - Local translation.
/// * `pre_rotation` - Fixed orientation offset (joint orient), Euler XYZ degrees.
/// * `rotation` - Animated local rotation, Euler XYZ degrees.
/// * `scale` - Local scale.
///
/// # Returns
///
/// `T * R(pre) * R(rot) * S`.
pub fn compose_local_matrix(
    translation: &Vector3<f64>,
    pre_rotation: &Vector3<f64>,
    rotation: &Vector3<f64>,
    scale: &Vector3<f64>,
) -> Matrix4<f64> {
    Translation3::from(*translation).to_homogeneous()
        * euler_xyz_degrees_to_rotation(pre_rotation).to_homogeneous()
        * euler_xyz_degrees_to_rotation(rotation).to_homogeneous()
        * Matrix4::new_nonuniform_scaling(scale)
}

/// Local translation that places a node at `world_position` under `parent_world`.
/// Returns `None` when the parent transform is not invertible.
pub fn local_translation_for_world(
    parent_world: &Matrix4<f64>,
    world_position: &Point3<f64>,
) -> Option<Vector3<f64>> {
    let inverse = parent_world.try_inverse()?;
    Some(inverse.transform_point(world_position).coords)
}

/// Linear-blend-skinning matrix for one cluster: current bone placement
/// relative to its bind placement, applied on top of the mesh bind placement.
/// Returns `None` when the bind bone matrix is not invertible.
pub fn skinning_matrix(
    current_bone_world: &Matrix4<f64>,
    bind_bone_world: &Matrix4<f64>,
    bind_mesh_world: &Matrix4<f64>,
) -> Option<Matrix4<f64>> {
    let inverse_bind = bind_bone_world.try_inverse()?;
    Some(current_bone_world * inverse_bind * bind_mesh_world)
}

/// Index of the vertex closest to `target`.
///
/// Linear scan; on equal distances the lowest index wins. `None` for an
/// empty vertex set.
pub fn nearest_vertex(vertices: &[Point3<f64>], target: &Point3<f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, vertex) in vertices.iter().enumerate() {
        let distance = nalgebra::distance(vertex, target);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((index, distance)),
        }
    }
    best.map(|(index, _)| index)
}

/// Center of the axis-aligned bounding box of `points`.
pub fn bounding_box_center(points: &[Point3<f64>]) -> Option<Point3<f64>> {
    let first = points.first()?;
    let (min, max) = points
        .iter()
        .fold((first.coords, first.coords), |(min, max), point| {
            (min.inf(&point.coords), max.sup(&point.coords))
        });
    Some(Point3::from((min + max) * 0.5))
}

/// Unit normal of the triangle `(a, b, c)` from its first two edges.
///
/// Degenerate triangles yield the zero vector.
pub fn polygon_normal(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Vector3<f64> {
    let normal = (b - a).cross(&(c - a));
    normal.try_normalize(1.0e-8).unwrap_or_else(Vector3::zeros)
}

/// Outcome of re-anchoring a parent joint to the middle of its children.
#[derive(Debug, Clone, PartialEq)]
pub struct Recentered {
    /// New world position of the parent.
    pub node_position: Point3<f64>,
    /// Parent's previous offset from the new anchor.
    pub offset: Vector3<f64>,
    /// Child world positions to restore after the parent moves.
    pub children: Vec<Point3<f64>>,
}

/// Re-anchors a node to the bounding-box center of its children.
///
/// Only nodes with more than one child are re-anchored; otherwise `None`.
pub fn recenter(node: &Point3<f64>, children: &[Point3<f64>]) -> Option<Recentered> {
    if children.len() < 2 {
        return None;
    }
    let center = bounding_box_center(children)?;
    Some(Recentered {
        node_position: center,
        offset: node - center,
        children: children.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        (a - b).norm() < 1.0e-9
    }

    #[test]
    fn given_euler_angles_when_round_tripping_then_degrees_are_recovered() {
        let degrees = Vector3::new(10.0, -25.0, 40.0);
        let rotation = euler_xyz_degrees_to_rotation(&degrees);
        assert!(approx(&rotation_to_euler_xyz_degrees(&rotation), &degrees));
    }

    #[test]
    fn given_x_then_z_rotation_when_composing_then_x_is_applied_first() {
        let rotation = euler_xyz_degrees_to_rotation(&Vector3::new(90.0, 0.0, 90.0));
        // +Y rotated about X lands on +Z, which a Z rotation leaves in place.
        let rotated = rotation * Vector3::y();
        assert!(approx(&rotated, &Vector3::z()));
    }

    #[test]
    fn given_parent_transform_when_solving_local_translation_then_world_position_is_reached() {
        let parent = compose_local_matrix(
            &Vector3::new(1.0, 2.0, 3.0),
            &Vector3::zeros(),
            &Vector3::new(0.0, 0.0, 90.0),
            &Vector3::new(2.0, 2.0, 2.0),
        );
        let target = Point3::new(4.0, -1.0, 0.5);
        let local = local_translation_for_world(&parent, &target).expect("invertible parent");
        let reached = parent.transform_point(&Point3::from(local));
        assert!(approx(&reached.coords, &target.coords));
    }

    #[test]
    fn given_degenerate_parent_when_solving_local_translation_then_none_is_returned() {
        let parent = Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, 0.0, 1.0));
        assert!(local_translation_for_world(&parent, &Point3::origin()).is_none());
    }

    #[test]
    fn given_unmoved_bone_when_building_skinning_matrix_then_mesh_bind_is_returned() {
        let bone = Translation3::new(0.0, 1.0, 0.0).to_homogeneous();
        let mesh = Translation3::new(3.0, 0.0, 0.0).to_homogeneous();
        let skin = skinning_matrix(&bone, &bone, &mesh).expect("invertible bind");
        assert!((skin - mesh).norm() < 1.0e-9);
    }

    #[test]
    fn given_equidistant_vertices_when_searching_nearest_then_lowest_index_wins() {
        let vertices = [
            Point3::new(5.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ];
        assert_eq!(nearest_vertex(&vertices, &Point3::origin()), Some(1));
    }

    #[test]
    fn given_empty_vertex_set_when_searching_nearest_then_none_is_returned() {
        assert_eq!(nearest_vertex(&[], &Point3::origin()), None);
    }

    #[test]
    fn given_points_when_computing_bounds_center_then_extremes_define_it() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 1.0, -2.0),
            Point3::new(1.0, 3.0, 2.0),
        ];
        let center = bounding_box_center(&points).expect("non-empty");
        assert!(approx(&center.coords, &Vector3::new(2.0, 1.5, 0.0)));
        assert!(bounding_box_center(&[]).is_none());
    }

    #[test]
    fn given_counter_clockwise_triangle_when_computing_normal_then_it_faces_positive_z() {
        let normal = polygon_normal(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(2.0, 0.0, 0.0),
            &Point3::new(0.0, 3.0, 0.0),
        );
        assert!(approx(&normal, &Vector3::z()));
    }

    #[test]
    fn given_collinear_triangle_when_computing_normal_then_zero_is_returned() {
        let normal = polygon_normal(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(2.0, 0.0, 0.0),
        );
        assert_eq!(normal, Vector3::zeros());
    }

    #[test]
    fn given_two_children_when_recentering_then_node_moves_to_their_middle() {
        let node = Point3::new(0.0, 5.0, 0.0);
        let children = [Point3::new(-1.0, 0.0, 0.0), Point3::new(3.0, 2.0, 0.0)];
        let result = recenter(&node, &children).expect("two children");
        assert!(approx(&result.node_position.coords, &Vector3::new(1.0, 1.0, 0.0)));
        assert!(approx(&result.offset, &Vector3::new(-1.0, 4.0, 0.0)));
        assert_eq!(result.children, children.to_vec());
    }

    #[test]
    fn given_single_child_when_recentering_then_node_is_left_alone() {
        assert!(recenter(&Point3::origin(), &[Point3::new(1.0, 0.0, 0.0)]).is_none());
    }
}
