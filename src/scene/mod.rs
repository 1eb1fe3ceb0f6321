//! Arena scene graph the rig is retargeted onto.
//!
//! Nodes and meshes are addressed by stable indices. World transforms are
//! derived from the parent chain on every query and never cached across
//! mutations.

mod export;
pub(crate) mod gltf_utils;

use std::collections::HashMap;

use nalgebra::{Matrix4, Point3, Vector3};

use crate::correction::{bounding_box_center, compose_local_matrix, local_translation_for_world};
use crate::error::{RigError, RigResult};

pub use export::save_scene_glb;
pub use gltf_utils::load_scene;

#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub translation: Vector3<f64>,
    /// Animated rotation, Euler XYZ degrees.
    pub rotation: Vector3<f64>,
    /// Fixed orientation offset applied before `rotation`, Euler XYZ degrees.
    pub pre_rotation: Vector3<f64>,
    pub scale: Vector3<f64>,
    pub mesh: Option<usize>,
}

impl SceneNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            children: Vec::new(),
            translation: Vector3::zeros(),
            rotation: Vector3::zeros(),
            pre_rotation: Vector3::zeros(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            mesh: None,
        }
    }
}

/// Skin binding between one bone and the mesh vertices it deforms.
#[derive(Debug, Clone, PartialEq)]
pub struct SkinCluster {
    pub bone: usize,
    /// Mesh world transform at bind time.
    pub transform: Matrix4<f64>,
    /// Bone world transform at bind time.
    pub transform_link: Matrix4<f64>,
    pub indices: Vec<usize>,
    pub weights: Vec<f64>,
    /// Position of each bound vertex in `indices`.
    slots: HashMap<usize, usize>,
}

impl SkinCluster {
    fn add_weight(&mut self, vertex: usize, weight: f64) {
        match self.slots.get(&vertex) {
            Some(&slot) => self.weights[slot] += weight,
            None => {
                self.slots.insert(vertex, self.indices.len());
                self.indices.push(vertex);
                self.weights.push(weight);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneMesh {
    pub name: String,
    pub node: usize,
    /// Bind-pose positions in mesh-local space.
    pub control_points: Vec<Point3<f64>>,
    pub polygons: Vec<Vec<usize>>,
    /// One UV per control point, empty when the mesh has no UV layer.
    pub uvs: Vec<[f64; 2]>,
    pub clusters: Vec<SkinCluster>,
}

impl SceneMesh {
    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty()
    }

    pub fn has_skin(&self) -> bool {
        !self.clusters.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    nodes: Vec<SceneNode>,
    meshes: Vec<SceneMesh>,
}

impl Scene {
    // ─── Nodes ────────────────────────────────────────────────────────────────

    /// Appends a node with identity transform channels.
    pub fn add_node(&mut self, name: &str, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(SceneNode::new(name));
        if let Some(parent) = parent.filter(|&p| p < index) {
            self.nodes[index].parent = Some(parent);
            self.nodes[parent].children.push(index);
        }
        index
    }

    /// Re-links a node under a new parent (or to the root).
    pub fn set_parent(&mut self, node: usize, parent: Option<usize>) -> RigResult<()> {
        if node >= self.nodes.len() {
            return Err(RigError::lookup("scene node", node.to_string()));
        }
        if let Some(parent) = parent {
            if parent >= self.nodes.len() {
                return Err(RigError::lookup("scene node", parent.to_string()));
            }
            let mut cursor = Some(parent);
            while let Some(ancestor) = cursor {
                if ancestor == node {
                    return Err(RigError::precondition(format!(
                        "parenting '{}' under '{}' would create a cycle",
                        self.nodes[node].name, self.nodes[parent].name
                    )));
                }
                cursor = self.nodes[ancestor].parent;
            }
        }

        if let Some(old) = self.nodes[node].parent.take() {
            self.nodes[old].children.retain(|&child| child != node);
        }
        if let Some(parent) = parent {
            self.nodes[parent].children.push(node);
        }
        self.nodes[node].parent = parent;
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, node: usize) -> Option<&SceneNode> {
        self.nodes.get(node)
    }

    pub fn find_node(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn parent(&self, node: usize) -> Option<usize> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    pub fn children(&self, node: usize) -> &[usize] {
        self.nodes
            .get(node)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Node and all of its descendants, depth-first, parents before children.
    pub fn descendants_depth_first(&self, node: usize) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current >= self.nodes.len() {
                continue;
            }
            order.push(current);
            stack.extend(self.children(current).iter().rev());
        }
        order
    }

    // ─── Local channels ───────────────────────────────────────────────────────

    pub fn local_translation(&self, node: usize) -> Vector3<f64> {
        self.nodes.get(node).map_or_else(Vector3::zeros, |n| n.translation)
    }

    pub fn local_rotation(&self, node: usize) -> Vector3<f64> {
        self.nodes.get(node).map_or_else(Vector3::zeros, |n| n.rotation)
    }

    pub fn pre_rotation(&self, node: usize) -> Vector3<f64> {
        self.nodes.get(node).map_or_else(Vector3::zeros, |n| n.pre_rotation)
    }

    pub fn set_local_translation(&mut self, node: usize, translation: Vector3<f64>) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.translation = translation;
        }
    }

    pub fn set_local_rotation(&mut self, node: usize, rotation: Vector3<f64>) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.rotation = rotation;
        }
    }

    pub fn set_pre_rotation(&mut self, node: usize, pre_rotation: Vector3<f64>) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.pre_rotation = pre_rotation;
        }
    }

    pub fn set_local_scale(&mut self, node: usize, scale: Vector3<f64>) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.scale = scale;
        }
    }

    // ─── Transform evaluation ─────────────────────────────────────────────────

    pub fn local_matrix(&self, node: usize) -> Matrix4<f64> {
        self.nodes.get(node).map_or_else(Matrix4::identity, |n| {
            compose_local_matrix(&n.translation, &n.pre_rotation, &n.rotation, &n.scale)
        })
    }

    /// World transform of a single node.
    pub fn global_transform(&self, node: usize) -> Matrix4<f64> {
        let mut world = self.local_matrix(node);
        let mut cursor = self.parent(node);
        while let Some(parent) = cursor {
            world = self.local_matrix(parent) * world;
            cursor = self.parent(parent);
        }
        world
    }

    /// World transforms of every node, evaluated in one pass.
    pub fn evaluate_global_transforms(&self) -> Vec<Matrix4<f64>> {
        let mut worlds = vec![Matrix4::identity(); self.nodes.len()];
        let mut resolved = vec![false; self.nodes.len()];
        for index in 0..self.nodes.len() {
            self.resolve_world_matrix(index, &mut worlds, &mut resolved);
        }
        worlds
    }

    fn resolve_world_matrix(&self, index: usize, worlds: &mut [Matrix4<f64>], resolved: &mut [bool]) {
        if resolved[index] {
            return;
        }
        let local = self.local_matrix(index);
        worlds[index] = match self.nodes[index].parent {
            Some(parent) => {
                self.resolve_world_matrix(parent, worlds, resolved);
                worlds[parent] * local
            }
            None => local,
        };
        resolved[index] = true;
    }

    pub fn world_position(&self, node: usize) -> Point3<f64> {
        self.global_transform(node).transform_point(&Point3::origin())
    }

    /// Moves a node to a world position by rewriting only its local translation.
    pub fn set_world_position(&mut self, node: usize, position: Point3<f64>) -> RigResult<()> {
        let parent_world = match self.parent(node) {
            Some(parent) => self.global_transform(parent),
            None => Matrix4::identity(),
        };
        let translation = local_translation_for_world(&parent_world, &position).ok_or_else(|| {
            RigError::precondition(format!(
                "parent transform of node {node} is not invertible"
            ))
        })?;
        self.set_local_translation(node, translation);
        Ok(())
    }

    // ─── Meshes ───────────────────────────────────────────────────────────────

    /// Attaches mesh data to an existing node; the mesh takes the node's name.
    pub fn add_mesh(
        &mut self,
        node: usize,
        control_points: Vec<Point3<f64>>,
        polygons: Vec<Vec<usize>>,
        uvs: Vec<[f64; 2]>,
    ) -> RigResult<usize> {
        let owner = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| RigError::lookup("scene node", node.to_string()))?;
        let index = self.meshes.len();
        owner.mesh = Some(index);
        let name = owner.name.clone();
        self.meshes.push(SceneMesh {
            name,
            node,
            control_points,
            polygons,
            uvs,
            clusters: Vec::new(),
        });
        Ok(index)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn mesh(&self, mesh: usize) -> Option<&SceneMesh> {
        self.meshes.get(mesh)
    }

    pub fn mesh_by_name(&self, name: &str) -> Option<usize> {
        self.meshes.iter().position(|m| m.name == name)
    }

    pub fn mesh_names(&self) -> impl Iterator<Item = &str> {
        self.meshes.iter().map(|m| m.name.as_str())
    }

    /// Control points transformed by the owning node's world transform.
    pub fn world_control_points(&self, mesh: usize) -> Vec<Point3<f64>> {
        let Some(data) = self.meshes.get(mesh) else {
            return Vec::new();
        };
        let world = self.global_transform(data.node);
        data.control_points
            .iter()
            .map(|point| world.transform_point(point))
            .collect()
    }

    /// Bounding-box center of a mesh in world space.
    pub fn mesh_bounds_center(&self, mesh: usize) -> Option<Point3<f64>> {
        bounding_box_center(&self.world_control_points(mesh))
    }

    // ─── Skinning ─────────────────────────────────────────────────────────────

    /// Binds one vertex to a bone, creating the bone's cluster on first use.
    pub fn bind_skin(&mut self, mesh: usize, bone: usize, vertex: usize, weight: f64) -> RigResult<()> {
        self.bind_skin_weights(mesh, bone, &[(vertex, weight)])
    }

    /// Binds `(vertex, weight)` pairs to one bone's cluster.
    ///
    /// Both bind matrices are captured once per call from the current
    /// placement. A vertex bound twice to the same bone accumulates its weight.
    /// Nothing is bound when any vertex is out of range.
    pub fn bind_skin_weights(&mut self, mesh: usize, bone: usize, weights: &[(usize, f64)]) -> RigResult<()> {
        let mesh_node = self
            .meshes
            .get(mesh)
            .map(|m| m.node)
            .ok_or_else(|| RigError::lookup("scene mesh", mesh.to_string()))?;
        if bone >= self.nodes.len() {
            return Err(RigError::lookup("scene node", bone.to_string()));
        }
        let transform = self.global_transform(mesh_node);
        let transform_link = self.global_transform(bone);

        let data = &mut self.meshes[mesh];
        let vertex_count = data.control_points.len();
        if let Some(&(vertex, _)) = weights.iter().find(|(vertex, _)| *vertex >= vertex_count) {
            return Err(RigError::precondition(format!(
                "vertex {vertex} is out of range for mesh '{}'",
                data.name
            )));
        }
        let position = match data.clusters.iter().position(|c| c.bone == bone) {
            Some(position) => position,
            None => {
                data.clusters.push(SkinCluster {
                    bone,
                    transform,
                    transform_link,
                    indices: Vec::new(),
                    weights: Vec::new(),
                    slots: HashMap::new(),
                });
                data.clusters.len() - 1
            }
        };
        let cluster = &mut data.clusters[position];
        cluster.transform = transform;
        cluster.transform_link = transform_link;
        for &(vertex, weight) in weights {
            cluster.add_weight(vertex, weight);
        }
        Ok(())
    }

    /// Re-captures every cluster's bind matrices from the current placement.
    pub fn rebind_skin_clusters(&mut self) {
        let worlds = self.evaluate_global_transforms();
        for mesh in &mut self.meshes {
            let transform = worlds[mesh.node];
            for cluster in &mut mesh.clusters {
                cluster.transform = transform;
                cluster.transform_link = worlds[cluster.bone];
            }
        }
    }
}
