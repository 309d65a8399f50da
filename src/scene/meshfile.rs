//! The meshfile container (§3 "Meshfile", §4.E bounds/asset-path/bake).

use crate::{
    collections::OrderedMap,
    math::AaBox,
    scene::{Material, MaterialId, Mesh, MeshId, Node, NodeId},
};
use glam::Mat4;
use log::warn;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

/// The root scene container. Exclusively owns all meshes, materials, and
/// nodes; node→mesh, node→child, and mesh→material references are
/// non-owning [`MeshId`]/[`NodeId`]/[`MaterialId`] indices into these
/// arenas (§3 ownership summary).
#[derive(Debug, Default)]
pub struct Meshfile {
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    nodes: Vec<Node>,
    top_nodes: Vec<NodeId>,
    path: Option<PathBuf>,
    asset_cache: OrderedMap<String, String>,
    aabox: AaBox,
    default_material: Material,
}

impl Meshfile {
    pub fn new() -> Self {
        Self {
            default_material: Material::default_material(),
            ..Default::default()
        }
    }

    /// Drops every mesh, material, and node, resetting to a freshly
    /// initialised, empty meshfile. Per §3, the library never removes
    /// individual entities once added — `clear` is the only whole-scene
    /// reset.
    pub fn clear(&mut self) {
        self.meshes.clear();
        self.materials.clear();
        self.nodes.clear();
        self.top_nodes.clear();
        self.asset_cache.clear();
        self.aabox = AaBox::default();
    }

    // --- source path / asset resolution (§4.E) ---

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
        self.asset_cache.clear();
    }

    fn dir(&self) -> Option<&Path> {
        self.path.as_ref().and_then(|p| p.parent()).filter(|p| !p.as_os_str().is_empty())
    }

    /// Resolves a logical asset name (e.g. a texture filename from a
    /// material) against the meshfile's directory, caching the winning
    /// candidate. Tries `<dirname>/<name>` first, then `<name>` (§4.E).
    pub fn resolve_asset_path(&mut self, name: &str) -> &str {
        if self.asset_cache.contains_key(&name.to_string()) {
            return self.asset_cache.get(&name.to_string()).unwrap();
        }

        let candidate = match self.dir() {
            Some(dir) => {
                let joined = dir.join(name);
                if joined.exists() {
                    joined.to_string_lossy().into_owned()
                } else {
                    name.to_string()
                }
            }
            None => name.to_string(),
        };

        self.asset_cache.get_or_insert_with(name.to_string(), || candidate)
    }

    // --- mesh arena ---

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        let id = MeshId(self.meshes.len());
        self.meshes.push(mesh);
        id
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    pub fn mesh_mut(&mut self, id: MeshId) -> Option<&mut Mesh> {
        self.meshes.get_mut(id.0)
    }

    pub fn num_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn meshes(&self) -> impl Iterator<Item = (MeshId, &Mesh)> {
        self.meshes.iter().enumerate().map(|(i, m)| (MeshId(i), m))
    }

    pub fn find_mesh_by_name(&self, name: &str) -> Option<MeshId> {
        self.meshes.iter().position(|m| m.name == name).map(MeshId)
    }

    /// The material a mesh renders with: its own reference, or the process
    /// default (§3 "defaulting to a static default material if unset").
    pub fn mesh_material(&self, mesh_id: MeshId) -> &Material {
        self.mesh(mesh_id)
            .and_then(|m| m.material)
            .and_then(|id| self.material(id))
            .unwrap_or(&self.default_material)
    }

    // --- material arena ---

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.materials.len());
        self.materials.push(material);
        id
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id.0)
    }

    pub fn num_materials(&self) -> usize {
        self.materials.len()
    }

    pub fn materials(&self) -> impl Iterator<Item = (MaterialId, &Material)> {
        self.materials.iter().enumerate().map(|(i, m)| (MaterialId(i), m))
    }

    pub fn find_material_by_name(&self, name: &str) -> Option<MaterialId> {
        self.materials.iter().position(|m| m.name == name).map(MaterialId)
    }

    // --- node arena ---

    /// Adds a detached, parentless node to the meshfile, registering it as
    /// a root node.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.top_nodes.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_topnodes(&self) -> usize {
        self.top_nodes.len()
    }

    pub fn top_nodes(&self) -> &[NodeId] {
        &self.top_nodes
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn find_node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    fn is_ancestor(&self, maybe_ancestor: NodeId, of: NodeId) -> bool {
        let mut cur = self.nodes[of.0].parent();
        while let Some(id) = cur {
            if id == maybe_ancestor {
                return true;
            }
            cur = self.nodes[id.0].parent();
        }
        false
    }

    /// Makes `child` a child of `parent`, first detaching it from any
    /// existing parent (§3: "Moving a child to a new parent removes it from
    /// the old parent first"). Rejects self-parenting and cycles.
    pub fn node_add_child(&mut self, parent: NodeId, child: NodeId) -> anyhow::Result<()> {
        anyhow::ensure!(parent != child, "a node cannot be its own parent");
        anyhow::ensure!(
            !self.is_ancestor(child, parent),
            "would introduce a cycle: {child:?} is already an ancestor of {parent:?}"
        );

        if let Some(old_parent) = self.nodes[child.0].parent {
            self.node_remove_child(old_parent, child);
        } else {
            self.top_nodes.retain(|&id| id != child);
        }

        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        Ok(())
    }

    /// Detaches `child` from `parent`, demoting it back to a root node.
    pub fn node_remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.retain(|&id| id != child);
        if self.nodes[child.0].parent == Some(parent) {
            self.nodes[child.0].parent = None;
            if !self.top_nodes.contains(&child) {
                self.top_nodes.push(child);
            }
        }
    }

    pub fn node_add_mesh(&mut self, node: NodeId, mesh: MeshId) {
        self.nodes[node.0].add_mesh(mesh);
    }

    pub fn node_remove_mesh(&mut self, node: NodeId, mesh: MeshId) {
        self.nodes[node.0].remove_mesh(mesh);
    }

    // --- transform propagation + bounds (§4.E) ---

    /// Recomputes every node's `global_matrix` top-down from the roots, then
    /// recomputes the scene's world-space aabox (§8: "Bounds recomputed
    /// whole-scene after every load/update").
    pub fn update_xform(&mut self) {
        fn propagate(nodes: &mut [Node], id: NodeId, parent_global: Mat4) {
            let global = parent_global * nodes[id.0].matrix;
            nodes[id.0].global_matrix = global;
            let children = nodes[id.0].children.clone();
            for child in children {
                propagate(nodes, child, global);
            }
        }

        let roots = self.top_nodes.clone();
        for root in roots {
            propagate(&mut self.nodes, root, Mat4::IDENTITY);
        }

        self.recompute_bounds();
    }

    fn recompute_bounds(&mut self) {
        let mut aabox = AaBox::default();
        for node in &self.nodes {
            for &mesh_id in &node.meshes {
                if let Some(mesh) = self.meshes.get(mesh_id.0) {
                    if let Some(world_box) = mesh.aabox().transformed(node.global_matrix) {
                        aabox.add_box(&world_box);
                    }
                }
            }
        }
        self.aabox = aabox;
    }

    /// The scene's world-space bounds, or `None` if no node references any
    /// geometry (the box remains inverted).
    pub fn bounds(&self) -> Option<AaBox> {
        if self.aabox.is_inverted() {
            None
        } else {
            Some(self.aabox)
        }
    }

    /// Bakes every node's global transform into its referenced mesh(es)'
    /// vertex/normal/tangent data, then resets `matrix` and
    /// `global_matrix` to identity everywhere (§4.E "Transform baking").
    ///
    /// A mesh referenced by more than one node is cloned per extra
    /// referencing node rather than folding every node's transform into the
    /// same vertex data (§9 Design Notes: resolves the source's
    /// underspecified multi-reference behaviour in favour of correctness).
    pub fn apply_xform(&mut self) {
        self.update_xform();

        let mut refcount: HashMap<MeshId, usize> = HashMap::new();
        for node in &self.nodes {
            for &mesh_id in &node.meshes {
                *refcount.entry(mesh_id).or_default() += 1;
            }
        }

        let originals: HashMap<MeshId, Mesh> = refcount
            .iter()
            .filter(|&(_, &count)| count > 1)
            .filter_map(|(&id, _)| self.meshes.get(id.0).cloned().map(|m| (id, m)))
            .collect();

        let mut seen: HashSet<MeshId> = HashSet::new();
        for node_idx in 0..self.nodes.len() {
            let node_id = NodeId(node_idx);
            let global = self.nodes[node_idx].global_matrix;
            let mesh_ids = self.nodes[node_idx].meshes.clone();

            for mesh_id in mesh_ids {
                let is_shared = refcount.get(&mesh_id).copied().unwrap_or(0) > 1;

                if is_shared && seen.contains(&mesh_id) {
                    let mut clone = originals[&mesh_id].clone();
                    clone.transform(global);
                    let new_id = self.add_mesh(clone);
                    let node = &mut self.nodes[node_id.0];
                    node.remove_mesh(mesh_id);
                    node.add_mesh(new_id);
                } else {
                    if is_shared {
                        seen.insert(mesh_id);
                    }
                    if let Some(mesh) = self.meshes.get_mut(mesh_id.0) {
                        mesh.transform(global);
                    }
                }
            }
        }

        for node in &mut self.nodes {
            node.matrix = Mat4::IDENTITY;
            node.global_matrix = Mat4::IDENTITY;
        }

        self.recompute_bounds();
    }

    /// Checks the invariants in §8 across the whole scene: per-mesh
    /// attribute-length/index invariants, and per-node acyclic /
    /// parent-child-consistency invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        for mesh in &self.meshes {
            mesh.validate()?;
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            let id = NodeId(idx);
            anyhow::ensure!(node.parent() != Some(id), "node '{}' is its own parent", node.name);
            for &child in node.children() {
                anyhow::ensure!(
                    self.nodes[child.0].parent() == Some(id),
                    "node '{}' lists child not pointing back",
                    node.name
                );
            }
            if let Some(parent) = node.parent() {
                anyhow::ensure!(
                    self.nodes[parent.0].children().contains(&id),
                    "node '{}' has parent that does not list it as a child",
                    node.name
                );
            }
        }
        for mesh in &self.meshes {
            if let Some(mat) = mesh.material {
                anyhow::ensure!(
                    mat.0 < self.materials.len(),
                    "mesh '{}' references out-of-range material",
                    mesh.name
                );
            }
        }
        Ok(())
    }

    pub(crate) fn log_skip(&self, what: &str, reason: impl std::fmt::Display) {
        warn!("{what}: {reason}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Face;
    use glam::Vec3;

    fn unit_triangle(name: &str) -> Mesh {
        let mut mesh = Mesh::new(name);
        let a = mesh.add_vertex(Vec3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Vec3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Vec3::new(0.0, 1.0, 0.0));
        mesh.add_triangle(a, b, c);
        mesh
    }

    #[test]
    fn bounds_none_when_empty() {
        let meshfile = Meshfile::new();
        assert!(meshfile.bounds().is_none());
    }

    #[test]
    fn bounds_after_update_xform() {
        let mut meshfile = Meshfile::new();
        let mesh_id = meshfile.add_mesh(unit_triangle("tri"));
        let mut node = Node::new("root");
        node.add_mesh(mesh_id);
        meshfile.add_node(node);

        meshfile.update_xform();
        let bounds = meshfile.bounds().unwrap();
        assert_eq!(bounds.vmin, Vec3::ZERO);
        assert_eq!(bounds.vmax, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn global_matrix_follows_parent() {
        let mut meshfile = Meshfile::new();
        let mut parent = Node::new("parent");
        parent.matrix = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let parent_id = meshfile.add_node(parent);
        let child_id = meshfile.add_node(Node::new("child"));
        meshfile.node_add_child(parent_id, child_id).unwrap();

        meshfile.update_xform();
        assert_eq!(
            meshfile.node(child_id).unwrap().global_matrix(),
            meshfile.node(parent_id).unwrap().global_matrix()
        );
    }

    #[test]
    fn node_add_child_detaches_from_old_parent() {
        let mut meshfile = Meshfile::new();
        let a = meshfile.add_node(Node::new("a"));
        let b = meshfile.add_node(Node::new("b"));
        let c = meshfile.add_node(Node::new("c"));

        meshfile.node_add_child(a, c).unwrap();
        assert_eq!(meshfile.node(a).unwrap().children(), &[c]);

        meshfile.node_add_child(b, c).unwrap();
        assert!(meshfile.node(a).unwrap().children().is_empty());
        assert_eq!(meshfile.node(b).unwrap().children(), &[c]);
        assert_eq!(meshfile.node(c).unwrap().parent(), Some(b));
    }

    #[test]
    fn node_add_child_rejects_cycle() {
        let mut meshfile = Meshfile::new();
        let a = meshfile.add_node(Node::new("a"));
        let b = meshfile.add_node(Node::new("b"));
        meshfile.node_add_child(a, b).unwrap();

        assert!(meshfile.node_add_child(b, a).is_err());
    }

    #[test]
    fn node_add_child_rejects_self_parent() {
        let mut meshfile = Meshfile::new();
        let a = meshfile.add_node(Node::new("a"));
        assert!(meshfile.node_add_child(a, a).is_err());
    }

    #[test]
    fn apply_xform_resets_matrices_and_bounds_new_verts() {
        let mut meshfile = Meshfile::new();
        let mesh_id = meshfile.add_mesh(unit_triangle("tri"));
        let mut node = Node::new("root");
        node.matrix = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
        node.add_mesh(mesh_id);
        let node_id = meshfile.add_node(node);

        meshfile.apply_xform();

        assert_eq!(meshfile.node(node_id).unwrap().matrix, Mat4::IDENTITY);
        assert_eq!(meshfile.node(node_id).unwrap().global_matrix(), Mat4::IDENTITY);
        let bounds = meshfile.bounds().unwrap();
        assert_eq!(bounds.vmin.x, 5.0);
    }

    #[test]
    fn apply_xform_clones_mesh_shared_by_two_nodes() {
        let mut meshfile = Meshfile::new();
        let mesh_id = meshfile.add_mesh(unit_triangle("shared"));

        let mut node_a = Node::new("a");
        node_a.matrix = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        node_a.add_mesh(mesh_id);
        let node_a_id = meshfile.add_node(node_a);

        let mut node_b = Node::new("b");
        node_b.matrix = Mat4::from_translation(Vec3::new(-10.0, 0.0, 0.0));
        node_b.add_mesh(mesh_id);
        let node_b_id = meshfile.add_node(node_b);

        assert_eq!(meshfile.num_meshes(), 1);
        meshfile.apply_xform();
        assert_eq!(meshfile.num_meshes(), 2);

        let mesh_a_id = meshfile.node(node_a_id).unwrap().meshes()[0];
        let mesh_b_id = meshfile.node(node_b_id).unwrap().meshes()[0];
        assert_ne!(mesh_a_id, mesh_b_id);

        let mesh_a = meshfile.mesh(mesh_a_id).unwrap();
        let mesh_b = meshfile.mesh(mesh_b_id).unwrap();
        assert!(mesh_a.vertex()[0].x > 9.0);
        assert!(mesh_b.vertex()[0].x < -9.0);
    }

    #[test]
    fn mesh_material_defaults_when_unset() {
        let mut meshfile = Meshfile::new();
        let mesh_id = meshfile.add_mesh(Mesh::new("m"));
        assert_eq!(meshfile.mesh_material(mesh_id).name, "default");
    }

    #[test]
    fn validate_detects_dangling_material_ref() {
        let mut meshfile = Meshfile::new();
        let mut mesh = Mesh::new("m");
        mesh.material = Some(MaterialId(5));
        meshfile.add_mesh(mesh);
        assert!(meshfile.validate().is_err());
    }

    #[test]
    fn clear_resets_everything() {
        let mut meshfile = Meshfile::new();
        meshfile.add_mesh(unit_triangle("tri"));
        meshfile.add_node(Node::new("n"));
        meshfile.clear();
        assert_eq!(meshfile.num_meshes(), 0);
        assert_eq!(meshfile.num_nodes(), 0);
        assert_eq!(meshfile.num_topnodes(), 0);
        assert!(meshfile.bounds().is_none());
    }

    #[test]
    fn faces_use_face_type() {
        let mesh = unit_triangle("tri");
        assert_eq!(mesh.faces()[0], Face::new(0, 1, 2));
    }
}
