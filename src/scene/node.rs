//! Transform nodes (§3).

use crate::scene::{MeshId, NodeId};
use glam::Mat4;

/// A named transform node in the scene tree.
///
/// `parent`/`children`/`meshes` are non-owning references realised as
/// [`NodeId`]/[`MeshId`] indices into the owning [`crate::Meshfile`]'s
/// arenas (§3 ownership summary). Mutation of parent/child links happens
/// exclusively through `Meshfile::node_add_child`/`node_remove_child` so the
/// "`c.parent == n` iff `c ∈ n.children`" invariant always holds; this type
/// itself only stores the state, it doesn't enforce the invariant (that's
/// the meshfile's job, since fixing up both sides of a link requires access
/// to two nodes at once).
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub matrix: Mat4,
    pub(crate) global_matrix: Mat4,
    pub(crate) meshes: Vec<MeshId>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            matrix: Mat4::IDENTITY,
            global_matrix: Mat4::IDENTITY,
            meshes: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn global_matrix(&self) -> Mat4 {
        self.global_matrix
    }

    pub fn meshes(&self) -> &[MeshId] {
        &self.meshes
    }

    pub(crate) fn add_mesh(&mut self, id: MeshId) {
        if !self.meshes.contains(&id) {
            self.meshes.push(id);
        }
    }

    pub(crate) fn remove_mesh(&mut self, id: MeshId) {
        self.meshes.retain(|&m| m != id);
    }
}
