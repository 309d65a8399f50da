//! The in-memory scene model (§3, §4.E): meshes, materials, nodes, and the
//! [`Meshfile`] container that owns them all.

mod material;
mod mesh;
mod meshfile;
mod node;

pub use material::{AttributeSlot, CubeFace, Material, MaterialAttribute, TextureFilter, TextureMap, TextureWrap};
pub use mesh::{Face, Mesh, MeshBuilder, PrimitiveMode};
pub use meshfile::Meshfile;
pub use node::Node;

/// Index-based, non-owning reference to a [`Mesh`] owned by a [`Meshfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub usize);

/// Index-based, non-owning reference to a [`Material`] owned by a
/// [`Meshfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub usize);

/// Index-based, non-owning reference to a [`Node`] owned by a [`Meshfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);
