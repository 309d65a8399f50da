//! Reads and writes 3D mesh scenes across several on-disk formats behind one
//! in-memory scene model.
//!
//! Supported formats: Wavefront OBJ (+ MTL sidecar), JTF, STL (binary),
//! Autodesk 3DS, and glTF 2.0 (`.gltf`/`.glb`). [`Meshfile::load`] tries each
//! codec in turn; [`Meshfile::save`] picks one explicitly, by filename
//! suffix, or falls back to OBJ.
//!
//! ```no_run
//! use meshfile::{Meshfile, LoadFlags};
//!
//! let mut scene = Meshfile::new();
//! scene.load_path("model.glb", LoadFlags::default())?;
//! scene.save_path("model.obj", Default::default(), Default::default())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod collections;
mod formats;
mod io;
mod json;
mod math;
mod scene;

pub use crate::{
    formats::{Format, LoadFlags, SaveFlags},
    io::Handle,
    math::AaBox,
    scene::{
        Face, Material, MaterialAttribute, MaterialId, Mesh, MeshBuilder, MeshId, Meshfile, Node,
        NodeId, TextureFilter, TextureMap, TextureWrap,
    },
};

pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
