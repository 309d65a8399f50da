//! JTF codec (§4.G): a trivial fixed-layout little-endian binary triangle
//! dump. Header `"JTF!"`, u32 format (only `0` is recognised), u32 face
//! count, then `face_count` faces of three `{pos: vec3, norm: vec3, uv:
//! vec2}` vertices (96 bytes/face).

use crate::{
    io::{self, Handle},
    scene::{Mesh, Meshfile, Node},
};
use glam::{Vec2, Vec3};
use std::io::{Read, Write};

const MAGIC: [u8; 4] = *b"JTF!";

pub(crate) fn load(handle: &mut dyn Handle, meshfile: &mut Meshfile) -> anyhow::Result<()> {
    let mut magic = [0u8; 4];
    handle.read_exact(&mut magic).map_err(|e| anyhow::anyhow!("reading magic: {e}"))?;
    anyhow::ensure!(magic == MAGIC, "not a JTF file");

    let format = io::read_u32_le(handle)?;
    anyhow::ensure!(format == 0, "unsupported JTF format {format}");

    let face_count = io::read_u32_le(handle)?;

    let mut mesh = Mesh::new("jtf");
    for _ in 0..face_count {
        let mut idx = [0u32; 3];
        for slot in &mut idx {
            let pos = Vec3::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?, io::read_f32_le(handle)?);
            let norm = Vec3::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?, io::read_f32_le(handle)?);
            let uv = Vec2::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?);

            *slot = mesh.add_vertex(pos);
            mesh.add_normal(norm);
            mesh.add_texcoord(uv);
        }
        mesh.add_triangle(idx[0], idx[1], idx[2]);
    }

    let mesh_id = meshfile.add_mesh(mesh);
    let mut node = Node::new("jtf");
    node.add_mesh(mesh_id);
    meshfile.add_node(node);

    Ok(())
}

pub(crate) fn save(handle: &mut dyn Handle, meshfile: &Meshfile) -> anyhow::Result<()> {
    let total_faces: usize = meshfile.meshes().map(|(_, m)| m.num_faces()).sum();

    handle.write_all(&MAGIC).map_err(|e| anyhow::anyhow!("writing magic: {e}"))?;
    io::write_u32_le(handle, 0)?;
    io::write_u32_le(handle, total_faces as u32)?;

    for (_, mesh) in meshfile.meshes() {
        for face in mesh.faces() {
            for &idx in &face.vidx {
                let pos = mesh.vertex()[idx as usize];
                let norm = mesh.normal().map(|n| n[idx as usize]).unwrap_or(Vec3::Y);
                let uv = mesh.texcoord().map(|t| t[idx as usize]).unwrap_or(Vec2::ZERO);

                io::write_f32_le(handle, pos.x)?;
                io::write_f32_le(handle, pos.y)?;
                io::write_f32_le(handle, pos.z)?;
                io::write_f32_le(handle, norm.x)?;
                io::write_f32_le(handle, norm.y)?;
                io::write_f32_le(handle, norm.z)?;
                io::write_f32_le(handle, uv.x)?;
                io::write_f32_le(handle, uv.y)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory_handle;

    fn scenario_bytes() -> Vec<u8> {
        let mut bytes = vec![0x4A, 0x54, 0x46, 0x21, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        bytes.extend(std::iter::repeat(0u8).take(96));
        bytes
    }

    #[test]
    fn loads_spec_scenario_one() {
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(scenario_bytes());
        load(&mut handle, &mut meshfile).unwrap();

        assert_eq!(meshfile.num_meshes(), 1);
        let mesh = meshfile.mesh(crate::scene::MeshId(0)).unwrap();
        assert_eq!(mesh.num_verts(), 3);
        assert_eq!(mesh.num_faces(), 1);
        assert_eq!(mesh.faces()[0].vidx, [0, 1, 2]);

        meshfile.update_xform();
        let bounds = meshfile.bounds().unwrap();
        assert_eq!(bounds.vmin, Vec3::ZERO);
        assert_eq!(bounds.vmax, Vec3::ZERO);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(vec![0u8; 16]);
        assert!(load(&mut handle, &mut meshfile).is_err());
    }

    #[test]
    fn round_trip_is_bit_equal() {
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(scenario_bytes());
        load(&mut handle, &mut meshfile).unwrap();

        let mut out = memory_handle(Vec::new());
        save(&mut out, &meshfile).unwrap();

        io::seek_set(&mut out, 0).unwrap();
        let mut reloaded = Meshfile::new();
        load(&mut out, &mut reloaded).unwrap();

        let original = meshfile.mesh(crate::scene::MeshId(0)).unwrap();
        let roundtripped = reloaded.mesh(crate::scene::MeshId(0)).unwrap();
        assert_eq!(original.vertex(), roundtripped.vertex());
        assert_eq!(original.normal(), roundtripped.normal());
        assert_eq!(original.texcoord(), roundtripped.texcoord());
    }
}
