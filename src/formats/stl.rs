//! Binary STL codec (§4.H). 80-byte header, u32 triangle count, then 50
//! bytes/triangle: 12-byte face normal, 3x12-byte positions, 2-byte
//! (ignored) attribute word.

use crate::{
    io::{self, Handle},
    scene::{Mesh, Meshfile, Node},
};
use glam::{Mat4, Vec3};
use std::io::{Seek, SeekFrom};

const HEADER_LEN: u64 = 80;
const RECORD_LEN: u64 = 50;

pub(crate) fn load(handle: &mut dyn Handle, meshfile: &mut Meshfile) -> anyhow::Result<()> {
    let start = io::tell(handle)?;
    let file_len = handle.seek(SeekFrom::End(0))?;
    io::seek_set(handle, start)?;
    anyhow::ensure!(file_len >= HEADER_LEN + 4, "too short to be an STL file");

    let mut header = vec![0u8; HEADER_LEN as usize];
    std::io::Read::read_exact(handle, &mut header).map_err(|e| anyhow::anyhow!("reading header: {e}"))?;

    let face_count = io::read_u32_le(handle)?;
    anyhow::ensure!(
        file_len == start + HEADER_LEN + 4 + face_count as u64 * RECORD_LEN,
        "STL face count {face_count} inconsistent with file size"
    );

    let mut mesh = Mesh::new("stl");
    for _ in 0..face_count {
        let normal = Vec3::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?, io::read_f32_le(handle)?);
        let p0 = Vec3::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?, io::read_f32_le(handle)?);
        let p1 = Vec3::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?, io::read_f32_le(handle)?);
        let p2 = Vec3::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?, io::read_f32_le(handle)?);
        io::read_u16_le(handle)?; // attribute byte count, ignored

        let i0 = mesh.add_vertex(p0);
        let i1 = mesh.add_vertex(p1);
        let i2 = mesh.add_vertex(p2);
        mesh.add_normal(normal);
        mesh.add_normal(normal);
        mesh.add_normal(normal);
        mesh.add_triangle(i0, i2, i1);
    }

    let mesh_id = meshfile.add_mesh(mesh);
    let mut node = Node::new("stl");
    node.add_mesh(mesh_id);
    meshfile.add_node(node);

    Ok(())
}

pub(crate) fn save(handle: &mut dyn Handle, meshfile: &Meshfile) -> anyhow::Result<()> {
    let mut triangles: Vec<(Mat4, Vec3, Vec3, Vec3)> = Vec::new();
    for (_, node) in meshfile.nodes() {
        let global = node.global_matrix();
        for &mesh_id in node.meshes() {
            let Some(mesh) = meshfile.mesh(mesh_id) else { continue };
            for face in mesh.faces() {
                let verts = mesh.vertex();
                let p0 = verts[face.vidx[0] as usize];
                let p1 = verts[face.vidx[2] as usize];
                let p2 = verts[face.vidx[1] as usize];
                triangles.push((global, p0, p1, p2));
            }
        }
    }

    let mut header = [0u8; HEADER_LEN as usize];
    let banner = b"meshfile STL export";
    header[..banner.len()].copy_from_slice(banner);
    std::io::Write::write_all(handle, &header).map_err(|e| anyhow::anyhow!("writing header: {e}"))?;
    io::write_u32_le(handle, triangles.len() as u32)?;

    for (global, p0, p1, p2) in triangles {
        let (p0, p1, p2) = (global.transform_point3(p0), global.transform_point3(p1), global.transform_point3(p2));
        let normal = (p1 - p0).cross(p2 - p0).normalize_or_zero();

        io::write_f32_le(handle, normal.x)?;
        io::write_f32_le(handle, normal.y)?;
        io::write_f32_le(handle, normal.z)?;
        for p in [p0, p1, p2] {
            io::write_f32_le(handle, p.x)?;
            io::write_f32_le(handle, p.y)?;
            io::write_f32_le(handle, p.z)?;
        }
        io::write_u16_le(handle, 0)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory_handle;

    fn empty_stl() -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_LEN as usize];
        bytes.extend(0u32.to_le_bytes());
        bytes
    }

    #[test]
    fn zero_face_file_yields_empty_mesh() {
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(empty_stl());
        load(&mut handle, &mut meshfile).unwrap();

        let mesh = meshfile.mesh(crate::scene::MeshId(0)).unwrap();
        assert_eq!(mesh.num_faces(), 0);
        meshfile.update_xform();
        assert!(meshfile.bounds().is_none());
    }

    #[test]
    fn rejects_inconsistent_face_count() {
        let mut bytes = empty_stl();
        bytes[HEADER_LEN as usize..HEADER_LEN as usize + 4].copy_from_slice(&1u32.to_le_bytes());
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(bytes);
        assert!(load(&mut handle, &mut meshfile).is_err());
    }

    #[test]
    fn round_trip_preserves_face_count_and_normal() {
        let mut bytes = empty_stl();
        bytes[HEADER_LEN as usize..HEADER_LEN as usize + 4].copy_from_slice(&1u32.to_le_bytes());
        bytes.extend([0f32; 3].iter().flat_map(|f| f.to_le_bytes())); // normal (recomputed on load anyway)
        bytes.extend(0f32.to_le_bytes());
        bytes.extend(0f32.to_le_bytes());
        bytes.extend(0f32.to_le_bytes());
        bytes.extend(1f32.to_le_bytes());
        bytes.extend(0f32.to_le_bytes());
        bytes.extend(0f32.to_le_bytes());
        bytes.extend(0f32.to_le_bytes());
        bytes.extend(1f32.to_le_bytes());
        bytes.extend(0f32.to_le_bytes());
        bytes.extend(0u16.to_le_bytes());

        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(bytes);
        load(&mut handle, &mut meshfile).unwrap();
        meshfile.update_xform();

        let mut out = memory_handle(Vec::new());
        save(&mut out, &meshfile).unwrap();

        io::seek_set(&mut out, 0).unwrap();
        let mut reloaded = Meshfile::new();
        load(&mut out, &mut reloaded).unwrap();

        let original = meshfile.mesh(crate::scene::MeshId(0)).unwrap();
        let roundtripped = reloaded.mesh(crate::scene::MeshId(0)).unwrap();
        assert_eq!(original.num_faces(), roundtripped.num_faces());
        for (a, b) in original.normal().unwrap().iter().zip(roundtripped.normal().unwrap()) {
            assert!((*a - *b).length() < 1e-6);
        }
    }
}
