//! 3DS codec (§4.I): a tree of `{u16 id, u32 len}` chunks (length inclusive
//! of the 6-byte header), walked with a bounded-seek pattern — a chunk's end
//! offset is computed up front, a handler reads however much of it cares to,
//! and the walker always seeks to that end offset before moving to the next
//! sibling.
//!
//! Vertex and matrix data cross a Y-up (3DS) / Z-up (this crate's scene
//! space) boundary: [`fix_coords`] converts file → scene, [`unfix_coords`]
//! inverts it for save.

use crate::{
    io::{self, Handle},
    math,
    scene::{Material, MaterialAttribute, MaterialId, Mesh, Meshfile, Node, TextureMap},
};
use glam::{Mat4, Vec2, Vec3};
use std::{collections::HashMap, io::Write};

const MAIN: u16 = 0x4D4D;
const VERSION: u16 = 0x0002;
const EDIT3D: u16 = 0x3D3D;
const MESHVER: u16 = 0x3D3E;
const MATERIAL: u16 = 0xAFFF;
const OBJECT: u16 = 0x4000;

const MAT_NAME: u16 = 0xA000;
const MAT_AMBIENT: u16 = 0xA010;
const MAT_DIFFUSE: u16 = 0xA020;
const MAT_SPECULAR: u16 = 0xA030;
const MAT_SHININESS: u16 = 0xA040;
const MAT_SHIN_STRENGTH: u16 = 0xA041;
const MAT_SELF_ILLUM: u16 = 0xA084;
const MAT_TEXMAP: u16 = 0xA200;
const MAT_SPECMAP: u16 = 0xA204;
const MAT_OPACMAP: u16 = 0xA210;
const MAT_REFLMAP: u16 = 0xA220;
const MAT_BUMPMAP: u16 = 0xA230;
const MAT_SHINMAP: u16 = 0xA33C;

const COLOR_RGBF: u16 = 0x0010;
const COLOR_RGB: u16 = 0x0011;
const COLOR_RGBF_GAMMA: u16 = 0x0013;
const COLOR_RGB_GAMMA: u16 = 0x0012;

const PCT_INT: u16 = 0x0030;
const PCT_FLOAT: u16 = 0x0031;

const MAP_FILENAME: u16 = 0xA300;
const MAP_USCALE: u16 = 0xA354;
const MAP_VSCALE: u16 = 0xA356;
const MAP_UOFFSET: u16 = 0xA358;
const MAP_VOFFSET: u16 = 0xA35A;
const MAP_ANG: u16 = 0xA35C;

const TRIMESH: u16 = 0x4100;
const VERTLIST: u16 = 0x4110;
const UVLIST: u16 = 0x4140;
const FACEDESC: u16 = 0x4120;
const FACEMTL: u16 = 0x4130;
const MESHMATRIX: u16 = 0x4160;

fn fix_coords(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, -v.y)
}

fn unfix_coords(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.z, v.y)
}

/// Reads a chunk header at the current position, returning its id and its
/// absolute end offset.
fn read_header(handle: &mut dyn Handle) -> anyhow::Result<(u16, u64)> {
    let pos = io::tell(handle)?;
    let id = io::read_u16_le(handle)?;
    let len = io::read_u32_le(handle)?;
    Ok((id, pos + len as u64))
}

pub(crate) fn load(handle: &mut dyn Handle, meshfile: &mut Meshfile) -> anyhow::Result<()> {
    let (id, main_end) = read_header(handle)?;
    anyhow::ensure!(id == MAIN, "not a 3DS file");

    let mut materials_by_name: HashMap<String, MaterialId> = HashMap::new();

    while io::tell(handle)? + 6 <= main_end {
        let (id, end) = read_header(handle)?;
        if id == EDIT3D {
            while io::tell(handle)? + 6 <= end {
                let (id2, end2) = read_header(handle)?;
                match id2 {
                    MATERIAL => parse_material(handle, end2, meshfile, &mut materials_by_name)?,
                    OBJECT => parse_object(handle, end2, meshfile, &materials_by_name)?,
                    _ => {}
                }
                io::seek_set(handle, end2)?;
            }
        }
        io::seek_set(handle, end)?;
    }

    Ok(())
}

fn read_color(handle: &mut dyn Handle, end: u64) -> anyhow::Result<Option<Vec3>> {
    let mut result = None;
    while io::tell(handle)? + 6 <= end {
        let (id, sub_end) = read_header(handle)?;
        match id {
            COLOR_RGB | COLOR_RGB_GAMMA => {
                let r = io::read_u8(handle)? as f32 / 255.0;
                let g = io::read_u8(handle)? as f32 / 255.0;
                let b = io::read_u8(handle)? as f32 / 255.0;
                result = Some(Vec3::new(r, g, b));
            }
            COLOR_RGBF | COLOR_RGBF_GAMMA => {
                result = Some(Vec3::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?, io::read_f32_le(handle)?));
            }
            _ => {}
        }
        io::seek_set(handle, sub_end)?;
    }
    Ok(result)
}

fn read_percent(handle: &mut dyn Handle, end: u64) -> anyhow::Result<Option<f32>> {
    let mut result = None;
    while io::tell(handle)? + 6 <= end {
        let (id, sub_end) = read_header(handle)?;
        match id {
            PCT_INT => result = Some(io::read_u16_le(handle)? as f32 / 100.0),
            PCT_FLOAT => result = Some(io::read_f32_le(handle)? / 100.0),
            _ => {}
        }
        io::seek_set(handle, sub_end)?;
    }
    Ok(result)
}

fn read_texture_map(handle: &mut dyn Handle, end: u64) -> anyhow::Result<TextureMap> {
    let mut map = TextureMap::default();
    while io::tell(handle)? + 6 <= end {
        let (id, sub_end) = read_header(handle)?;
        match id {
            MAP_FILENAME => map.name = Some(io::read_cstr(handle)?.to_lowercase()),
            MAP_USCALE => map.scale.x = io::read_f32_le(handle)?,
            MAP_VSCALE => map.scale.y = io::read_f32_le(handle)?,
            MAP_UOFFSET => map.offset.x = io::read_f32_le(handle)?,
            MAP_VOFFSET => map.offset.y = io::read_f32_le(handle)?,
            MAP_ANG => map.rot = io::read_f32_le(handle)?,
            _ => {}
        }
        io::seek_set(handle, sub_end)?;
    }
    Ok(map)
}

fn parse_material(
    handle: &mut dyn Handle,
    end: u64,
    meshfile: &mut Meshfile,
    materials_by_name: &mut HashMap<String, MaterialId>,
) -> anyhow::Result<()> {
    let mut name = String::new();
    let mut diffuse = Vec3::splat(0.7);
    let mut specular = Vec3::ZERO;
    let mut shininess = 0.0f32;
    let mut shin_strength = 0.0f32;
    let mut self_illum = 0.0f32;
    let mut maps: Vec<(MaterialAttribute, TextureMap)> = Vec::new();

    while io::tell(handle)? + 6 <= end {
        let (id, sub_end) = read_header(handle)?;
        match id {
            MAT_NAME => name = io::read_cstr(handle)?,
            MAT_AMBIENT => {
                read_color(handle, sub_end)?;
            }
            MAT_DIFFUSE => {
                if let Some(c) = read_color(handle, sub_end)? {
                    diffuse = c;
                }
            }
            MAT_SPECULAR => {
                if let Some(c) = read_color(handle, sub_end)? {
                    specular = c;
                }
            }
            MAT_SHININESS => {
                if let Some(p) = read_percent(handle, sub_end)? {
                    shininess = p;
                }
            }
            MAT_SHIN_STRENGTH => {
                if let Some(p) = read_percent(handle, sub_end)? {
                    shin_strength = p;
                }
            }
            MAT_SELF_ILLUM => {
                if let Some(p) = read_percent(handle, sub_end)? {
                    self_illum = p;
                }
            }
            MAT_TEXMAP | MAT_SPECMAP | MAT_SHINMAP | MAT_OPACMAP | MAT_BUMPMAP | MAT_REFLMAP => {
                let attr = match id {
                    MAT_TEXMAP => MaterialAttribute::Color,
                    MAT_SPECMAP => MaterialAttribute::Specular,
                    MAT_SHINMAP => MaterialAttribute::Shininess,
                    MAT_OPACMAP => MaterialAttribute::Alpha,
                    MAT_BUMPMAP => MaterialAttribute::Bump,
                    _ => MaterialAttribute::Reflect,
                };
                maps.push((attr, read_texture_map(handle, sub_end)?));
            }
            _ => {}
        }
        io::seek_set(handle, sub_end)?;
    }

    let display_name = if name.is_empty() { "material".to_string() } else { name.clone() };
    let mut material = Material::new(display_name);
    let prev_color = material.attribute(MaterialAttribute::Color).value;
    material.set_value(MaterialAttribute::Color, glam::Vec4::new(diffuse.x, diffuse.y, diffuse.z, prev_color.w));
    material.set_value(MaterialAttribute::Specular, glam::Vec4::new(specular.x, specular.y, specular.z, 0.0));
    material.set_value(
        MaterialAttribute::Shininess,
        glam::Vec4::new(shininess * shin_strength * 128.0, 0.0, 0.0, 0.0),
    );
    let emissive = diffuse * self_illum;
    material.set_value(MaterialAttribute::Emissive, glam::Vec4::new(emissive.x, emissive.y, emissive.z, 0.0));
    for (attr, map) in maps {
        material.set_map(attr, map);
    }

    let id = meshfile.add_material(material);
    materials_by_name.insert(name, id);
    Ok(())
}

fn parse_object(
    handle: &mut dyn Handle,
    end: u64,
    meshfile: &mut Meshfile,
    materials_by_name: &HashMap<String, MaterialId>,
) -> anyhow::Result<()> {
    let name = io::read_cstr(handle)?;

    let mut positions: Vec<Vec3> = Vec::new();
    let mut uvs: Vec<Vec2> = Vec::new();
    let mut faces: Vec<[u16; 3]> = Vec::new();
    let mut material_name: Option<String> = None;
    let mut local_matrix: Option<Mat4> = None;

    while io::tell(handle)? + 6 <= end {
        let (id, sub_end) = read_header(handle)?;
        if id == TRIMESH {
            while io::tell(handle)? + 6 <= sub_end {
                let (id2, sub_end2) = read_header(handle)?;
                match id2 {
                    VERTLIST => {
                        let count = io::read_u16_le(handle)?;
                        for _ in 0..count {
                            let v = Vec3::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?, io::read_f32_le(handle)?);
                            positions.push(fix_coords(v));
                        }
                    }
                    UVLIST => {
                        let count = io::read_u16_le(handle)?;
                        for _ in 0..count {
                            uvs.push(Vec2::new(io::read_f32_le(handle)?, io::read_f32_le(handle)?));
                        }
                    }
                    FACEDESC => {
                        let count = io::read_u16_le(handle)?;
                        for _ in 0..count {
                            let a = io::read_u16_le(handle)?;
                            let b = io::read_u16_le(handle)?;
                            let c = io::read_u16_le(handle)?;
                            io::read_u16_le(handle)?; // edge flags, ignored
                            faces.push([a, b, c]);
                        }
                        while io::tell(handle)? + 6 <= sub_end2 {
                            let (id3, sub_end3) = read_header(handle)?;
                            if id3 == FACEMTL {
                                let mname = io::read_cstr(handle)?;
                                let fcount = io::read_u16_le(handle)?;
                                for _ in 0..fcount {
                                    io::read_u16_le(handle)?;
                                }
                                if material_name.is_none() {
                                    material_name = Some(mname);
                                }
                            }
                            io::seek_set(handle, sub_end3)?;
                        }
                    }
                    MESHMATRIX => {
                        let mut axes = [Vec3::ZERO; 4];
                        for axis in &mut axes {
                            *axis = fix_coords(Vec3::new(
                                io::read_f32_le(handle)?,
                                io::read_f32_le(handle)?,
                                io::read_f32_le(handle)?,
                            ));
                        }
                        local_matrix = Some(Mat4::from_cols(
                            axes[0].extend(0.0),
                            axes[1].extend(0.0),
                            axes[2].extend(0.0),
                            axes[3].extend(1.0),
                        ));
                    }
                    _ => {}
                }
                io::seek_set(handle, sub_end2)?;
            }
        }
        io::seek_set(handle, sub_end)?;
    }

    if faces.is_empty() {
        return Ok(());
    }

    let mut mesh = Mesh::new(name.clone());
    for p in &positions {
        mesh.add_vertex(*p);
    }
    if !uvs.is_empty() && uvs.len() == positions.len() {
        mesh.set_texcoords(uvs);
    }
    for f in &faces {
        mesh.add_triangle(f[0] as u32, f[1] as u32, f[2] as u32);
    }
    if let Some(mname) = material_name {
        if let Some(&mat_id) = materials_by_name.get(&mname) {
            mesh.material = Some(mat_id);
        }
    }

    let matrix = local_matrix.unwrap_or(Mat4::IDENTITY);
    if let Some(inv) = math::try_inverse(matrix) {
        mesh.transform(inv);
    }

    let mesh_id = meshfile.add_mesh(mesh);
    let mut node = Node::new(name);
    node.matrix = matrix;
    node.add_mesh(mesh_id);
    meshfile.add_node(node);

    Ok(())
}

// --- save: two-pass size-then-write, never back-patched (§9 Design Notes) ---

fn write_chunk(id: u16, body: Vec<u8>) -> Vec<u8> {
    let len = 6 + body.len() as u32;
    let mut out = Vec::with_capacity(body.len() + 6);
    out.extend(id.to_le_bytes());
    out.extend(len.to_le_bytes());
    out.extend(body);
    out
}

fn chunk_bytes(id: u16, write_body: impl FnOnce(&mut dyn Handle) -> anyhow::Result<()>) -> anyhow::Result<Vec<u8>> {
    let mut cursor = io::memory_handle(Vec::new());
    write_body(&mut cursor)?;
    Ok(write_chunk(id, cursor.into_inner()))
}

fn color_chunk(id: u16, c: Vec3) -> anyhow::Result<Vec<u8>> {
    chunk_bytes(id, |h| {
        let rgbf = chunk_bytes(COLOR_RGBF, |h2| {
            io::write_f32_le(h2, c.x)?;
            io::write_f32_le(h2, c.y)?;
            io::write_f32_le(h2, c.z)?;
            Ok(())
        })?;
        h.write_all(&rgbf)?;
        Ok(())
    })
}

fn percent_chunk(id: u16, value: f32) -> anyhow::Result<Vec<u8>> {
    chunk_bytes(id, |h| {
        let pct = chunk_bytes(PCT_FLOAT, |h2| {
            io::write_f32_le(h2, value * 100.0)?;
            Ok(())
        })?;
        h.write_all(&pct)?;
        Ok(())
    })
}

fn texture_map_chunk(id: u16, name: &str, map: &TextureMap) -> anyhow::Result<Vec<u8>> {
    chunk_bytes(id, |h| {
        h.write_all(&chunk_bytes(MAP_FILENAME, |h2| {
            io::write_cstr(h2, name)?;
            Ok(())
        })?)?;
        h.write_all(&chunk_bytes(MAP_USCALE, |h2| {
            io::write_f32_le(h2, map.scale.x)?;
            Ok(())
        })?)?;
        h.write_all(&chunk_bytes(MAP_VSCALE, |h2| {
            io::write_f32_le(h2, map.scale.y)?;
            Ok(())
        })?)?;
        h.write_all(&chunk_bytes(MAP_UOFFSET, |h2| {
            io::write_f32_le(h2, map.offset.x)?;
            Ok(())
        })?)?;
        h.write_all(&chunk_bytes(MAP_VOFFSET, |h2| {
            io::write_f32_le(h2, map.offset.y)?;
            Ok(())
        })?)?;
        h.write_all(&chunk_bytes(MAP_ANG, |h2| {
            io::write_f32_le(h2, map.rot)?;
            Ok(())
        })?)?;
        Ok(())
    })
}

fn material_chunk(mat: &Material) -> anyhow::Result<Vec<u8>> {
    chunk_bytes(MATERIAL, |h| {
        h.write_all(&chunk_bytes(MAT_NAME, |h2| {
            io::write_cstr(h2, &mat.name)?;
            Ok(())
        })?)?;

        let diffuse = mat.attribute(MaterialAttribute::Color).value.truncate();
        h.write_all(&color_chunk(MAT_DIFFUSE, diffuse)?)?;
        let specular = mat.attribute(MaterialAttribute::Specular).value.truncate();
        h.write_all(&color_chunk(MAT_SPECULAR, specular)?)?;

        let shininess = mat.attribute(MaterialAttribute::Shininess).value.x;
        h.write_all(&percent_chunk(MAT_SHININESS, (shininess / 128.0).clamp(0.0, 1.0))?)?;
        h.write_all(&percent_chunk(MAT_SHIN_STRENGTH, 1.0)?)?;

        for (attr, id) in [
            (MaterialAttribute::Color, MAT_TEXMAP),
            (MaterialAttribute::Specular, MAT_SPECMAP),
            (MaterialAttribute::Shininess, MAT_SHINMAP),
            (MaterialAttribute::Alpha, MAT_OPACMAP),
            (MaterialAttribute::Bump, MAT_BUMPMAP),
            (MaterialAttribute::Reflect, MAT_REFLMAP),
        ] {
            if let Some(map) = &mat.attribute(attr).map {
                if let Some(name) = &map.name {
                    h.write_all(&texture_map_chunk(id, name, map)?)?;
                }
            }
        }
        Ok(())
    })
}

fn object_chunk(node: &Node, mesh: &Mesh, materials_by_id: &HashMap<MaterialId, String>) -> anyhow::Result<Vec<u8>> {
    chunk_bytes(OBJECT, |h| {
        io::write_cstr(h, &node.name)?;

        let global = node.global_matrix();
        let trimesh = chunk_bytes(TRIMESH, |h2| {
            let vertlist = chunk_bytes(VERTLIST, |h3| {
                io::write_u16_le(h3, mesh.num_verts() as u16)?;
                for v in mesh.vertex() {
                    let file = unfix_coords(global.transform_point3(*v));
                    io::write_f32_le(h3, file.x)?;
                    io::write_f32_le(h3, file.y)?;
                    io::write_f32_le(h3, file.z)?;
                }
                Ok(())
            })?;
            h2.write_all(&vertlist)?;

            if let Some(texcoords) = mesh.texcoord() {
                let uvlist = chunk_bytes(UVLIST, |h3| {
                    io::write_u16_le(h3, texcoords.len() as u16)?;
                    for uv in texcoords {
                        io::write_f32_le(h3, uv.x)?;
                        io::write_f32_le(h3, uv.y)?;
                    }
                    Ok(())
                })?;
                h2.write_all(&uvlist)?;
            }

            let facedesc = chunk_bytes(FACEDESC, |h3| {
                io::write_u16_le(h3, mesh.num_faces() as u16)?;
                for face in mesh.faces() {
                    io::write_u16_le(h3, face.vidx[0] as u16)?;
                    io::write_u16_le(h3, face.vidx[1] as u16)?;
                    io::write_u16_le(h3, face.vidx[2] as u16)?;
                    io::write_u16_le(h3, 0)?;
                }
                Ok(())
            })?;
            h2.write_all(&facedesc)?;

            if let Some(mat_id) = mesh.material {
                if let Some(name) = materials_by_id.get(&mat_id) {
                    let facemtl = chunk_bytes(FACEMTL, |h3| {
                        io::write_cstr(h3, name)?;
                        io::write_u16_le(h3, mesh.num_faces() as u16)?;
                        for i in 0..mesh.num_faces() {
                            io::write_u16_le(h3, i as u16)?;
                        }
                        Ok(())
                    })?;
                    h2.write_all(&facemtl)?;
                }
            }

            let axes = [global.x_axis.truncate(), global.y_axis.truncate(), global.z_axis.truncate(), global.w_axis.truncate()];
            let meshmatrix = chunk_bytes(MESHMATRIX, |h3| {
                for axis in axes {
                    let f = unfix_coords(axis);
                    io::write_f32_le(h3, f.x)?;
                    io::write_f32_le(h3, f.y)?;
                    io::write_f32_le(h3, f.z)?;
                }
                Ok(())
            })?;
            h2.write_all(&meshmatrix)?;

            Ok(())
        })?;
        h.write_all(&trimesh)?;
        Ok(())
    })
}

pub(crate) fn save(handle: &mut dyn Handle, meshfile: &Meshfile) -> anyhow::Result<()> {
    let mut materials_by_id: HashMap<MaterialId, String> = HashMap::new();
    let mut material_bytes = Vec::new();
    for (id, mat) in meshfile.materials() {
        materials_by_id.insert(id, mat.name.clone());
        material_bytes.extend(material_chunk(mat)?);
    }

    let mut object_bytes = Vec::new();
    for (_, node) in meshfile.nodes() {
        for &mesh_id in node.meshes() {
            let Some(mesh) = meshfile.mesh(mesh_id) else { continue };
            if mesh.num_verts() > 65535 || mesh.num_faces() > 65535 {
                meshfile.log_skip("3ds object", format!("'{}' exceeds 65535 verts/faces", mesh.name));
                continue;
            }
            object_bytes.extend(object_chunk(node, mesh, &materials_by_id)?);
        }
    }

    let meshver = chunk_bytes(MESHVER, |h| {
        io::write_u32_le(h, 3)?;
        Ok(())
    })?;
    let mut editor_body = meshver;
    editor_body.extend(material_bytes);
    editor_body.extend(object_bytes);
    let editor_chunk = write_chunk(EDIT3D, editor_body);

    let version_chunk = chunk_bytes(VERSION, |h| {
        io::write_u32_le(h, 3)?;
        Ok(())
    })?;
    let mut main_body = version_chunk;
    main_body.extend(editor_chunk);
    let main_chunk = write_chunk(MAIN, main_body);

    handle.write_all(&main_chunk).map_err(|e| anyhow::anyhow!("writing 3DS: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory_handle;

    #[test]
    fn coordinate_fix_is_its_own_inverse_pair() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(unfix_coords(fix_coords(v)), v);
    }

    #[test]
    fn rejects_non_3ds_input() {
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(vec![0xff, 0xff, 0, 0, 0, 0]);
        assert!(load(&mut handle, &mut meshfile).is_err());
    }

    #[test]
    fn round_trips_mesh_through_world_space() {
        let mut meshfile = Meshfile::new();
        let mut mesh = Mesh::new("tri");
        let a = mesh.add_vertex(Vec3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Vec3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Vec3::new(0.0, 1.0, 0.0));
        mesh.add_triangle(a, b, c);
        let mesh_id = meshfile.add_mesh(mesh);

        let mut node = Node::new("obj");
        node.matrix = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
        node.add_mesh(mesh_id);
        meshfile.add_node(node);
        meshfile.update_xform();

        let mut buf = memory_handle(Vec::new());
        save(&mut buf, &meshfile).unwrap();

        io::seek_set(&mut buf, 0).unwrap();
        let mut reloaded = Meshfile::new();
        load(&mut buf, &mut reloaded).unwrap();

        assert_eq!(reloaded.num_meshes(), 1);
        let round_tripped = reloaded.mesh(crate::scene::MeshId(0)).unwrap();
        for (original, back) in [Vec3::ZERO, Vec3::X, Vec3::Y].iter().zip(round_tripped.vertex()) {
            assert!((*original - *back).length() < 1e-4);
        }
    }
}
