//! Wavefront OBJ + MTL codec (§4.F).
//!
//! Face-vertex tuples are deduplicated through a single `(v, t, n) -> index`
//! map that lives for the whole file, not reset per mesh — matching the
//! observed behaviour of the format this codec is modelled on. A `o`/`g`
//! line still starts a fresh mesh with its own empty vertex arrays, so a
//! dedup hit recorded against an earlier mesh can hand back an index that's
//! out of range for the current one; such a mesh fails [`Mesh::validate`]
//! and is discarded at finalize time like any other attribute-length
//! mismatch.

use crate::{
    collections::OrderedMap,
    formats::{AssetSink, AssetSource},
    io::{self, Handle},
    scene::{CubeFace, Material, MaterialAttribute, Mesh, MeshId, Meshfile, TextureFilter, TextureMap, TextureWrap},
};
use anyhow::Context as _;
use glam::{Vec2, Vec3, Vec4};
use log::warn;
use std::collections::HashMap;

fn resolve_index(raw: &str, len: usize) -> Option<i64> {
    if raw.is_empty() {
        return None;
    }
    let idx: i64 = raw.parse().ok()?;
    if idx < 0 {
        Some(len as i64 + idx)
    } else if idx > 0 {
        Some(idx - 1)
    } else {
        None
    }
}

/// Parses one `f` token (`v`, `v/t`, `v//n`, or `v/t/n`) into resolved
/// 0-based indices, `-1` standing in for an absent component.
fn parse_face_token(tok: &str, num_v: usize, num_t: usize, num_n: usize) -> Option<(i64, i64, i64)> {
    let mut parts = tok.split('/');
    let v = resolve_index(parts.next()?, num_v)?;
    let t = parts.next().and_then(|s| resolve_index(s, num_t)).unwrap_or(-1);
    let n = parts.next().and_then(|s| resolve_index(s, num_n)).unwrap_or(-1);
    Some((v, t, n))
}

struct ObjState {
    positions: Vec<Vec3>,
    texcoords: Vec<Vec2>,
    normals: Vec<Vec3>,
    dedup: OrderedMap<(i64, i64, i64), u32>,
    current: Mesh,
    current_material: Option<crate::scene::MaterialId>,
    materials_by_name: HashMap<String, crate::scene::MaterialId>,
}

fn clean_line(line: &str) -> &str {
    let line = line.split('#').next().unwrap_or("");
    line.trim()
}

fn finalize_mesh(meshfile: &mut Meshfile, state: &mut ObjState, default_name: &str) {
    let mesh = std::mem::replace(&mut state.current, Mesh::new(default_name));
    if mesh.num_faces() == 0 {
        return;
    }
    if let Err(err) = mesh.validate() {
        warn!("obj: discarding mesh '{}': {err:#}", mesh.name);
        return;
    }
    meshfile.add_mesh(mesh);
}

/// Returns `true` if `line` looks like the start of an OBJ file, to avoid
/// the dispatcher mistakenly handing a binary file to this fallback codec.
fn looks_like_obj(handle: &mut dyn Handle) -> anyhow::Result<bool> {
    let start = io::tell(handle)?;
    let mut ok = false;
    for _ in 0..200 {
        let Some(line) = io::gets(handle)? else { break };
        let line = clean_line(&line);
        if line.is_empty() {
            continue;
        }
        let first = line.split_whitespace().next().unwrap_or("");
        ok = matches!(first, "v" | "vt" | "vn" | "f" | "o" | "g" | "mtllib" | "usemtl" | "s");
        break;
    }
    io::seek_set(handle, start)?;
    Ok(ok)
}

pub(crate) fn load(
    handle: &mut dyn Handle,
    meshfile: &mut Meshfile,
    assets: Option<&dyn AssetSource>,
) -> anyhow::Result<()> {
    anyhow::ensure!(looks_like_obj(handle)?, "does not look like an OBJ file");

    let default_name = meshfile
        .path()
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .unwrap_or("mesh")
        .to_string();

    let mut state = ObjState {
        positions: Vec::new(),
        texcoords: Vec::new(),
        normals: Vec::new(),
        dedup: OrderedMap::new(),
        current: Mesh::new(default_name.as_str()),
        current_material: None,
        materials_by_name: HashMap::new(),
    };

    while let Some(line) = io::gets(handle)? {
        let line = clean_line(&line);
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let Some(tag) = tokens.next() else { continue };
        let rest: Vec<&str> = tokens.collect();

        match tag {
            "v" if rest.len() >= 3 => {
                let (x, y, z) = (parse_f32(rest[0]), parse_f32(rest[1]), parse_f32(rest[2]));
                state.positions.push(Vec3::new(x, y, z));
            }
            "vt" if rest.len() >= 2 => {
                let (u, v) = (parse_f32(rest[0]), parse_f32(rest[1]));
                state.texcoords.push(Vec2::new(u, 1.0 - v));
            }
            "vn" if rest.len() >= 3 => {
                let (x, y, z) = (parse_f32(rest[0]), parse_f32(rest[1]), parse_f32(rest[2]));
                state.normals.push(Vec3::new(x, y, z));
            }
            "f" if rest.len() >= 3 => {
                let mut resolved = Vec::with_capacity(rest.len());
                let mut ok = true;
                for tok in &rest {
                    match parse_face_token(tok, state.positions.len(), state.texcoords.len(), state.normals.len()) {
                        Some(triple) => resolved.push(triple),
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                if !ok {
                    warn!("obj: skipping malformed face line: {line}");
                    continue;
                }

                let mut idx = Vec::with_capacity(resolved.len());
                for triple @ (v, t, n) in resolved {
                    let vertex_idx = *state.dedup.get_or_insert_with(triple, || {
                        let new_idx = state.current.add_vertex(
                            state.positions.get(v as usize).copied().unwrap_or(Vec3::ZERO),
                        );
                        if n >= 0 {
                            state.current.add_normal(state.normals.get(n as usize).copied().unwrap_or(Vec3::Z));
                        }
                        if t >= 0 {
                            state
                                .current
                                .add_texcoord(state.texcoords.get(t as usize).copied().unwrap_or(Vec2::ZERO));
                        }
                        new_idx
                    });
                    idx.push(vertex_idx);
                }

                if idx.len() == 3 {
                    state.current.add_triangle(idx[0], idx[1], idx[2]);
                } else if idx.len() == 4 {
                    state.current.add_quad(idx[0], idx[1], idx[2], idx[3]);
                } else {
                    // Fan-triangulate any higher vertex count.
                    for i in 1..idx.len() - 1 {
                        state.current.add_triangle(idx[0], idx[i], idx[i + 1]);
                    }
                }
            }
            "o" | "g" if !rest.is_empty() => {
                finalize_mesh(meshfile, &mut state, &default_name);
                state.current = Mesh::new(rest.join(" "));
                state.current.material = state.current_material;
            }
            "mtllib" if !rest.is_empty() => {
                let Some(assets) = assets else {
                    warn!("obj: mtllib {} ignored, no asset source", rest[0]);
                    continue;
                };
                let resolved = meshfile.resolve_asset_path(rest[0]).to_string();
                match assets.open_read(&resolved) {
                    Ok(mut mtl_handle) => {
                        if let Err(err) = load_mtl(mtl_handle.as_mut(), meshfile, &mut state.materials_by_name) {
                            warn!("obj: failed to read mtllib {}: {err:#}", rest[0]);
                        }
                    }
                    Err(err) => warn!("obj: could not open mtllib {}: {err}", rest[0]),
                }
            }
            "usemtl" if !rest.is_empty() => {
                match state.materials_by_name.get(rest[0]).copied() {
                    Some(id) => {
                        state.current_material = Some(id);
                        state.current.material = Some(id);
                    }
                    None => warn!("obj: unknown material '{}'", rest[0]),
                }
            }
            _ => {} // unknown directive: silently ignored
        }
    }

    finalize_mesh(meshfile, &mut state, &default_name);

    let mut node = crate::scene::Node::new(default_name.as_str());
    for (id, _) in meshfile.meshes() {
        node.add_mesh(id);
    }
    meshfile.add_node(node);

    Ok(())
}

fn parse_f32(tok: &str) -> f32 {
    tok.parse().unwrap_or(0.0)
}

fn parse_floats(rest: &[&str]) -> Vec<f32> {
    rest.iter().filter_map(|t| t.parse::<f32>().ok()).collect()
}

/// Parses the texture-map option prefix (`-blendu/-blendv/-clamp/-o/-s/
/// -bm/-type`) before the trailing filename.
fn parse_texture_map(tokens: &[&str]) -> (TextureMap, Option<CubeFace>, Option<f32>) {
    let mut map = TextureMap::default();
    let mut cube_face = None;
    let mut bump = None;
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            "-blendu" => {
                map.ufilt = if tokens.get(i + 1) == Some(&"off") { TextureFilter::Nearest } else { TextureFilter::Linear };
                i += 2;
            }
            "-blendv" => {
                map.vfilt = if tokens.get(i + 1) == Some(&"off") { TextureFilter::Nearest } else { TextureFilter::Linear };
                i += 2;
            }
            "-clamp" => {
                let wrap = if tokens.get(i + 1) == Some(&"on") { TextureWrap::Clamp } else { TextureWrap::Repeat };
                map.uwrap = wrap;
                map.vwrap = wrap;
                i += 2;
            }
            "-o" => {
                let floats = parse_floats(&tokens[i + 1..(i + 4).min(tokens.len())]);
                map.offset = Vec3::new(
                    floats.first().copied().unwrap_or(0.0),
                    floats.get(1).copied().unwrap_or(0.0),
                    floats.get(2).copied().unwrap_or(0.0),
                );
                i += 1 + floats.len();
            }
            "-s" => {
                let floats = parse_floats(&tokens[i + 1..(i + 4).min(tokens.len())]);
                map.scale = Vec3::new(
                    floats.first().copied().unwrap_or(1.0),
                    floats.get(1).copied().unwrap_or(1.0),
                    floats.get(2).copied().unwrap_or(1.0),
                );
                i += 1 + floats.len();
            }
            "-bm" => {
                bump = tokens.get(i + 1).and_then(|t| t.parse::<f32>().ok());
                i += 2;
            }
            "-type" => {
                cube_face = tokens.get(i + 1).and_then(|t| match *t {
                    "cube_top" => Some(CubeFace::Top),
                    "cube_bottom" => Some(CubeFace::Bottom),
                    "cube_front" => Some(CubeFace::Front),
                    "cube_back" => Some(CubeFace::Back),
                    "cube_left" => Some(CubeFace::Left),
                    "cube_right" => Some(CubeFace::Right),
                    _ => None,
                });
                i += 2;
            }
            filename => {
                map.name = Some(filename.to_string());
                i += 1;
            }
        }
    }

    (map, cube_face, bump)
}

fn load_mtl(
    handle: &mut dyn Handle,
    meshfile: &mut Meshfile,
    materials_by_name: &mut HashMap<String, crate::scene::MaterialId>,
) -> anyhow::Result<()> {
    let mut current: Option<Material> = None;

    let finalize = |meshfile: &mut Meshfile, materials_by_name: &mut HashMap<String, crate::scene::MaterialId>, mat: Material| {
        let mut mat = mat;
        if mat.attribute(MaterialAttribute::Shininess).value.x < 1.0 {
            mat.set_value(MaterialAttribute::Specular, Vec4::ZERO);
        }
        let name = mat.name.clone();
        let id = meshfile.add_material(mat);
        materials_by_name.insert(name, id);
    };

    while let Some(line) = io::gets(handle)? {
        let line = clean_line(&line);
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let Some(tag) = tokens.next() else { continue };
        let rest: Vec<&str> = tokens.collect();

        match tag {
            "newmtl" if !rest.is_empty() => {
                if let Some(prev) = current.take() {
                    finalize(meshfile, materials_by_name, prev);
                }
                current = Some(Material::new(rest.join(" ")));
            }
            "Kd" | "Ks" | "Ke" if rest.len() >= 3 => {
                let Some(mat) = current.as_mut() else { continue };
                let v = Vec3::new(parse_f32(rest[0]), parse_f32(rest[1]), parse_f32(rest[2]));
                let attr = match tag {
                    "Kd" => MaterialAttribute::Color,
                    "Ks" => MaterialAttribute::Specular,
                    _ => MaterialAttribute::Emissive,
                };
                let w = mat.attribute(attr).value.w;
                mat.set_value(attr, Vec4::new(v.x, v.y, v.z, w));
            }
            "Ns" if !rest.is_empty() => {
                if let Some(mat) = current.as_mut() {
                    let ns = parse_f32(rest[0]);
                    let prev = mat.attribute(MaterialAttribute::Shininess).value;
                    mat.set_value(MaterialAttribute::Shininess, Vec4::new(ns, prev.y, prev.z, prev.w));
                }
            }
            "Ni" if !rest.is_empty() => {
                if let Some(mat) = current.as_mut() {
                    let ni = parse_f32(rest[0]);
                    mat.set_value(MaterialAttribute::Ior, Vec4::new(ni, 0.0, 0.0, 0.0));
                }
            }
            "Pr" if !rest.is_empty() => {
                if let Some(mat) = current.as_mut() {
                    mat.set_value(MaterialAttribute::Roughness, Vec4::new(parse_f32(rest[0]), 0.0, 0.0, 0.0));
                }
            }
            "Pm" if !rest.is_empty() => {
                if let Some(mat) = current.as_mut() {
                    mat.set_value(MaterialAttribute::Metallic, Vec4::new(parse_f32(rest[0]), 0.0, 0.0, 0.0));
                }
            }
            "d" if !rest.is_empty() => {
                if let Some(mat) = current.as_mut() {
                    let d = parse_f32(rest[0]);
                    mat.set_value(MaterialAttribute::Alpha, Vec4::new(d, 0.0, 0.0, 0.0));
                    mat.set_value(MaterialAttribute::Transmit, Vec4::new(1.0 - d, 0.0, 0.0, 0.0));
                }
            }
            "map_Kd" | "map_Ks" | "map_d" | "map_Ke" | "map_Ns" | "bump" | "map_bump" | "refl" | "map_Pr"
            | "map_Pm" => {
                let Some(mat) = current.as_mut() else { continue };
                let (mut map, cube_face, bump) = parse_texture_map(&rest);
                let attr = match tag {
                    "map_Kd" => MaterialAttribute::Color,
                    "map_Ks" => MaterialAttribute::Specular,
                    "map_d" => MaterialAttribute::Alpha,
                    "map_Ke" => MaterialAttribute::Emissive,
                    "map_Ns" => MaterialAttribute::Shininess,
                    "bump" | "map_bump" => MaterialAttribute::Bump,
                    "refl" => MaterialAttribute::Reflect,
                    "map_Pr" => MaterialAttribute::Roughness,
                    _ => MaterialAttribute::Metallic,
                };
                if let Some(face) = cube_face {
                    if let Some(name) = map.name.take() {
                        map.set_cube_face(face, name);
                    }
                }
                if let (MaterialAttribute::Bump, Some(magnitude)) = (attr, bump) {
                    let prev = mat.attribute(attr).value;
                    mat.set_value(attr, Vec4::new(magnitude, prev.y, prev.z, prev.w));
                }
                mat.set_map(attr, map);
            }
            _ => {}
        }
    }

    if let Some(last) = current.take() {
        finalize(meshfile, materials_by_name, last);
    }

    Ok(())
}

pub(crate) fn save(
    handle: &mut dyn Handle,
    meshfile: &Meshfile,
    assets: Option<&dyn AssetSink>,
    file_stem: &str,
) -> anyhow::Result<()> {
    io::puts(handle, "# exported by meshfile\n")?;

    if meshfile.num_materials() > 0 {
        if let Some(assets) = assets {
            let mtl_name = format!("{file_stem}.mtl");
            let mut mtl_handle = assets
                .open_write(&mtl_name)
                .with_context(|| format!("opening sidecar {mtl_name}"))?;
            save_mtl(mtl_handle.as_mut(), meshfile)?;
            io::puts(handle, &format!("mtllib {mtl_name}\n"))?;
        }
    }

    let mut vertex_offset = 0usize;
    let mut texcoord_offset = 0usize;
    let mut normal_offset = 0usize;

    for (_, mesh) in meshfile.meshes() {
        io::puts(handle, &format!("o {}\n", mesh.name))?;
        if let Some(mat_id) = mesh.material {
            if let Some(mat) = meshfile.material(mat_id) {
                io::puts(handle, &format!("usemtl {}\n", mat.name))?;
            }
        }

        for v in mesh.vertex() {
            io::puts(handle, &format!("v {} {} {}\n", v.x, v.y, v.z))?;
        }
        if let Some(normals) = mesh.normal() {
            for n in normals {
                io::puts(handle, &format!("vn {} {} {}\n", n.x, n.y, n.z))?;
            }
        }
        if let Some(texcoords) = mesh.texcoord() {
            for uv in texcoords {
                io::puts(handle, &format!("vt {} {}\n", uv.x, 1.0 - uv.y))?;
            }
        }

        let has_normal = mesh.normal().is_some();
        let has_texcoord = mesh.texcoord().is_some();

        for face in mesh.faces() {
            let token = |local: u32| -> String {
                let v = vertex_offset as u32 + local + 1;
                match (has_texcoord, has_normal) {
                    (true, true) => format!("{v}/{}/{}", texcoord_offset as u32 + local + 1, normal_offset as u32 + local + 1),
                    (false, true) => format!("{v}//{}", normal_offset as u32 + local + 1),
                    (true, false) => format!("{v}/{}", texcoord_offset as u32 + local + 1),
                    (false, false) => format!("{v}"),
                }
            };
            io::puts(
                handle,
                &format!("f {} {} {}\n", token(face.vidx[0]), token(face.vidx[1]), token(face.vidx[2])),
            )?;
        }

        vertex_offset += mesh.num_verts();
        if has_normal {
            normal_offset += mesh.num_verts();
        }
        if has_texcoord {
            texcoord_offset += mesh.num_verts();
        }
    }

    Ok(())
}

fn save_mtl(handle: &mut dyn Handle, meshfile: &Meshfile) -> anyhow::Result<()> {
    for (_, mat) in meshfile.materials() {
        io::puts(handle, &format!("newmtl {}\n", mat.name))?;
        let kd = mat.attribute(MaterialAttribute::Color).value;
        io::puts(handle, &format!("Kd {} {} {}\n", kd.x, kd.y, kd.z))?;
        let ks = mat.attribute(MaterialAttribute::Specular).value;
        io::puts(handle, &format!("Ks {} {} {}\n", ks.x, ks.y, ks.z))?;
        io::puts(handle, &format!("Ns {}\n", mat.attribute(MaterialAttribute::Shininess).value.x))?;
        let ke = mat.attribute(MaterialAttribute::Emissive).value;
        if ke != Vec4::ZERO {
            io::puts(handle, &format!("Ke {} {} {}\n", ke.x, ke.y, ke.z))?;
        }
        io::puts(handle, &format!("Ni {}\n", mat.attribute(MaterialAttribute::Ior).value.x))?;
        let transmit = mat.attribute(MaterialAttribute::Transmit).value.x;
        if transmit != 0.0 {
            io::puts(handle, &format!("Tf {transmit} {transmit} {transmit}\n"))?;
        }
        io::puts(handle, &format!("d {}\n", mat.attribute(MaterialAttribute::Alpha).value.x))?;
        let roughness = mat.attribute(MaterialAttribute::Roughness).value.x;
        if roughness != 0.0 {
            io::puts(handle, &format!("Pr {roughness}\n"))?;
        }
        let metallic = mat.attribute(MaterialAttribute::Metallic).value.x;
        if metallic != 0.0 {
            io::puts(handle, &format!("Pm {metallic}\n"))?;
        }
        for attr in MaterialAttribute::ALL {
            if let Some(map) = &mat.attribute(attr).map {
                if let Some(name) = &map.name {
                    let directive = match attr {
                        MaterialAttribute::Color => "map_Kd",
                        MaterialAttribute::Specular => "map_Ks",
                        MaterialAttribute::Alpha => "map_d",
                        MaterialAttribute::Emissive => "map_Ke",
                        MaterialAttribute::Shininess => "map_Ns",
                        MaterialAttribute::Bump => "map_bump",
                        MaterialAttribute::Reflect => "refl",
                        MaterialAttribute::Roughness => "map_Pr",
                        MaterialAttribute::Metallic => "map_Pm",
                        _ => continue,
                    };
                    io::puts(handle, &format!("{directive} {name}\n"))?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory_handle;

    fn load_str(text: &str) -> Meshfile {
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(text.as_bytes().to_vec());
        load(&mut handle, &mut meshfile, None).unwrap();
        meshfile
    }

    #[test]
    fn triangle_only() {
        let meshfile = load_str("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n");
        assert_eq!(meshfile.num_meshes(), 1);
        let mesh = meshfile.mesh(MeshId(0)).unwrap();
        assert_eq!(mesh.num_verts(), 3);
        assert_eq!(mesh.num_faces(), 1);
        assert!(mesh.normal().is_none());
    }

    #[test]
    fn quad_splits_into_two_triangles() {
        let meshfile = load_str("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n");
        let mesh = meshfile.mesh(MeshId(0)).unwrap();
        assert_eq!(mesh.num_faces(), 2);
    }

    #[test]
    fn repeated_face_vertex_dedups() {
        let meshfile = load_str("v 0 0 0\nvn 0 0 1\nv 1 0 0\nv 0 1 0\nf 1/1/1 2/1/1 3/1/1 1/1/1\n");
        let mesh = meshfile.mesh(MeshId(0)).unwrap();
        assert_eq!(mesh.num_faces(), 2);
        assert_eq!(mesh.faces()[0].vidx[0], mesh.faces()[1].vidx[0]);
    }

    #[test]
    fn mismatched_attributes_discard_mesh() {
        // first face-vertex has a normal, second doesn't -> normal array
        // length diverges from vertex count -> validate() fails -> dropped.
        let meshfile = load_str("v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2 3\n");
        assert_eq!(meshfile.num_meshes(), 0);
    }

    #[test]
    fn rejects_non_obj_input() {
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(vec![0u8, 1, 2, 3]);
        assert!(load(&mut handle, &mut meshfile, None).is_err());
    }

    #[test]
    fn refl_cube_face_keeps_its_filename() {
        let mtl = "newmtl m\nrefl -type cube_top sky_top.png\n";
        let mut meshfile = Meshfile::new();
        let mut materials_by_name = HashMap::new();
        let mut handle = memory_handle(mtl.as_bytes().to_vec());
        load_mtl(&mut handle, &mut meshfile, &mut materials_by_name).unwrap();

        let id = *materials_by_name.get("m").unwrap();
        let map = meshfile.material(id).unwrap().attribute(MaterialAttribute::Reflect).map.as_ref().unwrap();
        assert_eq!(map.cube[CubeFace::Top.index()].as_deref(), Some("sky_top.png"));
        assert!(map.name.is_none());
    }

    #[test]
    fn save_then_reload_preserves_vertex_count() {
        let mut meshfile = load_str("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n");
        meshfile.update_xform();
        let mut buf = memory_handle(Vec::new());
        save(&mut buf, &meshfile, None, "roundtrip").unwrap();

        io::seek_set(&mut buf, 0).unwrap();
        let mut reloaded = Meshfile::new();
        load(&mut buf, &mut reloaded, None).unwrap();
        assert_eq!(reloaded.mesh(MeshId(0)).unwrap().num_verts(), 3);
    }
}
