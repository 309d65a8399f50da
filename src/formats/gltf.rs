//! glTF 2.0 codec (§4.J): `.gltf` (plain JSON, buffers as external files or
//! `data:` URIs) and `.glb` (binary container: a JSON chunk followed by an
//! optional binary chunk) share one document parser.
//!
//! `load` walks the document in a fixed order — buffers, bufferViews,
//! accessors, materials, meshes, nodes — since later sections dereference
//! earlier ones by index. Images, samplers, and textures have no section of
//! their own: they're small enough (and referenced from few enough places)
//! that `build_texture_map`/`texture_name` resolve them directly out of the
//! document by index whenever a material references one, rather than
//! building dedicated side tables up front.

use crate::{
    formats::AssetSource,
    io::{self, Handle},
    json,
    math::{self, AaBox},
    scene::{
        Material, MaterialAttribute, MaterialId, Mesh, MeshId, Meshfile, Node, NodeId, TextureFilter, TextureMap,
        TextureWrap,
    },
};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use log::warn;
use serde_json::{json, Value};
use std::collections::HashMap;

const COMPONENT_BYTE: u64 = 5120;
const COMPONENT_UBYTE: u64 = 5121;
const COMPONENT_SHORT: u64 = 5122;
const COMPONENT_USHORT: u64 = 5123;
const COMPONENT_UINT: u64 = 5125;
const COMPONENT_FLOAT: u64 = 5126;

fn component_byte_size(ct: u64) -> usize {
    match ct {
        COMPONENT_BYTE | COMPONENT_UBYTE => 1,
        COMPONENT_SHORT | COMPONENT_USHORT => 2,
        _ => 4,
    }
}

fn type_components(ty: &str) -> usize {
    match ty {
        "SCALAR" => 1,
        "VEC2" => 2,
        "VEC3" => 3,
        "VEC4" | "MAT2" => 4,
        "MAT3" => 9,
        "MAT4" => 16,
        _ => 1,
    }
}

fn decode_component(bytes: &[u8], offset: usize, ct: u64) -> f32 {
    match ct {
        COMPONENT_BYTE => bytes[offset] as i8 as f32,
        COMPONENT_UBYTE => bytes[offset] as f32,
        COMPONENT_SHORT => i16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f32,
        COMPONENT_USHORT => u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f32,
        COMPONENT_UINT => u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]) as f32,
        _ => f32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]),
    }
}

struct BufferView {
    buffer: usize,
    offset: usize,
    length: usize,
}

struct Accessor {
    buffer_view: Option<usize>,
    byte_offset: usize,
    component_type: u64,
    count: usize,
    ty: String,
}

fn parse_buffer_views(doc: &Value) -> Vec<BufferView> {
    doc.get("bufferViews")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|bv| BufferView {
                    buffer: json::as_u64_or(bv, "buffer", 0) as usize,
                    offset: json::as_u64_or(bv, "byteOffset", 0) as usize,
                    length: json::as_u64_or(bv, "byteLength", 0) as usize,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_accessors(doc: &Value) -> Vec<Accessor> {
    doc.get("accessors")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|a| Accessor {
                    buffer_view: a.get("bufferView").and_then(Value::as_u64).map(|v| v as usize),
                    byte_offset: json::as_u64_or(a, "byteOffset", 0) as usize,
                    component_type: json::as_u64_or(a, "componentType", COMPONENT_FLOAT),
                    count: json::as_u64_or(a, "count", 0) as usize,
                    ty: json::as_str_or(a, "type", "SCALAR").to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes an accessor's components as `f32`s. `normalize_non_position`
/// divides unsigned byte/short components by their max value — used for
/// texcoord/color attributes, never for positions or indices.
fn read_accessor_floats(
    buffers: &[Vec<u8>],
    views: &[BufferView],
    accessor: &Accessor,
    normalize_non_position: bool,
) -> anyhow::Result<Vec<f32>> {
    let view_idx = accessor.buffer_view.ok_or_else(|| anyhow::anyhow!("sparse/zero-filled accessors unsupported"))?;
    let view = views.get(view_idx).ok_or_else(|| anyhow::anyhow!("accessor references missing bufferView {view_idx}"))?;
    let buf = buffers.get(view.buffer).ok_or_else(|| anyhow::anyhow!("bufferView references missing buffer {}", view.buffer))?;

    let ncomp = type_components(&accessor.ty);
    let comp_size = component_byte_size(accessor.component_type);
    let stride = ncomp * comp_size;
    let base = view.offset + accessor.byte_offset;
    anyhow::ensure!(base + accessor.count * stride <= buf.len(), "accessor reads past end of buffer");

    let max_value = match accessor.component_type {
        COMPONENT_UBYTE => 255.0,
        COMPONENT_USHORT => 65535.0,
        _ => 1.0,
    };
    let should_normalize = normalize_non_position && max_value > 1.0;

    let mut out = Vec::with_capacity(accessor.count * ncomp);
    for i in 0..accessor.count {
        let elem_off = base + i * stride;
        for c in 0..ncomp {
            let v = decode_component(buf, elem_off + c * comp_size, accessor.component_type);
            out.push(if should_normalize { v / max_value } else { v });
        }
    }
    Ok(out)
}

fn read_index_accessor(buffers: &[Vec<u8>], views: &[BufferView], accessor: &Accessor) -> anyhow::Result<Vec<u32>> {
    Ok(read_accessor_floats(buffers, views, accessor, false)?.into_iter().map(|f| f as u32).collect())
}

fn resolve_buffers(doc: &Value, assets: Option<&dyn AssetSource>, glb_bin: Option<Vec<u8>>) -> anyhow::Result<Vec<Vec<u8>>> {
    let arr = doc.get("buffers").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut buffers = Vec::with_capacity(arr.len());
    for (idx, buf) in arr.iter().enumerate() {
        let uri = buf.get("uri").and_then(Value::as_str);
        let bytes = match uri {
            Some(uri) if uri.starts_with("data:") => {
                let comma = uri.find(',').ok_or_else(|| anyhow::anyhow!("malformed data URI on buffer {idx}"))?;
                math::base64_decode(&uri[comma + 1..])?
            }
            Some(uri) => {
                let assets = assets.ok_or_else(|| anyhow::anyhow!("buffer {idx} references '{uri}' but no asset source was given"))?;
                let mut handle = assets.open_read(uri)?;
                let mut bytes = Vec::new();
                std::io::Read::read_to_end(&mut handle, &mut bytes).map_err(|e| anyhow::anyhow!("reading buffer '{uri}': {e}"))?;
                bytes
            }
            None => glb_bin.clone().ok_or_else(|| anyhow::anyhow!("buffer {idx} has no uri and no GLB binary chunk"))?,
        };
        buffers.push(bytes);
    }
    Ok(buffers)
}

fn texture_name(doc: &Value, image_idx: usize) -> String {
    json::lookup(doc, &format!("images[{image_idx}]"))
        .and_then(|img| img.get("uri"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("image_{image_idx}"))
}

fn build_texture_map(doc: &Value, tex_info: &Value) -> TextureMap {
    let mut map = TextureMap::default();

    if let Some(tex_idx) = tex_info.get("index").and_then(Value::as_u64) {
        if let Some(tex) = json::lookup(doc, &format!("textures[{tex_idx}]")) {
            if let Some(image_idx) = tex.get("source").and_then(Value::as_u64) {
                map.name = Some(texture_name(doc, image_idx as usize));
            }
            if let Some(sampler_idx) = tex.get("sampler").and_then(Value::as_u64) {
                if let Some(sampler) = json::lookup(doc, &format!("samplers[{sampler_idx}]")) {
                    let mag = json::as_u64_or(sampler, "magFilter", 9729);
                    map.ufilt = if mag == 9728 { TextureFilter::Nearest } else { TextureFilter::Linear };
                    map.vfilt = map.ufilt;
                    let wrap_s = json::as_u64_or(sampler, "wrapS", 10497);
                    let wrap_t = json::as_u64_or(sampler, "wrapT", 10497);
                    map.uwrap = if wrap_s == 10497 { TextureWrap::Repeat } else { TextureWrap::Clamp };
                    map.vwrap = if wrap_t == 10497 { TextureWrap::Repeat } else { TextureWrap::Clamp };
                }
            }
        }
    }

    if let Some(transform) = json::lookup(tex_info, "extensions.KHR_texture_transform") {
        if let Some([ox, oy]) = json::as_f32_array::<2>(transform, "offset") {
            map.offset = Vec3::new(ox, oy, 0.0);
        }
        if let Some([sx, sy]) = json::as_f32_array::<2>(transform, "scale") {
            map.scale = Vec3::new(sx, sy, 1.0);
        }
        map.rot = json::as_f32_or(transform, "rotation", 0.0);
    }

    map
}

fn parse_materials(doc: &Value) -> Vec<Material> {
    let arr = doc.get("materials").and_then(Value::as_array).cloned().unwrap_or_default();
    arr.iter()
        .enumerate()
        .map(|(i, m)| {
            let name = json::as_str_or(m, "name", &format!("material_{i}")).to_string();
            let mut mat = Material::new(name);

            let base_color = json::as_f32_array::<4>(m, "pbrMetallicRoughness.baseColorFactor").unwrap_or([0.7, 0.7, 0.7, 1.0]);
            mat.set_value(MaterialAttribute::Color, Vec4::from(base_color));
            mat.set_value(MaterialAttribute::Alpha, Vec4::new(base_color[3], 0.0, 0.0, 0.0));
            if let Some(tex) = json::lookup(m, "pbrMetallicRoughness.baseColorTexture") {
                mat.set_map(MaterialAttribute::Color, build_texture_map(doc, tex));
            }

            let roughness = json::as_f32_or(m, "pbrMetallicRoughness.roughnessFactor", 1.0);
            let metallic = json::as_f32_or(m, "pbrMetallicRoughness.metallicFactor", 1.0);
            mat.set_value(MaterialAttribute::Roughness, Vec4::new(roughness, 0.0, 0.0, 0.0));
            mat.set_value(MaterialAttribute::Metallic, Vec4::new(metallic, 0.0, 0.0, 0.0));
            mat.set_value(MaterialAttribute::Shininess, Vec4::new((1.0 - roughness) * 100.0 + 1.0, 0.0, 0.0, 0.0));
            if let Some(tex) = json::lookup(m, "pbrMetallicRoughness.metallicRoughnessTexture") {
                mat.set_map(MaterialAttribute::Metallic, build_texture_map(doc, tex));
            }

            let emissive = json::as_f32_array::<3>(m, "emissiveFactor").unwrap_or([0.0, 0.0, 0.0]);
            mat.set_value(MaterialAttribute::Emissive, Vec4::new(emissive[0], emissive[1], emissive[2], 0.0));
            if let Some(tex) = json::lookup(m, "emissiveTexture") {
                mat.set_map(MaterialAttribute::Emissive, build_texture_map(doc, tex));
            }
            if let Some(tex) = json::lookup(m, "normalTexture") {
                mat.set_map(MaterialAttribute::Bump, build_texture_map(doc, tex));
            }

            if let Some(specular) = json::as_f32_array::<3>(m, "extensions.KHR_materials_specular.specularColorFactor") {
                mat.set_value(MaterialAttribute::Specular, Vec4::new(specular[0], specular[1], specular[2], 0.0));
            }
            if let Some(ior) = json::lookup(m, "extensions.KHR_materials_ior.ior").and_then(json::as_f32) {
                mat.set_value(MaterialAttribute::Ior, Vec4::new(ior, 0.0, 0.0, 0.0));
            }
            if let Some(transmission) = json::lookup(m, "extensions.KHR_materials_transmission.transmissionFactor").and_then(json::as_f32) {
                mat.set_value(MaterialAttribute::Transmit, Vec4::new(transmission, 0.0, 0.0, 0.0));
            }
            if let Some(tex) = json::lookup(m, "extensions.KHR_materials_transmission.transmissionTexture") {
                mat.set_map(MaterialAttribute::Transmit, build_texture_map(doc, tex));
            }

            mat
        })
        .collect()
}

/// Builds one scene [`Mesh`] per supported primitive (`mode == 4`,
/// TRIANGLES); other modes are skipped with a log. A primitive whose
/// accessors don't resolve is skipped the same way rather than failing the
/// whole document.
fn parse_meshes(
    doc: &Value,
    buffers: &[Vec<u8>],
    views: &[BufferView],
    accessors: &[Accessor],
    material_ids: &[MaterialId],
) -> Vec<Vec<Mesh>> {
    let arr = doc.get("meshes").and_then(Value::as_array).cloned().unwrap_or_default();
    arr.iter()
        .enumerate()
        .map(|(mesh_idx, m)| {
            let mesh_name = json::as_str_or(m, "name", &format!("mesh_{mesh_idx}")).to_string();
            let prims = m.get("primitives").and_then(Value::as_array).cloned().unwrap_or_default();
            prims
                .iter()
                .enumerate()
                .filter_map(|(prim_idx, prim)| {
                    let mode = json::as_u64_or(prim, "mode", 4);
                    if mode != 4 {
                        warn!("mesh {mesh_idx} primitive {prim_idx}: unsupported mode {mode}, skipped");
                        return None;
                    }
                    match build_primitive(prim, buffers, views, accessors, material_ids, &format!("{mesh_name}_{prim_idx}")) {
                        Ok(mesh) => Some(mesh),
                        Err(err) => {
                            warn!("mesh {mesh_idx} primitive {prim_idx}: {err:#}, skipped");
                            None
                        }
                    }
                })
                .collect()
        })
        .collect()
}

fn build_primitive(
    prim: &Value,
    buffers: &[Vec<u8>],
    views: &[BufferView],
    accessors: &[Accessor],
    material_ids: &[MaterialId],
    name: &str,
) -> anyhow::Result<Mesh> {
    let attrs = prim.get("attributes").cloned().unwrap_or(Value::Null);

    let pos_idx = attrs.get("POSITION").and_then(Value::as_u64).ok_or_else(|| anyhow::anyhow!("primitive has no POSITION attribute"))?;
    let positions = read_accessor_floats(buffers, views, &accessors[pos_idx as usize], false)?;

    let mut mesh = Mesh::new(name);
    for chunk in positions.chunks_exact(3) {
        mesh.add_vertex(Vec3::new(chunk[0], chunk[1], chunk[2]));
    }

    if let Some(idx) = attrs.get("NORMAL").and_then(Value::as_u64) {
        for chunk in read_accessor_floats(buffers, views, &accessors[idx as usize], false)?.chunks_exact(3) {
            mesh.add_normal(Vec3::new(chunk[0], chunk[1], chunk[2]));
        }
    }
    if let Some(idx) = attrs.get("TANGENT").and_then(Value::as_u64) {
        for chunk in read_accessor_floats(buffers, views, &accessors[idx as usize], false)?.chunks_exact(4) {
            mesh.add_tangent(Vec3::new(chunk[0], chunk[1], chunk[2]));
        }
    }
    if let Some(idx) = attrs.get("TEXCOORD_0").and_then(Value::as_u64) {
        for chunk in read_accessor_floats(buffers, views, &accessors[idx as usize], true)?.chunks_exact(2) {
            mesh.add_texcoord(Vec2::new(chunk[0], chunk[1]));
        }
    }
    if let Some(idx) = attrs.get("COLOR_0").and_then(Value::as_u64) {
        let accessor = &accessors[idx as usize];
        let ncomp = type_components(&accessor.ty);
        for chunk in read_accessor_floats(buffers, views, accessor, true)?.chunks_exact(ncomp) {
            let c = if ncomp == 3 { Vec4::new(chunk[0], chunk[1], chunk[2], 1.0) } else { Vec4::new(chunk[0], chunk[1], chunk[2], chunk[3]) };
            mesh.add_color(c);
        }
    }

    if let Some(idx) = prim.get("indices").and_then(Value::as_u64) {
        for tri in read_index_accessor(buffers, views, &accessors[idx as usize])?.chunks_exact(3) {
            mesh.add_triangle(tri[0], tri[1], tri[2]);
        }
    } else {
        let vcount = mesh.num_verts() as u32;
        let mut i = 0;
        while i + 2 < vcount {
            mesh.add_triangle(i, i + 1, i + 2);
            i += 3;
        }
    }

    if let Some(mat_idx) = prim.get("material").and_then(Value::as_u64) {
        mesh.material = material_ids.get(mat_idx as usize).copied();
    }

    mesh.validate()?;
    Ok(mesh)
}

fn node_matrix(n: &Value) -> Mat4 {
    if let Some(arr) = n.get("matrix").and_then(Value::as_array) {
        let floats: Vec<f32> = arr.iter().filter_map(json::as_f32).collect();
        if let Ok(cols) = <[f32; 16]>::try_from(floats) {
            return Mat4::from_cols_array(&cols);
        }
    }
    let t = json::as_f32_array::<3>(n, "translation").unwrap_or([0.0, 0.0, 0.0]);
    let r = json::as_f32_array::<4>(n, "rotation").unwrap_or([0.0, 0.0, 0.0, 1.0]);
    let s = json::as_f32_array::<3>(n, "scale").unwrap_or([1.0, 1.0, 1.0]);
    Mat4::from_scale_rotation_translation(Vec3::from(s), Quat::from_xyzw(r[0], r[1], r[2], r[3]), Vec3::from(t))
}

fn build_nodes(doc: &Value, meshfile: &mut Meshfile, mesh_ids_by_gltf: &[Vec<MeshId>]) -> anyhow::Result<()> {
    let nodes_json = doc.get("nodes").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut node_ids = Vec::with_capacity(nodes_json.len());

    for (i, n) in nodes_json.iter().enumerate() {
        let name = json::as_str_or(n, "name", &format!("node_{i}")).to_string();
        let mut node = Node::new(name);
        node.matrix = node_matrix(n);
        if let Some(mesh_idx) = n.get("mesh").and_then(Value::as_u64) {
            if let Some(ids) = mesh_ids_by_gltf.get(mesh_idx as usize) {
                for &id in ids {
                    node.add_mesh(id);
                }
            }
        }
        node_ids.push(meshfile.add_node(node));
    }

    for (i, n) in nodes_json.iter().enumerate() {
        if let Some(children) = n.get("children").and_then(Value::as_array) {
            for child in children {
                if let Some(child_idx) = child.as_u64() {
                    if let (Some(&parent_id), Some(&child_id)) = (node_ids.get(i), node_ids.get(child_idx as usize)) {
                        meshfile.node_add_child(parent_id, child_id)?;
                    }
                }
            }
        }
    }

    Ok(())
}

fn parse_glb(handle: &mut dyn Handle) -> anyhow::Result<(Value, Option<Vec<u8>>)> {
    let header_start = io::tell(handle)?;
    let mut magic = [0u8; 4];
    std::io::Read::read_exact(handle, &mut magic).map_err(|e| anyhow::anyhow!("reading GLB magic: {e}"))?;
    anyhow::ensure!(&magic == b"glTF", "not a GLB file");
    let _version = io::read_u32_le(handle)?;
    let total_length = io::read_u32_le(handle)? as u64;
    let end = header_start + total_length;

    let mut doc: Option<Value> = None;
    let mut bin: Option<Vec<u8>> = None;

    while io::tell(handle)? + 8 <= end {
        let chunk_length = io::read_u32_le(handle)?;
        let mut chunk_type = [0u8; 4];
        std::io::Read::read_exact(handle, &mut chunk_type).map_err(|e| anyhow::anyhow!("reading chunk type: {e}"))?;
        let mut data = vec![0u8; chunk_length as usize];
        std::io::Read::read_exact(handle, &mut data).map_err(|e| anyhow::anyhow!("reading chunk data: {e}"))?;

        if &chunk_type == b"JSON" {
            let text = String::from_utf8(data).map_err(|e| anyhow::anyhow!("GLB JSON chunk not UTF-8: {e}"))?;
            doc = Some(serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("parsing glTF JSON: {e}"))?);
        } else if &chunk_type == b"BIN\0" {
            bin.get_or_insert_with(Vec::new).extend(data);
        }
    }

    let doc = doc.ok_or_else(|| anyhow::anyhow!("GLB has no JSON chunk"))?;
    Ok((doc, bin))
}

pub(crate) fn load(handle: &mut dyn Handle, meshfile: &mut Meshfile, assets: Option<&dyn AssetSource>) -> anyhow::Result<()> {
    let start = io::tell(handle)?;
    let mut magic = [0u8; 4];
    let peeked = std::io::Read::read(handle, &mut magic).unwrap_or(0);
    io::seek_set(handle, start)?;

    let (doc, glb_bin) = if peeked == 4 && &magic == b"glTF" {
        parse_glb(handle)?
    } else {
        let mut text = String::new();
        std::io::Read::read_to_string(handle, &mut text).map_err(|e| anyhow::anyhow!("reading glTF JSON: {e}"))?;
        let doc: Value = serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("not glTF JSON: {e}"))?;
        (doc, None)
    };

    anyhow::ensure!(json::lookup(&doc, "asset.version").is_some(), "missing asset.version");

    let buffers = resolve_buffers(&doc, assets, glb_bin)?;
    let views = parse_buffer_views(&doc);
    let accessors = parse_accessors(&doc);

    let materials = parse_materials(&doc);
    let material_ids: Vec<MaterialId> = materials.into_iter().map(|m| meshfile.add_material(m)).collect();

    let meshes_per_gltf = parse_meshes(&doc, &buffers, &views, &accessors, &material_ids);
    let mesh_ids_by_gltf: Vec<Vec<MeshId>> =
        meshes_per_gltf.into_iter().map(|prims| prims.into_iter().map(|m| meshfile.add_mesh(m)).collect()).collect();

    build_nodes(&doc, meshfile, &mesh_ids_by_gltf)?;

    Ok(())
}

// --- save: one non-interleaved accessor per attribute stream, base64 into
// a single embedded buffer. Not byte-for-byte what an authoring tool would
// emit, but a fully valid, self-contained glTF document. ---

fn push_view(bin: &mut Vec<u8>, views: &mut Vec<Value>, bytes: &[u8]) -> usize {
    let offset = bin.len();
    bin.extend_from_slice(bytes);
    while bin.len() % 4 != 0 {
        bin.push(0);
    }
    let idx = views.len();
    views.push(json!({ "buffer": 0, "byteOffset": offset, "byteLength": bytes.len() }));
    idx
}

fn push_accessor(accessors: &mut Vec<Value>, view_idx: usize, component_type: u64, count: usize, ty: &str, min: Option<Value>, max: Option<Value>) -> usize {
    let idx = accessors.len();
    let mut obj = json!({
        "bufferView": view_idx,
        "componentType": component_type,
        "count": count,
        "type": ty,
    });
    if let Some(min) = min {
        obj["min"] = min;
    }
    if let Some(max) = max {
        obj["max"] = max;
    }
    accessors.push(obj);
    idx
}

fn position_bounds(verts: &[Vec3]) -> (Value, Value) {
    let mut bounds = AaBox::default();
    for v in verts {
        bounds.add_point(*v);
    }
    if bounds.is_inverted() {
        bounds = AaBox { vmin: Vec3::ZERO, vmax: Vec3::ZERO };
    }
    (json!([bounds.vmin.x, bounds.vmin.y, bounds.vmin.z]), json!([bounds.vmax.x, bounds.vmax.y, bounds.vmax.z]))
}

fn material_to_json(mat: &Material) -> Value {
    let color = mat.attribute(MaterialAttribute::Color).value;
    let metallic = mat.attribute(MaterialAttribute::Metallic).value.x;
    let roughness = mat.attribute(MaterialAttribute::Roughness).value.x;
    let emissive = mat.attribute(MaterialAttribute::Emissive).value;
    json!({
        "name": mat.name,
        "pbrMetallicRoughness": {
            "baseColorFactor": [color.x, color.y, color.z, color.w],
            "metallicFactor": metallic,
            "roughnessFactor": roughness,
        },
        "emissiveFactor": [emissive.x, emissive.y, emissive.z],
    })
}

pub(crate) fn save(handle: &mut dyn Handle, meshfile: &Meshfile) -> anyhow::Result<()> {
    let mut bin: Vec<u8> = Vec::new();
    let mut buffer_views: Vec<Value> = Vec::new();
    let mut accessors: Vec<Value> = Vec::new();

    let materials_json: Vec<Value> = meshfile.materials().map(|(_, mat)| material_to_json(mat)).collect();

    let mut meshes_json = Vec::new();
    let mut mesh_index_of: HashMap<MeshId, usize> = HashMap::new();
    for (mesh_id, mesh) in meshfile.meshes() {
        let pos_bytes: Vec<u8> = mesh.vertex().iter().flat_map(|v| [v.x, v.y, v.z]).flat_map(f32::to_le_bytes).collect();
        let pos_view = push_view(&mut bin, &mut buffer_views, &pos_bytes);
        let (min, max) = position_bounds(mesh.vertex());
        let pos_accessor = push_accessor(&mut accessors, pos_view, COMPONENT_FLOAT, mesh.num_verts(), "VEC3", Some(min), Some(max));

        let mut attributes = json!({ "POSITION": pos_accessor });

        if let Some(normals) = mesh.normal() {
            let bytes: Vec<u8> = normals.iter().flat_map(|v| [v.x, v.y, v.z]).flat_map(f32::to_le_bytes).collect();
            let view = push_view(&mut bin, &mut buffer_views, &bytes);
            let acc = push_accessor(&mut accessors, view, COMPONENT_FLOAT, normals.len(), "VEC3", None, None);
            attributes["NORMAL"] = json!(acc);
        }
        if let Some(texcoords) = mesh.texcoord() {
            let bytes: Vec<u8> = texcoords.iter().flat_map(|v| [v.x, v.y]).flat_map(f32::to_le_bytes).collect();
            let view = push_view(&mut bin, &mut buffer_views, &bytes);
            let acc = push_accessor(&mut accessors, view, COMPONENT_FLOAT, texcoords.len(), "VEC2", None, None);
            attributes["TEXCOORD_0"] = json!(acc);
        }
        if let Some(colors) = mesh.color() {
            let bytes: Vec<u8> = colors.iter().flat_map(|v| [v.x, v.y, v.z, v.w]).flat_map(f32::to_le_bytes).collect();
            let view = push_view(&mut bin, &mut buffer_views, &bytes);
            let acc = push_accessor(&mut accessors, view, COMPONENT_FLOAT, colors.len(), "VEC4", None, None);
            attributes["COLOR_0"] = json!(acc);
        }
        if let Some(tangents) = mesh.tangent() {
            let bytes: Vec<u8> = tangents.iter().flat_map(|v| [v.x, v.y, v.z, 1.0f32]).flat_map(f32::to_le_bytes).collect();
            let view = push_view(&mut bin, &mut buffer_views, &bytes);
            let acc = push_accessor(&mut accessors, view, COMPONENT_FLOAT, tangents.len(), "VEC4", None, None);
            attributes["TANGENT"] = json!(acc);
        }

        let idx_bytes: Vec<u8> = mesh.faces().iter().flat_map(|f| f.vidx).flat_map(u32::to_le_bytes).collect();
        let idx_view = push_view(&mut bin, &mut buffer_views, &idx_bytes);
        let idx_accessor = push_accessor(&mut accessors, idx_view, COMPONENT_UINT, mesh.num_faces() * 3, "SCALAR", None, None);

        let mut primitive = json!({ "attributes": attributes, "indices": idx_accessor, "mode": 4 });
        if let Some(mat_id) = mesh.material {
            primitive["material"] = json!(mat_id.0);
        }

        let mesh_index = meshes_json.len();
        meshes_json.push(json!({ "name": mesh.name, "primitives": [primitive] }));
        mesh_index_of.insert(mesh_id, mesh_index);
    }

    let mut nodes_json: Vec<Value> = Vec::new();
    let mut node_index_of: HashMap<NodeId, usize> = HashMap::new();
    for (node_id, _) in meshfile.nodes() {
        node_index_of.insert(node_id, nodes_json.len());
        nodes_json.push(Value::Null);
    }
    for (node_id, node) in meshfile.nodes() {
        let idx = node_index_of[&node_id];
        let mut obj = json!({ "name": node.name, "matrix": node.matrix.to_cols_array().to_vec() });

        if let Some(&first) = node.meshes().first() {
            if let Some(&mesh_idx) = mesh_index_of.get(&first) {
                obj["mesh"] = json!(mesh_idx);
            }
            if node.meshes().len() > 1 {
                meshfile.log_skip(
                    "gltf node",
                    format!("'{}' references {} meshes; glTF nodes carry only one, extras dropped", node.name, node.meshes().len()),
                );
            }
        }

        let children: Vec<usize> = node.children().iter().filter_map(|c| node_index_of.get(c).copied()).collect();
        if !children.is_empty() {
            obj["children"] = json!(children);
        }

        nodes_json[idx] = obj;
    }

    let scene_roots: Vec<usize> = meshfile.top_nodes().iter().filter_map(|id| node_index_of.get(id).copied()).collect();

    let mut buffers_json = Vec::new();
    if !bin.is_empty() {
        let encoded = math::base64_encode(&bin);
        buffers_json.push(json!({ "byteLength": bin.len(), "uri": format!("data:application/octet-stream;base64,{encoded}") }));
    }

    let doc = json!({
        "asset": { "version": "2.0", "generator": "meshfile" },
        "scene": 0,
        "scenes": [{ "nodes": scene_roots }],
        "nodes": nodes_json,
        "meshes": meshes_json,
        "materials": materials_json,
        "accessors": accessors,
        "bufferViews": buffer_views,
        "buffers": buffers_json,
    });

    let text = serde_json::to_string(&doc).map_err(|e| anyhow::anyhow!("serialising glTF: {e}"))?;
    io::puts(handle, &text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory_handle;

    fn minimal_triangle_doc() -> Value {
        // positions (3 verts) + indices, packed as one base64 buffer.
        let mut bin = Vec::new();
        for v in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            for f in v {
                bin.extend(f.to_le_bytes());
            }
        }
        let pos_len = bin.len();
        for i in [0u16, 1, 2] {
            bin.extend(i.to_le_bytes());
        }
        let idx_len = bin.len() - pos_len;

        let encoded = math::base64_encode(&bin);
        json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": bin.len(), "uri": format!("data:application/octet-stream;base64,{encoded}") }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": pos_len },
                { "buffer": 0, "byteOffset": pos_len, "byteLength": idx_len },
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" },
            ],
            "meshes": [{ "name": "tri", "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "mode": 4 }] }],
            "nodes": [{ "name": "root", "mesh": 0, "translation": [1.0, 2.0, 3.0] }],
        })
    }

    #[test]
    fn loads_plain_json_triangle_with_node_transform() {
        let text = minimal_triangle_doc().to_string();
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(text.into_bytes());
        load(&mut handle, &mut meshfile, None).unwrap();

        assert_eq!(meshfile.num_meshes(), 1);
        let mesh = meshfile.mesh(MeshId(0)).unwrap();
        assert_eq!(mesh.num_verts(), 3);
        assert_eq!(mesh.num_faces(), 1);

        meshfile.update_xform();
        let node = meshfile.node(crate::scene::NodeId(0)).unwrap();
        assert_eq!(node.global_matrix().transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn rejects_missing_asset_version() {
        let doc = json!({ "meshes": [] });
        let mut meshfile = Meshfile::new();
        let mut handle = memory_handle(doc.to_string().into_bytes());
        assert!(load(&mut handle, &mut meshfile, None).is_err());
    }

    #[test]
    fn save_then_reload_preserves_triangle() {
        let mut meshfile = Meshfile::new();
        let mut mesh = Mesh::new("tri");
        let a = mesh.add_vertex(Vec3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Vec3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Vec3::new(0.0, 1.0, 0.0));
        mesh.add_triangle(a, b, c);
        let mesh_id = meshfile.add_mesh(mesh);
        let mut node = Node::new("root");
        node.add_mesh(mesh_id);
        meshfile.add_node(node);

        let mut out = memory_handle(Vec::new());
        save(&mut out, &meshfile).unwrap();

        io::seek_set(&mut out, 0).unwrap();
        let mut reloaded = Meshfile::new();
        load(&mut out, &mut reloaded, None).unwrap();

        assert_eq!(reloaded.num_meshes(), 1);
        let mesh = reloaded.mesh(MeshId(0)).unwrap();
        assert_eq!(mesh.num_verts(), 3);
        assert_eq!(mesh.num_faces(), 1);
    }
}
