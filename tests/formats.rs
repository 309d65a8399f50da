//! End-to-end tests exercising the format dispatcher (`Meshfile::load`/
//! `Meshfile::save`), not the individual codec functions directly.

use meshfile::{LoadFlags, Meshfile, SaveFlags};
use std::io::{Cursor, Seek, SeekFrom};

fn cursor(bytes: Vec<u8>) -> Cursor<Vec<u8>> {
    Cursor::new(bytes)
}

/// `log`'s `debug!`/`info!` calls in the dispatcher and codecs are only
/// visible if something installs a logger; `try_init` rather than `init`
/// since every test function in this binary calls it.
fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

fn jtf_one_triangle() -> Vec<u8> {
    let mut bytes = vec![0x4A, 0x54, 0x46, 0x21, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
    bytes.extend(std::iter::repeat(0u8).take(96));
    bytes
}

#[test]
fn dispatcher_loads_jtf_by_trial() {
    init_logging();
    let mut meshfile = Meshfile::new();
    let mut handle = cursor(jtf_one_triangle());

    meshfile.load(&mut handle, None, LoadFlags::default()).unwrap();

    assert_eq!(meshfile.num_meshes(), 1);
    assert_eq!(meshfile.mesh(meshfile::MeshId(0)).unwrap().num_faces(), 1);
    // JTF records store an explicit normal (all-zero here), so post-load
    // synthesis must not overwrite it.
    assert!(meshfile.mesh(meshfile::MeshId(0)).unwrap().normal().is_some());
}

#[test]
fn dispatcher_loads_obj_triangle_and_quad() {
    init_logging();
    let obj = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3
f 1 2 3 4
";
    let mut meshfile = Meshfile::new();
    let mut handle = cursor(obj.as_bytes().to_vec());

    meshfile.load(&mut handle, None, LoadFlags::default()).unwrap();

    assert_eq!(meshfile.num_meshes(), 1);
    let mesh = meshfile.mesh(meshfile::MeshId(0)).unwrap();
    // triangle (1 face) + fan-triangulated quad (2 faces) = 3 faces total,
    // over 4 distinct positions after dedup.
    assert_eq!(mesh.num_faces(), 3);
    assert_eq!(mesh.num_verts(), 4);

    // normals are missing from the source, so post-load synthesis runs.
    assert!(mesh.normal().is_some());
}

#[test]
fn dispatcher_loads_stl_with_zero_faces() {
    init_logging();
    let mut bytes = vec![0u8; 80];
    bytes.extend_from_slice(&0u32.to_le_bytes());

    let mut meshfile = Meshfile::new();
    let mut handle = cursor(bytes);

    meshfile.load(&mut handle, None, LoadFlags::default()).unwrap();

    assert_eq!(meshfile.num_meshes(), 1);
    assert_eq!(meshfile.mesh(meshfile::MeshId(0)).unwrap().num_faces(), 0);
    assert!(meshfile.bounds().is_none());
}

#[test]
fn dispatcher_rejects_unrecognised_bytes() {
    init_logging();
    let mut meshfile = Meshfile::new();
    let mut handle = cursor(vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01, 0x02, 0x03]);

    assert!(meshfile.load(&mut handle, None, LoadFlags::default()).is_err());
}

#[test]
fn gltf_json_node_matrix_places_mesh_in_world_space() {
    init_logging();
    let doc = serde_json::json!({
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [ { "nodes": [0] } ],
        "nodes": [ { "mesh": 0, "translation": [3.0, 0.0, 0.0] } ],
        "meshes": [ {
            "primitives": [ {
                "attributes": { "POSITION": 0 },
                "indices": 1,
                "mode": 4,
            } ]
        } ],
        "accessors": [
            {
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0],
            },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" },
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6 },
        ],
        "buffers": [ { "byteLength": 42, "uri": gltf_test_buffer_uri() } ],
    });

    let mut meshfile = Meshfile::new();
    let mut handle = cursor(serde_json::to_vec(&doc).unwrap());

    meshfile.load(&mut handle, None, LoadFlags::default()).unwrap();

    assert_eq!(meshfile.num_meshes(), 1);
    assert_eq!(meshfile.num_topnodes(), 1);

    meshfile.update_xform();
    let node_id = meshfile.top_nodes()[0];
    let world_origin = meshfile
        .node(node_id)
        .unwrap()
        .global_matrix()
        .transform_point3(meshfile::Vec3::ZERO);
    assert_eq!(world_origin, meshfile::Vec3::new(3.0, 0.0, 0.0));
}

fn gltf_test_buffer_uri() -> String {
    let mut bin = Vec::new();
    for v in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]] {
        for c in v {
            bin.extend_from_slice(&c.to_le_bytes());
        }
    }
    for i in [0u16, 1, 2] {
        bin.extend_from_slice(&i.to_le_bytes());
    }
    use base64::Engine as _;
    format!(
        "data:application/octet-stream;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&bin)
    )
}

#[test]
fn gltf_round_trips_through_save_and_load() {
    init_logging();
    let mut meshfile = Meshfile::new();
    let mut mesh = meshfile::Mesh::new("tri");
    let a = mesh.add_vertex(meshfile::Vec3::new(0.0, 0.0, 0.0));
    let b = mesh.add_vertex(meshfile::Vec3::new(1.0, 0.0, 0.0));
    let c = mesh.add_vertex(meshfile::Vec3::new(0.0, 1.0, 0.0));
    mesh.add_triangle(a, b, c);
    mesh.calc_normals();
    let mesh_id = meshfile.add_mesh(mesh);
    let mut node = meshfile::Node::new("root");
    node.add_mesh(mesh_id);
    meshfile.add_node(node);

    let mut saved = cursor(Vec::new());
    meshfile
        .save(&mut saved, None, meshfile::Format::Gltf, SaveFlags::default(), "scene")
        .unwrap();

    saved.seek(SeekFrom::Start(0)).unwrap();
    let mut reloaded = Meshfile::new();
    reloaded.load(&mut saved, None, LoadFlags::default()).unwrap();

    assert_eq!(reloaded.num_meshes(), 1);
    let mesh = reloaded.mesh(meshfile::MeshId(0)).unwrap();
    assert_eq!(mesh.num_verts(), 3);
    assert_eq!(mesh.num_faces(), 1);
}

#[test]
fn format_explicit_save_path_round_trips_stl() {
    init_logging();
    let dir = std::env::temp_dir().join(format!(
        "meshfile-test-{}-{}",
        std::process::id(),
        "stl_roundtrip"
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("cube_corner.stl");

    let mut meshfile = Meshfile::new();
    let mut mesh = meshfile::Mesh::new("tri");
    let a = mesh.add_vertex(meshfile::Vec3::new(0.0, 0.0, 0.0));
    let b = mesh.add_vertex(meshfile::Vec3::new(1.0, 0.0, 0.0));
    let c = mesh.add_vertex(meshfile::Vec3::new(0.0, 1.0, 0.0));
    mesh.add_triangle(a, b, c);
    let mesh_id = meshfile.add_mesh(mesh);
    let mut node = meshfile::Node::new("root");
    node.add_mesh(mesh_id);
    meshfile.add_node(node);

    meshfile.save_path(&path, None, SaveFlags::default()).unwrap();

    let mut reloaded = Meshfile::new();
    reloaded.load_path(&path, LoadFlags::default()).unwrap();
    assert_eq!(reloaded.num_meshes(), 1);
    assert_eq!(reloaded.mesh(meshfile::MeshId(0)).unwrap().num_faces(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}
