//! Meshes, faces, normal/tangent synthesis, and the immediate-mode
//! assembly builder (§3, §4.E).

use crate::{math::AaBox, scene::MaterialId};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// An ordered triple of vertex indices into the owning mesh's `vertex`
/// array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub vidx: [u32; 3],
}

impl Face {
    pub fn new(a: u32, b: u32, c: u32) -> Self {
        Self { vidx: [a, b, c] }
    }
}

/// A named mesh: parallel per-vertex attribute arrays plus a triangle list.
///
/// `normal`/`tangent`/`texcoord`/`color`, when present, always have the same
/// length as `vertex` (§3 invariant); codecs that would otherwise produce a
/// mismatch discard the mesh instead (see [`crate::formats::obj`]).
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    vertex: Vec<Vec3>,
    normal: Option<Vec<Vec3>>,
    tangent: Option<Vec<Vec3>>,
    texcoord: Option<Vec<Vec2>>,
    color: Option<Vec<Vec4>>,
    faces: Vec<Face>,
    aabox: AaBox,
    pub material: Option<MaterialId>,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn vertex(&self) -> &[Vec3] {
        &self.vertex
    }

    pub fn normal(&self) -> Option<&[Vec3]> {
        self.normal.as_deref()
    }

    pub fn tangent(&self) -> Option<&[Vec3]> {
        self.tangent.as_deref()
    }

    pub fn texcoord(&self) -> Option<&[Vec2]> {
        self.texcoord.as_deref()
    }

    pub fn color(&self) -> Option<&[Vec4]> {
        self.color.as_deref()
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn aabox(&self) -> AaBox {
        self.aabox
    }

    pub fn num_verts(&self) -> usize {
        self.vertex.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Appends a vertex and folds it into the mesh's local-space bounds.
    pub fn add_vertex(&mut self, v: Vec3) -> u32 {
        let idx = self.vertex.len() as u32;
        self.vertex.push(v);
        self.aabox.add_point(v);
        idx
    }

    pub fn add_normal(&mut self, n: Vec3) {
        self.normal.get_or_insert_with(Vec::new).push(n);
    }

    pub fn add_tangent(&mut self, t: Vec3) {
        self.tangent.get_or_insert_with(Vec::new).push(t);
    }

    pub fn add_texcoord(&mut self, uv: Vec2) {
        self.texcoord.get_or_insert_with(Vec::new).push(uv);
    }

    pub fn add_color(&mut self, c: Vec4) {
        self.color.get_or_insert_with(Vec::new).push(c);
    }

    pub fn add_triangle(&mut self, a: u32, b: u32, c: u32) {
        self.faces.push(Face::new(a, b, c));
    }

    /// A quad `a b c d` is two triangles: `(a, b, c)` and `(a, c, d)`.
    pub fn add_quad(&mut self, a: u32, b: u32, c: u32, d: u32) {
        self.add_triangle(a, b, c);
        self.add_triangle(a, c, d);
    }

    /// Replaces normals outright (used when a codec has its own normals,
    /// e.g. STL's per-face normal replicated to its three vertices).
    pub fn set_normals(&mut self, normals: Vec<Vec3>) {
        self.normal = Some(normals);
    }

    pub fn set_texcoords(&mut self, texcoords: Vec<Vec2>) {
        self.texcoord = Some(texcoords);
    }

    pub fn set_colors(&mut self, colors: Vec<Vec4>) {
        self.color = Some(colors);
    }

    pub fn set_tangents(&mut self, tangents: Vec<Vec3>) {
        self.tangent = Some(tangents);
    }

    /// Checks the §8 per-mesh invariants: attribute-array length equality
    /// and face indices in range.
    pub fn validate(&self) -> anyhow::Result<()> {
        let n = self.vertex.len();
        for (label, len) in [
            ("normal", self.normal.as_ref().map(Vec::len)),
            ("tangent", self.tangent.as_ref().map(Vec::len)),
            ("texcoord", self.texcoord.as_ref().map(Vec::len)),
            ("color", self.color.as_ref().map(Vec::len)),
        ] {
            if let Some(len) = len {
                anyhow::ensure!(
                    len == n,
                    "mesh '{}': {label} array has {len} entries, expected {n}",
                    self.name
                );
            }
        }
        for face in &self.faces {
            for idx in face.vidx {
                anyhow::ensure!(
                    (idx as usize) < n,
                    "mesh '{}': face index {idx} out of range (len {n})",
                    self.name
                );
            }
        }
        Ok(())
    }

    /// Recomputes the vertex-normal array as area-weighted smooth normals
    /// (§4.E "Normal synthesis"). Hard edges are not preserved.
    pub fn calc_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.vertex.len()];

        for face in &self.faces {
            let [a, b, c] = face.vidx.map(|i| self.vertex[i as usize]);
            let face_normal = (b - a).cross(c - a).normalize_or_zero();
            for idx in face.vidx {
                normals[idx as usize] += face_normal;
            }
        }

        for n in &mut normals {
            *n = n.normalize_or_zero();
        }

        self.normal = Some(normals);
    }

    /// Recomputes per-vertex tangents from the texcoord differential,
    /// Gram-Schmidt orthonormalised against the vertex normal (§4.E
    /// "Tangent synthesis"). Synthesises normals first if absent. Requires
    /// texcoords.
    pub fn calc_tangents(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(self.texcoord.is_some(), "mesh '{}': tangents require texcoords", self.name);

        if self.normal.is_none() {
            self.calc_normals();
        }

        let texcoord = self.texcoord.as_ref().unwrap();
        let mut tangents = vec![Vec3::ZERO; self.vertex.len()];

        for face in &self.faces {
            let [i0, i1, i2] = face.vidx;
            let (v0, v1, v2) = (
                self.vertex[i0 as usize],
                self.vertex[i1 as usize],
                self.vertex[i2 as usize],
            );
            let (uv0, uv1, uv2) = (
                texcoord[i0 as usize],
                texcoord[i1 as usize],
                texcoord[i2 as usize],
            );

            let edge1 = v1 - v0;
            let edge2 = v2 - v0;
            let duv1 = uv1 - uv0;
            let duv2 = uv2 - uv0;

            let denom = duv1.x * duv2.y - duv2.x * duv1.y;
            if denom.abs() < f32::EPSILON {
                continue;
            }
            let r = 1.0 / denom;
            let tangent = (edge1 * duv2.y - edge2 * duv1.y) * r;

            for idx in face.vidx {
                tangents[idx as usize] += tangent;
            }
        }

        let normal = self.normal.as_ref().unwrap();
        for (t, &n) in tangents.iter_mut().zip(normal.iter()) {
            let ortho = *t - n * n.dot(*t);
            *t = ortho.normalize_or_zero();
        }

        self.tangent = Some(tangents);
        Ok(())
    }

    /// Transforms positions by `matrix` and normals/tangents by its
    /// inverse-transpose, in place (§4.E "Transform baking" building
    /// block). Recomputes the local-space bounds from the new positions.
    pub fn transform(&mut self, matrix: Mat4) {
        let normal_matrix = crate::math::try_inverse(matrix)
            .map(|inv| inv.transpose())
            .unwrap_or(Mat4::IDENTITY);

        let mut aabox = AaBox::default();
        for v in &mut self.vertex {
            *v = matrix.transform_point3(*v);
            aabox.add_point(*v);
        }
        self.aabox = aabox;

        if let Some(normals) = &mut self.normal {
            for n in normals {
                *n = normal_matrix.transform_vector3(*n).normalize_or_zero();
            }
        }
        if let Some(tangents) = &mut self.tangent {
            for t in tangents {
                *t = normal_matrix.transform_vector3(*t).normalize_or_zero();
            }
        }
    }
}

/// The immediate-mode `begin`/`end` assembly front-end (§3 Design Notes: a
/// separate builder object rather than a mesh-embedded opaque slot).
///
/// Remembers the "current" normal/texcoord/color as they're set and stamps
/// them onto every vertex streamed in afterwards, emitting triangles (or
/// quads, split into two triangles) automatically as vertices accumulate.
pub struct MeshBuilder {
    mesh: Mesh,
    mode: PrimitiveMode,
    cur_normal: Option<Vec3>,
    cur_texcoord: Option<Vec2>,
    cur_color: Option<Vec4>,
    pending: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveMode {
    Triangles,
    Quads,
}

impl MeshBuilder {
    /// Starts assembling a new mesh named `name` in `mode`.
    pub fn begin(name: impl Into<String>, mode: PrimitiveMode) -> Self {
        Self {
            mesh: Mesh::new(name),
            mode,
            cur_normal: None,
            cur_texcoord: None,
            cur_color: None,
            pending: Vec::new(),
        }
    }

    pub fn normal(&mut self, n: Vec3) {
        self.cur_normal = Some(n);
    }

    pub fn texcoord(&mut self, uv: Vec2) {
        self.cur_texcoord = Some(uv);
    }

    pub fn color(&mut self, c: Vec4) {
        self.cur_color = Some(c);
    }

    /// Streams one vertex, stamping it with whatever normal/texcoord/color
    /// is currently set, and emits a primitive once enough vertices have
    /// accumulated.
    pub fn vertex(&mut self, v: Vec3) {
        let idx = self.mesh.add_vertex(v);
        if let Some(n) = self.cur_normal {
            self.mesh.add_normal(n);
        }
        if let Some(uv) = self.cur_texcoord {
            self.mesh.add_texcoord(uv);
        }
        if let Some(c) = self.cur_color {
            self.mesh.add_color(c);
        }
        self.pending.push(idx);

        let needed = match self.mode {
            PrimitiveMode::Triangles => 3,
            PrimitiveMode::Quads => 4,
        };
        if self.pending.len() == needed {
            match self.mode {
                PrimitiveMode::Triangles => {
                    self.mesh.add_triangle(self.pending[0], self.pending[1], self.pending[2]);
                }
                PrimitiveMode::Quads => {
                    self.mesh.add_quad(
                        self.pending[0],
                        self.pending[1],
                        self.pending[2],
                        self.pending[3],
                    );
                }
            }
            self.pending.clear();
        }
    }

    /// Finishes assembly, returning the built mesh.
    pub fn end(self) -> Mesh {
        self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_splits_into_two_triangles_sharing_diagonal() {
        let mut mesh = Mesh::new("quad");
        let a = mesh.add_vertex(Vec3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Vec3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Vec3::new(1.0, 1.0, 0.0));
        let d = mesh.add_vertex(Vec3::new(0.0, 1.0, 0.0));
        mesh.add_quad(a, b, c, d);

        assert_eq!(mesh.faces(), &[Face::new(a, b, c), Face::new(a, c, d)]);
    }

    #[test]
    fn calc_normals_gives_unit_length_smooth_normals() {
        let mut mesh = Mesh::new("tri");
        let a = mesh.add_vertex(Vec3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Vec3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Vec3::new(0.0, 1.0, 0.0));
        mesh.add_triangle(a, b, c);

        mesh.calc_normals();
        for n in mesh.normal().unwrap() {
            assert!((n.length() - 1.0).abs() < 1e-5);
            assert!((*n - Vec3::Z).length() < 1e-5);
        }
    }

    #[test]
    fn calc_tangents_requires_texcoords() {
        let mut mesh = Mesh::new("tri");
        let a = mesh.add_vertex(Vec3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Vec3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Vec3::new(0.0, 1.0, 0.0));
        mesh.add_triangle(a, b, c);

        assert!(mesh.calc_tangents().is_err());
    }

    #[test]
    fn calc_tangents_orthonormal_to_normal() {
        let mut mesh = Mesh::new("tri");
        let a = mesh.add_vertex(Vec3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Vec3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Vec3::new(0.0, 1.0, 0.0));
        mesh.add_triangle(a, b, c);
        mesh.add_texcoord(Vec2::new(0.0, 0.0));
        mesh.add_texcoord(Vec2::new(1.0, 0.0));
        mesh.add_texcoord(Vec2::new(0.0, 1.0));

        mesh.calc_tangents().unwrap();
        let normal = mesh.normal().unwrap();
        let tangent = mesh.tangent().unwrap();
        for (n, t) in normal.iter().zip(tangent.iter()) {
            assert!(n.dot(*t).abs() < 1e-4);
            assert!((t.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn validate_rejects_mismatched_attribute_length() {
        let mut mesh = Mesh::new("bad");
        mesh.add_vertex(Vec3::ZERO);
        mesh.add_vertex(Vec3::X);
        mesh.add_normal(Vec3::Z);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_face() {
        let mut mesh = Mesh::new("bad");
        mesh.add_vertex(Vec3::ZERO);
        mesh.add_triangle(0, 1, 2);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn builder_emits_triangle_after_three_vertices() {
        let mut builder = MeshBuilder::begin("built", PrimitiveMode::Triangles);
        builder.normal(Vec3::Z);
        builder.vertex(Vec3::new(0.0, 0.0, 0.0));
        builder.vertex(Vec3::new(1.0, 0.0, 0.0));
        builder.vertex(Vec3::new(0.0, 1.0, 0.0));
        let mesh = builder.end();

        assert_eq!(mesh.num_faces(), 1);
        assert_eq!(mesh.normal().unwrap().len(), 3);
    }
}
