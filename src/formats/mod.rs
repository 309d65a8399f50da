//! Format dispatcher (§4.K) plus the codecs themselves.
//!
//! Each codec is a self-contained submodule exposing `load`/`save` free
//! functions; this module wires them behind [`Meshfile::load`]/
//! [`Meshfile::save`] and the trial-load/suffix-save dispatch logic.

mod gltf;
mod jtf;
mod obj;
mod stl;
mod tds;

use crate::{
    io::{self, Handle},
    scene::{MeshId, Meshfile},
};
use anyhow::{anyhow, Context};
use bitflags::bitflags;
use log::{debug, info};
use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

/// One of the five supported on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    ThreeDs,
    Jtf,
    Gltf,
    Stl,
    Obj,
}

impl Format {
    /// Trial-load priority order (§4.K): binary magics first, OBJ last
    /// since it has none and must serve as the fallback.
    const LOAD_PRIORITY: [Format; 5] =
        [Format::ThreeDs, Format::Jtf, Format::Gltf, Format::Stl, Format::Obj];

    /// Matches a filename's suffix against each codec's known extensions.
    pub fn from_suffix(path: impl AsRef<Path>) -> Option<Format> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "3ds" => Some(Format::ThreeDs),
            "jtf" => Some(Format::Jtf),
            "gltf" | "glb" => Some(Format::Gltf),
            "stl" => Some(Format::Stl),
            "obj" => Some(Format::Obj),
            _ => None,
        }
    }
}

bitflags! {
    /// Post-load processing flags (§4.E "Post-load flags").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LoadFlags: u32 {
        /// Skip all post-load processing (normal synthesis, tangent
        /// synthesis, transform baking). Mutually dominant over the other
        /// two flags.
        const NOPROC = 1 << 0;
        /// After synthesising missing normals, also synthesise tangents
        /// for meshes that have texcoords.
        const GEN_TANGENTS = 1 << 1;
        /// After normal/tangent synthesis, bake every node's transform
        /// into its mesh data (see [`Meshfile::apply_xform`]).
        const APPLY_XFORM = 1 << 2;
    }
}

bitflags! {
    /// Save-time flags. Currently no format needs any; reserved for parity
    /// with the load side's flags word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SaveFlags: u32 {
        const NONE = 0;
    }
}

/// Opens named assets (MTL sidecars, glTF external buffers/images) relative
/// to the meshfile's source directory. `None` at the call site models the
/// distilled spec's nullable `open` handle slot (§4.A): no sidecar can be
/// resolved, so OBJ emits no `mtllib` line and glTF buffers must be
/// self-contained (`.glb` or inline `data:` URIs).
pub trait AssetSource {
    fn open_read(&self, resolved_path: &str) -> std::io::Result<Box<dyn Handle>>;
}

pub trait AssetSink {
    fn open_write(&self, resolved_path: &str) -> std::io::Result<Box<dyn Handle>>;
}

/// Filesystem-backed [`AssetSource`]/[`AssetSink`] rooted at a directory.
pub struct FsAssets {
    dir: PathBuf,
}

impl FsAssets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn resolve(&self, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.dir.join(candidate)
        }
    }
}

impl AssetSource for FsAssets {
    fn open_read(&self, resolved_path: &str) -> std::io::Result<Box<dyn Handle>> {
        let file = File::open(self.resolve(resolved_path))?;
        Ok(Box::new(file))
    }
}

impl AssetSink for FsAssets {
    fn open_write(&self, resolved_path: &str) -> std::io::Result<Box<dyn Handle>> {
        let file = File::create(self.resolve(resolved_path))?;
        Ok(Box::new(file))
    }
}

impl Meshfile {
    /// Opens `path`, trial-loads it through every codec (§4.K), and applies
    /// `flags`'s post-load processing. Equivalent to constructing an
    /// `FsAssets` rooted at the file's directory and calling [`Self::load`].
    pub fn load_path(&mut self, path: impl AsRef<Path>, flags: LoadFlags) -> anyhow::Result<()> {
        let path = path.as_ref();
        let mut file = io::open_read(path)
            .with_context(|| format!("opening {}", path.display()))?;
        self.set_path(path);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let assets = dir.map(FsAssets::new);
        self.load(&mut file, assets.as_ref().map(|a| a as &dyn AssetSource), flags)
    }

    /// Trial-loads `handle` through every codec in priority order
    /// (`3DS, JTF, glTF, STL, OBJ`), rewinding between attempts. The first
    /// codec to succeed wins; post-load processing then runs per `flags`.
    ///
    /// Per §7: a failing codec may leave partially-added entities in the
    /// meshfile behind (the dispatcher only rewinds the byte stream between
    /// attempts, not the scene — a documented limitation carried over from
    /// the distilled spec). Callers that want a clean slate after a failed
    /// load should call [`Meshfile::clear`] themselves.
    pub fn load(
        &mut self,
        handle: &mut dyn Handle,
        assets: Option<&dyn AssetSource>,
        flags: LoadFlags,
    ) -> anyhow::Result<()> {
        let start = io::tell(handle)?;
        let mut last_err = None;

        for format in Format::LOAD_PRIORITY {
            io::seek_set(handle, start)?;

            let result = match format {
                Format::ThreeDs => tds::load(handle, self),
                Format::Jtf => jtf::load(handle, self),
                Format::Gltf => gltf::load(handle, self, assets),
                Format::Stl => stl::load(handle, self),
                Format::Obj => obj::load(handle, self, assets),
            };

            match result {
                Ok(()) => {
                    info!("loaded as {format:?}");
                    self.post_process(flags);
                    return Ok(());
                }
                Err(err) => {
                    debug!("{format:?} did not match: {err:#}");
                    last_err = Some(err);
                }
            }
        }

        Err(match last_err {
            Some(err) => anyhow!("no format matched (last error: {err:#})"),
            None => anyhow!("no format matched"),
        })
    }

    fn post_process(&mut self, flags: LoadFlags) {
        if flags.contains(LoadFlags::NOPROC) {
            self.update_xform();
            return;
        }

        for idx in 0..self.num_meshes() {
            let id = MeshId(idx);
            if let Some(mesh) = self.mesh_mut(id) {
                if mesh.normal().is_none() && !mesh.faces().is_empty() {
                    mesh.calc_normals();
                }
            }
        }

        if flags.contains(LoadFlags::GEN_TANGENTS) {
            for idx in 0..self.num_meshes() {
                let id = MeshId(idx);
                if let Some(mesh) = self.mesh_mut(id) {
                    if mesh.texcoord().is_some() {
                        let _ = mesh.calc_tangents();
                    }
                }
            }
        }

        self.update_xform();

        if flags.contains(LoadFlags::APPLY_XFORM) {
            self.apply_xform();
        }
    }

    /// Opens `path` for writing and saves through the codec selected by (a)
    /// `format` if given, (b) `path`'s suffix, else (c) OBJ (§4.K).
    pub fn save_path(
        &self,
        path: impl AsRef<Path>,
        format: Option<Format>,
        flags: SaveFlags,
    ) -> anyhow::Result<()> {
        let path = path.as_ref();
        let format = format.or_else(|| Format::from_suffix(path)).unwrap_or(Format::Obj);

        let file = io::open_write(path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let assets = dir.map(FsAssets::new);
        let file_stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_owned)
            .unwrap_or_default();

        self.save(
            &mut writer,
            assets.as_ref().map(|a| a as &dyn AssetSink),
            format,
            flags,
            &file_stem,
        )
    }

    /// Saves through the codec named by `format`. `file_stem` is used by
    /// codecs that must name a sidecar file (OBJ's `.mtl`) relative to the
    /// main output's basename.
    pub fn save(
        &self,
        handle: &mut dyn Handle,
        assets: Option<&dyn AssetSink>,
        format: Format,
        flags: SaveFlags,
        file_stem: &str,
    ) -> anyhow::Result<()> {
        let _ = flags;
        match format {
            Format::ThreeDs => tds::save(handle, self),
            Format::Jtf => jtf::save(handle, self),
            Format::Gltf => gltf::save(handle, self),
            Format::Stl => stl::save(handle, self),
            Format::Obj => obj::save(handle, self, assets, file_stem),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_matches_each_codec() {
        assert_eq!(Format::from_suffix("a.obj"), Some(Format::Obj));
        assert_eq!(Format::from_suffix("a.OBJ"), Some(Format::Obj));
        assert_eq!(Format::from_suffix("a.jtf"), Some(Format::Jtf));
        assert_eq!(Format::from_suffix("a.stl"), Some(Format::Stl));
        assert_eq!(Format::from_suffix("a.3ds"), Some(Format::ThreeDs));
        assert_eq!(Format::from_suffix("a.gltf"), Some(Format::Gltf));
        assert_eq!(Format::from_suffix("a.glb"), Some(Format::Gltf));
        assert_eq!(Format::from_suffix("a.xyz"), None);
    }

    #[test]
    fn noproc_skips_normal_synthesis() {
        let mut meshfile = Meshfile::new();
        let mut mesh = crate::scene::Mesh::new("m");
        let a = mesh.add_vertex(glam::Vec3::ZERO);
        let b = mesh.add_vertex(glam::Vec3::X);
        let c = mesh.add_vertex(glam::Vec3::Y);
        mesh.add_triangle(a, b, c);
        meshfile.add_mesh(mesh);

        meshfile.post_process(LoadFlags::NOPROC);
        assert!(meshfile.mesh(MeshId(0)).unwrap().normal().is_none());
    }

    #[test]
    fn default_flags_synthesise_normals() {
        let mut meshfile = Meshfile::new();
        let mut mesh = crate::scene::Mesh::new("m");
        let a = mesh.add_vertex(glam::Vec3::ZERO);
        let b = mesh.add_vertex(glam::Vec3::X);
        let c = mesh.add_vertex(glam::Vec3::Y);
        mesh.add_triangle(a, b, c);
        meshfile.add_mesh(mesh);

        meshfile.post_process(LoadFlags::default());
        assert!(meshfile.mesh(MeshId(0)).unwrap().normal().is_some());
    }
}
