//! Materials and texture maps (§3, material attribute table).

use glam::{Vec3, Vec4};

/// Minification/magnification filter for a texture map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    #[default]
    Linear,
    Nearest,
}

/// Wrap mode for a texture map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureWrap {
    #[default]
    Repeat,
    Clamp,
}

/// One of the six faces of a cubemap, in the order the 3DS/OBJ codecs name
/// them (`cube_top/bottom/front/back/left/right`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeFace {
    Top,
    Bottom,
    Front,
    Back,
    Left,
    Right,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::Top,
        CubeFace::Bottom,
        CubeFace::Front,
        CubeFace::Back,
        CubeFace::Left,
        CubeFace::Right,
    ];

    pub fn index(self) -> usize {
        match self {
            CubeFace::Top => 0,
            CubeFace::Bottom => 1,
            CubeFace::Front => 2,
            CubeFace::Back => 3,
            CubeFace::Left => 4,
            CubeFace::Right => 5,
        }
    }
}

/// A 2D or cubemap texture reference plus its sampling and transform state.
///
/// `name` set means a 2D map; any `cube[k]` set means a cubemap face. Both
/// may coexist only transiently during parsing; codecs are expected to
/// produce one or the other.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureMap {
    pub name: Option<String>,
    pub cube: [Option<String>; 6],
    pub ufilt: TextureFilter,
    pub vfilt: TextureFilter,
    pub uwrap: TextureWrap,
    pub vwrap: TextureWrap,
    pub offset: Vec3,
    pub scale: Vec3,
    pub rot: f32,
}

impl Default for TextureMap {
    fn default() -> Self {
        Self {
            name: None,
            cube: Default::default(),
            ufilt: TextureFilter::default(),
            vfilt: TextureFilter::default(),
            uwrap: TextureWrap::default(),
            vwrap: TextureWrap::default(),
            offset: Vec3::ZERO,
            scale: Vec3::ONE,
            rot: 0.0,
        }
    }
}

impl TextureMap {
    pub fn is_set(&self) -> bool {
        self.name.is_some() || self.cube.iter().any(Option::is_some)
    }

    pub fn set_cube_face(&mut self, face: CubeFace, path: String) {
        self.cube[face.index()] = Some(path);
    }
}

/// The fixed set of material attribute slots (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialAttribute {
    Color,
    Specular,
    Shininess,
    Roughness,
    Metallic,
    Emissive,
    Reflect,
    Transmit,
    Ior,
    Alpha,
    Bump,
}

impl MaterialAttribute {
    pub const ALL: [MaterialAttribute; 11] = [
        MaterialAttribute::Color,
        MaterialAttribute::Specular,
        MaterialAttribute::Shininess,
        MaterialAttribute::Roughness,
        MaterialAttribute::Metallic,
        MaterialAttribute::Emissive,
        MaterialAttribute::Reflect,
        MaterialAttribute::Transmit,
        MaterialAttribute::Ior,
        MaterialAttribute::Alpha,
        MaterialAttribute::Bump,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// The documented default value for this attribute (§3): color 0.7
    /// grey, IOR 1.5, alpha 1, shininess 1, everything else 0.
    fn default_value(self) -> Vec4 {
        match self {
            MaterialAttribute::Color => Vec4::new(0.7, 0.7, 0.7, 1.0),
            MaterialAttribute::Ior => Vec4::new(1.5, 0.0, 0.0, 0.0),
            MaterialAttribute::Alpha => Vec4::new(1.0, 0.0, 0.0, 0.0),
            MaterialAttribute::Shininess => Vec4::new(1.0, 0.0, 0.0, 0.0),
            _ => Vec4::ZERO,
        }
    }
}

/// An attribute slot's value plus its optional texture map.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSlot {
    pub value: Vec4,
    pub map: Option<TextureMap>,
}

/// A named material: a fixed record of all [`MaterialAttribute`] slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    slots: [AttributeSlot; 11],
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        let slots = MaterialAttribute::ALL.map(|attr| AttributeSlot {
            value: attr.default_value(),
            map: None,
        });
        Self { name: name.into(), slots }
    }

    /// The static default material used when a mesh has no material
    /// reference. Distinct from `Meshfile`-owned materials: it is never
    /// inserted into a meshfile's material arena.
    pub fn default_material() -> Self {
        Self::new("default")
    }

    pub fn attribute(&self, attr: MaterialAttribute) -> &AttributeSlot {
        &self.slots[attr.index()]
    }

    pub fn attribute_mut(&mut self, attr: MaterialAttribute) -> &mut AttributeSlot {
        &mut self.slots[attr.index()]
    }

    pub fn set_value(&mut self, attr: MaterialAttribute, value: Vec4) {
        self.slots[attr.index()].value = value;
    }

    pub fn set_map(&mut self, attr: MaterialAttribute, map: TextureMap) {
        self.slots[attr.index()].map = Some(map);
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::default_material()
    }
}
