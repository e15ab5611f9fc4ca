//! The decoded, GPU-independent form of an MDX model.
//!
//! A [`Model`] is produced by [`Model::from_bytes`] and is immutable afterwards.
//! It is shared behind an `Arc` by the [`crate::data_structures::mesh::SkinnedMesh`]
//! that loaded it and by every [`crate::data_structures::instance::SkeletalModelInstance`]
//! animating it.

use crate::error::ModelError;

/// Axis-aligned bounds as stored in the file.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Extent {
    pub bounds_radius: f32,
    pub minimum: [f32; 3],
    pub maximum: [f32; 3],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    None,
    Linear,
    Hermite,
    Bezier,
}

impl Interpolation {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Interpolation::Linear,
            2 => Interpolation::Hermite,
            3 => Interpolation::Bezier,
            _ => Interpolation::None,
        }
    }

    /// Hermite and bezier keys carry in/out tangents.
    pub fn has_tangents(self) -> bool {
        matches!(self, Interpolation::Hermite | Interpolation::Bezier)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Key<T> {
    pub frame: i32,
    pub value: T,
    pub in_tan: T,
    pub out_tan: T,
}

/// A keyframed value. Sampling lives in [`crate::resources::animation`].
#[derive(Clone, Debug, PartialEq)]
pub struct Track<T> {
    pub interpolation: Interpolation,
    /// Index into [`Model::global_sequences`], or negative when the track follows
    /// the active sequence.
    pub global_sequence_id: i32,
    pub keys: Vec<Key<T>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sequence {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub move_speed: f32,
    pub flags: u32,
    pub rarity: f32,
    pub sync_point: u32,
    pub extent: Extent,
}

impl Sequence {
    pub fn is_looping(&self) -> bool {
        self.flags & 1 == 0
    }

    pub fn duration(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
}

impl WrapMode {
    /// Repeat when `bit` is set in the texture flags, clamp otherwise.
    pub fn from_flags(flags: u32, bit: u32) -> Self {
        if flags & bit != 0 {
            WrapMode::Repeat
        } else {
            WrapMode::ClampToEdge
        }
    }
}

/// One entry of the texture table: either a file or a replaceable slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextureReference {
    pub replaceable_id: u32,
    pub file_name: String,
    pub flags: u32,
}

impl TextureReference {
    pub const WRAP_WIDTH: u32 = 0x1;
    pub const WRAP_HEIGHT: u32 = 0x2;

    pub fn is_replaceable(&self) -> bool {
        self.replaceable_id != 0
    }

    pub fn wrap_u(&self) -> WrapMode {
        WrapMode::from_flags(self.flags, Self::WRAP_WIDTH)
    }

    pub fn wrap_v(&self) -> WrapMode {
        WrapMode::from_flags(self.flags, Self::WRAP_HEIGHT)
    }
}

/// Layer filter mode. `None` and `Transparent` (one-bit alpha) are the opaque modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    None,
    Transparent,
    Blend,
    Additive,
    AddAlpha,
    Modulate,
    Modulate2x,
}

impl BlendMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => BlendMode::None,
            1 => BlendMode::Transparent,
            2 => BlendMode::Blend,
            3 => BlendMode::Additive,
            4 => BlendMode::AddAlpha,
            5 => BlendMode::Modulate,
            6 => BlendMode::Modulate2x,
            _ => return None,
        })
    }

    pub fn is_opaque(self) -> bool {
        matches!(self, BlendMode::None | BlendMode::Transparent)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShadingFlags(pub u32);

impl ShadingFlags {
    pub const UNSHADED: Self = Self(0x1);
    pub const SPHERE_ENVIRONMENT_MAP: Self = Self(0x2);
    pub const TWO_SIDED: Self = Self(0x10);
    pub const UNFOGGED: Self = Self(0x20);
    pub const NO_DEPTH_TEST: Self = Self(0x40);
    pub const NO_DEPTH_SET: Self = Self(0x80);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ShadingFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub blend_mode: BlendMode,
    pub shading_flags: ShadingFlags,
    /// Texture table indices; the position in this list is the texture slot
    /// (0 diffuse, 1 normal, 2 orm, 3 emissive for high-detail layers).
    pub textures: Vec<u32>,
    pub texture_animation_id: i32,
    pub coord_id: u32,
    pub alpha: f32,
    pub alpha_track: Option<Track<f32>>,
    pub emissive_gain: f32,
    pub hd: bool,
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            blend_mode: BlendMode::None,
            shading_flags: ShadingFlags::default(),
            textures: Vec::new(),
            texture_animation_id: -1,
            coord_id: 0,
            alpha: 1.0,
            alpha_track: None,
            emissive_gain: 1.0,
            hd: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Material {
    pub priority_plane: i32,
    pub flags: u32,
    pub shader: String,
    pub layers: Vec<Layer>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geoset {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 4]>,
    pub uv_sets: Vec<Vec<[f32; 2]>>,
    pub face_types: Vec<u32>,
    pub face_groups: Vec<u32>,
    pub faces: Vec<u16>,
    /// Per vertex: index into `matrix_groups`.
    pub vertex_groups: Vec<u8>,
    /// Size of each bone group.
    pub matrix_groups: Vec<u32>,
    /// Bone indices of all groups, concatenated.
    pub matrix_indices: Vec<u32>,
    /// Explicit skin: per vertex four bone indices followed by four weights.
    pub skin: Vec<u8>,
    pub material_id: u32,
    pub selection_group: u32,
    pub selection_flags: u32,
    pub lod: u32,
    pub lod_name: String,
    pub extent: Extent,
    pub sequence_extents: Vec<Extent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeosetAnimation {
    pub alpha: f32,
    pub flags: u32,
    /// RGB, already swizzled from the on-disk BGR order.
    pub color: [f32; 3],
    pub geoset_id: u32,
    pub alpha_track: Option<Track<f32>>,
    pub color_track: Option<Track<[f32; 3]>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    pub name: String,
    pub object_id: i32,
    pub parent_id: i32,
    pub flags: u32,
    pub pivot: [f32; 3],
    pub translation: Option<Track<[f32; 3]>>,
    /// Quaternions as `[x, y, z, w]`.
    pub rotation: Option<Track<[f32; 4]>>,
    pub scale: Option<Track<[f32; 3]>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bone {
    pub node: Node,
    pub geoset_id: i32,
    pub geoset_animation_id: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub version: u32,
    pub name: String,
    pub animation_file: String,
    pub extent: Extent,
    pub blend_time: u32,
    pub sequences: Vec<Sequence>,
    pub global_sequences: Vec<u32>,
    pub textures: Vec<TextureReference>,
    pub materials: Vec<Material>,
    pub geosets: Vec<Geoset>,
    pub animations: Vec<GeosetAnimation>,
    pub bones: Vec<Bone>,
    pub helpers: Vec<Node>,
    pub pivots: Vec<[f32; 3]>,
}

impl Model {
    /// Decodes an MDX byte stream. Nothing is published unless the whole stream parses.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ModelError> {
        crate::resources::mdx::decode(data)
    }

    /// Bones and helpers, in the order their world matrices are laid out.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.bones
            .iter()
            .map(|bone| &bone.node)
            .chain(self.helpers.iter())
    }

    pub fn node_count(&self) -> usize {
        self.bones.len() + self.helpers.len()
    }

    pub fn global_sequence_duration(&self, id: i32) -> Option<u32> {
        usize::try_from(id)
            .ok()
            .and_then(|id| self.global_sequences.get(id).copied())
    }
}
