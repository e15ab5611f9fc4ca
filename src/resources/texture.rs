//! Texture resolution and loading for MDX models.
//!
//! A model's texture table holds either file names or "replaceable" slots (team
//! colour, tree families, cliffs, ...). Replaceable slots get their name from a
//! caller override or from a built-in table. High-detail models split materials
//! into diffuse/normal/orm/emissive channels, but a replaceable slot does not say
//! which channel it is. The channel is guessed from the texture slot of the first
//! layer using it; this is a best-effort heuristic.

use std::{
    collections::HashMap,
    hash::Hash,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, warn};

use crate::{
    data_structures::{
        model::{Model, TextureReference, WrapMode},
        texture::Texture,
    },
    error::TextureError,
    hierarchy::Hierarchy,
};

/// Degraded name for replaceable ids without a default.
pub const WHITE_TEXTURE: &str = "Textures/white";

const REPLACEABLE_TEXTURES: [(u32, &str); 10] = [
    (1, "ReplaceableTextures/TeamColor/TeamColor00"),
    (2, "ReplaceableTextures/TeamGlow/TeamGlow00"),
    (11, "ReplaceableTextures/Cliff/Cliff0"),
    (31, "ReplaceableTextures/LordaeronTree/LordaeronSummerTree"),
    (32, "ReplaceableTextures/AshenvaleTree/AshenTree"),
    (33, "ReplaceableTextures/BarrensTree/BarrensTree"),
    (34, "ReplaceableTextures/NorthrendTree/NorthTree"),
    (35, "ReplaceableTextures/Mushroom/MushroomTree"),
    (36, "ReplaceableTextures/RuinsTree/RuinsTree"),
    (37, "ReplaceableTextures/OutlandMushroomTree/MushroomTree"),
];

const FALLBACK_EXTENSIONS: [&str; 3] = ["dds", "blp", "png"];

/// Overrides the texture used for one replaceable id, e.g. a player's team colour.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReplaceableOverride {
    pub id: u32,
    pub name: String,
}

impl ReplaceableOverride {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

pub fn replaceable_texture(id: u32) -> Result<&'static str, TextureError> {
    REPLACEABLE_TEXTURES
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, name)| *name)
        .ok_or(TextureError::UnknownReplaceableId(id))
}

/// Channel suffix for `texture_index`, taken from the first layer (in material
/// and layer order) that references it. Only high-detail layers get a suffix.
pub fn channel_suffix(model: &Model, texture_index: usize) -> &'static str {
    let first_reference = model
        .materials
        .iter()
        .flat_map(|material| material.layers.iter())
        .find_map(|layer| {
            layer
                .textures
                .iter()
                .position(|&texture| texture as usize == texture_index)
                .map(|slot| (layer, slot))
        });

    match first_reference {
        Some((layer, slot)) if layer.hd => match slot {
            0 => "_diffuse",
            1 => "_normal",
            2 => "_orm",
            3 => "_emissive",
            _ => "",
        },
        _ => "",
    }
}

/// The asset name to load for one entry of the model's texture table.
pub fn resolve_texture_name(
    model: &Model,
    texture_index: usize,
    replaceable_override: Option<&ReplaceableOverride>,
) -> String {
    let Some(reference) = model.textures.get(texture_index) else {
        warn!("texture index {texture_index} is outside of the texture table");
        return WHITE_TEXTURE.to_string();
    };
    if !reference.is_replaceable() {
        return reference.file_name.clone();
    }

    let suffix = channel_suffix(model, texture_index);
    match replaceable_override {
        Some(replaceable) if replaceable.id == reference.replaceable_id => {
            format!("{}{suffix}", replaceable.name)
        }
        _ => match replaceable_texture(reference.replaceable_id) {
            Ok(name) => format!("{name}{suffix}"),
            Err(err) => {
                warn!("{err}, using {WHITE_TEXTURE}");
                WHITE_TEXTURE.to_string()
            }
        },
    }
}

/// Deduplicates shared resources. Entries are never evicted.
#[derive(Debug)]
pub struct ResourceCache<K, V> {
    entries: HashMap<K, Arc<V>>,
}

impl<K: Eq + Hash, V> ResourceCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    pub fn get_or_insert_with(&mut self, key: K, load: impl FnOnce() -> V) -> Arc<V> {
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::new(load()))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, V> Default for ResourceCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Textures are shared by resolved name and texture flags.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub name: String,
    pub flags: u32,
}

pub type TextureCache = ResourceCache<TextureKey, Texture>;

/// Four textures with their samplers: diffuse, normal, orm and emissive.
pub fn layer_texture_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..4u32)
        .flat_map(|slot| {
            [
                wgpu::BindGroupLayoutEntry {
                    binding: slot * 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: slot * 2 + 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ]
        })
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &entries,
        label: Some("MDX layer texture_bind_group_layout"),
    })
}

/// The path itself, then the same path with each fallback extension.
pub fn candidate_paths(name: &str) -> Vec<PathBuf> {
    let path = Path::new(name);
    let mut candidates = vec![path.to_path_buf()];
    for extension in FALLBACK_EXTENSIONS {
        let candidate = path.with_extension(extension);
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

pub fn is_linear(name: &str) -> bool {
    let stem = Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    stem.ends_with("_normal") || stem.ends_with("_orm")
}

pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    hierarchy: &dyn Hierarchy,
    name: &str,
) -> Result<Texture, TextureError> {
    let mut last_error = TextureError::Missing(name.to_string());
    for path in candidate_paths(name) {
        if !hierarchy.file_exists(&path) {
            continue;
        }
        let bytes = match hierarchy.open_file(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("{err}");
                continue;
            }
        };
        let hint = path.extension().and_then(|extension| extension.to_str());
        let label = path.to_string_lossy();
        match Texture::from_bytes(device, queue, &bytes, &label, hint, is_linear(name)) {
            Ok(texture) => return Ok(texture),
            Err(source) => {
                last_error = TextureError::Decode {
                    name: label.into_owned(),
                    source,
                }
            }
        }
    }
    Err(last_error)
}

/// Loads (or reuses) the texture for `name` with wrap modes from `flags`.
/// Never fails: unloadable textures degrade to white.
pub fn load_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    hierarchy: &dyn Hierarchy,
    cache: &mut TextureCache,
    name: &str,
    flags: u32,
) -> Arc<Texture> {
    let key = TextureKey {
        name: name.to_string(),
        flags,
    };
    cache.get_or_insert_with(key, || {
        let texture = read_texture(device, queue, hierarchy, name).unwrap_or_else(|err| {
            warn!("{err}, using a white texture");
            Texture::create_solid(device, queue, [255; 4], name)
        });
        texture.with_wrap(
            device,
            WrapMode::from_flags(flags, TextureReference::WRAP_WIDTH),
            WrapMode::from_flags(flags, TextureReference::WRAP_HEIGHT),
        )
    })
}
