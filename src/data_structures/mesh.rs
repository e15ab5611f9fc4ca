//! GPU resident skinned meshes.
//!
//! One [`SkinnedMesh`] exists per distinct model asset (and replaceable override)
//! and is shared by every placed instance of it. Its vertex and index buffers are
//! owned by [`MeshBuffers`] and released exactly once when the mesh is dropped.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{debug, info};
use wgpu::util::DeviceExt;

use crate::{
    context::Context,
    data_structures::{
        model::{Layer, Model},
        texture::Texture,
    },
    error::Result,
    hierarchy::{self, Hierarchy},
    resources::{
        self,
        mesh::{MeshEntry, MeshLayout},
        skin::SKIN_STRIDE,
        texture::{self, ReplaceableOverride},
    },
};

/**
 * As we store vertex data directly in the GPU memory we need to tell what the bytes refer to.
 */
pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
const UV_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x2];
const NORMAL_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x3];
const TANGENT_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![3 => Float32x4];
// four bone indices, then four weights
const SKIN_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![4 => Uint8x4, 5 => Unorm8x4];

fn stream(stride: usize, attributes: &'static [wgpu::VertexAttribute]) -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: stride as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    }
}

/// Layouts of the five per-vertex streams, in vertex buffer slot order.
pub fn vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 5] {
    use std::mem::size_of;
    [
        stream(size_of::<[f32; 3]>(), &POSITION_ATTRIBUTES),
        stream(size_of::<[f32; 2]>(), &UV_ATTRIBUTES),
        stream(size_of::<[f32; 3]>(), &NORMAL_ATTRIBUTES),
        stream(size_of::<[f32; 4]>(), &TANGENT_ATTRIBUTES),
        stream(SKIN_STRIDE, &SKIN_ATTRIBUTES),
    ]
}

/// Vertex and index buffers of one mesh.
#[derive(Debug)]
pub struct MeshBuffers {
    pub positions: wgpu::Buffer,
    pub uvs: wgpu::Buffer,
    pub normals: wgpu::Buffer,
    pub tangents: wgpu::Buffer,
    pub skins: wgpu::Buffer,
    pub indices: wgpu::Buffer,
}

impl MeshBuffers {
    pub fn new(device: &wgpu::Device, layout: &MeshLayout, label: &str) -> Self {
        let vertex = |name: &str, contents: &[u8]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} {name} Buffer")),
                contents,
                usage: wgpu::BufferUsages::VERTEX,
            })
        };
        // wgpu wants buffer writes in multiples of four bytes
        let mut indices = layout.indices.clone();
        if indices.len() % 2 == 1 {
            indices.push(0);
        }

        Self {
            positions: vertex("Position", bytemuck::cast_slice(&layout.positions)),
            uvs: vertex("UV", bytemuck::cast_slice(&layout.uvs)),
            normals: vertex("Normal", bytemuck::cast_slice(&layout.normals)),
            tangents: vertex("Tangent", bytemuck::cast_slice(&layout.tangents)),
            skins: vertex("Skin", bytemuck::cast_slice(&layout.skins)),
            indices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Index Buffer")),
                contents: bytemuck::cast_slice(&indices),
                usage: wgpu::BufferUsages::INDEX,
            }),
        }
    }

    /// Vertex streams in slot order, matching [`vertex_layouts`].
    pub fn vertex_streams(&self) -> [&wgpu::Buffer; 5] {
        [
            &self.positions,
            &self.uvs,
            &self.normals,
            &self.tangents,
            &self.skins,
        ]
    }
}

impl Drop for MeshBuffers {
    fn drop(&mut self) {
        for buffer in [
            &self.positions,
            &self.uvs,
            &self.normals,
            &self.tangents,
            &self.skins,
            &self.indices,
        ] {
            buffer.destroy();
        }
    }
}

/// Everything a mesh owns on the GPU.
#[derive(Debug)]
pub struct MeshResources {
    pub buffers: MeshBuffers,
    /// One bind group per material layer, indexed `[material][layer]`.
    pub layer_bind_groups: Vec<Vec<wgpu::BindGroup>>,
}

/// Identifies a mesh for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(0);

impl MeshId {
    fn next() -> Self {
        MeshId(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
pub struct SkinnedMesh {
    id: MeshId,
    pub path: PathBuf,
    pub model: Arc<Model>,
    pub layout: MeshLayout,
    /// The resolved asset name of every entry in the model's texture table.
    pub texture_names: Vec<String>,
    pub textures: Vec<Arc<Texture>>,
    gpu: Option<MeshResources>,
}

impl SkinnedMesh {
    /// Loads, decodes and uploads the model at `path`.
    pub fn new(
        ctx: &mut Context,
        hierarchy: &dyn Hierarchy,
        path: impl AsRef<Path>,
        replaceable_override: Option<&ReplaceableOverride>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let model = Arc::new(resources::load_model(hierarchy, path)?);
        let mut mesh = Self::from_model(path, model, replaceable_override)?;
        mesh.upload(ctx, hierarchy);
        Ok(mesh)
    }

    /// Builds the CPU side of a mesh without touching the GPU.
    pub fn from_model(
        path: impl Into<PathBuf>,
        model: Arc<Model>,
        replaceable_override: Option<&ReplaceableOverride>,
    ) -> Result<Self> {
        let path = path.into();
        let layout = MeshLayout::build(&model)?;
        if layout.is_empty() {
            info!("{} has no renderable geosets", path.display());
        }
        let texture_names = (0..model.textures.len())
            .map(|index| texture::resolve_texture_name(&model, index, replaceable_override))
            .collect();

        Ok(Self {
            id: MeshId::next(),
            path,
            model,
            layout,
            texture_names,
            textures: Vec::new(),
            gpu: None,
        })
    }

    /// Loads textures and allocates buffers. Meshless models allocate nothing.
    pub fn upload(&mut self, ctx: &mut Context, hierarchy: &dyn Hierarchy) {
        if !self.has_mesh() || self.gpu.is_some() {
            return;
        }
        self.textures = self
            .texture_names
            .iter()
            .zip(&self.model.textures)
            .map(|(name, reference)| {
                texture::load_texture(
                    &ctx.device,
                    &ctx.queue,
                    hierarchy,
                    &mut ctx.textures,
                    name,
                    reference.flags,
                )
            })
            .collect();

        let label = self.path.display().to_string();
        let buffers = MeshBuffers::new(&ctx.device, &self.layout, &label);
        let layer_bind_groups = self
            .model
            .materials
            .iter()
            .map(|material| {
                material
                    .layers
                    .iter()
                    .map(|layer| self.layer_bind_group(ctx, layer, &label))
                    .collect()
            })
            .collect();
        debug!(
            "uploaded {label}: {} vertices, {} indices, {} textures",
            self.layout.vertex_count(),
            self.layout.indices.len(),
            self.textures.len()
        );
        self.gpu = Some(MeshResources {
            buffers,
            layer_bind_groups,
        });
    }

    fn layer_bind_group(&self, ctx: &Context, layer: &Layer, label: &str) -> wgpu::BindGroup {
        let defaults = ctx.defaults.slots();
        let slots: [&Texture; 4] = std::array::from_fn(|slot| {
            layer
                .textures
                .get(slot)
                .and_then(|&texture| self.textures.get(texture as usize))
                .map(|texture| texture.as_ref())
                .unwrap_or(defaults[slot])
        });
        let entries: Vec<wgpu::BindGroupEntry> = slots
            .iter()
            .enumerate()
            .flat_map(|(slot, texture)| {
                [
                    wgpu::BindGroupEntry {
                        binding: slot as u32 * 2,
                        resource: wgpu::BindingResource::TextureView(&texture.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: slot as u32 * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(&texture.sampler),
                    },
                ]
            })
            .collect();
        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &ctx.layer_texture_layout,
            entries: &entries,
            label: Some(&format!("{label} layer bind group")),
        })
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    /// False for models without any LOD 0 geoset; such meshes never draw.
    pub fn has_mesh(&self) -> bool {
        !self.layout.is_empty()
    }

    pub fn entries(&self) -> &[MeshEntry] {
        &self.layout.entries
    }

    pub fn layers_per_instance(&self) -> usize {
        self.layout.layers_per_instance
    }

    pub fn layers(&self, entry: &MeshEntry) -> &[Layer] {
        &self.model.materials[entry.material_id].layers
    }

    /// Entries are classified by their first layer.
    pub fn primary_layer(&self, entry: &MeshEntry) -> &Layer {
        &self.layers(entry)[0]
    }

    pub fn is_transparent(&self, entry: &MeshEntry) -> bool {
        !self.primary_layer(entry).blend_mode.is_opaque()
    }

    pub fn gpu(&self) -> Option<&MeshResources> {
        self.gpu.as_ref()
    }
}

/// Shares meshes between everyone placing the same asset.
///
/// Entries are weak: a mesh is destroyed once the last placed instance lets go
/// of it, and loaded again on the next request.
#[derive(Debug, Default)]
pub struct MeshCache {
    entries: HashMap<(String, Option<ReplaceableOverride>), Weak<SkinnedMesh>>,
}

impl MeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(
        &mut self,
        ctx: &mut Context,
        hierarchy: &dyn Hierarchy,
        path: impl AsRef<Path>,
        replaceable_override: Option<ReplaceableOverride>,
    ) -> Result<Arc<SkinnedMesh>> {
        let path = path.as_ref();
        let key = (hierarchy::normalize(path), replaceable_override);
        if let Some(mesh) = self.entries.get(&key).and_then(Weak::upgrade) {
            return Ok(mesh);
        }
        let mesh = Arc::new(SkinnedMesh::new(ctx, hierarchy, path, key.1.as_ref())?);
        self.entries.insert(key, Arc::downgrade(&mesh));
        Ok(mesh)
    }

    /// Forgets entries whose mesh has been dropped.
    pub fn purge(&mut self) {
        self.entries.retain(|_, mesh| mesh.strong_count() > 0);
    }

    /// Number of meshes still alive.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|mesh| mesh.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
