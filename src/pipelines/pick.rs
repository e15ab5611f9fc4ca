//! Object-id picking.
//!
//! Pickable instances are drawn with their id as the only colour output into an
//! offscreen `R32Uint` target cleared to zero. Reading one texel back gives the
//! id of the frontmost opaque object under it.

use futures::{channel::oneshot, executor::block_on};
use log::debug;

use crate::{
    data_structures::texture::Texture,
    pipelines::{PipelineState, mk_render_pipeline},
    render::{LayerState, NO_PICK_ID},
};

pub const PICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;

/// Pick pipelines only differ in the rasterizer and depth state of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PickKey {
    pub two_sided: bool,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl PickKey {
    pub fn new(state: &LayerState) -> Self {
        Self {
            two_sided: state.two_sided,
            depth_test: state.depth_test,
            depth_write: state.depth_write,
        }
    }
}

pub fn mk_pick_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    vertex_layouts: &[wgpu::VertexBufferLayout],
    shader: &wgpu::ShaderModule,
    key: PickKey,
) -> wgpu::RenderPipeline {
    mk_render_pipeline(
        device,
        layout,
        PICK_FORMAT,
        Some(Texture::DEPTH_FORMAT),
        vertex_layouts,
        shader,
        PipelineState {
            label: "Pick Pipeline",
            fragment_entry: "fs_pick",
            // integer targets cannot blend
            blend: None,
            cull_mode: if key.two_sided {
                None
            } else {
                Some(wgpu::Face::Back)
            },
            depth_write_enabled: key.depth_write,
            depth_compare: if key.depth_test {
                wgpu::CompareFunction::LessEqual
            } else {
                wgpu::CompareFunction::Always
            },
        },
    )
}

/// Offscreen id target with its own depth buffer and a one-texel readback buffer.
pub struct PickTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    depth: Texture,
    readback: wgpu::Buffer,
    size: [u32; 2],
}

impl PickTarget {
    pub fn new(device: &wgpu::Device, size: [u32; 2]) -> Self {
        let size = [size[0].max(1), size[1].max(1)];
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Pick texture"),
            size: wgpu::Extent3d {
                width: size[0],
                height: size[1],
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PICK_FORMAT,
            usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth = Texture::create_depth_texture(device, size, "Pick depth texture");
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pick readback buffer"),
            size: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            texture,
            view,
            depth,
            readback,
            size,
        }
    }

    pub fn size(&self) -> [u32; 2] {
        self.size
    }

    /// Starts a pass that clears the ids to [`NO_PICK_ID`] and the depth to 1.
    pub fn begin_pass<'e>(&self, encoder: &'e mut wgpu::CommandEncoder) -> wgpu::RenderPass<'e> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Pick Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            multiview_mask: None,
            timestamp_writes: None,
        })
    }

    /// Records a copy of the texel at `[x, y]` into the readback buffer.
    /// Returns false, recording nothing, when the texel lies outside the target.
    pub fn copy_pixel(&self, encoder: &mut wgpu::CommandEncoder, [x, y]: [u32; 2]) -> bool {
        if x >= self.size[0] || y >= self.size[1] {
            debug!("pick position {x},{y} is outside {:?}", self.size);
            return false;
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        true
    }

    /// Maps the readback buffer and decodes the copied id. Blocks until the GPU
    /// finished the copy.
    pub fn read_copied(&self, device: &wgpu::Device) -> anyhow::Result<Option<u32>> {
        let slice = self.readback.slice(..4);
        let (tx, rx) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;
        block_on(rx)??;

        let id = {
            let data = slice.get_mapped_range();
            u32::from_le_bytes([data[0], data[1], data[2], data[3]])
        };
        self.readback.unmap();

        debug!("picked id {id}");
        Ok((id != NO_PICK_ID).then_some(id))
    }
}
