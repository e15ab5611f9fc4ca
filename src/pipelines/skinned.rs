//! Executes planned skinned-mesh draws with wgpu.
//!
//! [`SkinnedRenderer::prepare`] uploads everything a frame needs (camera, instance
//! matrices, bone matrices, layer colours and one draw uniform per planned draw)
//! before any pass is recorded. The two draw methods then only bind and draw.
//! The pick pass shares the shader and bind groups but writes object ids into
//! a [`PickTarget`] instead of colour.

use std::{collections::HashMap, mem::size_of};

use cgmath::SquareMatrix;
use log::debug;
use wgpu::util::DeviceExt;

use crate::{
    camera::CameraUniform,
    context::Context,
    data_structures::{
        instance::InstanceRaw,
        mesh::{Vertex, vertex_layouts},
        model::BlendMode,
        texture::Texture,
    },
    pipelines::{
        PipelineState, mk_render_pipeline,
        pick::{PickKey, PickTarget, mk_pick_pipeline},
    },
    render::{Detail, DrawCall, LayerState, NO_PICK_ID, PickDraw, PreparedBatch, PreparedFrame},
};

/// One render pipeline exists per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub state: LayerState,
    pub detail: Detail,
}

impl PipelineKey {
    pub fn new(draw: &DrawCall, detail: Detail) -> Self {
        Self {
            state: draw.state,
            detail,
        }
    }

    fn fragment_entry(&self) -> &'static str {
        match self.detail {
            Detail::Standard => "fs_sd",
            Detail::High => "fs_hd",
        }
    }

    fn cull_mode(&self) -> Option<wgpu::Face> {
        if self.state.two_sided {
            None
        } else {
            Some(wgpu::Face::Back)
        }
    }

    fn depth_compare(&self) -> wgpu::CompareFunction {
        if self.state.depth_test {
            wgpu::CompareFunction::LessEqual
        } else {
            wgpu::CompareFunction::Always
        }
    }
}

/// Blending for a layer; `None` for the opaque modes.
pub fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    use wgpu::BlendFactor::*;
    let (src_factor, dst_factor) = match mode {
        BlendMode::None | BlendMode::Transparent => return None,
        BlendMode::Blend => (SrcAlpha, OneMinusSrcAlpha),
        BlendMode::Additive => (One, One),
        BlendMode::AddAlpha => (SrcAlpha, One),
        BlendMode::Modulate => (Zero, Src),
        BlendMode::Modulate2x => (Dst, Src),
    };
    let component = wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    Some(wgpu::BlendState {
        color: component,
        alpha: component,
    })
}

/// Per-draw values, bound with a dynamic offset.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniform {
    pub alpha_threshold: f32,
    pub layer_index: u32,
    pub layers_per_instance: u32,
    pub bone_count: u32,
    pub pick_id: u32,
    _padding: [u32; 3],
}

impl DrawUniform {
    pub fn new(draw: &DrawCall, batch: &PreparedBatch) -> Self {
        Self {
            alpha_threshold: draw.alpha_threshold,
            layer_index: draw.layer_index as u32,
            layers_per_instance: batch.mesh.layers_per_instance() as u32,
            bone_count: batch.bone_count as u32,
            pick_id: NO_PICK_ID,
            _padding: [0; 3],
        }
    }

    pub fn with_pick_id(mut self, pick_id: u32) -> Self {
        self.pick_id = pick_id;
        self
    }
}

const DRAW_UNIFORM_SIZE: wgpu::BufferAddress = size_of::<DrawUniform>() as wgpu::BufferAddress;

/// Growable uniform buffer holding one [`DrawUniform`] per draw, `stride` bytes apart.
struct DrawUniforms {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: usize,
    stride: wgpu::BufferAddress,
}

impl DrawUniforms {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, capacity: usize) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as wgpu::BufferAddress;
        let stride = DRAW_UNIFORM_SIZE.div_ceil(alignment) * alignment;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Uniform Buffer"),
            size: stride * capacity as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(DRAW_UNIFORM_SIZE),
                }),
            }],
            label: Some("draw_uniform_bind_group"),
        });
        Self {
            buffer,
            bind_group,
            capacity,
            stride,
        }
    }

    fn write(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        uniforms: &[DrawUniform],
    ) {
        if uniforms.is_empty() {
            return;
        }
        if uniforms.len() > self.capacity {
            debug!("growing draw uniforms to {}", uniforms.len().next_power_of_two());
            self.buffer.destroy();
            *self = Self::new(device, layout, uniforms.len().next_power_of_two());
        }
        let stride = self.stride as usize;
        let mut bytes = vec![0u8; stride * uniforms.len()];
        for (chunk, uniform) in bytes.chunks_exact_mut(stride).zip(uniforms) {
            chunk[..DRAW_UNIFORM_SIZE as usize].copy_from_slice(bytemuck::bytes_of(uniform));
        }
        queue.write_buffer(&self.buffer, 0, &bytes);
    }

    fn offset(&self, slot: usize) -> wgpu::DynamicOffset {
        (slot as wgpu::BufferAddress * self.stride) as wgpu::DynamicOffset
    }
}

/// Frame data of one batch on the GPU.
struct BatchBuffers {
    instances: wgpu::Buffer,
    bones: wgpu::Buffer,
    layer_colors: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl BatchBuffers {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, batch: &PreparedBatch) -> Self {
        let label = batch.mesh.path.display();
        // storage bindings may not be empty
        let identity: [[[f32; 4]; 4]; 1] = [cgmath::Matrix4::identity().into()];
        let bones: &[[[f32; 4]; 4]] = if batch.bone_matrices.is_empty() {
            &identity
        } else {
            &batch.bone_matrices
        };
        let white = [[1.0f32; 4]];
        let layer_colors: &[[f32; 4]] = if batch.layer_colors.is_empty() {
            &white
        } else {
            &batch.layer_colors
        };

        let instances = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Instance Buffer")),
            contents: bytemuck::cast_slice(&batch.instances),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let bones = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Bone Buffer")),
            contents: bytemuck::cast_slice(bones),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let layer_colors = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Layer Colour Buffer")),
            contents: bytemuck::cast_slice(layer_colors),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: bones.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: layer_colors.as_entire_binding(),
                },
            ],
            label: Some("frame_bind_group"),
        });
        Self {
            instances,
            bones,
            layer_colors,
            bind_group,
        }
    }
}

impl Drop for BatchBuffers {
    fn drop(&mut self) {
        self.instances.destroy();
        self.bones.destroy();
        self.layer_colors.destroy();
    }
}

/// Everything uploaded for one frame. Released when dropped.
pub struct FrameBuffers {
    batches: Vec<BatchBuffers>,
    opaque: Vec<DrawCall>,
    transparent: Vec<DrawCall>,
    detail: Detail,
}

impl FrameBuffers {
    pub fn opaque_draws(&self) -> &[DrawCall] {
        &self.opaque
    }

    pub fn transparent_draws(&self) -> &[DrawCall] {
        &self.transparent
    }
}

/// Everything uploaded for one pick pass. Released when dropped.
pub struct PickBuffers {
    batches: Vec<BatchBuffers>,
    draws: Vec<PickDraw>,
}

impl PickBuffers {
    pub fn draws(&self) -> &[PickDraw] {
        &self.draws
    }
}

fn frame_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let storage = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[storage(0), storage(1)],
        label: Some("frame_bind_group_layout"),
    })
}

fn draw_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(DRAW_UNIFORM_SIZE),
            },
            count: None,
        }],
        label: Some("draw_bind_group_layout"),
    })
}

pub struct SkinnedRenderer {
    shader: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    frame_layout: wgpu::BindGroupLayout,
    draw_layout: wgpu::BindGroupLayout,
    draw_uniforms: DrawUniforms,
    pick_uniforms: DrawUniforms,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    pick_pipelines: HashMap<PickKey, wgpu::RenderPipeline>,
    color_format: wgpu::TextureFormat,
}

impl SkinnedRenderer {
    pub fn new(ctx: &Context) -> Self {
        let device = &ctx.device;
        let frame_layout = frame_layout(device);
        let draw_layout = draw_layout(device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Skinned Pipeline Layout"),
            bind_group_layouts: &[
                Some(&ctx.camera.bind_group_layout),
                Some(&frame_layout),
                Some(&ctx.layer_texture_layout),
                Some(&draw_layout),
            ],
            immediate_size: 0,
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Skinned Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("skinned.wgsl").into()),
        });
        let draw_uniforms = DrawUniforms::new(device, &draw_layout, 64);
        let pick_uniforms = DrawUniforms::new(device, &draw_layout, 16);

        Self {
            shader,
            pipeline_layout,
            frame_layout,
            draw_layout,
            draw_uniforms,
            pick_uniforms,
            pipelines: HashMap::new(),
            pick_pipelines: HashMap::new(),
            color_format: ctx.color_format,
        }
    }

    /// Number of distinct colour pipelines created so far.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn pick_pipeline_count(&self) -> usize {
        self.pick_pipelines.len()
    }

    fn ensure_pipeline(&mut self, device: &wgpu::Device, key: PipelineKey) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        debug!("creating skinned pipeline for {key:?}");
        let pipeline = mk_render_pipeline(
            device,
            &self.pipeline_layout,
            self.color_format,
            Some(Texture::DEPTH_FORMAT),
            &skinned_vertex_layouts(),
            &self.shader,
            PipelineState {
                label: "Skinned Render Pipeline",
                fragment_entry: key.fragment_entry(),
                blend: blend_state(key.state.blend_mode),
                cull_mode: key.cull_mode(),
                depth_write_enabled: key.state.depth_write,
                depth_compare: key.depth_compare(),
            },
        );
        self.pipelines.insert(key, pipeline);
    }

    fn ensure_pick_pipeline(&mut self, device: &wgpu::Device, key: PickKey) {
        if self.pick_pipelines.contains_key(&key) {
            return;
        }
        debug!("creating pick pipeline for {key:?}");
        let pipeline = mk_pick_pipeline(
            device,
            &self.pipeline_layout,
            &skinned_vertex_layouts(),
            &self.shader,
            key,
        );
        self.pick_pipelines.insert(key, pipeline);
    }

    fn upload_batches(&self, ctx: &Context, frame: &PreparedFrame) -> Vec<BatchBuffers> {
        frame
            .batches()
            .iter()
            .map(|batch| BatchBuffers::new(&ctx.device, &self.frame_layout, batch))
            .collect()
    }

    /// Uploads the frame and plans its draws. Must happen before either pass is drawn.
    pub fn prepare(&mut self, ctx: &Context, frame: &PreparedFrame, detail: Detail) -> FrameBuffers {
        upload_camera(ctx, frame);
        let batches = self.upload_batches(ctx, frame);

        let opaque = frame.opaque_draws(detail);
        let transparent = frame.transparent_draws(detail);
        let uniforms: Vec<DrawUniform> = opaque
            .iter()
            .chain(&transparent)
            .map(|draw| DrawUniform::new(draw, &frame.batches()[draw.batch]))
            .collect();
        self.draw_uniforms
            .write(&ctx.device, &ctx.queue, &self.draw_layout, &uniforms);

        for draw in opaque.iter().chain(&transparent) {
            self.ensure_pipeline(&ctx.device, PipelineKey::new(draw, detail));
        }

        FrameBuffers {
            batches,
            opaque,
            transparent,
            detail,
        }
    }

    pub fn draw_opaque_pass(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        ctx: &Context,
        frame: &PreparedFrame,
        buffers: &FrameBuffers,
    ) {
        record_draws(
            pass,
            ctx,
            frame,
            &buffers.batches,
            &self.draw_uniforms,
            buffers.opaque.iter().enumerate(),
            |draw| self.pipelines.get(&PipelineKey::new(draw, buffers.detail)),
        );
    }

    pub fn draw_transparent_pass(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        ctx: &Context,
        frame: &PreparedFrame,
        buffers: &FrameBuffers,
    ) {
        let first = buffers.opaque.len();
        record_draws(
            pass,
            ctx,
            frame,
            &buffers.batches,
            &self.draw_uniforms,
            buffers
                .transparent
                .iter()
                .enumerate()
                .map(|(index, draw)| (first + index, draw)),
            |draw| self.pipelines.get(&PipelineKey::new(draw, buffers.detail)),
        );
    }

    /// Draws a whole frame into `view`: opaque pass, then transparent pass.
    pub fn render(
        &mut self,
        ctx: &Context,
        frame: &PreparedFrame,
        view: &wgpu::TextureView,
        detail: Detail,
    ) -> FrameBuffers {
        let buffers = self.prepare(ctx, frame, detail);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Skinned Render Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Skinned Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(ctx.clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: ctx.depth_view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                multiview_mask: None,
                timestamp_writes: None,
            });
            self.draw_opaque_pass(&mut pass, ctx, frame, &buffers);
            self.draw_transparent_pass(&mut pass, ctx, frame, &buffers);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        buffers
    }

    /// Uploads the frame for the pick pass. Independent of [`SkinnedRenderer::prepare`],
    /// both may be in flight at once.
    pub fn prepare_pick(&mut self, ctx: &Context, frame: &PreparedFrame) -> PickBuffers {
        upload_camera(ctx, frame);
        let batches = self.upload_batches(ctx, frame);

        let draws = frame.pick_draws();
        let uniforms: Vec<DrawUniform> = draws
            .iter()
            .map(|pick| {
                DrawUniform::new(&pick.draw, &frame.batches()[pick.draw.batch])
                    .with_pick_id(pick.id)
            })
            .collect();
        self.pick_uniforms
            .write(&ctx.device, &ctx.queue, &self.draw_layout, &uniforms);

        for pick in &draws {
            self.ensure_pick_pipeline(&ctx.device, PickKey::new(&pick.draw.state));
        }

        PickBuffers { batches, draws }
    }

    pub fn draw_pick_pass(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        ctx: &Context,
        frame: &PreparedFrame,
        buffers: &PickBuffers,
    ) {
        record_draws(
            pass,
            ctx,
            frame,
            &buffers.batches,
            &self.pick_uniforms,
            buffers.draws.iter().map(|pick| &pick.draw).enumerate(),
            |draw| self.pick_pipelines.get(&PickKey::new(&draw.state)),
        );
    }

    /// Renders the object ids of `frame` into `target` and returns the id under
    /// `pixel`, if any.
    pub fn pick(
        &mut self,
        ctx: &Context,
        frame: &PreparedFrame,
        target: &PickTarget,
        pixel: [u32; 2],
    ) -> anyhow::Result<Option<u32>> {
        let buffers = self.prepare_pick(ctx, frame);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pick Encoder"),
            });
        {
            let mut pass = target.begin_pass(&mut encoder);
            self.draw_pick_pass(&mut pass, ctx, frame, &buffers);
        }
        let copied = target.copy_pixel(&mut encoder, pixel);
        ctx.queue.submit(std::iter::once(encoder.finish()));
        if !copied {
            return Ok(None);
        }
        target.read_copied(&ctx.device)
    }
}

fn skinned_vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 6] {
    let [positions, uvs, normals, tangents, skins] = vertex_layouts();
    [positions, uvs, normals, tangents, skins, InstanceRaw::desc()]
}

fn upload_camera(ctx: &Context, frame: &PreparedFrame) {
    let mut camera = CameraUniform::new();
    camera.update_view_proj(&frame.camera);
    ctx.queue
        .write_buffer(&ctx.camera.buffer, 0, bytemuck::cast_slice(&[camera]));
}

/// Binds and draws every `(uniform slot, draw)` pair. Draws without GPU data,
/// without a pipeline or with nothing to draw are skipped.
fn record_draws<'a, 'p>(
    pass: &mut wgpu::RenderPass<'_>,
    ctx: &Context,
    frame: &PreparedFrame,
    batches: &[BatchBuffers],
    uniforms: &DrawUniforms,
    draws: impl Iterator<Item = (usize, &'a DrawCall)>,
    pipeline: impl Fn(&DrawCall) -> Option<&'p wgpu::RenderPipeline>,
) {
    pass.set_bind_group(0, &ctx.camera.bind_group, &[]);
    for (slot, draw) in draws {
        if draw.indices.is_empty() || draw.instances.is_empty() {
            continue;
        }
        let mesh = frame.batches()[draw.batch].mesh;
        let Some(gpu) = mesh.gpu() else {
            continue;
        };
        let Some(pipeline) = pipeline(draw) else {
            continue;
        };
        let batch = &batches[draw.batch];

        pass.set_pipeline(pipeline);
        pass.set_bind_group(1, &batch.bind_group, &[]);
        pass.set_bind_group(2, &gpu.layer_bind_groups[draw.material][draw.layer], &[]);
        pass.set_bind_group(3, &uniforms.bind_group, &[uniforms.offset(slot)]);
        for (index, stream) in gpu.buffers.vertex_streams().into_iter().enumerate() {
            pass.set_vertex_buffer(index as u32, stream.slice(..));
        }
        pass.set_vertex_buffer(5, batch.instances.slice(..));
        pass.set_index_buffer(gpu.buffers.indices.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(draw.indices.clone(), draw.base_vertex, draw.instances.clone());
    }
}
