//! Central GPU context: device, queue, camera and shared render resources.
//!
//! The editor owns the window and surface; it hands its device and queue to
//! [`Context::new`]. Tests and offline tools use [`Context::headless`].

use std::sync::Arc;

use anyhow::Context as _;
use wgpu::util::DeviceExt;

use crate::{
    camera::{Camera, CameraResources, CameraUniform, Projection},
    config::RenderConfig,
    data_structures::texture::Texture,
    resources::texture::{TextureCache, layer_texture_layout},
};

/// Textures bound for layer slots the model leaves empty.
#[derive(Debug)]
pub struct DefaultTextures {
    pub white: Arc<Texture>,
    pub normal: Arc<Texture>,
    pub orm: Arc<Texture>,
    pub black: Arc<Texture>,
}

impl DefaultTextures {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self {
            white: Arc::new(Texture::create_solid(device, queue, [255; 4], "default white")),
            normal: Arc::new(Texture::create_default_normal_map(device, queue)),
            orm: Arc::new(Texture::create_solid(device, queue, [255, 255, 0, 255], "default orm")),
            black: Arc::new(Texture::create_solid(device, queue, [0, 0, 0, 255], "default black")),
        }
    }

    /// Defaults for the diffuse, normal, orm and emissive slots.
    pub fn slots(&self) -> [&Texture; 4] {
        [&*self.white, &*self.normal, &*self.orm, &*self.black]
    }
}

#[derive(Debug)]
pub struct Context {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub color_format: wgpu::TextureFormat,
    pub size: [u32; 2],
    pub(crate) depth_texture: Texture,
    pub camera: CameraResources,
    pub config: RenderConfig,
    pub clear_colour: wgpu::Color,
    pub textures: TextureCache,
    pub defaults: DefaultTextures,
    pub layer_texture_layout: wgpu::BindGroupLayout,
}

impl Context {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        color_format: wgpu::TextureFormat,
        size: [u32; 2],
    ) -> Self {
        // target, view direction (looking down at the map), distance
        let camera = Camera::new((0.0, 0.0, 0.0), (0.0, 1.0, -1.5), 60.0);
        let projection = Projection::new(size[0], size[1], cgmath::Deg(70.0), 0.1, 2000.0);

        let camera_uniform = CameraUniform::new();
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[camera_uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
                label: Some("camera_bind_group_layout"),
            });

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        let mut camera = CameraResources {
            camera,
            projection,
            uniform: camera_uniform,
            buffer: camera_buffer,
            bind_group: camera_bind_group,
            bind_group_layout: camera_bind_group_layout,
        };
        camera.upload(&queue);

        let depth_texture = Texture::create_depth_texture(&device, size, "depth_texture");
        let defaults = DefaultTextures::new(&device, &queue);
        let layer_texture_layout = layer_texture_layout(&device);

        Self {
            device,
            queue,
            color_format,
            size,
            depth_texture,
            camera,
            config: RenderConfig::default(),
            clear_colour: wgpu::Color {
                r: 0.1,
                g: 0.2,
                b: 0.3,
                a: 1.0,
            },
            textures: TextureCache::new(),
            defaults,
            layer_texture_layout,
        }
    }

    /// A context without a surface, rendering into offscreen targets.
    pub async fn headless(size: [u32; 2]) -> anyhow::Result<Self> {
        log::debug!("requesting a headless adapter");
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("no graphics adapter available")?;
        log::info!("using adapter {:?}", adapter.get_info().name);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        Ok(Self::new(
            device,
            queue,
            wgpu::TextureFormat::Rgba8UnormSrgb,
            size,
        ))
    }

    pub fn resize(&mut self, size: [u32; 2]) {
        if size[0] == 0 || size[1] == 0 {
            return;
        }
        self.size = size;
        self.camera.projection.resize(size[0], size[1]);
        self.depth_texture = Texture::create_depth_texture(&self.device, size, "depth_texture");
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_texture.view
    }
}
