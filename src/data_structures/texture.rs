//! GPU textures for model layers and the depth buffer.
//!
//! Layer textures are decoded with `image` (BLP with `image-blp`) and uploaded as RGBA8. Colour maps
//! use an sRGB format, data maps (normal, orm) stay linear. Wrap modes live in
//! the sampler, so one decoded image can back several [`Texture`]s.

use anyhow::{Context as _, Result, anyhow};
use image::{DynamicImage, ImageFormat, RgbaImage, load_from_memory_with_format};

use crate::data_structures::model::WrapMode;

#[derive(Clone, Debug)]
pub struct Texture {
    #[allow(unused)]
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl Texture {
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Depth attachment of `size` pixels; zero sizes are bumped to one.
    pub fn create_depth_texture(device: &wgpu::Device, size: [u32; 2], label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size[0].max(1), size[1].max(1)),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[Self::DEPTH_FORMAT],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        Self {
            texture,
            view,
            sampler,
        }
    }

    /// A 1x1 texture of one colour. Stands in for empty layer slots and for
    /// textures that could not be loaded.
    pub fn create_solid(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        rgba: [u8; 4],
        label: &str,
    ) -> Texture {
        Self::upload_rgba(
            device,
            queue,
            &rgba,
            [1, 1],
            wgpu::TextureFormat::Rgba8Unorm,
            label,
        )
    }

    /// Flat normal map, +Z in tangent space.
    pub fn create_default_normal_map(device: &wgpu::Device, queue: &wgpu::Queue) -> Texture {
        Self::create_solid(device, queue, [127, 127, 255, 255], "default normal map")
    }

    /// Decodes encoded image bytes. `extension` picks the decoder; without one
    /// the format is guessed from the content.
    pub fn from_bytes(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bytes: &[u8],
        label: &str,
        extension: Option<&str>,
        is_linear: bool,
    ) -> Result<Self> {
        let img = decode(bytes, extension).with_context(|| format!("decoding {label}"))?;
        Ok(Self::from_image(device, queue, &img, label, is_linear))
    }

    pub fn from_image(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        img: &image::DynamicImage,
        label: &str,
        is_linear: bool,
    ) -> Self {
        let rgba = img.to_rgba8();
        let format = if is_linear {
            wgpu::TextureFormat::Rgba8Unorm
        } else {
            wgpu::TextureFormat::Rgba8UnormSrgb
        };
        Self::upload_rgba(device, queue, &rgba, [rgba.width(), rgba.height()], format, label)
    }

    fn upload_rgba(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        rgba: &[u8],
        [width, height]: [u32; 2],
        format: wgpu::TextureFormat,
        label: &str,
    ) -> Self {
        let size = extent(width, height);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = create_sampler(device, WrapMode::Repeat, WrapMode::Repeat);
        Self {
            texture,
            view,
            sampler,
        }
    }

    /// Swaps the sampler for one with the given per-axis wrap modes.
    pub fn with_wrap(mut self, device: &wgpu::Device, wrap_u: WrapMode, wrap_v: WrapMode) -> Self {
        self.sampler = create_sampler(device, wrap_u, wrap_v);
        self
    }
}

/// Decodes encoded image bytes. `extension` picks the decoder; without one the
/// format is guessed from the content.
pub fn decode(bytes: &[u8], extension: Option<&str>) -> Result<DynamicImage> {
    match extension {
        None => Ok(image::load_from_memory(bytes)?),
        Some(extension) if extension.eq_ignore_ascii_case("blp") => decode_blp(bytes),
        Some(extension) => {
            let format = ImageFormat::from_extension(extension)
                .with_context(|| format!("no decoder for .{extension} files"))?;
            Ok(load_from_memory_with_format(bytes, format)?)
        }
    }
}

/// Top mip level of a BLP1/BLP2 texture.
fn decode_blp(bytes: &[u8]) -> Result<DynamicImage> {
    let (_, blp) = image_blp::parser::parse_blp(bytes)
        .map_err(|err| anyhow!("malformed blp: {err:?}"))?;
    let decoded = image_blp::convert::blp_to_image(&blp, 0)
        .map_err(|err| anyhow!("unsupported blp: {err:?}"))?
        .to_rgba8();
    // rebuilt from raw pixels, image-blp may link another `image` version
    let (width, height) = decoded.dimensions();
    let rgba = RgbaImage::from_raw(width, height, decoded.into_raw())
        .context("blp pixel buffer does not match its size")?;
    Ok(DynamicImage::ImageRgba8(rgba))
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn address_mode(wrap: WrapMode) -> wgpu::AddressMode {
    match wrap {
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

pub fn create_sampler(device: &wgpu::Device, wrap_u: WrapMode, wrap_v: WrapMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: address_mode(wrap_u),
        address_mode_v: address_mode(wrap_v),
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::MipmapFilterMode::Linear,
        ..Default::default()
    })
}
