//! mdx-ngin
//!
//! Instanced, animated rendering of MDX models for an RTS map editor on top of
//! wgpu. A model is decoded once, shared by every placed instance, and drawn with
//! per-layer blending, culling and animation-driven visibility.
//!
//! High-level modules
//! - `camera`: editor camera, projection, frustum and camera uniform
//! - `config`: render tuning knobs such as the transparency distance cutoff
//! - `context`: central GPU context that owns device/queue and shared resources
//! - `data_structures`: model data, GPU meshes, instances and textures
//! - `error`: typed decode, hierarchy and texture errors
//! - `hierarchy`: the virtual file system models and textures are read from
//! - `pipelines`: the skinned render and pick pipelines and their draw executor
//! - `resources`: MDX decoding, skin normalization, mesh layout and textures
//! - `render`: per-frame queue, batching and draw planning
//!

pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod hierarchy;
pub mod pipelines;
pub mod render;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use wgpu;

pub use config::{RenderConfig, TRANSPARENT_DISTANCE_CUTOFF};
pub use context::Context;
pub use data_structures::{
    instance::{Placement, SkeletalModelInstance},
    mesh::{MeshCache, SkinnedMesh},
    model::Model,
};
pub use error::{HierarchyError, ModelError, TextureError};
pub use hierarchy::{DirectoryHierarchy, Hierarchy, MemoryHierarchy};
pub use pipelines::{pick::PickTarget, skinned::SkinnedRenderer};
pub use render::{Detail, DrawCall, FrameQueue, NO_PICK_ID, PreparedFrame};
pub use resources::texture::ReplaceableOverride;
