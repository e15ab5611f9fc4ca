//! Engine data structures: models, meshes, textures and instances.
//!
//! - `model` holds the decoded MDX model: geosets, materials, nodes and tracks
//! - `mesh` contains the shared GPU mesh of one model and the mesh cache
//! - `texture` contains the GPU texture wrapper and creation utilities
//! - `instance` holds placements and the animated pose of one model instance

pub mod instance;
pub mod mesh;
pub mod model;
pub mod texture;
