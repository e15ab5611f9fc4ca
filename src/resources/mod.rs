use std::path::Path;

use crate::{
    data_structures::model::Model,
    error::{ModelError, Result},
    hierarchy::Hierarchy,
};

/**
 * This module contains all logic for turning asset bytes into engine data:
 * the MDX decoder, skin normalization, mesh layout, animation sampling and textures.
 */
pub mod animation;
pub mod mdx;
pub mod mesh;
pub mod skin;
pub mod texture;

fn is_mdx(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("mdx"))
}

/// Reads and decodes the model at `path` from the hierarchy.
pub fn load_model(hierarchy: &dyn Hierarchy, path: &Path) -> Result<Model> {
    if !is_mdx(path) {
        return Err(ModelError::UnsupportedExtension(path.to_path_buf()));
    }
    let bytes = hierarchy.open_file(path)?;
    let model = Model::from_bytes(&bytes)?;
    log::debug!(
        "decoded {}: {} geosets, {} materials, {} bones, {} sequences",
        path.display(),
        model.geosets.len(),
        model.materials.len(),
        model.bones.len(),
        model.sequences.len()
    );
    Ok(model)
}
