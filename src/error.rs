//! Error types for model loading and texture resolution.
//!
//! Decoding failures are fatal to the one model being loaded and are surfaced as
//! [`ModelError`]. Texture failures ([`TextureError`]) never abort a model: the
//! resolver logs them and degrades to a default asset.

use std::path::PathBuf;

use thiserror::Error;

/// The virtual file system could not hand out a file.
#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("file not found in hierarchy: {0}")]
    NotFound(PathBuf),

    #[error("IO error while reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("unsupported model extension for {0}, expected .mdx")]
    UnsupportedExtension(PathBuf),

    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error("not an MDX file, magic was {0:?}")]
    BadMagic([u8; 4]),

    #[error("unexpected end of stream at offset {offset} while reading {what}")]
    UnexpectedEnd { offset: usize, what: &'static str },

    #[error("expected tag {expected} at offset {offset} but found {found}")]
    UnexpectedTag {
        expected: &'static str,
        found: String,
        offset: usize,
    },

    #[error("geoset {geoset}: face index {index} is outside of its {vertices} vertices")]
    InvalidFace {
        geoset: usize,
        index: u16,
        vertices: usize,
    },

    #[error("geoset {geoset}: {reason}")]
    InvalidSkin { geoset: usize, reason: String },
}

impl ModelError {
    /// Maps a short read from the byte cursor to a positioned decode error.
    pub(crate) fn eof(offset: usize, what: &'static str) -> Self {
        ModelError::UnexpectedEnd { offset, what }
    }
}

#[derive(Error, Debug)]
pub enum TextureError {
    #[error("replaceable id {0} has no default texture")]
    UnknownReplaceableId(u32),

    #[error("texture {0} not found in hierarchy")]
    Missing(String),

    #[error("texture {name} could not be decoded: {source}")]
    Decode {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, ModelError>;
