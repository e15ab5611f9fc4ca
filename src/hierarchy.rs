//! The virtual file system seam.
//!
//! Game archives, loose folders and mod overrides are merged by the editor into
//! one "hierarchy" that maps logical asset paths to bytes. This crate only needs
//! `open_file` and `file_exists`; two small implementations are provided.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::error::HierarchyError;

pub trait Hierarchy {
    fn open_file(&self, path: &Path) -> Result<Vec<u8>, HierarchyError>;

    fn file_exists(&self, path: &Path) -> bool;
}

/// Logical paths use either separator and ignore case, like the game archives do.
pub fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

/// Serves files from a directory on disk, `./assets` by default.
#[derive(Clone, Debug)]
pub struct DirectoryHierarchy {
    root: PathBuf,
}

impl DirectoryHierarchy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        let relative = path.to_string_lossy().replace('\\', "/");
        self.root.join(relative)
    }
}

impl Default for DirectoryHierarchy {
    fn default() -> Self {
        Self::new(Path::new("./").join("assets"))
    }
}

impl Hierarchy for DirectoryHierarchy {
    fn open_file(&self, path: &Path) -> Result<Vec<u8>, HierarchyError> {
        let full = self.resolve(path);
        std::fs::read(&full).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => HierarchyError::NotFound(path.to_path_buf()),
            _ => HierarchyError::Io {
                path: full,
                source,
            },
        })
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }
}

/// An in-memory hierarchy, handy for embedding generated assets and for tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryHierarchy {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, data: Vec<u8>) {
        self.files.insert(normalize(path.as_ref()), data);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Hierarchy for MemoryHierarchy {
    fn open_file(&self, path: &Path) -> Result<Vec<u8>, HierarchyError> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| HierarchyError::NotFound(path.to_path_buf()))
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize(path))
    }
}
