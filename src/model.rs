//! File model handed over by the query collaborator

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One file of a result set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Where the file lives: a local path or a URL
    pub internal_name: String,
    /// Path of the entry inside the archive
    pub external_name: String,
    /// Size in bytes as reported by the query layer
    pub size_bytes: u64,
    /// Whether the requester may receive this file
    pub access_allowed: bool,
}

impl FileInfo {
    /// A readable file with the given location, archive name and size
    pub fn new(
        internal_name: impl Into<String>,
        external_name: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            internal_name: internal_name.into(),
            external_name: external_name.into(),
            size_bytes,
            access_allowed: true,
        }
    }

    /// Mark the file as not accessible to the requester
    pub fn denied(mut self) -> Self {
        self.access_allowed = false;
        self
    }

    /// Internal name points at a remote resource
    pub fn is_url(&self) -> bool {
        self.internal_name.contains("://")
    }
}

/// A set of files that share a base directory and description
///
/// The aggregate size is computed from the files, so it always equals their sum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileGroup {
    files: Vec<FileInfo>,
    base_dir: Option<PathBuf>,
    description: String,
    package_together: bool,
    size_bytes: u64,
}

impl FileGroup {
    /// Group the files; sizes are summed here
    pub fn new(files: Vec<FileInfo>) -> Self {
        let size_bytes = files.iter().map(|f| f.size_bytes).sum();
        Self {
            files,
            base_dir: None,
            description: String::new(),
            package_together: false,
            size_bytes,
        }
    }

    /// Resolve relative internal names against this directory
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Human-readable description of the group
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Keep every file of the group in the same bundle
    pub fn packaged_together(mut self) -> Self {
        self.package_together = true;
        self
    }

    /// Files in query order
    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    /// Base directory, if any
    pub fn base_dir(&self) -> Option<&PathBuf> {
        self.base_dir.as_ref()
    }

    /// Description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the group must not be split across bundles
    pub fn package_together(&self) -> bool {
        self.package_together
    }

    /// Sum of file sizes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// True when the group has no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Local path of a file: absolute internal names as-is, relative ones under `base_dir`
    pub fn local_path(&self, file: &FileInfo) -> PathBuf {
        let path = PathBuf::from(&file.internal_name);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    /// Rebuild the group with per-file sizes replaced by `f`
    pub(crate) fn map_sizes(self, f: impl Fn(&FileInfo) -> u64) -> Self {
        let files = self
            .files
            .into_iter()
            .map(|mut file| {
                file.size_bytes = f(&file);
                file
            })
            .collect();
        Self {
            base_dir: self.base_dir,
            description: self.description,
            package_together: self.package_together,
            ..FileGroup::new(files)
        }
    }
}
