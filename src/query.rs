//! Seam to the query layer that enumerates a request's files

use crate::error::Result;
use crate::model::FileGroup;
use crate::types::DownloadRequest;
use async_trait::async_trait;

/// Turns a request into the groups of files it selects
///
/// Implementations run the search described by `request.search_parameters` against
/// `request.data_source`. An `Err` fails the job before admission.
#[async_trait]
pub trait FileGroupProcessor: Send + Sync {
    /// Enumerate the files selected by the request
    async fn file_groups(&self, request: &DownloadRequest) -> Result<Vec<FileGroup>>;
}

/// Processor that always returns the same groups
///
/// Useful for embedding a fixed file list and in tests.
pub struct StaticFileGroups {
    groups: Vec<FileGroup>,
}

impl StaticFileGroups {
    /// Serve these groups for every request
    pub fn new(groups: Vec<FileGroup>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl FileGroupProcessor for StaticFileGroups {
    async fn file_groups(&self, _request: &DownloadRequest) -> Result<Vec<FileGroup>> {
        Ok(self.groups.clone())
    }
}
