//! On-disk fixtures and service builders

use data_packager::{Config, DownloadRequest, FileGroup, FileInfo, PackagingService, StaticFileGroups};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Data and staging directories that live as long as the test
pub struct Workspace {
    /// Source files, one subdirectory per group
    pub data: TempDir,
    /// Where the zip archiver writes bundles
    pub staging: TempDir,
}

impl Workspace {
    /// Fresh empty workspace
    pub fn new() -> Self {
        Self {
            data: tempfile::tempdir().expect("failed to create data dir"),
            staging: tempfile::tempdir().expect("failed to create staging dir"),
        }
    }

    /// Write `count` files of `size` bytes under `group/` and describe them as a group
    pub fn group(&self, group: &str, count: usize, size: usize) -> FileGroup {
        let dir = self.data.path().join(group);
        std::fs::create_dir_all(&dir).expect("failed to create group dir");
        let files = (0..count)
            .map(|i| {
                let name = format!("frame_{i}.fits");
                let content = vec![b'a' + (i % 26) as u8; size];
                std::fs::write(dir.join(&name), content).expect("failed to write fixture");
                FileInfo::new(name.clone(), format!("{group}/{name}"), size as u64)
            })
            .collect();
        FileGroup::new(files).with_base_dir(dir)
    }
}

/// Config writing into `staging` with budgets small enough to exercise queueing
pub fn e2e_config(staging: &Path) -> Config {
    let mut config = Config::default();
    config.packaging.max_jobs = 2;
    config.packaging.max_large_jobs = 1;
    config.packaging.default_max_bundle_bytes = 1024;
    config.packaging.immediate_wait = Duration::from_secs(2);
    config.packaging.shutdown_timeout = Duration::from_secs(5);
    config.archive.staging_dir = staging.to_path_buf();
    config.archive.public_base_url = "http://127.0.0.1:8642/staging/".to_string();
    config
}

/// Service over a fixed set of groups using the zip archiver
pub fn zip_service(config: Config, groups: Vec<FileGroup>) -> Arc<PackagingService> {
    let query = Arc::new(StaticFileGroups::new(groups));
    Arc::new(PackagingService::with_zip_archiver(config, query).expect("failed to create service"))
}

/// A request for the "m31" base name
pub fn m31_request(email: Option<&str>) -> DownloadRequest {
    DownloadRequest {
        base_file_name: "m31".into(),
        title: "M31 cutouts".into(),
        email: email.map(str::to_string),
        data_source: "wise".into(),
        ..Default::default()
    }
}
