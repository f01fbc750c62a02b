//! Wait helpers and archive assertions

use data_packager::{JobId, JobStatus, PackagingService};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Poll until the job is terminal; `None` on timeout
pub async fn wait_for_terminal(
    service: &PackagingService,
    id: &JobId,
    timeout: Duration,
) -> Option<JobStatus> {
    tokio::time::timeout(timeout, async {
        loop {
            if let Ok(status) = service.status(id).await {
                if status.is_terminal() {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .ok()
}

/// Entry names and contents of a zip file, in archive order
pub fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
    let file = std::fs::File::open(path).expect("archive should exist");
    let mut archive = zip::ZipArchive::new(file).expect("archive should be a valid zip");
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).expect("entry should be readable");
            let mut content = Vec::new();
            entry.read_to_end(&mut content).expect("entry should decompress");
            (entry.name().to_string(), content)
        })
        .collect()
}

/// Path component of a bundle URL, relative to the staging mount
pub fn staging_file(url: &str) -> String {
    let parsed = url::Url::parse(url).expect("bundle url should parse");
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .expect("bundle url should have a file name")
        .to_string()
}
