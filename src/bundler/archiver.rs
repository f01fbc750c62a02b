use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::types::JobId;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

/// Name of the notes file written into archives that skipped files
pub const README_NAME: &str = "README.txt";

/// One file to put into an archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Local path, or the URL for remote files
    pub source: PathBuf,
    /// Internal name is a URL
    pub remote: bool,
    /// Path of the entry inside the archive
    pub archive_path: String,
    /// Size reported by the query layer
    pub size_bytes: u64,
}

/// Everything an [`Archiver`] needs to build one bundle
#[derive(Clone, Debug)]
pub struct ArchiveRequest {
    /// Owning job
    pub job_id: JobId,
    /// Zero-based bundle index
    pub bundle_index: usize,
    /// Suggested download name (e.g. `m31-part2.zip`)
    pub archive_name: String,
    /// Files the requester may receive
    pub entries: Vec<ArchiveEntry>,
    /// Archive names of files withheld because access was denied
    pub denied: Vec<String>,
}

/// What an [`Archiver`] produced for one bundle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveOutcome {
    /// Where the archive can be fetched
    pub url: String,
    /// Source bytes copied into the archive
    pub bytes_written: u64,
    /// Files that could not be read, with the reason
    pub failed: Vec<String>,
}

/// Writes one bundle as an archive and publishes it
///
/// Returning `Err` fails only this bundle; the job continues with the next one.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Build the archive for `request`
    async fn build(&self, request: ArchiveRequest) -> Result<ArchiveOutcome>;

    /// Publish the only file of a one-file job
    ///
    /// `request` holds exactly one entry. The default builds a regular archive;
    /// implementations may publish the file as-is instead.
    async fn stage_single(&self, request: ArchiveRequest) -> Result<ArchiveOutcome> {
        self.build(request).await
    }
}

/// [`Archiver`] that writes deflate ZIP files into a staging directory
///
/// Archives are stored as `{job_id}_{bundle_index}.zip` and addressed as
/// `{public_base_url}{job_id}_{bundle_index}.zip?name={archive_name}`. Remote entries
/// are downloaded into the staging directory first; a download that fails counts as
/// an unreadable file. One-file jobs are copied unzipped to `{job_id}_{file_name}`.
pub struct ZipArchiver {
    staging_dir: PathBuf,
    public_base_url: url::Url,
    client: reqwest::Client,
    fetch_timeout: Duration,
}

impl ZipArchiver {
    /// Create an archiver writing into `staging_dir`
    pub fn new(staging_dir: impl Into<PathBuf>, public_base_url: &str) -> Result<Self> {
        let mut base = public_base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let public_base_url = url::Url::parse(&base).map_err(|e| Error::Config {
            message: format!("invalid public_base_url: {e}"),
            key: Some("archive.public_base_url".to_string()),
        })?;
        Ok(Self {
            staging_dir: staging_dir.into(),
            public_base_url,
            client: reqwest::Client::new(),
            fetch_timeout: ArchiveConfig::default().fetch_timeout,
        })
    }

    /// Create an archiver from the `archive` config section
    pub fn from_config(config: &ArchiveConfig) -> Result<Self> {
        Ok(Self::new(&config.staging_dir, &config.public_base_url)?
            .with_fetch_timeout(config.fetch_timeout))
    }

    /// Limit the time spent downloading one remote file
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Path the archive for a bundle is written to
    pub fn archive_path(&self, job_id: &JobId, bundle_index: usize) -> PathBuf {
        self.staging_dir.join(archive_file(job_id, bundle_index))
    }

    fn url_for(&self, staged_name: &str, download_name: &str) -> Result<String> {
        let mut url = self
            .public_base_url
            .join(&urlencoding::encode(staged_name))
            .map_err(|e| Error::Archive(format!("cannot build archive url: {e}")))?;
        url.set_query(Some(&format!(
            "name={}",
            urlencoding::encode(download_name)
        )));
        Ok(url.to_string())
    }

    // streams one remote file to `target`, returning the bytes received
    async fn fetch(&self, url: &str, target: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(target).await?;
        let mut received = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(%url, bytes = received, "remote file fetched");
        Ok(received)
    }

    // downloads remote entries next to the archive; failed downloads go to `failed`
    async fn localize(
        &self,
        request: &ArchiveRequest,
        entries: Vec<ArchiveEntry>,
        failed: &mut Vec<String>,
        fetched: &mut Vec<PathBuf>,
    ) -> Vec<ArchiveEntry> {
        let mut local = Vec::with_capacity(entries.len());
        for (n, mut entry) in entries.into_iter().enumerate() {
            if entry.remote {
                let url = entry.source.to_string_lossy().into_owned();
                let target = self.staging_dir.join(format!(
                    "{}_{}.fetch{n}",
                    request.job_id, request.bundle_index
                ));
                match self.fetch(&url, &target).await {
                    Ok(_) => {
                        fetched.push(target.clone());
                        entry.source = target;
                        entry.remote = false;
                    }
                    Err(e) => {
                        warn!(job_id = %request.job_id, %url, error = %e, "remote file could not be fetched");
                        tokio::fs::remove_file(&target).await.ok();
                        failed.push(format!("{}: {e}", sanitize_entry_name(&entry.archive_path)));
                        continue;
                    }
                }
            }
            local.push(entry);
        }
        local
    }
}

#[async_trait]
impl Archiver for ZipArchiver {
    async fn build(&self, request: ArchiveRequest) -> Result<ArchiveOutcome> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;

        let path = self.archive_path(&request.job_id, request.bundle_index);
        let url = self.url_for(
            &archive_file(&request.job_id, request.bundle_index),
            &request.archive_name,
        )?;
        debug!(
            job_id = %request.job_id,
            bundle = request.bundle_index,
            ?path,
            files = request.entries.len(),
            "writing zip archive"
        );

        let total = request.entries.len();
        let mut failed = Vec::new();
        let mut fetched = Vec::new();
        let entries = self
            .localize(&request, request.entries.clone(), &mut failed, &mut fetched)
            .await;

        let denied = request.denied.clone();
        let target = path.clone();
        let written =
            spawn_blocking(move || write_zip(&target, &entries, &denied, failed, total)).await;
        for temp in &fetched {
            tokio::fs::remove_file(temp).await.ok();
        }
        let (bytes_written, failed) =
            written.map_err(|e| Error::Archive(format!("archive task panicked: {e}")))??;

        info!(
            job_id = %request.job_id,
            bundle = request.bundle_index,
            bytes = bytes_written,
            failed = failed.len(),
            "zip archive written"
        );

        Ok(ArchiveOutcome {
            url,
            bytes_written,
            failed,
        })
    }

    async fn stage_single(&self, request: ArchiveRequest) -> Result<ArchiveOutcome> {
        let Some(entry) = request.entries.first() else {
            return Err(Error::Archive("no file to stage".into()));
        };
        tokio::fs::create_dir_all(&self.staging_dir).await?;

        let file_name = single_file_name(&entry.archive_path);
        let staged_name = format!("{}_{file_name}", request.job_id);
        let target = self.staging_dir.join(&staged_name);

        let copied = if entry.remote {
            self.fetch(&entry.source.to_string_lossy(), &target).await
        } else {
            copy_regular_file(&entry.source, &target).await
        };
        let bytes_written = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                tokio::fs::remove_file(&target).await.ok();
                return Err(e);
            }
        };

        info!(
            job_id = %request.job_id,
            file = %file_name,
            bytes = bytes_written,
            "one file not zipped"
        );
        Ok(ArchiveOutcome {
            url: self.url_for(&staged_name, &file_name)?,
            bytes_written,
            failed: Vec::new(),
        })
    }
}

fn archive_file(job_id: &JobId, bundle_index: usize) -> String {
    format!("{job_id}_{bundle_index}.zip")
}

// a one-file job is staged flat, so the entry path collapses into the file name
fn single_file_name(archive_path: &str) -> String {
    let flat = sanitize_entry_name(archive_path).replace('/', "_");
    if flat.is_empty() { "file".to_string() } else { flat }
}

fn open_regular_file(path: &Path) -> std::io::Result<File> {
    let file = File::open(path)?;
    if !file.metadata()?.is_file() {
        return Err(std::io::Error::other("not a regular file"));
    }
    Ok(file)
}

async fn copy_regular_file(source: &Path, target: &Path) -> Result<u64> {
    if !tokio::fs::metadata(source).await?.is_file() {
        return Err(Error::Archive(format!(
            "{} is not a regular file",
            source.display()
        )));
    }
    Ok(tokio::fs::copy(source, target).await?)
}

// the partial archive is removed whenever the bundle fails
fn write_zip(
    path: &Path,
    entries: &[ArchiveEntry],
    denied: &[String],
    mut failed: Vec<String>,
    total: usize,
) -> Result<(u64, Vec<String>)> {
    match fill_zip(path, entries, denied, &mut failed, total) {
        Ok(bytes_written) => Ok((bytes_written, failed)),
        Err(e) => {
            std::fs::remove_file(path).ok();
            Err(e)
        }
    }
}

fn fill_zip(
    path: &Path,
    entries: &[ArchiveEntry],
    denied: &[String],
    failed: &mut Vec<String>,
    total: usize,
) -> Result<u64> {
    let file = File::create(path)?;
    let mut writer = zip::ZipWriter::new(BufWriter::new(file));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut names = HashSet::new();
    let mut written_files = 0usize;
    let mut bytes_written = 0u64;

    for entry in entries {
        let name = sanitize_entry_name(&entry.archive_path);
        if entry.remote {
            failed.push(format!("{name}: remote file was not fetched"));
            continue;
        }
        if name.is_empty() || names.contains(&name) {
            failed.push(format!("{name}: duplicate or empty entry name"));
            continue;
        }
        let mut source = match open_regular_file(&entry.source) {
            Ok(source) => source,
            Err(e) => {
                failed.push(format!("{name}: {e}"));
                continue;
            }
        };
        writer.start_file(name.as_str(), options)?;
        names.insert(name.clone());
        match std::io::copy(&mut source, &mut writer) {
            Ok(copied) => {
                bytes_written += copied;
                written_files += 1;
            }
            // zip 0.6 cannot drop a started entry, so it stays truncated and is reported
            Err(e) => failed.push(format!("{name}: read failed, archive copy is incomplete: {e}")),
        }
    }

    if written_files == 0 {
        return Err(Error::Archive(format!(
            "none of the {total} files could be packaged"
        )));
    }

    if !failed.is_empty() || !denied.is_empty() {
        writer.start_file(README_NAME, options)?;
        writer.write_all(readme(failed, denied).as_bytes())?;
    }

    let mut inner = writer.finish()?;
    inner.flush()?;
    Ok(bytes_written)
}

fn readme(failed: &[String], denied: &[String]) -> String {
    let mut text = String::from("Some requested files are not included in this archive.\n");
    if !denied.is_empty() {
        text.push_str(&format!("\nAccess denied ({}):\n", denied.len()));
        for name in denied {
            text.push_str(&format!("  {name}\n"));
        }
    }
    if !failed.is_empty() {
        text.push_str(&format!("\nCould not be packaged ({}):\n", failed.len()));
        for line in failed {
            text.push_str(&format!("  {line}\n"));
        }
    }
    text
}

// keeps entries inside the archive root
fn sanitize_entry_name(name: &str) -> String {
    name.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect::<Vec<_>>()
        .join("/")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote(url: &str, name: &str) -> ArchiveEntry {
        ArchiveEntry {
            source: PathBuf::from(url),
            remote: true,
            archive_path: name.to_string(),
            size_bytes: 0,
        }
    }

    fn zip_names(path: &Path) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn entry(source: &Path, name: &str) -> ArchiveEntry {
        ArchiveEntry {
            source: source.to_path_buf(),
            remote: false,
            archive_path: name.to_string(),
            size_bytes: 0,
        }
    }

    fn request(entries: Vec<ArchiveEntry>, denied: Vec<String>) -> ArchiveRequest {
        ArchiveRequest {
            job_id: JobId::from("pkg_test"),
            bundle_index: 1,
            archive_name: "m31 images-part2.zip".into(),
            entries,
            denied,
        }
    }

    #[tokio::test]
    async fn writes_zip_with_entries_and_url() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(src.path().join("b.txt"), b"world!").unwrap();

        let archiver = ZipArchiver::new(staging.path(), "http://files.local/stage").unwrap();
        let outcome = archiver
            .build(request(
                vec![
                    entry(&src.path().join("a.txt"), "dir/a.txt"),
                    entry(&src.path().join("b.txt"), "/b.txt"),
                ],
                vec![],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 11);
        assert!(outcome.failed.is_empty());
        assert_eq!(
            outcome.url,
            "http://files.local/stage/pkg_test_1.zip?name=m31%20images-part2.zip"
        );

        let file = File::open(staging.path().join("pkg_test_1.zip")).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert_eq!(zip.len(), 2, "no README when nothing was skipped");
        let mut contents = String::new();
        zip.by_name("dir/a.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello");
        assert!(zip.by_name("b.txt").is_ok(), "leading slash is stripped");
    }

    #[tokio::test]
    async fn unreadable_and_denied_files_are_listed_in_readme() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        std::fs::write(src.path().join("ok.txt"), b"ok").unwrap();

        let archiver = ZipArchiver::new(staging.path(), "http://files.local/").unwrap();
        let outcome = archiver
            .build(request(
                vec![
                    entry(&src.path().join("ok.txt"), "ok.txt"),
                    entry(&src.path().join("missing.txt"), "missing.txt"),
                ],
                vec!["secret.fits".into()],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].starts_with("missing.txt"));

        let file = File::open(staging.path().join("pkg_test_1.zip")).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut readme = String::new();
        zip.by_name(README_NAME)
            .unwrap()
            .read_to_string(&mut readme)
            .unwrap();
        assert!(readme.contains("secret.fits"));
        assert!(readme.contains("missing.txt"));
    }

    #[tokio::test]
    async fn bundle_with_no_readable_files_fails_and_leaves_no_archive() {
        let staging = tempdir().unwrap();
        let archiver = ZipArchiver::new(staging.path(), "http://files.local/").unwrap();
        let result = archiver
            .build(request(
                vec![entry(Path::new("/definitely/not/here.txt"), "here.txt")],
                vec![],
            ))
            .await;

        assert!(matches!(result, Err(Error::Archive(_))), "got {result:?}");
        assert!(!archiver.archive_path(&JobId::from("pkg_test"), 1).exists());
    }

    #[tokio::test]
    async fn directory_entry_is_a_failed_file_not_a_failed_bundle() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        std::fs::write(src.path().join("ok.txt"), b"ok").unwrap();
        std::fs::create_dir(src.path().join("frames")).unwrap();

        let archiver = ZipArchiver::new(staging.path(), "http://files.local/").unwrap();
        let outcome = archiver
            .build(request(
                vec![
                    entry(&src.path().join("ok.txt"), "ok.txt"),
                    entry(&src.path().join("frames"), "frames"),
                ],
                vec![],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 2);
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].starts_with("frames: "));
        assert_eq!(
            zip_names(&staging.path().join("pkg_test_1.zip")),
            vec!["ok.txt", README_NAME]
        );
    }

    #[tokio::test]
    async fn bundle_of_directories_fails_without_leaving_an_archive() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        std::fs::create_dir(src.path().join("a")).unwrap();

        let archiver = ZipArchiver::new(staging.path(), "http://files.local/").unwrap();
        let result = archiver
            .build(request(vec![entry(&src.path().join("a"), "a")], vec![]))
            .await;

        assert!(matches!(result, Err(Error::Archive(_))), "got {result:?}");
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn remote_entries_are_downloaded_into_the_archive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/frames/w1.fits"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"SIMPLE".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/frames/gone.fits"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let staging = tempdir().unwrap();
        let archiver = ZipArchiver::new(staging.path(), "http://files.local/").unwrap();
        let outcome = archiver
            .build(request(
                vec![
                    remote(&format!("{}/frames/w1.fits", server.uri()), "w1.fits"),
                    remote(&format!("{}/frames/gone.fits", server.uri()), "gone.fits"),
                ],
                vec![],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 6);
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].starts_with("gone.fits: "));

        let archive = staging.path().join("pkg_test_1.zip");
        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut contents = String::new();
        zip.by_name("w1.fits")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "SIMPLE");
        let leftovers: Vec<_> = std::fs::read_dir(staging.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("pkg_test_1.zip")]);
    }

    #[tokio::test]
    async fn single_local_file_is_staged_unzipped() {
        let src = tempdir().unwrap();
        let staging = tempdir().unwrap();
        std::fs::write(src.path().join("frame.fits"), b"SIMPLE = T").unwrap();

        let archiver = ZipArchiver::new(staging.path(), "http://files.local/stage").unwrap();
        let outcome = archiver
            .stage_single(request(
                vec![entry(&src.path().join("frame.fits"), "l1b/frame.fits")],
                vec![],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 10);
        assert_eq!(
            outcome.url,
            "http://files.local/stage/pkg_test_l1b_frame.fits?name=l1b_frame.fits"
        );
        let staged = std::fs::read(staging.path().join("pkg_test_l1b_frame.fits")).unwrap();
        assert_eq!(staged, b"SIMPLE = T");
    }

    #[tokio::test]
    async fn single_remote_file_is_downloaded_to_staging() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w1.fits"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote".to_vec()))
            .mount(&server)
            .await;

        let staging = tempdir().unwrap();
        let archiver = ZipArchiver::new(staging.path(), "http://files.local/").unwrap();
        let outcome = archiver
            .stage_single(request(
                vec![remote(&format!("{}/w1.fits", server.uri()), "w1.fits")],
                vec![],
            ))
            .await
            .unwrap();

        assert!(outcome.url.ends_with("/pkg_test_w1.fits?name=w1.fits"));
        assert_eq!(
            std::fs::read(staging.path().join("pkg_test_w1.fits")).unwrap(),
            b"remote"
        );
    }

    #[tokio::test]
    async fn failed_single_download_leaves_nothing_staged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let staging = tempdir().unwrap();
        let archiver = ZipArchiver::new(staging.path(), "http://files.local/").unwrap();
        let result = archiver
            .stage_single(request(
                vec![remote(&format!("{}/w1.fits", server.uri()), "w1.fits")],
                vec![],
            ))
            .await;

        assert!(matches!(result, Err(Error::Network(_))), "got {result:?}");
        assert!(!staging.path().join("pkg_test_w1.fits").exists());
    }

    #[test]
    fn entry_names_cannot_escape_archive_root() {
        assert_eq!(sanitize_entry_name("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_entry_name("a\\b\\c.txt"), "a/b/c.txt");
        assert_eq!(sanitize_entry_name("./x//y"), "x/y");
    }
}
