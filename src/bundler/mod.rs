//! Size estimation and size-bounded bundling
//!
//! [`plan_bundles`] splits a job's [`FileGroup`]s into [`PackagedBundle`]s whose byte
//! totals stay within a limit. The [`Packager`] then hands each bundle to an
//! [`Archiver`], one after another, checking for cancellation in between.

mod archiver;
mod packager;

pub use archiver::{ArchiveEntry, ArchiveOutcome, ArchiveRequest, Archiver, ZipArchiver};
pub use packager::Packager;

use crate::error::{Error, Result};
use crate::model::{FileGroup, FileInfo};
use crate::types::{BundleProgress, BundleState};
use serde::{Deserialize, Serialize};

/// Result of a stat-only size estimate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeReport {
    /// Sum of all file sizes
    pub total_bytes: u64,
    /// Number of files
    pub total_files: usize,
    /// Number of non-empty groups
    pub groups: usize,
}

/// Estimate the size of a job from the sizes the query layer reported
pub fn estimate(groups: &[FileGroup]) -> SizeReport {
    groups
        .iter()
        .filter(|g| !g.is_empty())
        .fold(SizeReport::default(), |mut report, group| {
            report.total_bytes = report.total_bytes.saturating_add(group.size_bytes());
            report.total_files += group.files().len();
            report.groups += 1;
            report
        })
}

/// Give remote files that report 0 bytes an assumed size
///
/// Remote sizes are often unknown until download; without this a job full of URLs would
/// estimate as empty and always classify small.
pub fn resolve_url_sizes(groups: Vec<FileGroup>, default_url_bytes: u64) -> Vec<FileGroup> {
    groups
        .into_iter()
        .map(|group| {
            if group.files().iter().any(|f| f.is_url() && f.size_bytes == 0) {
                group.map_sizes(|f| {
                    if f.is_url() && f.size_bytes == 0 {
                        default_url_bytes
                    } else {
                        f.size_bytes
                    }
                })
            } else {
                group
            }
        })
        .collect()
}

/// Position of one file within the job's groups
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// Index into the group list
    pub group: usize,
    /// Index into that group's files
    pub file: usize,
}

/// A size-bounded subset of a job's files, archived as one unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedBundle {
    /// Zero-based index
    pub index: usize,
    /// Files in the bundle, in query order
    pub entries: Vec<BundleEntry>,
    /// Planned size
    pub total_bytes: u64,
    /// Build state
    pub state: BundleState,
    /// Bytes written by the archiver
    pub processed_bytes: u64,
    /// Retrieval URL once built
    pub url: Option<String>,
}

impl PackagedBundle {
    fn new(index: usize, entries: Vec<BundleEntry>, total_bytes: u64) -> Self {
        Self {
            index,
            entries,
            total_bytes,
            state: BundleState::Waiting,
            processed_bytes: 0,
            url: None,
        }
    }

    /// Resolve entries against the groups they were planned from
    pub fn files<'a>(
        &'a self,
        groups: &'a [FileGroup],
    ) -> impl Iterator<Item = (&'a FileGroup, &'a FileInfo)> + 'a {
        self.entries.iter().filter_map(move |entry| {
            let group = groups.get(entry.group)?;
            group.files().get(entry.file).map(|file| (group, file))
        })
    }

    /// Progress record for the status snapshot
    pub fn progress(&self) -> BundleProgress {
        BundleProgress {
            index: self.index,
            total_files: self.entries.len(),
            total_bytes: self.total_bytes,
            processed_bytes: self.processed_bytes,
            url: self.url.clone(),
            state: self.state,
        }
    }
}

/// Split groups into bundles of at most `max_bytes` each
///
/// Greedy in query order. A unit is one file, or a whole group when the group is marked
/// `package_together`. A unit is never split: when it does not fit in the current bundle
/// the bundle is closed and the unit starts a new one, so a unit larger than
/// `max_bytes` ends up in a bundle of its own. Empty groups are skipped.
pub fn plan_bundles(groups: &[FileGroup], max_bytes: u64) -> Result<Vec<PackagedBundle>> {
    if max_bytes == 0 {
        return Err(Error::Validation(
            "maximum bundle size must be greater than 0".into(),
        ));
    }
    if groups.iter().all(FileGroup::is_empty) {
        return Err(Error::Validation("no files to package".into()));
    }

    let mut bundles = Vec::new();
    let mut current: Vec<BundleEntry> = Vec::new();
    let mut current_bytes = 0u64;

    for (group_index, group) in groups.iter().enumerate() {
        let units: Vec<(Vec<BundleEntry>, u64)> = if group.package_together() {
            let entries = (0..group.files().len())
                .map(|file| BundleEntry {
                    group: group_index,
                    file,
                })
                .collect();
            vec![(entries, group.size_bytes())]
        } else {
            group
                .files()
                .iter()
                .enumerate()
                .map(|(file, info)| {
                    (
                        vec![BundleEntry {
                            group: group_index,
                            file,
                        }],
                        info.size_bytes,
                    )
                })
                .collect()
        };

        for (entries, bytes) in units {
            if entries.is_empty() {
                continue;
            }
            if !current.is_empty() && current_bytes.saturating_add(bytes) > max_bytes {
                let index = bundles.len();
                bundles.push(PackagedBundle::new(
                    index,
                    std::mem::take(&mut current),
                    current_bytes,
                ));
                current_bytes = 0;
            }
            current.extend(entries);
            current_bytes = current_bytes.saturating_add(bytes);
        }
    }

    if !current.is_empty() {
        let index = bundles.len();
        bundles.push(PackagedBundle::new(index, current, current_bytes));
    }

    Ok(bundles)
}

/// Suggested download name: `{base}.zip`, or `{base}-part{n}.zip` for multi-bundle jobs
pub fn archive_name(base_file_name: &str, index: usize, bundle_count: usize) -> String {
    if bundle_count > 1 {
        format!("{base_file_name}-part{}.zip", index + 1)
    } else {
        format!("{base_file_name}.zip")
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1_000_000;

    fn files(sizes: &[u64]) -> Vec<FileInfo> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| FileInfo::new(format!("f{i}"), format!("f{i}"), *size))
            .collect()
    }

    fn sizes(bundles: &[PackagedBundle]) -> Vec<u64> {
        bundles.iter().map(|b| b.total_bytes).collect()
    }

    #[test]
    fn three_files_with_tight_limit_make_three_bundles() {
        let groups = vec![FileGroup::new(files(&[4 * MB, 4 * MB, 2 * MB]))];
        let bundles = plan_bundles(&groups, 4 * MB).unwrap();
        assert_eq!(sizes(&bundles), vec![4 * MB, 4 * MB, 2 * MB]);
    }

    #[test]
    fn oversized_single_file_gets_its_own_bundle() {
        let groups = vec![FileGroup::new(files(&[MB, 6 * MB, MB]))];
        let bundles = plan_bundles(&groups, 4 * MB).unwrap();
        assert_eq!(sizes(&bundles), vec![MB, 6 * MB, MB]);
        assert_eq!(bundles[1].entries.len(), 1);
    }

    #[test]
    fn small_files_are_packed_greedily() {
        let groups = vec![
            FileGroup::new(files(&[MB, MB])),
            FileGroup::new(files(&[MB, 2 * MB])),
        ];
        let bundles = plan_bundles(&groups, 3 * MB).unwrap();
        assert_eq!(sizes(&bundles), vec![3 * MB, 2 * MB]);
        assert_eq!(bundles[0].entries[2], BundleEntry { group: 1, file: 0 });
        assert_eq!(
            bundles.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn package_together_group_is_never_split() {
        let groups = vec![
            FileGroup::new(files(&[MB])),
            FileGroup::new(files(&[2 * MB, 2 * MB, 2 * MB])).packaged_together(),
            FileGroup::new(files(&[MB])),
        ];
        let bundles = plan_bundles(&groups, 4 * MB).unwrap();
        assert_eq!(sizes(&bundles), vec![MB, 6 * MB, MB]);
        assert!(bundles[1].entries.iter().all(|e| e.group == 1));
    }

    #[test]
    fn bundle_sizes_sum_to_group_sizes() {
        let groups = vec![
            FileGroup::new(files(&[3, 9, 1, 7, 7, 2])),
            FileGroup::new(vec![]),
            FileGroup::new(files(&[11, 4])).packaged_together(),
        ];
        let total: u64 = groups.iter().map(FileGroup::size_bytes).sum();
        for limit in [1, 5, 10, 15, 100] {
            let bundles = plan_bundles(&groups, limit).unwrap();
            assert_eq!(bundles.iter().map(|b| b.total_bytes).sum::<u64>(), total);
            for bundle in &bundles {
                let excepted = bundle.entries.len() == 1
                    || bundle.entries.iter().all(|e| e.group == 2);
                assert!(
                    bundle.total_bytes <= limit || excepted,
                    "bundle {} of {} bytes exceeds limit {limit} without an exception",
                    bundle.index,
                    bundle.total_bytes
                );
            }
            let file_count: usize = bundles.iter().map(|b| b.entries.len()).sum();
            assert_eq!(file_count, 8, "every file is planned exactly once");
        }
    }

    #[test]
    fn zero_limit_and_empty_input_are_validation_errors() {
        let groups = vec![FileGroup::new(files(&[1]))];
        assert!(matches!(plan_bundles(&groups, 0), Err(Error::Validation(_))));
        assert!(matches!(plan_bundles(&[], 10), Err(Error::Validation(_))));
        assert!(matches!(
            plan_bundles(&[FileGroup::new(vec![])], 10),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn estimate_counts_non_empty_groups() {
        let groups = vec![
            FileGroup::new(files(&[5, 5])),
            FileGroup::new(vec![]),
            FileGroup::new(files(&[1])),
        ];
        assert_eq!(
            estimate(&groups),
            SizeReport {
                total_bytes: 11,
                total_files: 3,
                groups: 2
            }
        );
    }

    #[test]
    fn unknown_url_sizes_get_the_default() {
        let groups = vec![FileGroup::new(vec![
            FileInfo::new("https://irsa.example/a.fits", "a.fits", 0),
            FileInfo::new("https://irsa.example/b.fits", "b.fits", 7),
            FileInfo::new("local.fits", "local.fits", 0),
        ])];
        let resolved = resolve_url_sizes(groups, 100);
        let sizes: Vec<u64> = resolved[0].files().iter().map(|f| f.size_bytes).collect();
        assert_eq!(sizes, vec![100, 7, 0]);
        assert_eq!(resolved[0].size_bytes(), 107);
    }

    #[test]
    fn archive_names_number_parts_only_when_split() {
        assert_eq!(archive_name("m31", 0, 1), "m31.zip");
        assert_eq!(archive_name("m31", 0, 3), "m31-part1.zip");
        assert_eq!(archive_name("m31", 2, 3), "m31-part3.zip");
    }

    #[test]
    fn files_resolves_entries_against_groups() {
        let groups = vec![FileGroup::new(files(&[1, 2]))];
        let bundles = plan_bundles(&groups, 10).unwrap();
        let names: Vec<&str> = bundles[0]
            .files(&groups)
            .map(|(_, f)| f.external_name.as_str())
            .collect();
        assert_eq!(names, vec!["f0", "f1"]);
        assert_eq!(bundles[0].progress().total_files, 2);
    }
}
