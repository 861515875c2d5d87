//! Integration tests for strata
//!
//! Multi-run scenarios against a real source tree, destination and state
//! database.

use ::strata::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// Test harness driving repeated runs over one source/destination pair
pub struct StrataTestHarness {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub file_generator: FileGenerator,
    runs: usize,
}

impl StrataTestHarness {
    /// Create a harness with an empty source directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let dest = temp_dir.path().join("dest");
        fs::create_dir_all(&source).unwrap();

        Self {
            temp_dir,
            source,
            dest,
            file_generator: FileGenerator::new(42),
            runs: 0,
        }
    }

    /// Write `content` to `relative` under the source, creating parents
    pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) {
        let path = self.source.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Remove `relative` from the source
    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.source.join(relative)).unwrap();
    }

    /// Run one backup with a unique, predictable timestamp
    pub fn run(&mut self) -> BackupReport {
        self.runs += 1;
        let timestamp = format!("2024-01-01_00-00-{:02}", self.runs);
        let config = BackupConfig::with_default_database(self.source.clone(), self.dest.clone());
        let report = BackupRunner::new(config)
            .workers(4)
            .timestamp_provider(Arc::new(FixedTimestamp(timestamp)))
            .run()
            .unwrap();
        info!("Run {} finished: {:?}", self.runs, report);
        report
    }

    pub fn live_root(&self) -> PathBuf {
        self.dest.join("backup")
    }

    pub fn history_root(&self) -> PathBuf {
        self.dest.join("deleted")
    }

    pub fn repository(&self) -> StateRepository {
        StateRepository::open(self.dest.join("backup.db"))
    }

    /// Snapshot directory names, sorted
    pub fn snapshots(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.history_root())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Relative path → content of every regular file under `root`
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Deterministic generator of file contents
pub struct FileGenerator {
    rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate somewhat realistic text content
    pub fn generate_file_content(&mut self, size_range: std::ops::Range<usize>) -> Vec<u8> {
        let size = self.rng.random_range(size_range);
        let mut content = Vec::with_capacity(size);

        let words = ["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "lorem", "ipsum"];
        while content.len() < size {
            let word = words[self.rng.random_range(0..words.len())];
            content.extend_from_slice(word.as_bytes());
            content.push(b' ');
        }

        content.truncate(size);
        content
    }

    /// Generate binary content
    pub fn generate_binary_content(&mut self, size: usize) -> Vec<u8> {
        let mut content = vec![0u8; size];
        self.rng.fill(&mut content[..]);
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_two_run_scenario() {
        let mut harness = StrataTestHarness::new();
        harness.write("file1.txt", "content1");
        harness.write("file2.txt", "content2");

        let first = harness.run();
        assert!(first.success);
        assert_eq!(first.files_added, 2);
        assert_eq!(
            read_tree(&harness.live_root()),
            BTreeMap::from([
                ("file1.txt".to_string(), b"content1".to_vec()),
                ("file2.txt".to_string(), b"content2".to_vec()),
            ])
        );
        assert!(harness.snapshots().is_empty());

        harness.write("file1.txt", "modified");
        harness.remove("file2.txt");
        harness.write("file3.txt", "new");

        let second = harness.run();
        assert!(second.success);
        assert_eq!(second.files_added, 1);
        assert_eq!(second.files_modified, 1);
        assert_eq!(second.files_deleted, 1);
        assert_eq!(
            read_tree(&harness.live_root()),
            BTreeMap::from([
                ("file1.txt".to_string(), b"modified".to_vec()),
                ("file3.txt".to_string(), b"new".to_vec()),
            ])
        );

        let snapshots = harness.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(
            read_tree(&harness.history_root().join(&snapshots[0])),
            BTreeMap::from([
                ("file1.txt".to_string(), b"content1".to_vec()),
                ("file2.txt".to_string(), b"content2".to_vec()),
            ])
        );

        let repository = harness.repository();
        assert_eq!(repository.get("file1.txt").unwrap().unwrap().status, ChangeType::Modified);
        assert_eq!(repository.get("file2.txt").unwrap().unwrap().status, ChangeType::Deleted);
        assert_eq!(repository.get("file3.txt").unwrap().unwrap().status, ChangeType::Added);
    }

    #[test]
    fn test_unchanged_files_are_not_touched() {
        let mut harness = StrataTestHarness::new();
        harness.write("docs/a.txt", "alpha");
        harness.write("b.bin", harness_binary(7));
        harness.run();

        // Push the live copies' mtimes into the past so any rewrite shows
        let past = FileTime::from_unix_time(1_000_000_000, 0);
        for key in ["docs/a.txt", "b.bin"] {
            filetime::set_file_mtime(harness.live_root().join(key), past).unwrap();
        }

        let second = harness.run();
        assert!(second.success);
        assert_eq!(second.files_unchanged, 2);
        assert!(!second.has_changes());
        assert!(harness.snapshots().is_empty());

        for key in ["docs/a.txt", "b.bin"] {
            let metadata = fs::metadata(harness.live_root().join(key)).unwrap();
            assert_eq!(FileTime::from_last_modification_time(&metadata), past, "{} rewritten", key);
        }

        let repository = harness.repository();
        let record = repository.get("docs/a.txt").unwrap().unwrap();
        assert_eq!(record.status, ChangeType::Unchanged);
        assert_eq!(record.last_updated, "2024-01-01_00-00-01");
    }

    fn harness_binary(seed: u64) -> Vec<u8> {
        FileGenerator::new(seed).generate_binary_content(64 * 1024)
    }

    #[test]
    fn test_touch_without_content_change_is_unchanged() {
        let mut harness = StrataTestHarness::new();
        harness.write("a.txt", "same");
        harness.run();

        let future = FileTime::from_unix_time(2_000_000_000, 0);
        filetime::set_file_mtime(harness.source.join("a.txt"), future).unwrap();

        let report = harness.run();
        assert_eq!(report.files_unchanged, 1);
        assert!(report.snapshot_dir.is_none());
    }

    #[test]
    fn test_deletion_is_idempotent() {
        let mut harness = StrataTestHarness::new();
        harness.write("nested/deep/gone.txt", "bye");
        harness.write("keep.txt", "stay");
        harness.run();

        harness.remove("nested/deep/gone.txt");
        let second = harness.run();
        assert_eq!(second.files_deleted, 1);
        assert_eq!(harness.snapshots().len(), 1);
        assert!(!harness.live_root().join("nested").exists());

        let record = harness.repository().get("nested/deep/gone.txt").unwrap().unwrap();
        let third = harness.run();
        assert!(third.success);
        assert_eq!(third.files_deleted, 0);
        assert_eq!(harness.snapshots().len(), 1);
        assert_eq!(harness.repository().get("nested/deep/gone.txt").unwrap().unwrap(), record);
    }

    #[test]
    fn test_each_run_gets_at_most_one_snapshot() {
        let mut harness = StrataTestHarness::new();
        for i in 0..50 {
            let content = harness.file_generator.generate_file_content(10..2000);
            harness.write(&format!("dir_{}/file_{}.txt", i % 5, i), content);
        }
        harness.run();

        for round in 0..3 {
            for i in (round..50).step_by(3) {
                let content = harness.file_generator.generate_file_content(10..2000);
                harness.write(&format!("dir_{}/file_{}.txt", i % 5, i), content);
            }
            harness.remove(&format!("dir_{}/file_{}.txt", (40 + round) % 5, 40 + round));
            let report = harness.run();
            assert!(report.success);
            assert!(report.files_deleted >= 1);
            assert_eq!(harness.snapshots().len(), round + 1);
        }
    }

    #[test]
    fn test_modified_twice_keeps_every_version() {
        let mut harness = StrataTestHarness::new();
        harness.write("a.txt", "v1");
        harness.run();
        harness.write("a.txt", "v2");
        harness.run();
        harness.write("a.txt", "v3");
        harness.run();

        let snapshots = harness.snapshots();
        assert_eq!(snapshots.len(), 2);
        let versions: Vec<String> = snapshots
            .iter()
            .map(|s| fs::read_to_string(harness.history_root().join(s).join("a.txt")).unwrap())
            .collect();
        assert_eq!(versions, vec!["v1", "v2"]);
        assert_eq!(fs::read_to_string(harness.live_root().join("a.txt")).unwrap(), "v3");
    }

    #[test]
    fn test_lost_live_copy_modified_is_not_archived() {
        let mut harness = StrataTestHarness::new();
        harness.write("a.txt", "v1");
        harness.run();
        fs::remove_file(harness.live_root().join("a.txt")).unwrap();

        harness.write("a.txt", "v2");
        let report = harness.run();
        assert!(report.success);
        assert_eq!(report.files_modified, 1);
        assert!(report.snapshot_dir.is_none());
        assert_eq!(fs::read_to_string(harness.live_root().join("a.txt")).unwrap(), "v2");
    }

    #[test]
    fn test_progress_reports_deletions() {
        let mut harness = StrataTestHarness::new();
        harness.write("a.txt", "a");
        harness.write("b.txt", "b");
        harness.run();
        harness.remove("a.txt");
        harness.remove("b.txt");

        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let config = BackupConfig::with_default_database(harness.source.clone(), harness.dest.clone())
            .with_progress(move |info| sink.lock().push((info.stage, info.processed)));
        let report = BackupRunner::new(config).run().unwrap();

        assert_eq!(report.files_deleted, 2);
        assert_eq!(
            *events.lock(),
            vec![(ProgressInfo::DELETED, 1), (ProgressInfo::DELETED, 2)]
        );
    }
}
