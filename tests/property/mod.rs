//! Property-based testing for strata
//!
//! Uses proptest to check run invariants against a simple in-memory model
//! over randomly generated sequences of source mutations.

use ::strata::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A single mutation of the source tree
#[derive(Debug, Clone)]
pub enum FileOperation {
    Write { key: String, content: Vec<u8> },
    Delete { key: String },
}

/// Keys drawn from a small pool so that runs revisit the same paths.
/// Directories and files never share a name.
fn key_strategy() -> impl Strategy<Value = String> {
    (0..3usize, 0..6usize).prop_map(|(dir, file)| {
        if dir == 0 {
            format!("f{}.txt", file)
        } else {
            format!("d{}/f{}.txt", dir, file)
        }
    })
}

/// Small content alphabet so identical rewrites happen regularly
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[ab]{0,3}".prop_map(|s| s.into_bytes()),
        prop::collection::vec(any::<u8>(), 0..5000),
    ]
}

fn file_operation_strategy() -> impl Strategy<Value = FileOperation> {
    prop_oneof![
        3 => (key_strategy(), content_strategy())
            .prop_map(|(key, content)| FileOperation::Write { key, content }),
        1 => key_strategy().prop_map(|key| FileOperation::Delete { key }),
    ]
}

fn apply_operation(root: &Path, op: &FileOperation) -> anyhow::Result<()> {
    match op {
        FileOperation::Write { key, content } => {
            let path = root.join(key);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        FileOperation::Delete { key } => {
            let path = root.join(key);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
    }
    Ok(())
}

/// Relative path → content of every regular file under `root`
fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    crate::integration::read_tree(root)
}

/// What the state repository should hold for one path
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelRecord {
    content: Vec<u8>,
    status: ChangeType,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Statuses survive encoding, and garbage decodes to Unchanged
    #[test]
    fn change_type_round_trip(name in "[A-Za-z]{0,12}") {
        for status in ChangeType::ALL {
            prop_assert_eq!(ChangeType::from_str_lossy(status.as_str()), status);
        }
        if !ChangeType::ALL.iter().any(|s| s.as_str() == name) {
            prop_assert_eq!(ChangeType::from_str_lossy(&name), ChangeType::Unchanged);
        }
    }

    /// Hashing a file matches hashing its bytes, and is stable
    #[test]
    fn file_hash_matches_data_hash(content in prop::collection::vec(any::<u8>(), 0..40_000)) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data");
        fs::write(&path, &content).unwrap();

        let from_file = hash_file_content(&path).unwrap();
        prop_assert_eq!(&from_file, &hasher::hash_data(&content));
        prop_assert_eq!(from_file.len(), 16);
        prop_assert_eq!(hash_file_content(&path).unwrap(), from_file);
    }

    /// Every run leaves the live tree equal to the source, records the
    /// expected status per path and archives exactly the superseded content
    #[test]
    fn runs_agree_with_model(
        rounds in prop::collection::vec(
            prop::collection::vec(file_operation_strategy(), 0..12),
            1..5
        )
    ) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let dest = temp_dir.path().join("dest");
        fs::create_dir_all(&source).unwrap();

        let mut model: BTreeMap<String, ModelRecord> = BTreeMap::new();

        for (round, operations) in rounds.iter().enumerate() {
            for op in operations {
                apply_operation(&source, op).unwrap();
            }

            let timestamp = format!("round-{:02}", round);
            let report = BackupRunner::new(BackupConfig::with_default_database(source.clone(), dest.clone()))
                .workers(3)
                .timestamp_provider(Arc::new(FixedTimestamp(timestamp.clone())))
                .run()
                .unwrap();
            prop_assert!(report.success, "failures: {:?}", report.failures);

            // Expected transitions
            let current = read_tree(&source);
            let mut archived = BTreeMap::new();
            let (mut added, mut modified, mut unchanged, mut deleted) = (0, 0, 0, 0);

            for (key, content) in &current {
                let next = match model.get(key) {
                    Some(prev) if prev.status != ChangeType::Deleted => {
                        if &prev.content == content {
                            unchanged += 1;
                            ChangeType::Unchanged
                        } else {
                            archived.insert(key.clone(), prev.content.clone());
                            modified += 1;
                            ChangeType::Modified
                        }
                    }
                    _ => {
                        added += 1;
                        ChangeType::Added
                    }
                };
                model.insert(key.clone(), ModelRecord { content: content.clone(), status: next });
            }
            for (key, record) in model.iter_mut() {
                if !current.contains_key(key) && record.status != ChangeType::Deleted {
                    archived.insert(key.clone(), record.content.clone());
                    record.status = ChangeType::Deleted;
                    deleted += 1;
                }
            }

            prop_assert_eq!(report.files_added, added);
            prop_assert_eq!(report.files_modified, modified);
            prop_assert_eq!(report.files_unchanged, unchanged);
            prop_assert_eq!(report.files_deleted, deleted);

            // Live tree mirrors the source
            prop_assert_eq!(read_tree(&dest.join("backup")), current.clone());

            // One snapshot holding exactly the superseded content, or none
            let snapshot = dest.join("deleted").join(&timestamp);
            if archived.is_empty() {
                prop_assert!(!snapshot.exists());
                prop_assert!(report.snapshot_dir.is_none());
            } else {
                prop_assert_eq!(read_tree(&snapshot), archived);
            }

            // Repository agrees with the model
            let repository = StateRepository::open(dest.join("backup.db"));
            prop_assert_eq!(repository.record_count().unwrap(), model.len());
            for (key, record) in &model {
                let stored = repository.get(key).unwrap().unwrap();
                prop_assert_eq!(stored.status, record.status);
                prop_assert_eq!(&stored.content_hash, &hasher::hash_data(&record.content));
            }
        }
    }
}
