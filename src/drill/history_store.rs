//! The Drill History Store (§4.2): crash-safe persistence of drill outcomes.
//!
//! Grounded on the temp-file + rename idiom used for crash-safe writes
//! elsewhere in the corpus (content-addressed filesystem storage): stage to
//! `<path>.tmp`, then atomically rename over the real path. Readers
//! tolerate and recover an orphaned `.tmp` left behind by a crash between
//! those two steps.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::domain::{clamp_history_cap, DrillHistoryFile};
use crate::error::HistoryStoreError;

const HISTORY_FILE_NAME: &str = "drill-history.json";

fn history_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".promptwheel").join(HISTORY_FILE_NAME)
}

fn tmp_path(main: &Path) -> PathBuf {
    main.with_extension("tmp")
}

/// Read the drill history file, recovering a crash left mid-write.
///
/// - Missing main file, no `.tmp`: returns an empty default.
/// - Missing main file, valid `.tmp`: promotes `.tmp` to main (rename) and
///   returns its contents.
/// - Missing main file, invalid `.tmp`: discards the `.tmp` and returns an
///   empty default.
/// - Corrupt or empty main file content: returns an empty default.
/// - Unknown JSON fields are tolerated by `serde`'s default behavior;
///   structurally invalid coverage maps reset to empty.
pub async fn load(repo_root: &Path, verbose: bool) -> DrillHistoryFile {
    let main = history_path(repo_root);
    let tmp = tmp_path(&main);

    match fs::read_to_string(&main).await {
        Ok(content) => parse_or_default(&content, verbose),
        Err(_) => {
            if let Ok(tmp_content) = fs::read_to_string(&tmp).await {
                if is_valid_tmp(&tmp_content) {
                    debug!(?tmp, ?main, "history_store::load: promoting orphaned tmp file");
                    let _ = fs::rename(&tmp, &main).await;
                    return parse_or_default(&tmp_content, verbose);
                }
                warn!(?tmp, "history_store::load: invalid tmp file, discarding");
                let _ = fs::remove_file(&tmp).await;
            }
            DrillHistoryFile::default()
        }
    }
}

fn is_valid_tmp(content: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(content)
        .ok()
        .and_then(|v| v.get("entries").cloned())
        .map(|v| v.is_array())
        .unwrap_or(false)
}

fn parse_or_default(content: &str, verbose: bool) -> DrillHistoryFile {
    if content.trim().is_empty() {
        return DrillHistoryFile::default();
    }
    match serde_json::from_str::<DrillHistoryFile>(content) {
        Ok(file) => file,
        Err(err) => {
            if verbose {
                warn!(%err, "history_store::load: corrupt history file, using empty default");
            }
            DrillHistoryFile::default()
        }
    }
}

/// Persist `file`, clamping `cap` into [10,1000] and slicing entries to the
/// tail before writing. Always stages to `.tmp` and atomically renames;
/// best-effort unlinks `.tmp` on any failure path so a later `load` never
/// sees stale data.
pub async fn save(repo_root: &Path, mut file: DrillHistoryFile, cap: usize, verbose: bool) -> Result<(), HistoryStoreError> {
    let cap = clamp_history_cap(cap);
    if file.entries.len() > cap {
        let drop = file.entries.len() - cap;
        file.entries.drain(0..drop);
    }

    let main = history_path(repo_root);
    let tmp = tmp_path(&main);

    if let Some(parent) = main.parent() {
        fs::create_dir_all(parent).await.map_err(|source| HistoryStoreError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let serialized = serde_json::to_string_pretty(&file).map_err(|err| HistoryStoreError::Malformed {
        path: main.display().to_string(),
        reason: err.to_string(),
    })?;

    let write_result = fs::write(&tmp, &serialized).await;
    if let Err(source) = write_result {
        let _ = fs::remove_file(&tmp).await;
        return Err(HistoryStoreError::Io {
            path: tmp.display().to_string(),
            source,
        });
    }

    match fs::rename(&tmp, &main).await {
        Ok(()) => {
            if verbose {
                debug!(?main, entries = file.entries.len(), "history_store::save: wrote history");
            }
            Ok(())
        }
        Err(source) => {
            let _ = fs::remove_file(&tmp).await;
            Err(HistoryStoreError::Io {
                path: main.display().to_string(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DrillHistoryEntry, DrillOutcome};
    use tempfile::TempDir;

    fn sample_entry(name: &str) -> DrillHistoryEntry {
        DrillHistoryEntry::new(name, "d", 3, 3, 0, DrillOutcome::Completed, vec!["refactor".into()], vec!["src/".into()], 0)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut file = DrillHistoryFile::default();
        file.append(sample_entry("a"), 100);
        save(dir.path(), file.clone(), 100, false).await.unwrap();

        let loaded = load(dir.path(), false).await;
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].name, "a");
    }

    #[tokio::test]
    async fn load_with_missing_main_but_valid_tmp_promotes_it() {
        let dir = TempDir::new().unwrap();
        let main = history_path(dir.path());
        tokio::fs::create_dir_all(main.parent().unwrap()).await.unwrap();
        let tmp = tmp_path(&main);
        let mut file = DrillHistoryFile::default();
        file.append(sample_entry("crash-survivor"), 100);
        tokio::fs::write(&tmp, serde_json::to_string(&file).unwrap()).await.unwrap();

        let loaded = load(dir.path(), false).await;
        assert_eq!(loaded.entries.len(), 1);
        assert!(main.exists());
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn load_with_invalid_tmp_discards_it() {
        let dir = TempDir::new().unwrap();
        let main = history_path(dir.path());
        tokio::fs::create_dir_all(main.parent().unwrap()).await.unwrap();
        let tmp = tmp_path(&main);
        tokio::fs::write(&tmp, "not json").await.unwrap();

        let loaded = load(dir.path(), false).await;
        assert!(loaded.entries.is_empty());
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn load_with_corrupt_main_returns_empty_default() {
        let dir = TempDir::new().unwrap();
        let main = history_path(dir.path());
        tokio::fs::create_dir_all(main.parent().unwrap()).await.unwrap();
        tokio::fs::write(&main, "{ not valid").await.unwrap();

        let loaded = load(dir.path(), false).await;
        assert!(loaded.entries.is_empty());
    }

    #[tokio::test]
    async fn save_clamps_cap_and_slices_to_tail() {
        let dir = TempDir::new().unwrap();
        let mut file = DrillHistoryFile::default();
        for i in 0..20 {
            file.entries.push(sample_entry(&format!("e{i}")));
        }
        save(dir.path(), file, 5, false).await.unwrap();
        let loaded = load(dir.path(), false).await;
        assert_eq!(loaded.entries.len(), 5);
        assert_eq!(loaded.entries.last().unwrap().name, "e19");
    }
}
