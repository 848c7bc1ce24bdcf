use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use crate::core::error::Result;
use crate::core::types::Ts;

pub const WAL_FILENAME: &str = "wal.log";

/// Rolled log file name: `wal.log.<max_commit_ts>`.
pub fn wal_filename(max_commit_ts: Ts) -> String {
    format!("{}.{}", WAL_FILENAME, max_commit_ts)
}

pub fn full_catalog_filename(commit_ts: Ts) -> String {
    format!("FULL.{}.json", commit_ts)
}

pub fn delta_catalog_filename(commit_ts: Ts) -> String {
    format!("DELTA.{}", commit_ts)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalFileInfo {
    pub path: PathBuf,
    pub max_commit_ts: Ts,
}

/// Enumerate the WAL directory: the active `wal.log` (if present) plus the
/// rolled files with their recorded max commit timestamps.
pub fn parse_wal_filenames(wal_dir: &Path) -> Result<(Option<PathBuf>, Vec<WalFileInfo>)> {
    let mut active = None;
    let mut rolled = Vec::new();
    if !wal_dir.exists() {
        return Ok((None, rolled));
    }
    for dir_entry in fs::read_dir(wal_dir)? {
        let path = dir_entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == WAL_FILENAME {
            active = Some(path);
        } else if let Some(suffix) = name.strip_prefix("wal.log.") {
            if let Ok(max_commit_ts) = suffix.parse::<Ts>() {
                rolled.push(WalFileInfo { path, max_commit_ts });
            }
        }
    }
    Ok((active, rolled))
}

/// Remove rolled log files whose entries are all covered by a checkpoint.
pub fn recycle_wal_files(wal_dir: &Path, max_commit_ts: Ts) -> Result<()> {
    let (_, rolled) = parse_wal_filenames(wal_dir)?;
    for file in rolled {
        if file.max_commit_ts <= max_commit_ts {
            info!(path = %file.path.display(), "recycling wal file");
            fs::remove_file(&file.path)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFileInfo {
    pub path: PathBuf,
    pub commit_ts: Ts,
    pub is_full: bool,
}

/// Enumerate catalog snapshot files under `catalog_dir`.
pub fn parse_catalog_filenames(catalog_dir: &Path) -> Result<Vec<CatalogFileInfo>> {
    let mut files = Vec::new();
    if !catalog_dir.exists() {
        return Ok(files);
    }
    for dir_entry in fs::read_dir(catalog_dir)? {
        let path = dir_entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(rest) = name.strip_prefix("FULL.") {
            if let Some(ts) = rest.strip_suffix(".json").and_then(|t| t.parse::<Ts>().ok()) {
                files.push(CatalogFileInfo { path, commit_ts: ts, is_full: true });
            }
        } else if let Some(rest) = name.strip_prefix("DELTA.") {
            if let Ok(ts) = rest.parse::<Ts>() {
                files.push(CatalogFileInfo { path, commit_ts: ts, is_full: false });
            }
        }
    }
    Ok(files)
}

/// Select the newest full snapshot with `commit_ts <= target` plus every
/// delta file in `(full_ts, target]`, deltas ascending.
pub fn select_catalog_files(
    catalog_dir: &Path,
    target: Ts,
) -> Result<Option<(CatalogFileInfo, Vec<CatalogFileInfo>)>> {
    let files = parse_catalog_filenames(catalog_dir)?;
    let full = files
        .iter()
        .filter(|f| f.is_full && f.commit_ts <= target)
        .max_by_key(|f| f.commit_ts)
        .cloned();
    let Some(full) = full else {
        return Ok(None);
    };
    let mut deltas: Vec<CatalogFileInfo> = files
        .into_iter()
        .filter(|f| !f.is_full && f.commit_ts > full.commit_ts && f.commit_ts <= target)
        .collect();
    deltas.sort_by_key(|f| f.commit_ts);
    Ok(Some((full, deltas)))
}

/// After a full checkpoint at `max_commit_ts`, older snapshot and delta
/// files are no longer needed for recovery.
pub fn recycle_catalog_files(catalog_dir: &Path, max_commit_ts: Ts) -> Result<()> {
    for file in parse_catalog_filenames(catalog_dir)? {
        if file.commit_ts < max_commit_ts {
            info!(path = %file.path.display(), "recycling catalog file");
            fs::remove_file(&file.path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wal_discovery_separates_active_and_rolled() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("wal.log"), b"").unwrap();
        fs::write(dir.path().join("wal.log.50"), b"").unwrap();
        fs::write(dir.path().join("wal.log.100"), b"").unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"").unwrap();

        let (active, mut rolled) = parse_wal_filenames(dir.path()).unwrap();
        assert!(active.is_some());
        rolled.sort_by_key(|f| f.max_commit_ts);
        assert_eq!(
            rolled.iter().map(|f| f.max_commit_ts).collect::<Vec<_>>(),
            vec![50, 100]
        );
    }

    #[test]
    fn catalog_selection_picks_newest_full_and_following_deltas() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(full_catalog_filename(10)), b"{}").unwrap();
        fs::write(dir.path().join(full_catalog_filename(40)), b"{}").unwrap();
        fs::write(dir.path().join(delta_catalog_filename(20)), b"").unwrap();
        fs::write(dir.path().join(delta_catalog_filename(55)), b"").unwrap();
        fs::write(dir.path().join(delta_catalog_filename(70)), b"").unwrap();

        let (full, deltas) = select_catalog_files(dir.path(), 60).unwrap().unwrap();
        assert_eq!(full.commit_ts, 40);
        assert_eq!(deltas.iter().map(|f| f.commit_ts).collect::<Vec<_>>(), vec![55]);
    }

    #[test]
    fn recycle_keeps_files_at_checkpoint_ts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("wal.log.50"), b"").unwrap();
        fs::write(dir.path().join("wal.log.100"), b"").unwrap();
        recycle_wal_files(dir.path(), 50).unwrap();
        let (_, rolled) = parse_wal_filenames(dir.path()).unwrap();
        assert_eq!(rolled.len(), 1);
        assert_eq!(rolled[0].max_commit_ts, 100);

        fs::write(dir.path().join(full_catalog_filename(40)), b"{}").unwrap();
        fs::write(dir.path().join(full_catalog_filename(90)), b"{}").unwrap();
        fs::write(dir.path().join(delta_catalog_filename(60)), b"").unwrap();
        recycle_catalog_files(dir.path(), 90).unwrap();
        let files = parse_catalog_filenames(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].is_full);
        assert_eq!(files[0].commit_ts, 90);
    }
}
