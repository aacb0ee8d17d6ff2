use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::backend::{count_documents, read_metadata_value};
use crate::cli::StatusArgs;
use crate::model::IndexRunManifest;
use crate::util::default_db_path;

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.cache_root.join("manifests");
    let db_path = default_db_path(&args.cache_root, args.db_path.as_deref());

    info!(cache_root = %args.cache_root.display(), "status requested");

    match latest_index_manifest(&manifest_dir)? {
        Some((path, manifest)) => info!(
            path = %path.display(),
            run_id = %manifest.run_id,
            status = %manifest.status,
            mode = %manifest.mode,
            updated_at = %manifest.updated_at,
            added = manifest.counts.documents_added,
            updated = manifest.counts.documents_updated,
            unchanged = manifest.counts.documents_unchanged,
            failed = manifest.counts.failed_documents,
            warnings = manifest.warnings.len(),
            "loaded latest index run manifest"
        ),
        None => warn!(path = %manifest_dir.display(), "index run manifest missing"),
    }

    if db_path.exists() {
        let connection = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open {}", db_path.display()))?;
        let documents = count_documents(&connection).unwrap_or(0);
        let schema_version = read_metadata_value(&connection, "db_schema_version")?;
        let updated_at = read_metadata_value(&connection, "db_updated_at")?;

        if updated_at.is_none() {
            warn!(path = %db_path.display(), "search index has never been rebuilt");
        }
        info!(
            path = %db_path.display(),
            documents,
            schema_version = %schema_version.unwrap_or_default(),
            updated_at = %updated_at.unwrap_or_default(),
            "database status"
        );
    } else {
        warn!(path = %db_path.display(), "database file missing");
    }

    Ok(())
}

/// Manifest file names embed a compact UTC timestamp, so the greatest name is the newest run.
pub fn latest_index_manifest(manifest_dir: &Path) -> Result<Option<(PathBuf, IndexRunManifest)>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let entries = fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?;
    let mut latest: Option<PathBuf> = None;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", manifest_dir.display()))?
            .path();
        let is_index_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("index_run_") && name.ends_with(".json"));
        if is_index_manifest && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }

    let Some(path) = latest else {
        return Ok(None);
    };
    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest: IndexRunManifest = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some((path, manifest)))
}
