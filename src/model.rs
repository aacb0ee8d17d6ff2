use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPaths {
    pub cache_root: String,
    pub manifest_dir: String,
    pub source_dir: String,
    pub url_table_path: String,
    pub db_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounts {
    pub url_table_entries: usize,
    pub malformed_lines: usize,
    pub filtered_identifiers: usize,
    pub nofollow_skipped: usize,
    pub too_small_skipped: usize,
    pub failed_documents: usize,
    pub documents_removed: usize,
    pub documents_added: usize,
    pub documents_updated: usize,
    pub documents_unchanged: usize,
    pub documents_total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub mode: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub paths: IndexPaths,
    pub counts: IndexCounts,
    pub warnings: Vec<String>,
}
