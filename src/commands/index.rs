use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::backend::{
    DB_SCHEMA_VERSION, DocumentRecord, IndexMode, UpsertOutcome, configure_connection,
    count_documents, ensure_schema, prepare_index, rebuild_fts_index, upsert_document,
};
use crate::cli::IndexArgs;
use crate::model::{IndexCounts, IndexPaths, IndexRunManifest};
use crate::util::{
    default_db_path, ensure_directory, now_utc_string, sha256_hex, utc_compact_string,
    write_json_pretty,
};

const TEXT_DIR: &str = "Textdata";
const HTML_DIR: &str = "Htmldata";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTableEntry {
    pub identifier: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    pub skip_nofollow: bool,
    pub min_content_length: Option<u64>,
}

pub struct HtmlExtractor {
    title_regex: Regex,
    meta_regex: Regex,
    robots_name_regex: Regex,
    content_attr_regex: Regex,
}

enum PreparedDocument {
    Record(DocumentRecord),
    Nofollow,
    TooSmall(u64),
}

pub fn run(args: IndexArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("index-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;
    let manifest_path = manifest_dir.join(format!(
        "index_run_{}.json",
        utc_compact_string(started_ts)
    ));

    let db_path = default_db_path(&cache_root, args.db_path.as_deref());
    if let Some(parent) = db_path.parent() {
        ensure_directory(parent)?;
    }

    let mode = if args.append {
        IndexMode::Append
    } else {
        IndexMode::Create
    };
    let options = IndexOptions {
        skip_nofollow: args.skip_nofollow,
        min_content_length: args.min_content_length,
    };

    info!(
        source_dir = %args.source_dir.display(),
        db_path = %db_path.display(),
        mode = mode.as_str(),
        run_id = %run_id,
        "starting index build"
    );

    let raw_table = fs::read_to_string(&args.url_table)
        .with_context(|| format!("failed to read {}", args.url_table.display()))?;
    let (entries, malformed_lines) = parse_url_table(&raw_table);

    let mut counts = IndexCounts {
        url_table_entries: entries.len(),
        malformed_lines,
        ..IndexCounts::default()
    };
    let mut warnings = Vec::new();
    if malformed_lines > 0 {
        warnings.push(format!("{malformed_lines} malformed url table lines skipped"));
    }

    let extractor = HtmlExtractor::new()?;

    let mut connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;

    counts.documents_removed = prepare_index(&connection, mode)?;
    index_entries(
        &mut connection,
        &args.source_dir,
        &entries,
        options,
        &extractor,
        &mut counts,
        &mut warnings,
    )?;
    rebuild_fts_index(&connection)?;
    counts.documents_total = count_documents(&connection)?;

    let manifest = IndexRunManifest {
        manifest_version: 1,
        run_id,
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        mode: mode.as_str().to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_index_command(&args),
        paths: IndexPaths {
            cache_root: cache_root.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            source_dir: args.source_dir.display().to_string(),
            url_table_path: args.url_table.display().to_string(),
            db_path: db_path.display().to_string(),
        },
        counts: counts.clone(),
        warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote index run manifest");
    info!(
        added = counts.documents_added,
        updated = counts.documents_updated,
        unchanged = counts.documents_unchanged,
        filtered = counts.filtered_identifiers,
        failed = counts.failed_documents,
        total = counts.documents_total,
        "index build completed"
    );

    Ok(())
}

/// Returns the usable entries and the number of malformed lines.
pub fn parse_url_table(raw: &str) -> (Vec<UrlTableEntry>, usize) {
    let mut entries = Vec::new();
    let mut malformed = 0;

    for (line_index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_url_table_line(line) {
            Some(entry) => entries.push(entry),
            None => {
                warn!(
                    line = line_index + 1,
                    content = %line.trim(),
                    "skipping malformed url table line"
                );
                malformed += 1;
            }
        }
    }

    (entries, malformed)
}

pub fn parse_url_table_line(line: &str) -> Option<UrlTableEntry> {
    let mut tokens = line.split_whitespace();
    let identifier = tokens.next()?;
    let file_name = tokens.next()?;
    Some(UrlTableEntry {
        identifier: identifier.to_string(),
        file_name: file_name.to_string(),
    })
}

/// Crawl artifacts that never carry useful content.
pub fn is_filtered_identifier(identifier: &str) -> bool {
    identifier.starts_with("http://www.ics.uci.edu/~develop/")
        || identifier.ends_with("/feed/")
        || identifier.contains("feed=rss")
        || identifier.contains(":8080")
        || identifier.contains("http://galen.ics.uci.edu/")
        || identifier.contains("/javadoc/")
}

pub fn index_entries(
    connection: &mut Connection,
    source_dir: &Path,
    entries: &[UrlTableEntry],
    options: IndexOptions,
    extractor: &HtmlExtractor,
    counts: &mut IndexCounts,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let transaction = connection
        .transaction()
        .context("failed to begin index transaction")?;

    for entry in entries {
        if is_filtered_identifier(&entry.identifier) {
            info!(identifier = %entry.identifier, "skipping filtered identifier");
            counts.filtered_identifiers += 1;
            continue;
        }

        let prepared = match prepare_document(source_dir, entry, options, extractor) {
            Ok(prepared) => prepared,
            Err(error) => {
                let detail = format!("{error:#}");
                warn!(identifier = %entry.identifier, error = %detail, "failed to read document");
                warnings.push(format!("{}: {detail}", entry.identifier));
                counts.failed_documents += 1;
                continue;
            }
        };

        let record = match prepared {
            PreparedDocument::Record(record) => record,
            PreparedDocument::Nofollow => {
                info!(identifier = %entry.identifier, "skipping document marked noindex/nofollow");
                counts.nofollow_skipped += 1;
                continue;
            }
            PreparedDocument::TooSmall(content_length) => {
                info!(
                    identifier = %entry.identifier,
                    content_length,
                    "skipping document below minimum length"
                );
                counts.too_small_skipped += 1;
                continue;
            }
        };

        match upsert_document(&transaction, &record) {
            Ok(UpsertOutcome::Added) => counts.documents_added += 1,
            Ok(UpsertOutcome::Updated) => counts.documents_updated += 1,
            Ok(UpsertOutcome::Unchanged) => counts.documents_unchanged += 1,
            Err(error) => {
                let detail = format!("{error:#}");
                warn!(identifier = %entry.identifier, error = %detail, "failed to store document");
                warnings.push(format!("{}: {detail}", entry.identifier));
                counts.failed_documents += 1;
            }
        }
    }

    transaction
        .commit()
        .context("failed to commit index transaction")?;
    Ok(())
}

fn prepare_document(
    source_dir: &Path,
    entry: &UrlTableEntry,
    options: IndexOptions,
    extractor: &HtmlExtractor,
) -> Result<PreparedDocument> {
    let text_path = source_dir.join(TEXT_DIR).join(&entry.file_name);
    let bytes = fs::read(&text_path)
        .with_context(|| format!("failed to read {}", text_path.display()))?;
    let content_length = bytes.len() as u64;

    if options
        .min_content_length
        .is_some_and(|minimum| content_length < minimum)
    {
        return Ok(PreparedDocument::TooSmall(content_length));
    }

    let html_path = source_dir.join(HTML_DIR).join(&entry.file_name);
    let html = match fs::read(&html_path) {
        Ok(raw) => String::from_utf8_lossy(&raw).into_owned(),
        Err(error) => {
            debug!(
                path = %html_path.display(),
                error = %error,
                "html unavailable; indexing without title"
            );
            String::new()
        }
    };

    if options.skip_nofollow && !extractor.allows_indexing(&html) {
        return Ok(PreparedDocument::Nofollow);
    }

    Ok(PreparedDocument::Record(DocumentRecord {
        identifier: entry.identifier.clone(),
        title: extractor.title(&html),
        content: String::from_utf8_lossy(&bytes).into_owned(),
        content_length,
        content_sha256: sha256_hex(&bytes),
    }))
}

impl HtmlExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            title_regex: Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>")
                .context("failed to compile title regex")?,
            meta_regex: Regex::new(r"(?is)<meta\b[^>]*>").context("failed to compile meta regex")?,
            robots_name_regex: Regex::new(r#"(?i)\bname\s*=\s*["']?robots\b"#)
                .context("failed to compile robots name regex")?,
            content_attr_regex: Regex::new(r#"(?is)\bcontent\s*=\s*["']([^"']*)["']"#)
                .context("failed to compile meta content regex")?,
        })
    }

    pub fn title(&self, html: &str) -> String {
        self.title_regex
            .captures(html)
            .and_then(|captures| captures.get(1))
            .map(|title| condense_whitespace(&decode_entities(title.as_str())))
            .unwrap_or_default()
    }

    /// Only the first robots meta tag of the head is consulted.
    pub fn allows_indexing(&self, html: &str) -> bool {
        let head_end = html
            .to_ascii_lowercase()
            .find("</head>")
            .unwrap_or(html.len());
        let head = &html[..head_end];

        let Some(robots) = self
            .meta_regex
            .find_iter(head)
            .map(|tag| tag.as_str())
            .find(|tag| self.robots_name_regex.is_match(tag))
        else {
            return true;
        };

        let directives = self
            .content_attr_regex
            .captures(robots)
            .and_then(|captures| captures.get(1))
            .map(|content| content.as_str().to_ascii_lowercase())
            .unwrap_or_default();
        !(directives.contains("noindex") || directives.contains("nofollow"))
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn condense_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

fn render_index_command(args: &IndexArgs) -> String {
    let mut command = vec![
        "campus-search".to_string(),
        "index".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--source-dir".to_string(),
        args.source_dir.display().to_string(),
        "--url-table".to_string(),
        args.url_table.display().to_string(),
    ];

    if let Some(path) = &args.db_path {
        command.push("--db-path".to_string());
        command.push(path.display().to_string());
    }
    if args.append {
        command.push("--append".to_string());
    }
    if args.skip_nofollow {
        command.push("--skip-nofollow".to_string());
    }
    if let Some(minimum) = args.min_content_length {
        command.push("--min-content-length".to_string());
        command.push(minimum.to_string());
    }

    command.join(" ")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;
    use crate::backend::{FtsBackend, SearchBackend, read_metadata_value};
    use crate::ranking::QueryBuilder;

    fn write_source(dir: &Path, file_name: &str, text: &str, html: Option<&str>) {
        let text_dir = dir.join(TEXT_DIR);
        let html_dir = dir.join(HTML_DIR);
        fs::create_dir_all(&text_dir).expect("text dir");
        fs::create_dir_all(&html_dir).expect("html dir");
        fs::write(text_dir.join(file_name), text).expect("write text");
        if let Some(html) = html {
            fs::write(html_dir.join(file_name), html).expect("write html");
        }
    }

    fn entry(identifier: &str, file_name: &str) -> UrlTableEntry {
        UrlTableEntry {
            identifier: identifier.to_string(),
            file_name: file_name.to_string(),
        }
    }

    fn memory_connection() -> Connection {
        let connection = Connection::open_in_memory().expect("open");
        ensure_schema(&connection).expect("schema");
        connection
    }

    #[test]
    fn url_table_parses_pairs_and_counts_malformed_lines() {
        let raw = "http://www.ics.uci.edu/ 1.txt\n\n   \nlonely-token\nhttp://www.ics.uci.edu/grad/\t2.txt extra\n";
        let (entries, malformed) = parse_url_table(raw);

        assert_eq!(
            entries,
            vec![
                entry("http://www.ics.uci.edu/", "1.txt"),
                entry("http://www.ics.uci.edu/grad/", "2.txt"),
            ]
        );
        assert_eq!(malformed, 1);
    }

    #[test]
    fn crawl_artifacts_are_filtered() {
        for identifier in [
            "http://www.ics.uci.edu/~develop/index.html",
            "http://luci.ics.uci.edu/blog/feed/",
            "http://www.ics.uci.edu/?feed=rss2",
            "http://www.ics.uci.edu:8080/",
            "http://galen.ics.uci.edu/page",
            "http://www.ics.uci.edu/docs/javadoc/index.html",
        ] {
            assert!(is_filtered_identifier(identifier), "{identifier}");
        }
        assert!(!is_filtered_identifier("http://www.ics.uci.edu/grad/"));
        assert!(!is_filtered_identifier("http://www.ics.uci.edu/feed/page"));
    }

    #[test]
    fn title_is_decoded_and_condensed() {
        let extractor = HtmlExtractor::new().expect("extractor");
        let html = "<html><head><TITLE>\n  Graduate &amp; Professional\n   Programs </TITLE></head></html>";

        assert_eq!(extractor.title(html), "Graduate & Professional Programs");
        assert_eq!(extractor.title("<html><body>no title</body></html>"), "");
    }

    #[test]
    fn robots_meta_in_head_controls_indexing() {
        let extractor = HtmlExtractor::new().expect("extractor");

        assert!(!extractor.allows_indexing(
            r#"<html><head><meta name="robots" content="noindex, nofollow" /></head></html>"#
        ));
        assert!(!extractor.allows_indexing(
            r#"<head><meta content="NoFollow" name='robots'></head>"#
        ));
        assert!(extractor.allows_indexing(
            r#"<head><meta name="keywords" content="nofollow" /></head>"#
        ));
        assert!(extractor.allows_indexing(
            r#"<head></head><body><meta name="robots" content="noindex"></body>"#
        ));
        assert!(extractor.allows_indexing(""));
    }

    #[test]
    fn index_entries_counts_every_outcome() {
        let source = TempDir::new().expect("tempdir");
        write_source(
            source.path(),
            "1.txt",
            "graduate courses and degrees offered by the school",
            Some("<head><title>Graduate</title></head>"),
        );
        write_source(source.path(), "2.txt", "tiny", None);
        write_source(
            source.path(),
            "3.txt",
            "private staging content that should stay out of the index",
            Some(r#"<head><meta name="robots" content="noindex"></head>"#),
        );

        let entries = vec![
            entry("http://www.ics.uci.edu/grad/", "1.txt"),
            entry("http://www.ics.uci.edu/tiny", "2.txt"),
            entry("http://www.ics.uci.edu/private", "3.txt"),
            entry("http://www.ics.uci.edu/gone", "missing.txt"),
            entry("http://www.ics.uci.edu/feed/", "1.txt"),
        ];
        let options = IndexOptions {
            skip_nofollow: true,
            min_content_length: Some(10),
        };

        let extractor = HtmlExtractor::new().expect("extractor");
        let mut connection = memory_connection();
        let mut counts = IndexCounts::default();
        let mut warnings = Vec::new();
        index_entries(
            &mut connection,
            source.path(),
            &entries,
            options,
            &extractor,
            &mut counts,
            &mut warnings,
        )
        .expect("index");

        assert_eq!(counts.documents_added, 1);
        assert_eq!(counts.too_small_skipped, 1);
        assert_eq!(counts.nofollow_skipped, 1);
        assert_eq!(counts.failed_documents, 1);
        assert_eq!(counts.filtered_identifiers, 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(count_documents(&connection).expect("count"), 1);
    }

    #[test]
    fn append_mode_leaves_unchanged_documents_alone() {
        let source = TempDir::new().expect("tempdir");
        write_source(source.path(), "1.txt", "software engineering research", None);
        write_source(source.path(), "2.txt", "computer games studio", None);
        let entries = vec![
            entry("http://www.ics.uci.edu/se", "1.txt"),
            entry("http://www.ics.uci.edu/games", "2.txt"),
        ];

        let extractor = HtmlExtractor::new().expect("extractor");
        let mut connection = memory_connection();
        let mut first = IndexCounts::default();
        index_entries(
            &mut connection,
            source.path(),
            &entries,
            IndexOptions::default(),
            &extractor,
            &mut first,
            &mut Vec::new(),
        )
        .expect("first pass");
        assert_eq!(first.documents_added, 2);

        write_source(source.path(), "2.txt", "computer games studio and lab", None);
        assert_eq!(prepare_index(&connection, IndexMode::Append).expect("prepare"), 0);
        let mut second = IndexCounts::default();
        index_entries(
            &mut connection,
            source.path(),
            &entries,
            IndexOptions::default(),
            &extractor,
            &mut second,
            &mut Vec::new(),
        )
        .expect("second pass");

        assert_eq!(second.documents_unchanged, 1);
        assert_eq!(second.documents_updated, 1);
        assert_eq!(count_documents(&connection).expect("count"), 2);
    }

    #[test]
    fn run_builds_searchable_index_and_manifest() {
        let workspace = TempDir::new().expect("tempdir");
        let source_dir = workspace.path().join("corpus");
        write_source(
            &source_dir,
            "a.txt",
            "information retrieval lecture notes on ranking",
            Some("<head><title>IR Notes</title></head>"),
        );
        write_source(&source_dir, "b.txt", "campus parking information", None);
        let url_table: PathBuf = workspace.path().join("table_url_list.txt");
        fs::write(
            &url_table,
            "http://www.ics.uci.edu/ir a.txt\nhttp://www.ics.uci.edu/parking b.txt\n",
        )
        .expect("url table");

        let cache_root = workspace.path().join("cache");
        run(IndexArgs {
            cache_root: cache_root.clone(),
            db_path: None,
            source_dir,
            url_table,
            append: false,
            skip_nofollow: false,
            min_content_length: None,
        })
        .expect("index run");

        let db_path = cache_root.join("search_index.sqlite");
        let connection = Connection::open(&db_path).expect("open");
        assert_eq!(count_documents(&connection).expect("count"), 2);
        assert_eq!(
            read_metadata_value(&connection, "db_schema_version").expect("version"),
            Some(DB_SCHEMA_VERSION.to_string())
        );
        assert!(
            read_metadata_value(&connection, "db_updated_at")
                .expect("updated")
                .is_some()
        );
        drop(connection);

        let manifests = fs::read_dir(cache_root.join("manifests"))
            .expect("manifest dir")
            .count();
        assert_eq!(manifests, 1);

        let backend = FtsBackend::open_read_only(&db_path).expect("backend");
        let query = QueryBuilder::default()
            .build("information retrieval")
            .expect("query");
        let hits = backend.search(&query, 10).expect("search");
        assert_eq!(hits.total_hits, 2);

        let top = backend.metadata(hits.hits[0].backend_id).expect("metadata");
        assert_eq!(top.identifier.as_deref(), Some("http://www.ics.uci.edu/ir"));
        assert_eq!(top.title.as_deref(), Some("IR Notes"));
    }
}
