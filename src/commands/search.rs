use std::io::{self, BufRead, BufWriter, Write};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::backend::{FtsBackend, SearchBackend};
use crate::cli::SearchArgs;
use crate::error::SearchError;
use crate::paging::{
    BrowserEvent, BrowserOutput, INITIAL_PAGES_COLLECTED, PageEntry, PageView, PagingBrowser,
    Prompt, parse_collect_more_reply, parse_navigation,
};
use crate::ranking::{
    MISSING_IDENTIFIER, QueryBuilder, RankedResultSource, ScoreAdjuster, StructuredQuery,
    load_rule_table,
};
use crate::util::{default_db_path, read_query_lines};

#[derive(Debug, Clone, Copy)]
pub struct DisplayOptions {
    pub page_size: usize,
    pub raw: bool,
    pub explain: bool,
    pub repeat: usize,
}

pub fn run(args: SearchArgs) -> Result<()> {
    let db_path = default_db_path(&args.cache_root, args.db_path.as_deref());
    let rules = load_rule_table(args.rules.as_deref())?;
    let backend = FtsBackend::open_read_only(&db_path)
        .with_context(|| format!("failed to open search index {}", db_path.display()))?;
    let source = RankedResultSource::new(
        backend,
        QueryBuilder::for_fields(args.field.fields()),
        ScoreAdjuster::new(rules),
    )
    .with_oversample(args.oversample.map(|factor| factor as usize));

    let options = DisplayOptions {
        page_size: args.page_size as usize,
        raw: args.raw,
        explain: args.explain,
        repeat: args.repeat as usize,
    };

    let batch = match (&args.query, &args.queries_file) {
        (Some(query), _) => Some(vec![query.clone()]),
        (None, Some(path)) => Some(read_query_lines(path)?),
        (None, None) => None,
    };

    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    match batch {
        Some(queries) if args.json => {
            let mut pages = Vec::with_capacity(queries.len());
            for query in &queries {
                match PagingBrowser::first_page(&source, query, options.page_size) {
                    Ok(view) => pages.push(view),
                    Err(error) if args.query.is_some() => return Err(error.into()),
                    Err(error) => warn!(query = %query, error = %error, "query failed"),
                }
            }
            if args.query.is_some() {
                serde_json::to_writer_pretty(&mut output, &pages[0])
                    .context("failed to write search results")?;
            } else {
                serde_json::to_writer_pretty(&mut output, &pages)
                    .context("failed to write search results")?;
            }
            writeln!(output)?;
        }
        Some(queries) => {
            if args.query.is_some() {
                let mut no_input = io::empty();
                browse(&source, &queries[0], options, false, &mut no_input, &mut output)?;
            } else {
                run_batch(&source, &queries, options, &mut output)?;
            }
        }
        None if args.json => bail!("--json requires --query or --queries-file"),
        None => {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            interactive_session(&source, options, &mut input, &mut output)?;
        }
    }

    output.flush().context("failed to flush search output")?;
    Ok(())
}

pub fn run_batch<B: SearchBackend, W: Write>(
    source: &RankedResultSource<B>,
    queries: &[String],
    options: DisplayOptions,
    output: &mut W,
) -> Result<()> {
    let mut failed = 0;
    for query in queries {
        let mut no_input = io::empty();
        if let Err(error) = browse(source, query, options, false, &mut no_input, output) {
            let detail = format!("{error:#}");
            warn!(query = %query, error = %detail, "query failed; continuing batch");
            failed += 1;
        }
    }
    info!(queries = queries.len(), failed, "batch search completed");
    Ok(())
}

/// Prompts for queries until an empty line or end of input.
pub fn interactive_session<B: SearchBackend, R: BufRead, W: Write>(
    source: &RankedResultSource<B>,
    options: DisplayOptions,
    input: &mut R,
    output: &mut W,
) -> Result<()> {
    loop {
        writeln!(output, "Enter query: ")?;
        output.flush()?;

        let Some(line) = read_line(input)? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            break;
        }

        if let Err(error) = browse(source, query, options, true, input, output) {
            if error.downcast_ref::<io::Error>().is_some() {
                return Err(error);
            }
            let detail = format!("{error:#}");
            warn!(query = %query, error = %detail, "query failed");
            writeln!(output, "Query failed: {error}")?;
        }
    }
    Ok(())
}

pub fn browse<B: SearchBackend, R: BufRead, W: Write>(
    source: &RankedResultSource<B>,
    query_text: &str,
    options: DisplayOptions,
    interactive: bool,
    input: &mut R,
    output: &mut W,
) -> Result<()> {
    let mut browser = PagingBrowser::open(source, query_text, options.page_size, interactive)?;
    writeln!(output, "Searching for: {}", browser.query())?;

    if options.repeat > 0 {
        let elapsed_ms = time_repeated_search(source, browser.query(), options)?;
        info!(query = %query_text, repeat = options.repeat, elapsed_ms, "timed repeated search");
        writeln!(output, "Time: {elapsed_ms}ms")?;
    }

    writeln!(output, "{} total matching documents", browser.total_hits())?;

    loop {
        match browser.next_output()? {
            BrowserOutput::Page(view) => {
                render_page(source, browser.query(), &view, options, output)?;
            }
            BrowserOutput::Prompt(Prompt::CollectMore {
                collected,
                total_hits,
            }) => {
                writeln!(
                    output,
                    "Only results 1 - {collected} of {total_hits} total matching documents collected."
                )?;
                writeln!(output, "Collect more (y/n) ?")?;
                output.flush()?;

                let event = match read_line(input)? {
                    Some(line) => BrowserEvent::CollectMore(parse_collect_more_reply(&line)),
                    None => BrowserEvent::EndOfInput,
                };
                browser.handle(event)?;
            }
            BrowserOutput::Prompt(Prompt::Navigation {
                has_previous,
                has_next,
            }) => {
                write!(output, "Press ")?;
                if has_previous {
                    write!(output, "(p)revious page, ")?;
                }
                if has_next {
                    write!(output, "(n)ext page, ")?;
                }
                writeln!(output, "(q)uit or enter number to jump to a page.")?;
                output.flush()?;

                let Some(line) = read_line(input)? else {
                    browser.handle(BrowserEvent::EndOfInput)?;
                    continue;
                };
                let Some(navigation) = parse_navigation(&line) else {
                    writeln!(output, "Unrecognized command: {}", line.trim())?;
                    continue;
                };
                match browser.handle(BrowserEvent::Navigate(navigation)) {
                    Ok(()) => {}
                    Err(SearchError::NoSuchPage { .. }) => writeln!(output, "No such page")?,
                    Err(error) => return Err(error.into()),
                }
            }
            BrowserOutput::Finished => break,
        }
    }

    debug!(
        query = %query_text,
        state = ?browser.state(),
        collected = browser.collected_len(),
        page_start = browser.page_start(),
        "paging session closed"
    );
    Ok(())
}

fn time_repeated_search<B: SearchBackend>(
    source: &RankedResultSource<B>,
    query: &StructuredQuery,
    options: DisplayOptions,
) -> Result<u128> {
    let desired = INITIAL_PAGES_COLLECTED.saturating_mul(options.page_size);
    let started = Instant::now();
    for _ in 0..options.repeat {
        source.search_query(query.clone(), desired)?;
    }
    Ok(started.elapsed().as_millis())
}

pub fn render_page<B: SearchBackend, W: Write>(
    source: &RankedResultSource<B>,
    query: &StructuredQuery,
    view: &PageView,
    options: DisplayOptions,
    output: &mut W,
) -> Result<()> {
    for entry in &view.entries {
        if options.raw {
            writeln!(output, "doc={} score={}", entry.backend_id, entry.score)?;
            continue;
        }

        match &entry.identifier {
            Some(identifier) => {
                writeln!(output, "{}. {identifier}", entry.position)?;
                if let Some(title) = &entry.title {
                    writeln!(output, "   Title: {title}")?;
                }
            }
            None => writeln!(output, "{}. {MISSING_IDENTIFIER}", entry.position)?,
        }

        if options.explain {
            render_explanation(source, query, entry, output)?;
        }
    }
    Ok(())
}

fn render_explanation<B: SearchBackend, W: Write>(
    source: &RankedResultSource<B>,
    query: &StructuredQuery,
    entry: &PageEntry,
    output: &mut W,
) -> Result<()> {
    let explanation = source.backend().explain(query, entry.backend_id)?;
    for line in explanation.lines() {
        writeln!(output, "      {line}")?;
    }

    let metadata = source.backend().metadata(entry.backend_id)?;
    let identifier = entry.identifier.clone().unwrap_or_default();
    let Some(content_length) = metadata.content_length else {
        writeln!(output, "      adjustment unavailable: content length is missing")?;
        return Ok(());
    };

    let adjustment = source
        .adjuster()
        .explain(entry.base_score, &identifier, content_length)?;
    let rule = adjustment
        .matched_rule
        .as_ref()
        .map_or_else(|| "none".to_string(), |matcher| format!("{matcher:?}"));
    let divisor = adjustment
        .length_divisor
        .map_or_else(|| "none".to_string(), |value| format!("{value:.4}"));
    writeln!(
        output,
        "      {:.6} = {:.6} x {} (rule {rule}) / length divisor {divisor} (length {content_length})",
        adjustment.adjusted_score, adjustment.base_score, adjustment.multiplier
    )?;
    Ok(())
}

fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let read = input.read_line(&mut line).context("failed to read input")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
