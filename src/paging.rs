use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{BackendId, SearchBackend};
use crate::error::SearchError;
use crate::ranking::{CandidateResult, RankedResultSource, StructuredQuery};

/// Pages collected up front before the first re-fetch prompt.
pub const INITIAL_PAGES_COLLECTED: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserState {
    Active,
    AwaitingMorePrompt,
    AwaitingNavigation,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Previous,
    Next,
    Quit,
    /// 1-based page number.
    Jump(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEvent {
    CollectMore(bool),
    Navigate(Navigation),
    EndOfInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageEntry {
    pub position: usize,
    pub backend_id: BackendId,
    pub base_score: f64,
    pub score: f64,
    pub identifier: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageView {
    pub query: String,
    pub start: usize,
    pub end: usize,
    pub total_hits: usize,
    pub collected: usize,
    pub entries: Vec<PageEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    CollectMore {
        collected: usize,
        total_hits: usize,
    },
    Navigation {
        has_previous: bool,
        has_next: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrowserOutput {
    Page(PageView),
    Prompt(Prompt),
    Finished,
}

pub struct PagingBrowser<'s, B> {
    source: &'s RankedResultSource<B>,
    query: StructuredQuery,
    page_size: usize,
    interactive: bool,
    collected: Vec<CandidateResult>,
    total_hits: usize,
    page_start: usize,
    state: BrowserState,
    declined_more: bool,
    exhausted: bool,
}

impl<'s, B: SearchBackend> PagingBrowser<'s, B> {
    pub fn open(
        source: &'s RankedResultSource<B>,
        query_text: &str,
        page_size: usize,
        interactive: bool,
    ) -> Result<Self, SearchError> {
        let page_size = page_size.max(1);
        let query = source.build_query(query_text)?;
        let results =
            source.search_query(query.clone(), INITIAL_PAGES_COLLECTED.saturating_mul(page_size))?;

        info!(
            query = %query.raw,
            total_hits = results.total_hits,
            collected = results.candidates.len(),
            "opened paging session"
        );

        let exhausted = results.candidates.len() >= results.total_hits;
        Ok(Self {
            source,
            query,
            page_size,
            interactive,
            collected: results.candidates,
            total_hits: results.total_hits,
            page_start: 0,
            state: BrowserState::Active,
            declined_more: false,
            exhausted,
        })
    }

    /// Renders exactly one page and terminates.
    pub fn first_page(
        source: &'s RankedResultSource<B>,
        query_text: &str,
        page_size: usize,
    ) -> Result<PageView, SearchError> {
        let mut browser = Self::open(source, query_text, page_size, false)?;
        match browser.next_output()? {
            BrowserOutput::Page(view) => Ok(view),
            BrowserOutput::Prompt(_) | BrowserOutput::Finished => Ok(browser.current_page()),
        }
    }

    pub fn state(&self) -> BrowserState {
        self.state
    }

    pub fn query(&self) -> &StructuredQuery {
        &self.query
    }

    pub fn total_hits(&self) -> usize {
        self.total_hits
    }

    pub fn collected_len(&self) -> usize {
        self.collected.len()
    }

    pub fn page_start(&self) -> usize {
        self.page_start
    }

    pub fn next_output(&mut self) -> Result<BrowserOutput, SearchError> {
        match self.state {
            BrowserState::Active => {
                if self.interactive && self.needs_more() {
                    self.state = BrowserState::AwaitingMorePrompt;
                    return Ok(BrowserOutput::Prompt(self.collect_more_prompt()));
                }

                let view = self.current_page();
                self.state = if !self.interactive || view.end == 0 || !self.has_multiple_pages() {
                    BrowserState::Terminated
                } else {
                    BrowserState::AwaitingNavigation
                };
                Ok(BrowserOutput::Page(view))
            }
            BrowserState::AwaitingMorePrompt => {
                Ok(BrowserOutput::Prompt(self.collect_more_prompt()))
            }
            BrowserState::AwaitingNavigation => Ok(BrowserOutput::Prompt(Prompt::Navigation {
                has_previous: self.page_start >= self.page_size,
                has_next: self.page_start + self.page_size < self.total_hits,
            })),
            BrowserState::Terminated => Ok(BrowserOutput::Finished),
        }
    }

    pub fn handle(&mut self, event: BrowserEvent) -> Result<(), SearchError> {
        match (self.state, event) {
            (BrowserState::Terminated, _) => {}
            (_, BrowserEvent::EndOfInput) => self.state = BrowserState::Terminated,
            (BrowserState::AwaitingMorePrompt, BrowserEvent::CollectMore(true)) => {
                self.collect_all()?;
                self.state = BrowserState::Active;
            }
            (BrowserState::AwaitingMorePrompt, BrowserEvent::CollectMore(false)) => {
                self.declined_more = true;
                self.page_start = self.last_collected_page_start();
                self.state = BrowserState::Active;
            }
            (BrowserState::AwaitingNavigation, BrowserEvent::Navigate(navigation)) => {
                self.navigate(navigation)?;
            }
            (state, event) => {
                debug!(?state, ?event, "ignoring event not accepted in current state");
            }
        }
        Ok(())
    }

    pub fn current_page(&self) -> PageView {
        let start = self.page_start;
        let end = self
            .collected
            .len()
            .min(start + self.page_size)
            .max(start);
        let entries = self
            .collected
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(offset, candidate)| PageEntry {
                position: start + offset + 1,
                backend_id: candidate.backend_id,
                base_score: candidate.base_score,
                score: candidate.adjusted_score,
                identifier: candidate.identifier.clone(),
                title: candidate.title.clone(),
            })
            .collect::<Vec<PageEntry>>();

        PageView {
            query: self.query.raw.clone(),
            start,
            end: start + entries.len(),
            total_hits: self.total_hits,
            collected: self.collected.len(),
            entries,
        }
    }

    fn needs_more(&self) -> bool {
        let end = self.total_hits.min(self.page_start + self.page_size);
        end > self.collected.len() && !self.exhausted && !self.declined_more
    }

    /// Keeps the current page when it has collected hits, else the last page that does.
    fn last_collected_page_start(&self) -> usize {
        match self.collected.len() {
            0 => 0,
            len if self.page_start < len => self.page_start,
            len => (len - 1) / self.page_size * self.page_size,
        }
    }

    fn has_multiple_pages(&self) -> bool {
        self.total_hits > self.page_size
    }

    fn collect_more_prompt(&self) -> Prompt {
        Prompt::CollectMore {
            collected: self.collected.len(),
            total_hits: self.total_hits,
        }
    }

    fn collect_all(&mut self) -> Result<(), SearchError> {
        let results = self
            .source
            .search_query(self.query.clone(), self.total_hits)?;

        if results.candidates.len() >= self.collected.len() {
            self.collected = results.candidates;
        } else {
            warn!(
                query = %self.query.raw,
                previous = self.collected.len(),
                refetched = results.candidates.len(),
                "re-fetch returned fewer hits; keeping collected set"
            );
        }
        self.total_hits = results.total_hits.max(self.collected.len());

        if self.collected.len() < self.total_hits {
            warn!(
                query = %self.query.raw,
                collected = self.collected.len(),
                total_hits = self.total_hits,
                "backend could not supply every matching document"
            );
            self.exhausted = true;
        }
        self.page_start = self.page_start.min(self.total_hits);

        info!(
            query = %self.query.raw,
            collected = self.collected.len(),
            "collected remaining hits"
        );
        Ok(())
    }

    fn navigate(&mut self, navigation: Navigation) -> Result<(), SearchError> {
        match navigation {
            Navigation::Quit => {
                self.state = BrowserState::Terminated;
                return Ok(());
            }
            Navigation::Previous => {
                self.page_start = self.page_start.saturating_sub(self.page_size);
            }
            Navigation::Next => {
                if self.page_start + self.page_size < self.total_hits {
                    self.page_start += self.page_size;
                }
            }
            Navigation::Jump(page) => {
                let target = page
                    .checked_sub(1)
                    .and_then(|index| index.checked_mul(self.page_size))
                    .filter(|start| *start < self.total_hits);
                let Some(start) = target else {
                    return Err(SearchError::NoSuchPage { page });
                };
                self.page_start = start;
            }
        }

        self.declined_more = false;
        self.state = BrowserState::Active;
        Ok(())
    }
}

pub fn parse_collect_more_reply(line: &str) -> bool {
    let trimmed = line.trim();
    !(trimmed.is_empty() || trimmed.starts_with(['n', 'N']))
}

pub fn parse_navigation(line: &str) -> Option<Navigation> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Some(Navigation::Quit);
    }

    match trimmed.chars().next() {
        Some('q' | 'Q') => Some(Navigation::Quit),
        Some('p' | 'P') => Some(Navigation::Previous),
        Some('n' | 'N') => Some(Navigation::Next),
        _ => trimmed.parse::<usize>().ok().map(Navigation::Jump),
    }
}
