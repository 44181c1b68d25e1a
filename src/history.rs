//! History query engine
//!
//! Read-only aggregation across every page's stored notes, fed by the
//! sync engine's cached snapshot rather than the live note store, so the
//! panel can show notes from pages that are not currently rendered.

use crate::store::models::{normalize_record, Item, Position};
use chrono::{DateTime, Local, Utc};
use serde_json::{Map, Value};

/// One row of the history panel.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub page_key: String,
    pub domain: String,
    pub text: String,
    pub image_count: usize,
    pub youtube_count: usize,
    pub updated_at: i64,
    pub is_closed: bool,
}

/// Calendar bucketing for period grouping. Keys derive from local
/// calendar fields, not UTC, so "today" matches the user's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Month,
    Year,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodGroup {
    /// Stable filter key, e.g. `2024-03-05`.
    pub key: String,
    /// Human-readable form of the same period, e.g. `5 Mar 2024`.
    pub label: String,
    /// Most recent `updated_at` inside the group; groups sort by this.
    pub latest: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomainGroup {
    pub domain: String,
    pub latest: i64,
}

/// Flatten every stored record across every page key into normalized
/// entries, most recently updated first.
pub fn list_entries(snapshot: &Map<String, Value>) -> Vec<HistoryEntry> {
    let mut entries = Vec::new();
    for (page_key, raw_list) in snapshot {
        let list = match raw_list.as_array() {
            Some(list) => list,
            None => continue,
        };
        for raw in list {
            let note = normalize_record(raw, page_key, Position::default()).note;
            entries.push(HistoryEntry {
                id: note.id,
                page_key: note.owner_page_key,
                domain: note.domain,
                text: note.text,
                image_count: note
                    .items
                    .iter()
                    .filter(|i| matches!(i, Item::Image { .. }))
                    .count(),
                youtube_count: note
                    .items
                    .iter()
                    .filter(|i| matches!(i, Item::Youtube { .. }))
                    .count(),
                updated_at: note.updated_at,
                is_closed: note.is_closed,
            });
        }
    }
    entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    entries
}

fn local_time(timestamp: i64) -> DateTime<Local> {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .unwrap_or_default()
        .with_timezone(&Local)
}

/// Period bucket key for a timestamp at the given granularity.
pub fn period_key(timestamp: i64, granularity: Granularity) -> String {
    let time = local_time(timestamp);
    let format = match granularity {
        Granularity::Day => "%Y-%m-%d",
        Granularity::Month => "%Y-%m",
        Granularity::Year => "%Y",
    };
    time.format(format).to_string()
}

/// Display form of the period containing a timestamp.
pub fn period_label(timestamp: i64, granularity: Granularity) -> String {
    let time = local_time(timestamp);
    let format = match granularity {
        Granularity::Day => "%-d %b %Y",
        Granularity::Month => "%B %Y",
        Granularity::Year => "%Y",
    };
    time.format(format).to_string()
}

/// Bucket entries by period, most recent group first.
pub fn group_by_period<'a, I>(entries: I, granularity: Granularity) -> Vec<PeriodGroup>
where
    I: IntoIterator<Item = &'a HistoryEntry>,
{
    let mut groups: Vec<PeriodGroup> = Vec::new();
    for entry in entries {
        let key = period_key(entry.updated_at, granularity);
        match groups.iter_mut().find(|g| g.key == key) {
            Some(group) => group.latest = group.latest.max(entry.updated_at),
            None => groups.push(PeriodGroup {
                label: period_label(entry.updated_at, granularity),
                key,
                latest: entry.updated_at,
            }),
        }
    }
    groups.sort_by(|a, b| b.latest.cmp(&a.latest));
    groups
}

/// Bucket entries by grouping domain, most recently active domain first.
pub fn group_by_domain<'a, I>(entries: I) -> Vec<DomainGroup>
where
    I: IntoIterator<Item = &'a HistoryEntry>,
{
    let mut groups: Vec<DomainGroup> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|g| g.domain == entry.domain) {
            Some(group) => group.latest = group.latest.max(entry.updated_at),
            None => groups.push(DomainGroup {
                domain: entry.domain.clone(),
                latest: entry.updated_at,
            }),
        }
    }
    groups.sort_by(|a, b| b.latest.cmp(&a.latest));
    groups
}

/// Display title for a history row: the note's text if it has any,
/// else a media summary, else a placeholder.
pub fn entry_title(entry: &HistoryEntry) -> String {
    let trimmed = entry.text.trim();
    if !trimmed.is_empty() {
        let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
        return collapsed.chars().take(56).collect();
    }
    if entry.image_count > 0 || entry.youtube_count > 0 {
        return format!(
            "Media note ({} image, {} link)",
            entry.image_count, entry.youtube_count
        );
    }
    "Untitled note".to_string()
}

/// Result of applying a [`HistoryView`]'s filters: the period options the
/// panel can offer (always computed from the domain-filtered set) and the
/// entries that survive both filters.
#[derive(Debug)]
pub struct Selection<'a> {
    pub periods: Vec<PeriodGroup>,
    pub entries: Vec<&'a HistoryEntry>,
}

/// Composable filter state for the history panel.
///
/// The domain filter narrows the entry set before period grouping, so the
/// offered periods always reflect the domain currently shown; a period
/// selection that no longer matches any group silently resets to "all".
#[derive(Debug, Clone)]
pub struct HistoryView {
    granularity: Granularity,
    period: Option<String>,
    domain: Option<String>,
}

impl Default for HistoryView {
    fn default() -> Self {
        Self {
            granularity: Granularity::Day,
            period: None,
            domain: None,
        }
    }
}

impl HistoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn period(&self) -> Option<&str> {
        self.period.as_deref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Switching granularity invalidates the old buckets, so the period
    /// filter resets with it.
    pub fn set_granularity(&mut self, granularity: Granularity) {
        if self.granularity != granularity {
            self.granularity = granularity;
            self.period = None;
        }
    }

    pub fn set_domain(&mut self, domain: Option<String>) {
        self.domain = domain;
    }

    pub fn set_period(&mut self, period: Option<String>) {
        self.period = period;
    }

    /// Apply the filters to a flattened entry list.
    pub fn select<'a>(&mut self, entries: &'a [HistoryEntry]) -> Selection<'a> {
        let by_domain: Vec<&HistoryEntry> = entries
            .iter()
            .filter(|e| match &self.domain {
                Some(domain) => e.domain == *domain,
                None => true,
            })
            .collect();

        let periods = group_by_period(by_domain.iter().copied(), self.granularity);

        if let Some(period) = &self.period {
            if !periods.iter().any(|g| g.key == *period) {
                tracing::debug!("stale period selection {} reset to all", period);
                self.period = None;
            }
        }

        let entries = by_domain
            .into_iter()
            .filter(|e| match &self.period {
                Some(period) => period_key(e.updated_at, self.granularity) == *period,
                None => true,
            })
            .collect();

        Selection { periods, entries }
    }
}
