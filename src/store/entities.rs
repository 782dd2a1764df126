use std::collections::{hash_map::Entry, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::domain_or_raw, tracker::record::ActivityRecord};

/// One element of the batched sync request. The store resolves conflicts on `(user, url)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertRow {
    pub url: String,
    pub title: String,
    pub favicon_url: Option<String>,
    pub visit_count: u64,
    pub domain: String,
}

impl From<&ActivityRecord> for UpsertRow {
    fn from(record: &ActivityRecord) -> Self {
        UpsertRow {
            url: record.url.clone(),
            title: record.title.clone(),
            favicon_url: record.favicon_url.clone(),
            visit_count: record.visit_count,
            domain: domain_or_raw(&record.url),
        }
    }
}

/// Builds one upsert row per url. Tabs open on the same url add up their visits, title and
/// favicon come from the most recently visited of them. Rows keep the order of the first record
/// seen for each url.
pub fn merge_by_url(records: &[ActivityRecord]) -> Vec<UpsertRow> {
    let mut rows: Vec<(UpsertRow, DateTime<Utc>)> = Vec::with_capacity(records.len());
    let mut positions = HashMap::<&str, usize>::new();

    for record in records {
        match positions.entry(record.url.as_str()) {
            Entry::Occupied(entry) => {
                let (row, last_visit_at) = &mut rows[*entry.get()];
                row.visit_count += record.visit_count;
                if record.last_visit_at > *last_visit_at {
                    row.title = record.title.clone();
                    row.favicon_url = record.favicon_url.clone();
                    *last_visit_at = record.last_visit_at;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(rows.len());
                rows.push((UpsertRow::from(record), record.last_visit_at));
            }
        }
    }

    rows.into_iter().map(|(row, _)| row).collect()
}

/// Row kept by the remote store for every `(user, url)` ever synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedActivityRow {
    pub url: String,
    pub domain: String,
    pub title: String,
    #[serde(default)]
    pub favicon_url: Option<String>,
    pub visit_count: u64,
    pub last_visited_at: DateTime<Utc>,
    pub first_visited_at: DateTime<Utc>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

/// A row the store refused while the rest of its batch went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub written: usize,
    #[serde(default)]
    pub rejected: Vec<RejectedRow>,
}
