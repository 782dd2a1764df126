use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{TabHandle, TabMetadata};

pub type RecordMap = HashMap<TabHandle, ActivityRecord>;

/// Usage statistics of a single tab during the current browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub tab_handle: TabHandle,
    pub url: String,
    pub title: String,
    pub favicon_url: Option<String>,
    pub visit_count: u64,
    pub total_dwell_time_ms: u64,
    pub first_visit_at: DateTime<Utc>,
    pub last_visit_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub(super) fn new(tab_handle: TabHandle, metadata: &TabMetadata, now: DateTime<Utc>) -> Self {
        Self {
            tab_handle,
            url: metadata.url.clone(),
            title: metadata.title.clone(),
            favicon_url: metadata.favicon_url.clone(),
            visit_count: 0,
            total_dwell_time_ms: 0,
            first_visit_at: now,
            last_visit_at: now,
        }
    }

    pub(super) fn refresh(&mut self, metadata: &TabMetadata) {
        self.url.clone_from(&metadata.url);
        self.title.clone_from(&metadata.title);
        self.favicon_url.clone_from(&metadata.favicon_url);
    }

    pub(super) fn visit(&mut self, now: DateTime<Utc>) {
        self.visit_count += 1;
        self.last_visit_at = now;
    }
}
