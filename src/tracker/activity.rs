use std::collections::{hash_map::Entry, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{extract_domain, top_domains};

use super::{
    accountant::{ActiveFocus, TimeAccountant},
    events::{TabEvent, TabHandle, TabMetadata},
    filter::TrackableFilter,
    record::{ActivityRecord, RecordMap},
};

const TOP_DOMAIN_COUNT: usize = 5;

/// Aggregate view over the live records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub tab_count: usize,
    pub total_dwell_time_ms: u64,
    /// Domains with the most visits, at most five.
    pub top_domains: Vec<(String, u64)>,
}

/// Maintains activity records from tab lifecycle signals.
///
/// Every handler returns whether the sync debouncer should be signalled. Closing a tab removes its
/// record without signalling, so whatever it gathered since the last flush is not persisted.
pub struct ActivityTracker {
    records: RecordMap,
    accountant: TimeAccountant,
    filter: TrackableFilter,
}

impl ActivityTracker {
    pub fn new(filter: TrackableFilter) -> Self {
        Self {
            records: HashMap::new(),
            accountant: TimeAccountant::default(),
            filter,
        }
    }

    pub fn apply(&mut self, event: &TabEvent) -> bool {
        match event {
            TabEvent::FocusChanged {
                tab_id,
                metadata,
                at,
            } => self.on_focus_changed(*tab_id, metadata.as_ref(), *at),
            TabEvent::MetadataUpdated {
                tab_id,
                metadata,
                at,
            } => self.on_metadata_updated(*tab_id, metadata, *at),
            TabEvent::Closed { tab_id, at } => self.on_closed(*tab_id, *at),
        }
    }

    /// Moves the focus pointer and counts a visit for the newly focused tab. A tab with no record
    /// gets one only if the host told us a trackable URL for it.
    pub fn on_focus_changed(
        &mut self,
        handle: TabHandle,
        metadata: Option<&TabMetadata>,
        now: DateTime<Utc>,
    ) -> bool {
        let credited = self.accountant.activate(handle, now, &mut self.records);
        let visited = self.visit(handle, metadata, now);
        credited.is_some() || visited
    }

    /// Navigation finished. Counted as a visit of its own, so a click that both focuses and
    /// navigates a tab increments the visit count twice.
    pub fn on_metadata_updated(
        &mut self,
        handle: TabHandle,
        metadata: &TabMetadata,
        now: DateTime<Utc>,
    ) -> bool {
        self.visit(handle, Some(metadata), now)
    }

    pub fn on_closed(&mut self, handle: TabHandle, now: DateTime<Utc>) -> bool {
        if self.accountant.active().map(|v| v.handle) == Some(handle) {
            self.accountant.finalize(now, &mut self.records);
        }
        if let Some(record) = self.records.remove(&handle) {
            debug!(
                "Dropped record for closed tab {handle} with {} visits",
                record.visit_count
            );
        }
        false
    }

    fn visit(&mut self, handle: TabHandle, metadata: Option<&TabMetadata>, now: DateTime<Utc>) -> bool {
        if let Some(metadata) = metadata {
            if !self.filter.is_trackable(&metadata.url) {
                // The tab navigated somewhere we never track, so it can't keep a record either.
                if self.records.remove(&handle).is_some() {
                    debug!("Tab {handle} moved to an untracked url");
                }
                return false;
            }
        }

        match self.records.entry(handle) {
            Entry::Occupied(entry) => {
                let record = entry.into_mut();
                if let Some(metadata) = metadata {
                    record.refresh(metadata);
                }
                record.visit(now);
            }
            Entry::Vacant(entry) => {
                let Some(metadata) = metadata else {
                    return false;
                };
                debug!("Tracking tab {handle} at {}", metadata.url);
                entry
                    .insert(ActivityRecord::new(handle, metadata, now))
                    .visit(now);
            }
        }
        true
    }

    pub fn record(&self, handle: TabHandle) -> Option<&ActivityRecord> {
        self.records.get(&handle)
    }

    pub fn active(&self) -> Option<ActiveFocus> {
        self.accountant.active()
    }

    /// Copy of every live record, ordered by handle.
    pub fn snapshot(&self) -> Vec<ActivityRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by_key(|v| v.tab_handle);
        records
    }

    /// Dwell time only covers finished periods, the running one is credited on the next switch.
    pub fn stats(&self) -> ActivityStats {
        let mut visits_per_domain = HashMap::<String, u64>::new();
        let mut total_dwell_time_ms = 0;

        for record in self.records.values() {
            total_dwell_time_ms += record.total_dwell_time_ms;
            // Malformed urls still count towards the totals but never get a bucket.
            if let Some(domain) = extract_domain(&record.url) {
                *visits_per_domain.entry(domain).or_default() += record.visit_count;
            }
        }

        ActivityStats {
            tab_count: self.records.len(),
            total_dwell_time_ms,
            top_domains: top_domains(visits_per_domain, TOP_DOMAIN_COUNT),
        }
    }
}
