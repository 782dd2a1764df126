use chrono::{DateTime, Utc};
use tracing::debug;

use super::{events::TabHandle, record::RecordMap};

/// The tab currently on screen and the moment it got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFocus {
    pub handle: TabHandle,
    pub since: DateTime<Utc>,
}

/// Attributes elapsed wall-clock time to the tab that was visible. Holds the focus pointer, so
/// there is at most one active tab per tracker.
#[derive(Debug, Default)]
pub struct TimeAccountant {
    focus: Option<ActiveFocus>,
}

impl TimeAccountant {
    pub fn active(&self) -> Option<ActiveFocus> {
        self.focus
    }

    /// Closes the running dwell period and makes `handle` the active tab. Returns the tab that got
    /// credited, if any.
    pub fn activate(
        &mut self,
        handle: TabHandle,
        now: DateTime<Utc>,
        records: &mut RecordMap,
    ) -> Option<TabHandle> {
        let credited = self.settle(now, records);
        self.focus = Some(ActiveFocus { handle, since: now });
        credited
    }

    /// Closes the running dwell period and clears the pointer.
    pub fn finalize(&mut self, now: DateTime<Utc>, records: &mut RecordMap) -> Option<TabHandle> {
        let credited = self.settle(now, records);
        self.focus = None;
        credited
    }

    fn settle(&self, now: DateTime<Utc>, records: &mut RecordMap) -> Option<TabHandle> {
        let focus = self.focus?;
        // A clock stepping backwards must never shrink dwell time.
        let delta = u64::try_from((now - focus.since).num_milliseconds()).unwrap_or(0);

        match records.get_mut(&focus.handle) {
            Some(record) => {
                record.total_dwell_time_ms += delta;
                Some(focus.handle)
            }
            None => {
                debug!("Dropping {delta}ms of dwell time for untracked tab {}", focus.handle);
                None
            }
        }
    }
}
