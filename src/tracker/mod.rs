//! In-memory tab activity.
//!  - [events::TabEvent] is what the tab host delivers.
//!  - [activity::ActivityTracker] turns events into [record::ActivityRecord]s and drives the
//!    [accountant::TimeAccountant].
//!  - [module::TrackerModule] owns the tracker inside a single task and publishes snapshots for
//!    the sync module.

pub mod accountant;
pub mod activity;
pub mod events;
pub mod filter;
pub mod module;
pub mod record;
