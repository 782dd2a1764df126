//! Tracks how browser tabs are used and brings back the ones worth returning to.
//! The browser extension streams tab lifecycle events to a native messaging host. The host keeps
//! per-tab activity records and syncs them to a store once things go quiet, the popup then gets
//! past pages ranked from that store.
//!

pub mod cli;
pub mod domain;
pub mod host;
pub mod recommend;
pub mod service;
pub mod store;
pub mod sync;
pub mod tracker;
pub mod utils;
