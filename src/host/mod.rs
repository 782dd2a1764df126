//! The browser side of the application.
//! [TabHost] is the contract the browser must fulfil, [native::NativeHost] fulfils it over the
//! native messaging channel and [control::ControlSurface] is what the popup UI talks to.

pub mod control;
pub mod native;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tracker::events::TabHandle;

/// A tab as the browser currently shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostTab {
    pub tab_id: TabHandle,
    pub url: String,
    pub title: String,
    pub favicon_url: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Open tabs, ordered by handle.
    async fn query_tabs(&self) -> Result<Vec<HostTab>>;

    async fn switch_to(&self, handle: TabHandle) -> Result<()>;

    async fn close(&self, handle: TabHandle) -> Result<()>;
}
