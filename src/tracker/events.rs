use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier the browser assigns to a tab. Only unique within the current browser session, so it
/// is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabHandle(pub i64);

impl Display for TabHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the browser currently knows about a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabMetadata {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub favicon_url: Option<String>,
}

/// Lifecycle signals delivered by the tab host. Timestamps travel as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TabEvent {
    /// A tab became the visible one. The host attaches the tab's metadata when it has it.
    #[serde(rename_all = "camelCase")]
    FocusChanged {
        tab_id: TabHandle,
        #[serde(default)]
        metadata: Option<TabMetadata>,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        at: DateTime<Utc>,
    },
    /// A tab finished navigating.
    #[serde(rename_all = "camelCase")]
    MetadataUpdated {
        tab_id: TabHandle,
        metadata: TabMetadata,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Closed {
        tab_id: TabHandle,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        at: DateTime<Utc>,
    },
}

impl TabEvent {
    pub fn handle(&self) -> TabHandle {
        match self {
            TabEvent::FocusChanged { tab_id, .. }
            | TabEvent::MetadataUpdated { tab_id, .. }
            | TabEvent::Closed { tab_id, .. } => *tab_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            TabEvent::FocusChanged { at, .. }
            | TabEvent::MetadataUpdated { at, .. }
            | TabEvent::Closed { at, .. } => *at,
        }
    }
}
