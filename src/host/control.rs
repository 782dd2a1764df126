use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    recommend::{scorer::Recommendations, ArchiveOutcome, Recommender},
    sync::session::{Session, SessionStore},
    tracker::{
        activity::ActivityStats, events::TabHandle, module::TrackerHandle, record::ActivityRecord,
    },
    utils::clock::Clock,
};

use super::{HostTab, TabHost};

/// A live tab together with what the tracker knows about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedTab {
    #[serde(flatten)]
    pub tab: HostTab,
    pub activity: Option<ActivityRecord>,
}

/// Session as shown to the UI. The token never leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub user_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ControlRequest {
    GetSession,
    SetSession { session: Session },
    ClearSession,
    GetTabs,
    #[serde(rename_all = "camelCase")]
    SwitchTab { tab_id: TabHandle },
    #[serde(rename_all = "camelCase")]
    CloseTab { tab_id: TabHandle },
    GetStats,
    Recommend,
    Archive { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ControlResponse {
    Session(Option<SessionView>),
    Tabs(Vec<EnrichedTab>),
    Stats(ActivityStats),
    Recommendations(Recommendations),
    Done,
    Error(String),
}

/// Operations the UI and session layers call. Failures are turned into [ControlResponse::Error]
/// by [ControlSurface::handle], the individual operations return them as usual.
pub struct ControlSurface {
    host: Arc<dyn TabHost>,
    tracker: TrackerHandle,
    session: Arc<SessionStore>,
    recommender: Arc<Recommender>,
    clock: Box<dyn Clock>,
}

impl ControlSurface {
    pub fn new(
        host: Arc<dyn TabHost>,
        tracker: TrackerHandle,
        session: Arc<SessionStore>,
        recommender: Arc<Recommender>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            host,
            tracker,
            session,
            recommender,
            clock,
        }
    }

    pub fn session(&self) -> Option<SessionView> {
        let now = self.clock.time();
        self.session.current().map(|v| SessionView {
            valid: v.is_valid_at(now),
            user_id: v.user_id,
            expires_at: v.expires_at,
        })
    }

    pub async fn set_session(&self, session: Session) -> Result<()> {
        self.session.set(session).await
    }

    pub async fn clear_session(&self) -> Result<()> {
        self.session.clear().await
    }

    pub async fn tabs(&self) -> Result<Vec<EnrichedTab>> {
        let tabs = self.host.query_tabs().await?;
        let mut records: HashMap<TabHandle, ActivityRecord> = self
            .tracker
            .records()
            .await?
            .into_iter()
            .map(|v| (v.tab_handle, v))
            .collect();

        Ok(tabs
            .into_iter()
            .map(|tab| EnrichedTab {
                activity: records.remove(&tab.tab_id),
                tab,
            })
            .collect())
    }

    pub async fn switch_to(&self, handle: TabHandle) -> Result<()> {
        self.host.switch_to(handle).await
    }

    pub async fn close(&self, handle: TabHandle) -> Result<()> {
        self.host.close(handle).await
    }

    pub async fn stats(&self) -> Result<ActivityStats> {
        self.tracker.stats().await
    }

    pub async fn recommend(&self) -> Recommendations {
        self.recommender.recommend().await
    }

    pub async fn archive(&self, url: &str) -> Result<()> {
        match self.recommender.archive(url).await? {
            ArchiveOutcome::Archived => Ok(()),
            ArchiveOutcome::NoCredential => Err(anyhow!("Sign in to archive tabs")),
        }
    }

    pub async fn handle(&self, request: ControlRequest) -> ControlResponse {
        let response = match request {
            ControlRequest::GetSession => Ok(ControlResponse::Session(self.session())),
            ControlRequest::SetSession { session } => {
                self.set_session(session).await.map(|_| ControlResponse::Done)
            }
            ControlRequest::ClearSession => self.clear_session().await.map(|_| ControlResponse::Done),
            ControlRequest::GetTabs => self.tabs().await.map(ControlResponse::Tabs),
            ControlRequest::SwitchTab { tab_id } => {
                self.switch_to(tab_id).await.map(|_| ControlResponse::Done)
            }
            ControlRequest::CloseTab { tab_id } => {
                self.close(tab_id).await.map(|_| ControlResponse::Done)
            }
            ControlRequest::GetStats => self.stats().await.map(ControlResponse::Stats),
            ControlRequest::Recommend => Ok(ControlResponse::Recommendations(self.recommend().await)),
            ControlRequest::Archive { url } => {
                self.archive(&url).await.map(|_| ControlResponse::Done)
            }
        };

        response.unwrap_or_else(|e| {
            error!("Control request failed {e:?}");
            ControlResponse::Error(e.to_string())
        })
    }
}
