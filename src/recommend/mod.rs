//! Resurfacing of past tabs. [scorer] holds the pure ranking, [Recommender] feeds it rows from the
//! remote store on behalf of the signed-in user.

pub mod scorer;

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info};

use crate::{
    store::{RemoteStore, StoreError},
    sync::session::SessionProvider,
    utils::clock::Clock,
};

use scorer::{rank, Recommendations, ARCHIVED_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived,
    NoCredential,
}

pub struct Recommender {
    store: Arc<dyn RemoteStore>,
    session: Arc<dyn SessionProvider>,
    clock: Box<dyn Clock>,
    lookback: Duration,
}

impl Recommender {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionProvider>,
        clock: Box<dyn Clock>,
        lookback: Duration,
    ) -> Self {
        Self {
            store,
            session,
            clock,
            lookback,
        }
    }

    /// Ranked rows for the signed-in user. Signed out or unreachable store both give empty lists.
    pub async fn recommend(&self) -> Recommendations {
        match self.try_recommend().await {
            Ok(Some(recommendations)) => recommendations,
            Ok(None) => {
                debug!("No valid session, nothing to recommend");
                Recommendations::default()
            }
            Err(e) => {
                error!("Failed to fetch activity for recommendations {e:?}");
                Recommendations::default()
            }
        }
    }

    pub async fn try_recommend(&self) -> Result<Option<Recommendations>, StoreError> {
        let now = self.clock.time();
        let Some(credential) = self.session.credential(now) else {
            return Ok(None);
        };
        let rows = self.store.query_since(&credential, now - self.lookback).await?;
        let archived = self.store.query_archived(&credential, ARCHIVED_LIMIT).await?;
        Ok(Some(rank(&rows, &archived, now, self.lookback)))
    }

    pub async fn archive(&self, url: &str) -> Result<ArchiveOutcome, StoreError> {
        let Some(credential) = self.session.credential(self.clock.time()) else {
            return Ok(ArchiveOutcome::NoCredential);
        };
        self.store.archive(&credential, url).await?;
        info!("Archived {url}");
        Ok(ArchiveOutcome::Archived)
    }
}
