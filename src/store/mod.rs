//! Durable side of the activity data. [RemoteStore] is the upsert/query contract, with two
//! realizations:
//!  - [file_store::FileStore] keeps rows in a locked JSON document on the local disk.
//!  - [http_store::HttpStore] talks to a row API over HTTP with the session's bearer token.

pub mod entities;
pub mod file_store;
pub mod http_store;

use std::{path::Path, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    sync::session::Credential,
    utils::{clock::Clock, config::StoreConfig},
};

use entities::{PersistedActivityRow, UpsertReport, UpsertRow};
use file_store::FileStore;
use http_store::HttpStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid store url: {0}")]
    Url(#[from] url::ParseError),
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed store data: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no row stored for {url}")]
    NotFound { url: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Writes the batch. Rows the store refuses are reported back instead of failing the batch.
    async fn upsert(
        &self,
        credential: &Credential,
        rows: Vec<UpsertRow>,
    ) -> Result<UpsertReport, StoreError>;

    /// Marks the row archived. An archived row stays archived.
    async fn archive(&self, credential: &Credential, url: &str) -> Result<(), StoreError>;

    /// Rows of the user last visited at or after `since`, in store order.
    async fn query_since(
        &self,
        credential: &Credential,
        since: DateTime<Utc>,
    ) -> Result<Vec<PersistedActivityRow>, StoreError>;

    /// The `limit` most recently archived rows of the user, newest first, however long ago they
    /// were last visited.
    async fn query_archived(
        &self,
        credential: &Credential,
        limit: usize,
    ) -> Result<Vec<PersistedActivityRow>, StoreError>;
}

pub fn open_store(
    config: &StoreConfig,
    app_dir: &Path,
    clock: impl Clock,
) -> Result<Arc<dyn RemoteStore>> {
    Ok(match config {
        StoreConfig::File { path } => {
            let path = path.clone().unwrap_or_else(|| app_dir.join("store.json"));
            Arc::new(FileStore::new(path, Box::new(clock))?)
        }
        StoreConfig::Http { base_url, api_key } => {
            Arc::new(HttpStore::new(base_url, api_key.clone())?)
        }
    })
}
