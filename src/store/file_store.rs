use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs4::tokio::AsyncFileExt;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, warn};

use crate::{sync::session::Credential, utils::clock::Clock};

use super::{
    entities::{PersistedActivityRow, RejectedRow, UpsertReport, UpsertRow},
    RemoteStore, StoreError,
};

/// On-disk layout: rows per user, each list in insertion order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    users: BTreeMap<String, Vec<PersistedActivityRow>>,
}

/// [RemoteStore] backed by a single JSON document. Every operation holds a file lock for its whole
/// read-modify-write, so a CLI invocation and a running service can share the file.
pub struct FileStore {
    path: PathBuf,
    clock: Box<dyn Clock>,
}

impl FileStore {
    pub fn new(path: PathBuf, clock: Box<dyn Clock>) -> Result<Self, std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path, clock })
    }

    async fn open(&self) -> Result<File, StoreError> {
        Ok(File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(&self.path)
            .await?)
    }

    async fn read_document(file: &mut File) -> Result<StoreDocument, StoreError> {
        let mut content = String::new();
        file.rewind().await?;
        file.read_to_string(&mut content).await?;
        if content.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_document(file: &mut File, document: &StoreDocument) -> Result<(), StoreError> {
        let buffer = serde_json::to_vec_pretty(document)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }

    /// Runs `change` against the user's rows under an exclusive lock and writes the result back.
    async fn modify<T>(
        &self,
        user_id: &str,
        change: impl FnOnce(&mut Vec<PersistedActivityRow>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut file = self.open().await?;
        file.lock_exclusive()?;
        let result: Result<T, StoreError> = async {
            let mut document = Self::read_document(&mut file).await?;
            let value = change(document.users.entry(user_id.to_string()).or_default())?;
            Self::write_document(&mut file, &document).await?;
            Ok(value)
        }
        .await;
        file.unlock_async().await?;
        result
    }

    async fn read_rows(&self, user_id: &str) -> Result<Vec<PersistedActivityRow>, StoreError> {
        let mut file = self.open().await?;
        file.lock_shared()?;
        let result = Self::read_document(&mut file).await;
        file.unlock_async().await?;
        Ok(result?.users.remove(user_id).unwrap_or_default())
    }
}

fn apply_upsert(
    rows: &mut Vec<PersistedActivityRow>,
    batch: Vec<UpsertRow>,
    now: DateTime<Utc>,
) -> UpsertReport {
    let mut report = UpsertReport::default();
    let mut seen = HashSet::new();

    for row in batch {
        if row.url.trim().is_empty() {
            warn!("Rejecting row without url {:?}", row);
            report.rejected.push(RejectedRow {
                url: row.url,
                reason: "url is empty".into(),
            });
            continue;
        }
        // `(user, url)` is the conflict key, a batch may only touch it once.
        if !seen.insert(row.url.clone()) {
            warn!("Rejecting repeated url {} in one batch", row.url);
            report.rejected.push(RejectedRow {
                url: row.url,
                reason: "url repeated within the batch".into(),
            });
            continue;
        }

        match rows.iter_mut().find(|v| v.url == row.url) {
            Some(existing) => {
                existing.domain = row.domain;
                existing.title = row.title;
                existing.favicon_url = row.favicon_url;
                existing.visit_count = row.visit_count;
                existing.last_visited_at = now;
            }
            None => rows.push(PersistedActivityRow {
                url: row.url,
                domain: row.domain,
                title: row.title,
                favicon_url: row.favicon_url,
                visit_count: row.visit_count,
                last_visited_at: now,
                first_visited_at: now,
                is_archived: false,
                archived_at: None,
            }),
        }
        report.written += 1;
    }

    report
}

#[async_trait]
impl RemoteStore for FileStore {
    async fn upsert(
        &self,
        credential: &Credential,
        rows: Vec<UpsertRow>,
    ) -> Result<UpsertReport, StoreError> {
        let now = self.clock.time();
        let report = self
            .modify(&credential.user_id, |stored| Ok(apply_upsert(stored, rows, now)))
            .await?;
        debug!("Upserted {} rows into {:?}", report.written, self.path);
        Ok(report)
    }

    async fn archive(&self, credential: &Credential, url: &str) -> Result<(), StoreError> {
        let now = self.clock.time();
        self.modify(&credential.user_id, |stored| {
            let row = stored
                .iter_mut()
                .find(|v| v.url == url)
                .ok_or_else(|| StoreError::NotFound { url: url.into() })?;
            if !row.is_archived {
                row.is_archived = true;
                row.archived_at = Some(now);
            }
            Ok(())
        })
        .await
    }

    async fn query_since(
        &self,
        credential: &Credential,
        since: DateTime<Utc>,
    ) -> Result<Vec<PersistedActivityRow>, StoreError> {
        let mut rows = self.read_rows(&credential.user_id).await?;
        rows.retain(|v| v.last_visited_at >= since);
        Ok(rows)
    }

    async fn query_archived(
        &self,
        credential: &Credential,
        limit: usize,
    ) -> Result<Vec<PersistedActivityRow>, StoreError> {
        let mut rows = self.read_rows(&credential.user_id).await?;
        rows.retain(|v| v.is_archived);
        rows.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        rows.truncate(limit);
        Ok(rows)
    }
}
