use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::sync::session::Credential;

use super::{
    entities::{PersistedActivityRow, UpsertReport, UpsertRow},
    RemoteStore, StoreError,
};

const SYNC_PATH: &str = "api/activity/sync";
const ARCHIVE_PATH: &str = "api/activity/archive";
const QUERY_PATH: &str = "api/activity";
const ARCHIVED_PATH: &str = "api/activity/archived";

#[derive(Serialize)]
struct ArchiveRequest<'a> {
    url: &'a str,
}

/// [RemoteStore] speaking to the activity API:
///  - `POST api/activity/sync` with the batch as a JSON array, answered with an [UpsertReport].
///  - `POST api/activity/archive` with `{"url": ...}`.
///  - `GET api/activity?since=<rfc3339>` answered with rows, most recently visited first.
///  - `GET api/activity/archived?limit=<n>` answered with rows, most recently archived first.
///
/// Every request carries the session token as a bearer credential.
pub struct HttpStore {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStore")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, StoreError> {
        let mut base_url = Url::parse(base_url)?;
        // Without the trailing slash `join` would replace the last path segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url,
            api_key,
        })
    }

    fn authorized(&self, request: RequestBuilder, credential: &Credential) -> RequestBuilder {
        let request = request.bearer_auth(&credential.token);
        match &self.api_key {
            Some(key) => request.header("apikey", key),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn upsert(
        &self,
        credential: &Credential,
        rows: Vec<UpsertRow>,
    ) -> Result<UpsertReport, StoreError> {
        let endpoint = self.base_url.join(SYNC_PATH)?;
        let count = rows.len();
        let response = self
            .authorized(self.http.post(endpoint), credential)
            .json(&rows)
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;

        // Older deployments answer with an empty body, which means every row went through.
        if body.trim().is_empty() {
            return Ok(UpsertReport {
                written: count,
                rejected: vec![],
            });
        }
        let report: UpsertReport = serde_json::from_str(&body)?;
        debug!("Store accepted {} of {count} rows", report.written);
        Ok(report)
    }

    async fn archive(&self, credential: &Credential, url: &str) -> Result<(), StoreError> {
        let endpoint = self.base_url.join(ARCHIVE_PATH)?;
        let response = self
            .authorized(self.http.post(endpoint), credential)
            .json(&ArchiveRequest { url })
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound { url: url.into() });
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn query_since(
        &self,
        credential: &Credential,
        since: DateTime<Utc>,
    ) -> Result<Vec<PersistedActivityRow>, StoreError> {
        let mut endpoint = self.base_url.join(QUERY_PATH)?;
        endpoint
            .query_pairs_mut()
            .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Millis, true));
        let response = self
            .authorized(self.http.get(endpoint), credential)
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn query_archived(
        &self,
        credential: &Credential,
        limit: usize,
    ) -> Result<Vec<PersistedActivityRow>, StoreError> {
        let mut endpoint = self.base_url.join(ARCHIVED_PATH)?;
        endpoint
            .query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        let response = self
            .authorized(self.http.get(endpoint), credential)
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    use crate::{
        store::{entities::UpsertRow, RemoteStore, StoreError},
        sync::session::Credential,
    };

    use super::HttpStore;

    /// Answers a single request with `status` and `body`, handing back the raw request text.
    async fn respond_once(status: &'static str, body: &'static str) -> Result<(String, JoinHandle<Result<String>>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("http://{}/prefix", listener.local_addr()?);

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut request = Vec::new();
            let mut buffer = [0; 4096];
            loop {
                let read = socket.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buffer[..read]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await?;
            socket.shutdown().await?;
            Ok::<_, anyhow::Error>(String::from_utf8_lossy(&request).into_owned())
        });

        Ok((base, task))
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .filter_map(|v| v.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= length
    }

    fn credential() -> Credential {
        Credential {
            user_id: "user-1".into(),
            token: "secret".into(),
        }
    }

    #[tokio::test]
    async fn test_upsert_sends_batch_with_bearer() -> Result<()> {
        let (base, server) = respond_once("200 OK", r#"{"written": 1}"#).await?;
        let store = HttpStore::new(&base, Some("anon".into()))?;

        let report = store
            .upsert(
                &credential(),
                vec![UpsertRow {
                    url: "https://docs.rs".into(),
                    title: "Docs.rs".into(),
                    favicon_url: None,
                    visit_count: 2,
                    domain: "docs.rs".into(),
                }],
            )
            .await?;
        let request = server.await??;

        assert_eq!(report.written, 1);
        assert!(request.starts_with("POST /prefix/api/activity/sync "));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains("apikey: anon"));
        assert!(request.contains(r#""visitCount":2"#));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_reported() -> Result<()> {
        let (base, server) = respond_once("401 Unauthorized", r#"{"message": "jwt expired"}"#).await?;
        let store = HttpStore::new(&base, None)?;

        let result = store.upsert(&credential(), vec![]).await;
        server.await??;

        assert!(matches!(
            result,
            Err(StoreError::Status { status: 401, ref message }) if message.contains("jwt expired")
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_query_passes_window_start() -> Result<()> {
        let (base, server) = respond_once(
            "200 OK",
            r#"[{"url": "https://docs.rs", "domain": "docs.rs", "title": "Docs.rs", "visitCount": 3,
                "lastVisitedAt": "2018-07-04T10:00:00Z", "firstVisitedAt": "2018-07-01T10:00:00Z"}]"#,
        )
        .await?;
        let store = HttpStore::new(&base, None)?;
        let since = Utc.with_ymd_and_hms(2018, 6, 4, 0, 0, 0).unwrap();

        let rows = store.query_since(&credential(), since).await?;
        let request = server.await??;

        assert!(request.starts_with("GET /prefix/api/activity?since=2018-06-04T00%3A00%3A00.000Z "));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].visit_count, 3);
        assert!(!rows[0].is_archived);
        Ok(())
    }

    #[tokio::test]
    async fn test_archived_query_passes_limit() -> Result<()> {
        let (base, server) = respond_once(
            "200 OK",
            r#"[{"url": "https://docs.rs", "domain": "docs.rs", "title": "Docs.rs", "visitCount": 3,
                "lastVisitedAt": "2018-05-04T10:00:00Z", "firstVisitedAt": "2018-05-01T10:00:00Z",
                "isArchived": true, "archivedAt": "2018-07-04T10:00:00Z"}]"#,
        )
        .await?;
        let store = HttpStore::new(&base, None)?;

        let rows = store.query_archived(&credential(), 20).await?;
        let request = server.await??;

        assert!(request.starts_with("GET /prefix/api/activity/archived?limit=20 "));
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_archived);
        Ok(())
    }

    #[tokio::test]
    async fn test_archive_missing_row() -> Result<()> {
        let (base, server) = respond_once("404 Not Found", "").await?;
        let store = HttpStore::new(&base, None)?;

        let result = store.archive(&credential(), "https://docs.rs").await;
        server.await??;

        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        Ok(())
    }
}
