use std::{fmt, io::ErrorKind, path::PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

/// Signed-in user as handed over by the session layer.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires_at.map_or(true, |v| v > now)
    }
}

/// What a store needs to act on behalf of a user: the row owner and the bearer token.
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub user_id: String,
    pub token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait SessionProvider: Send + Sync {
    /// Credential usable at `now`, if a valid session exists.
    fn credential(&self, now: DateTime<Utc>) -> Option<Credential>;
}

/// Holds the current session and mirrors it into `session.json` when a path is given.
pub struct SessionStore {
    current: watch::Sender<Option<Session>>,
    path: Option<PathBuf>,
}

impl SessionStore {
    pub fn in_memory(session: Option<Session>) -> Self {
        Self {
            current: watch::Sender::new(session),
            path: None,
        }
    }

    /// Restores the session saved at `path`. A missing or unreadable file starts signed out.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let session = match tokio::fs::read(&path).await {
            Ok(content) => match serde_json::from_slice::<Session>(&content) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Ignoring corrupted session file {path:?}: {e}");
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => Err(e)?,
        };

        Ok(Self {
            current: watch::Sender::new(session),
            path: Some(path),
        })
    }

    pub fn current(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    pub async fn set(&self, session: Session) -> Result<()> {
        if let Some(path) = &self.path {
            tokio::fs::write(path, serde_json::to_vec_pretty(&session)?).await?;
        }
        info!("Signed in as {}", session.user_id);
        self.current.send_replace(Some(session));
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => Err(e)?,
            }
        }
        info!("Signed out");
        self.current.send_replace(None);
        Ok(())
    }
}

impl SessionProvider for SessionStore {
    fn credential(&self, now: DateTime<Utc>) -> Option<Credential> {
        self.current
            .borrow()
            .as_ref()
            .filter(|v| v.is_valid_at(now))
            .map(|v| Credential {
                user_id: v.user_id.clone(),
                token: v.access_token.clone(),
            })
    }
}
