//! Debounced persistence of the tracker's records.

pub mod session;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use thiserror::Error;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    store::{
        entities::{merge_by_url, UpsertReport},
        RemoteStore, StoreError,
    },
    tracker::module::RecordSnapshot,
    utils::clock::Clock,
};

use session::SessionProvider;

pub const DEFAULT_SYNC_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Flushed(UpsertReport),
    /// Nobody is signed in, nothing was sent.
    NoCredential,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("flush failed: {0}")]
    Network(#[from] StoreError),
}

/// Waits for the tracker to go quiet and then pushes the full record snapshot to the store.
///
/// Every published snapshot re-arms a single deadline `delay` into the future. A flush runs inside
/// this task, so two flushes never overlap: snapshots published while one is in flight are picked
/// up afterwards and arm exactly one follow-up flush.
pub struct SyncModule {
    snapshots: watch::Receiver<RecordSnapshot>,
    store: Arc<dyn RemoteStore>,
    session: Arc<dyn SessionProvider>,
    delay: Duration,
    clock: Box<dyn Clock>,
}

impl SyncModule {
    pub fn new(
        snapshots: watch::Receiver<RecordSnapshot>,
        store: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionProvider>,
        delay: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            snapshots,
            store,
            session,
            delay,
            clock,
        }
    }

    /// Executes the debounce loop until the tracker goes away. A deadline still armed at that
    /// point is flushed right away instead of being lost.
    pub async fn run(mut self) -> Result<()> {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        if deadline.is_some() {
                            self.flush_logged().await;
                        }
                        info!("Sync stopped");
                        return Ok(());
                    }
                    deadline = Some(self.clock.instant() + self.delay);
                    debug!("Sync armed for {:?}", self.delay);
                }
                _ = expiry(&*self.clock, deadline) => {
                    deadline = None;
                    self.flush_logged().await;
                }
            }
        }
    }

    /// Sends the latest snapshot now, one row per url.
    pub async fn flush(&mut self) -> Result<SyncOutcome, SyncError> {
        let Some(credential) = self.session.credential(self.clock.time()) else {
            return Ok(SyncOutcome::NoCredential);
        };

        let (revision, rows) = {
            let snapshot = self.snapshots.borrow_and_update();
            (snapshot.revision, merge_by_url(&snapshot.records))
        };

        let span = info_span!("Flushing records", revision, rows = rows.len());
        let report = self.store.upsert(&credential, rows).instrument(span).await?;
        Ok(SyncOutcome::Flushed(report))
    }

    async fn flush_logged(&mut self) {
        match self.flush().await {
            Ok(SyncOutcome::Flushed(report)) => {
                for rejected in &report.rejected {
                    warn!("Store rejected {}: {}", rejected.url, rejected.reason);
                }
                info!("Synced {} records", report.written);
            }
            Ok(SyncOutcome::NoCredential) => {
                debug!("No valid session, skipping sync");
            }
            Err(e) => {
                error!("Sync failed, waiting for the next change to retry {e:?}");
            }
        }
    }
}

async fn expiry(clock: &dyn Clock, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => clock.sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::{watch, Mutex};

    use crate::{
        store::{
            entities::{PersistedActivityRow, UpsertReport, UpsertRow},
            MockRemoteStore, RemoteStore, StoreError,
        },
        sync::session::{Credential, MockSessionProvider},
        tracker::{events::TabHandle, module::RecordSnapshot, record::ActivityRecord},
        utils::{clock::DefaultClock, logging::TEST_LOGGING},
    };

    use super::{SyncModule, SyncOutcome};

    const DELAY: Duration = Duration::from_millis(5000);

    fn signed_in() -> MockSessionProvider {
        let mut session = MockSessionProvider::new();
        session.expect_credential().returning(|_| {
            Some(Credential {
                user_id: "user-1".into(),
                token: "token".into(),
            })
        });
        session
    }

    fn snapshot(revision: u64, visit_count: u64) -> RecordSnapshot {
        let now = Utc::now();
        RecordSnapshot {
            revision,
            records: vec![ActivityRecord {
                tab_handle: TabHandle(1),
                url: "https://example.com".into(),
                title: "Example".into(),
                favicon_url: None,
                visit_count,
                total_dwell_time_ms: 0,
                first_visit_at: now,
                last_visit_at: now,
            }],
        }
    }

    /// Store whose upserts take far longer than the debounce window.
    #[derive(Default)]
    struct SlowStore {
        running: AtomicUsize,
        max_running: AtomicUsize,
        batches: Mutex<Vec<Vec<UpsertRow>>>,
    }

    const SLOW_UPSERT: Duration = Duration::from_secs(20);

    #[async_trait]
    impl RemoteStore for SlowStore {
        async fn upsert(
            &self,
            _credential: &Credential,
            rows: Vec<UpsertRow>,
        ) -> Result<UpsertReport, StoreError> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(SLOW_UPSERT).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let written = rows.len();
            self.batches.lock().await.push(rows);
            Ok(UpsertReport {
                written,
                rejected: vec![],
            })
        }

        async fn archive(&self, _credential: &Credential, _url: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query_since(
            &self,
            _credential: &Credential,
            _since: DateTime<Utc>,
        ) -> Result<Vec<PersistedActivityRow>, StoreError> {
            Ok(vec![])
        }

        async fn query_archived(
            &self,
            _credential: &Credential,
            _limit: usize,
        ) -> Result<Vec<PersistedActivityRow>, StoreError> {
            Ok(vec![])
        }
    }

    fn module(
        receiver: watch::Receiver<RecordSnapshot>,
        store: MockRemoteStore,
        session: MockSessionProvider,
    ) -> SyncModule {
        SyncModule::new(
            receiver,
            Arc::new(store),
            Arc::new(session),
            DELAY,
            Box::new(DefaultClock),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_coalesces_into_one_flush() -> Result<()> {
        *TEST_LOGGING;
        let (sender, receiver) = watch::channel(RecordSnapshot::default());
        let mut store = MockRemoteStore::new();
        store
            .expect_upsert()
            .withf(|_, rows| rows.len() == 1 && rows[0].visit_count == 5)
            .times(1)
            .returning(|_, rows| {
                Ok(UpsertReport {
                    written: rows.len(),
                    rejected: vec![],
                })
            });
        let task = tokio::spawn(module(receiver, store, signed_in()).run());

        for visit_count in 1..=5 {
            sender.send_replace(snapshot(visit_count, visit_count));
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }
        // Nothing fires until the window passes after the last change.
        tokio::time::sleep(Duration::from_millis(3900)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::time::sleep(DELAY * 3).await;

        drop(sender);
        task.await??;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_quiescence() -> Result<()> {
        let (sender, receiver) = watch::channel(RecordSnapshot::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = MockRemoteStore::new();
        let counter = calls.clone();
        store.expect_upsert().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(UpsertReport::default())
        });
        let task = tokio::spawn(module(receiver, store, signed_in()).run());

        sender.send_replace(snapshot(1, 1));
        tokio::time::sleep(DELAY - Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sender.send_replace(snapshot(2, 2));
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(sender);
        task.await??;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_without_credential() -> Result<()> {
        let (sender, receiver) = watch::channel(RecordSnapshot::default());
        let mut store = MockRemoteStore::new();
        store.expect_upsert().never();
        let mut session = MockSessionProvider::new();
        session.expect_credential().returning(|_| None);
        let task = tokio::spawn(module(receiver, store, session).run());

        sender.send_replace(snapshot(1, 1));
        tokio::time::sleep(DELAY * 2).await;

        drop(sender);
        task.await??;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_not_retried_until_next_change() -> Result<()> {
        let (sender, receiver) = watch::channel(RecordSnapshot::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = MockRemoteStore::new();
        let counter = calls.clone();
        store.expect_upsert().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Status {
                status: 503,
                message: "unavailable".into(),
            })
        });
        let task = tokio::spawn(module(receiver, store, signed_in()).run());

        sender.send_replace(snapshot(1, 1));
        tokio::time::sleep(DELAY * 10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sender.send_replace(snapshot(2, 2));
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(sender);
        task.await??;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_changes_flush_on_shutdown() -> Result<()> {
        let (sender, receiver) = watch::channel(RecordSnapshot::default());
        let mut store = MockRemoteStore::new();
        store
            .expect_upsert()
            .withf(|_, rows| rows[0].visit_count == 7)
            .times(1)
            .returning(|_, _| Ok(UpsertReport::default()));
        let task = tokio::spawn(module(receiver, store, signed_in()).run());

        sender.send_replace(snapshot(7, 7));
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(sender);

        task.await??;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_during_flush_coalesce_into_one_follow_up() -> Result<()> {
        let (sender, receiver) = watch::channel(RecordSnapshot::default());
        let store = Arc::new(SlowStore::default());
        let task = tokio::spawn(
            SyncModule::new(
                receiver,
                store.clone(),
                Arc::new(signed_in()),
                DELAY,
                Box::new(DefaultClock),
            )
            .run(),
        );

        sender.send_replace(snapshot(1, 1));
        tokio::time::sleep(DELAY + Duration::from_millis(10)).await;
        assert_eq!(store.running.load(Ordering::SeqCst), 1);

        for visit_count in 2..=7 {
            sender.send_replace(snapshot(visit_count, visit_count));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tokio::time::sleep(SLOW_UPSERT * 2 + DELAY * 2).await;

        drop(sender);
        task.await??;

        let batches = store.batches.lock().await;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].visit_count, 1);
        assert_eq!(batches[1][0].visit_count, 7);
        assert_eq!(store.max_running.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_tabs_sharing_a_url_are_sent_once() -> Result<()> {
        let mut records = snapshot(1, 4);
        let mut duplicate = records.records[0].clone();
        duplicate.tab_handle = TabHandle(2);
        duplicate.visit_count = 3;
        records.records.push(duplicate);
        let (_sender, receiver) = watch::channel(records);

        let mut store = MockRemoteStore::new();
        store
            .expect_upsert()
            .withf(|_, rows| rows.len() == 1 && rows[0].visit_count == 7)
            .times(1)
            .returning(|_, rows| {
                Ok(UpsertReport {
                    written: rows.len(),
                    rejected: vec![],
                })
            });
        let mut module = module(receiver, store, signed_in());

        module.flush().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_manual_flush_reports_outcome() -> Result<()> {
        let (_sender, receiver) = watch::channel(snapshot(1, 3));
        let mut store = MockRemoteStore::new();
        store.expect_upsert().returning(|_, rows| {
            Ok(UpsertReport {
                written: rows.len(),
                rejected: vec![],
            })
        });
        let mut module = module(receiver, store, signed_in());

        let outcome = module.flush().await?;

        assert_eq!(
            outcome,
            SyncOutcome::Flushed(UpsertReport {
                written: 1,
                rejected: vec![],
            })
        );
        Ok(())
    }
}
