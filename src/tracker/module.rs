use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use super::{
    activity::{ActivityStats, ActivityTracker},
    events::TabEvent,
    record::ActivityRecord,
};

/// Latest copy of the live records, published after every mutation the debouncer cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSnapshot {
    /// Increments with every publication.
    pub revision: u64,
    pub records: Vec<ActivityRecord>,
}

pub enum TrackerCommand {
    Event(TabEvent),
    Records(oneshot::Sender<Vec<ActivityRecord>>),
    Stats(oneshot::Sender<ActivityStats>),
}

/// Owns the [ActivityTracker]. Every read and write of records and of the focus pointer goes
/// through this task's queue, so events are handled one at a time and to completion.
pub struct TrackerModule {
    receiver: mpsc::Receiver<TrackerCommand>,
    tracker: ActivityTracker,
    snapshots: watch::Sender<RecordSnapshot>,
}

/// Cheap to clone entry point into a running [TrackerModule].
#[derive(Clone)]
pub struct TrackerHandle {
    sender: mpsc::Sender<TrackerCommand>,
}

impl TrackerModule {
    pub fn new(
        tracker: ActivityTracker,
        capacity: usize,
    ) -> (Self, TrackerHandle, watch::Receiver<RecordSnapshot>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let (snapshots, snapshot_receiver) = watch::channel(RecordSnapshot::default());
        (
            Self {
                receiver,
                tracker,
                snapshots,
            },
            TrackerHandle { sender },
            snapshot_receiver,
        )
    }

    /// Runs until every [TrackerHandle] is dropped. Dropping the module afterwards closes the
    /// snapshot channel, which tells the sync module to wind down.
    pub async fn run(mut self) -> Result<()> {
        while let Some(command) = self.receiver.recv().await {
            match command {
                TrackerCommand::Event(event) => self.handle_event(event),
                TrackerCommand::Records(reply) => {
                    let _ = reply.send(self.tracker.snapshot());
                }
                TrackerCommand::Stats(reply) => {
                    let _ = reply.send(self.tracker.stats());
                }
            }
        }
        info!("Tracker stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: TabEvent) {
        debug!("Processing event {:?}", event);
        if self.tracker.apply(&event) {
            let records = self.tracker.snapshot();
            self.snapshots.send_modify(|snapshot| {
                snapshot.revision += 1;
                snapshot.records = records;
            });
        }
    }
}

impl TrackerHandle {
    pub async fn send(&self, event: TabEvent) -> Result<()> {
        self.sender
            .send(TrackerCommand::Event(event))
            .await
            .map_err(|_| anyhow!("Tracker is no longer running"))
    }

    pub async fn records(&self) -> Result<Vec<ActivityRecord>> {
        self.request(TrackerCommand::Records).await
    }

    pub async fn stats(&self) -> Result<ActivityStats> {
        self.request(TrackerCommand::Stats).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> TrackerCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| anyhow!("Tracker is no longer running"))?;
        Ok(response.await?)
    }
}
