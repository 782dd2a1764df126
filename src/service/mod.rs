use std::{path::Path, sync::Arc};

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    host::{
        control::ControlSurface,
        native::{NativeHost, NativeMessagingModule},
    },
    recommend::Recommender,
    store::open_store,
    sync::{session::SessionStore, SyncModule},
    tracker::{activity::ActivityTracker, filter::TrackableFilter, module::TrackerModule},
    utils::{
        clock::{Clock, DefaultClock},
        config::Config,
    },
};

pub mod shutdown;

pub const SESSION_FILE: &str = "session.json";

const EVENT_CAPACITY: usize = 64;
const OUTBOUND_CAPACITY: usize = 16;

/// Represents the starting point of the native messaging host. The browser launches it and talks
/// to it over stdin and stdout.
pub async fn serve(config: &Config, dir: &Path) -> Result<()> {
    serve_on(
        config,
        dir,
        tokio::io::stdin(),
        tokio::io::stdout(),
        DefaultClock,
    )
    .await
}

/// Wires the tracker, the sync debouncer and the browser channel together and runs them until the
/// browser goes away or the process is interrupted.
pub async fn serve_on<R, W>(
    config: &Config,
    dir: &Path,
    reader: R,
    writer: W,
    clock: impl Clock + Clone,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let store = open_store(&config.store, dir, clock.clone())?;
    let session = Arc::new(SessionStore::load(dir.join(SESSION_FILE)).await?);

    let tracker = ActivityTracker::new(TrackableFilter::new(config.privileged_schemes.clone()));
    let (tracker_module, tracker, snapshots) = TrackerModule::new(tracker, EVENT_CAPACITY);

    let sync = SyncModule::new(
        snapshots,
        store.clone(),
        session.clone(),
        config.sync_delay(),
        Box::new(clock.clone()),
    );

    let recommender = Arc::new(Recommender::new(
        store,
        session.clone(),
        Box::new(clock.clone()),
        config.lookback(),
    ));

    let (host, outbound) = NativeHost::new(OUTBOUND_CAPACITY);
    let control = Arc::new(ControlSurface::new(
        host.clone(),
        tracker.clone(),
        session,
        recommender,
        Box::new(clock),
    ));

    let shutdown_token = CancellationToken::new();
    let native = NativeMessagingModule::new(
        reader,
        writer,
        host,
        outbound,
        tracker,
        control,
        shutdown_token.clone(),
    );

    info!("Serving with {:?}", config.store);
    let (_, native_result, tracker_result, sync_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        native.run(),
        tracker_module.run(),
        sync.run(),
    );

    if let Err(native_result) = native_result {
        error!("Native messaging module got an error {:?}", native_result);
    }

    if let Err(tracker_result) = tracker_result {
        error!("Tracker module got an error {:?}", tracker_result);
    }

    if let Err(sync_result) = sync_result {
        error!("Sync module got an error {:?}", sync_result);
    }

    Ok(())
}
