//! Browser native messaging. Every message is a JSON document preceded by its byte length as a
//! 32-bit little-endian integer, in both directions.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, RwLock},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

use crate::tracker::{
    events::{TabEvent, TabHandle, TabMetadata},
    module::TrackerHandle,
};

use super::{
    control::{ControlRequest, ControlResponse, ControlSurface},
    HostTab, TabHost,
};

/// Browsers cap messages sent to the host at 64 MiB.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// Browsers refuse messages from the host above 1 MiB.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;

pub fn codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .little_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InboundMessage {
    Event { event: TabEvent },
    Request { id: u64, request: ControlRequest },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutboundMessage {
    Command { command: BrowserCommand },
    Response { id: u64, response: ControlResponse },
}

/// Actions the extension performs on the host's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BrowserCommand {
    #[serde(rename_all = "camelCase")]
    Switch { tab_id: TabHandle },
    #[serde(rename_all = "camelCase")]
    Close { tab_id: TabHandle },
}

/// [TabHost] backed by the extension. Open tabs are mirrored from the lifecycle events, commands
/// are queued for the writer.
pub struct NativeHost {
    tabs: RwLock<BTreeMap<TabHandle, HostTab>>,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl NativeHost {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<OutboundMessage>) {
        let (outbound, receiver) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                tabs: RwLock::new(BTreeMap::new()),
                outbound,
            }),
            receiver,
        )
    }

    /// Updates the mirror and returns the event to hand to the tracker. A focus change without
    /// metadata is completed from the mirror when the tab is already known.
    pub async fn observe(&self, event: TabEvent) -> TabEvent {
        let mut tabs = self.tabs.write().await;
        match event {
            TabEvent::FocusChanged {
                tab_id,
                metadata: None,
                at,
            } => TabEvent::FocusChanged {
                tab_id,
                metadata: tabs.get(&tab_id).map(|v| TabMetadata {
                    url: v.url.clone(),
                    title: v.title.clone(),
                    favicon_url: v.favicon_url.clone(),
                }),
                at,
            },
            TabEvent::FocusChanged {
                tab_id,
                metadata: Some(ref metadata),
                ..
            }
            | TabEvent::MetadataUpdated {
                tab_id,
                ref metadata,
                ..
            } => {
                tabs.insert(
                    tab_id,
                    HostTab {
                        tab_id,
                        url: metadata.url.clone(),
                        title: metadata.title.clone(),
                        favicon_url: metadata.favicon_url.clone(),
                    },
                );
                event
            }
            TabEvent::Closed { tab_id, .. } => {
                tabs.remove(&tab_id);
                event
            }
        }
    }

    pub fn outbound(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound.clone()
    }

    async fn command(&self, command: BrowserCommand) -> Result<()> {
        self.outbound
            .send(OutboundMessage::Command { command })
            .await
            .map_err(|_| anyhow!("Browser channel is closed"))
    }
}

#[async_trait]
impl TabHost for NativeHost {
    async fn query_tabs(&self) -> Result<Vec<HostTab>> {
        Ok(self.tabs.read().await.values().cloned().collect())
    }

    async fn switch_to(&self, handle: TabHandle) -> Result<()> {
        if !self.tabs.read().await.contains_key(&handle) {
            return Err(anyhow!("Tab {handle} is not open"));
        }
        self.command(BrowserCommand::Switch { tab_id: handle }).await
    }

    async fn close(&self, handle: TabHandle) -> Result<()> {
        if !self.tabs.read().await.contains_key(&handle) {
            return Err(anyhow!("Tab {handle} is not open"));
        }
        self.command(BrowserCommand::Close { tab_id: handle }).await
    }
}

/// Pumps the native messaging channel. Events are handed to the tracker in arrival order,
/// requests are answered from their own tasks so a slow store never holds up events.
pub struct NativeMessagingModule<R, W> {
    reader: R,
    writer: W,
    host: Arc<NativeHost>,
    outbound: mpsc::Receiver<OutboundMessage>,
    tracker: TrackerHandle,
    control: Arc<ControlSurface>,
    shutdown: CancellationToken,
}

impl<R, W> NativeMessagingModule<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        reader: R,
        writer: W,
        host: Arc<NativeHost>,
        outbound: mpsc::Receiver<OutboundMessage>,
        tracker: TrackerHandle,
        control: Arc<ControlSurface>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reader,
            writer,
            host,
            outbound,
            tracker,
            control,
            shutdown,
        }
    }

    /// Runs until the browser closes the channel or shutdown is requested. Either way the
    /// shutdown token is cancelled on exit so the rest of the application winds down with it.
    pub async fn run(self) -> Result<()> {
        let Self {
            reader,
            writer,
            host,
            outbound,
            tracker,
            control,
            shutdown,
        } = self;

        let result = tokio::select! {
            result = read_loop(reader, &host, tracker, control, &shutdown) => result,
            result = write_loop(writer, outbound) => result,
        };
        shutdown.cancel();
        result
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    reader: R,
    host: &NativeHost,
    tracker: TrackerHandle,
    control: Arc<ControlSurface>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut frames = FramedRead::new(reader, codec(MAX_INBOUND_FRAME));
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, closing browser channel");
                return Ok(());
            }
            frame = frames.next() => frame,
        };
        let Some(frame) = frame else {
            info!("Browser closed the channel");
            return Ok(());
        };

        match serde_json::from_slice::<InboundMessage>(&frame?) {
            Ok(InboundMessage::Event { event }) => {
                let event = host.observe(event).await;
                tracker.send(event).await?;
            }
            Ok(InboundMessage::Request { id, request }) => {
                debug!("Request {id}: {request:?}");
                let control = control.clone();
                let outbound = host.outbound();
                tokio::spawn(async move {
                    let response = control.handle(request).await;
                    if outbound
                        .send(OutboundMessage::Response { id, response })
                        .await
                        .is_err()
                    {
                        debug!("Dropping response {id}, browser channel is closed");
                    }
                });
            }
            Err(e) => warn!("Ignoring malformed message {e}"),
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    writer: W,
    mut outbound: mpsc::Receiver<OutboundMessage>,
) -> Result<()> {
    let mut sink = FramedWrite::new(writer, codec(MAX_OUTBOUND_FRAME));
    while let Some(message) = outbound.recv().await {
        let payload = serde_json::to_vec(&message)?;
        if payload.len() > MAX_OUTBOUND_FRAME {
            warn!("Dropping {} byte message, too large for the browser", payload.len());
            continue;
        }
        sink.send(Bytes::from(payload)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::io::{duplex, split, AsyncRead, AsyncReadExt, AsyncWrite};
    use tokio_util::{
        codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
        sync::CancellationToken,
    };

    use crate::{
        host::{control::ControlSurface, TabHost},
        recommend::{scorer::DEFAULT_LOOKBACK, Recommender},
        store::MockRemoteStore,
        sync::session::SessionStore,
        tracker::{
            activity::ActivityTracker,
            events::{TabEvent, TabHandle, TabMetadata},
            filter::TrackableFilter,
            module::TrackerModule,
        },
        utils::{clock::DefaultClock, logging::TEST_LOGGING},
    };

    use super::{codec, NativeHost, NativeMessagingModule, MAX_INBOUND_FRAME, MAX_OUTBOUND_FRAME};

    async fn next_json<R: AsyncRead + Unpin>(
        frames: &mut FramedRead<R, LengthDelimitedCodec>,
    ) -> Result<Value> {
        let frame = frames
            .next()
            .await
            .ok_or_else(|| anyhow!("channel closed"))??;
        Ok(serde_json::from_slice(&frame)?)
    }

    async fn send<W: AsyncWrite + Unpin>(
        sink: &mut FramedWrite<W, LengthDelimitedCodec>,
        value: Value,
    ) -> Result<()> {
        sink.send(Bytes::from(serde_json::to_vec(&value)?)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_observe_fills_focus_metadata() {
        let (host, _outbound) = NativeHost::new(4);
        host.observe(TabEvent::MetadataUpdated {
            tab_id: TabHandle(1),
            metadata: TabMetadata {
                url: "https://docs.rs".into(),
                title: "Docs.rs".into(),
                favicon_url: None,
            },
            at: chrono::Utc::now(),
        })
        .await;

        let event = host
            .observe(TabEvent::FocusChanged {
                tab_id: TabHandle(1),
                metadata: None,
                at: chrono::Utc::now(),
            })
            .await;

        assert!(matches!(
            event,
            TabEvent::FocusChanged { metadata: Some(ref v), .. } if v.url == "https://docs.rs"
        ));

        host.observe(TabEvent::Closed {
            tab_id: TabHandle(1),
            at: chrono::Utc::now(),
        })
        .await;
        assert!(host.switch_to(TabHandle(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_frames_are_length_prefixed_little_endian() -> Result<()> {
        let (client, mut server) = duplex(1024);
        let mut sink = FramedWrite::new(client, codec(MAX_OUTBOUND_FRAME));
        sink.send(Bytes::from_static(b"{}")).await?;
        drop(sink);

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await?;

        assert_eq!(raw, vec![2, 0, 0, 0, b'{', b'}']);
        Ok(())
    }

    #[tokio::test]
    async fn test_serves_events_and_requests() -> Result<()> {
        *TEST_LOGGING;
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = split(server);
        let (client_read, client_write) = split(client);

        let (tracker_module, tracker, _) =
            TrackerModule::new(ActivityTracker::new(TrackableFilter::default()), 8);
        let tracker_task = tokio::spawn(tracker_module.run());

        let (host, outbound) = NativeHost::new(8);
        let session = Arc::new(SessionStore::in_memory(None));
        let control = Arc::new(ControlSurface::new(
            host.clone(),
            tracker.clone(),
            session.clone(),
            Arc::new(Recommender::new(
                Arc::new(MockRemoteStore::new()),
                session,
                Box::new(DefaultClock),
                DEFAULT_LOOKBACK,
            )),
            Box::new(DefaultClock),
        ));
        let shutdown = CancellationToken::new();
        let module = NativeMessagingModule::new(
            server_read,
            server_write,
            host,
            outbound,
            tracker,
            control,
            shutdown.clone(),
        );
        let module_task = tokio::spawn(module.run());

        let mut sink = FramedWrite::new(client_write, codec(MAX_INBOUND_FRAME));
        let mut frames = FramedRead::new(client_read, codec(MAX_OUTBOUND_FRAME));

        send(&mut sink, json!({
            "kind": "event",
            "event": {
                "type": "metadataUpdated",
                "tabId": 1,
                "metadata": {"url": "https://docs.rs", "title": "Docs.rs"},
                "at": 1530662400000u64
            }
        }))
        .await?;
        send(
            &mut sink,
            json!({"kind": "event", "event": {"type": "focusChanged", "tabId": 1, "at": 1530662401000u64}}),
        )
        .await?;
        send(&mut sink, json!({"kind": "garbage"})).await?;
        send(&mut sink, json!({"kind": "request", "id": 7, "request": {"op": "getTabs"}})).await?;

        let response = next_json(&mut frames).await?;
        assert_eq!(response["kind"], "response");
        assert_eq!(response["id"], 7);
        assert_eq!(response["response"]["type"], "tabs");
        let tabs = response["response"]["data"].as_array().cloned().unwrap_or_default();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0]["url"], "https://docs.rs");
        assert_eq!(tabs[0]["activity"]["visitCount"], 2);

        send(
            &mut sink,
            json!({"kind": "request", "id": 8, "request": {"op": "switchTab", "tabId": 1}}),
        )
        .await?;

        let command = next_json(&mut frames).await?;
        assert_eq!(
            command,
            json!({"kind": "command", "command": {"type": "switch", "tabId": 1}})
        );
        let response = next_json(&mut frames).await?;
        assert_eq!(response, json!({"kind": "response", "id": 8, "response": {"type": "done"}}));

        // Shutting the write side down is what the browser closing the pipe looks like.
        SinkExt::<Bytes>::close(&mut sink).await?;
        module_task.await??;
        assert!(shutdown.is_cancelled());
        tracker_task.await??;
        Ok(())
    }
}
