//! One connected session: connect, optionally upload, then consume
//! broadcasts until the server goes away or the session is stopped.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wirecast_core::{Client, ConnectionId, EventHandler};

use crate::config::ClientConfig;
use crate::sink::PayloadSink;

// ── Viewer ───────────────────────────────────────────────────────

/// Event handler that logs every payload and hands it to the sink.
#[derive(Debug, Default)]
pub struct Viewer {
    sink: Option<PayloadSink>,
    stats: SessionStats,
}

/// What a session saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub payloads: u64,
    pub bytes: u64,
    pub write_errors: u64,
    pub disconnected: bool,
}

impl Viewer {
    pub fn new(sink: Option<PayloadSink>) -> Self {
        Self {
            sink,
            stats: SessionStats::default(),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn into_stats(self) -> SessionStats {
        self.stats
    }
}

impl EventHandler for Viewer {
    fn on_connect(&mut self, id: ConnectionId) {
        info!(%id, "session open");
    }

    fn on_disconnect(&mut self, id: ConnectionId) {
        info!(%id, payloads = self.stats.payloads, "session closed");
        self.stats.disconnected = true;
    }

    fn on_receive(&mut self, id: ConnectionId, payload: Bytes) {
        self.stats.payloads += 1;
        self.stats.bytes += payload.len() as u64;
        debug!(%id, len = payload.len(), "payload received");

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write(&payload) {
                self.stats.write_errors += 1;
                warn!(dir = %sink.dir().display(), "failed to store payload: {e}");
            }
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// Connect and run until the server disconnects or `stop` fires.
pub async fn run_session(
    config: &ClientConfig,
    stop: CancellationToken,
) -> Result<SessionStats, Box<dyn std::error::Error + Send + Sync>> {
    let sink = match config.output_dir() {
        Some(dir) => Some(PayloadSink::create(dir, config.output.keep_all)?),
        None => None,
    };

    let (client, events) = Client::connect(
        &config.network.server_address,
        config.network.port,
        config.transport.clone(),
    )
    .await?;

    if let Some(path) = config.upload_file() {
        let data = tokio::fs::read(&path).await?;
        info!(path = %path.display(), len = data.len(), "uploading file");
        client.send(data)?;
    }

    // The consumer ends when the reactor drops its side of the stream,
    // i.e. once the connection is gone.
    let mut consumer = tokio::spawn(events.run(Viewer::new(sink)));

    let viewer = tokio::select! {
        joined = &mut consumer => joined?,
        _ = stop.cancelled() => {
            info!("stop requested");
            client.shutdown().await;
            consumer.await?
        }
    };
    Ok(viewer.into_stats())
}
