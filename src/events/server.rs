//! JSON-lines publish feed for external monitors.
//!
//! Each connected consumer gets its own bus subscription and receives every
//! subsequent status event as one JSON object per line. There is no
//! server-side replay; consumers reconstruct state from the live stream.
//! Slow or dead connections are dropped without affecting the control loop.

use anyhow::Result;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::StreamExt;

use super::bus::StatusBus;

/// Accept monitor connections forever, fanning the bus out to each.
pub async fn serve_feed(listener: TcpListener, bus: StatusBus) -> Result<()> {
    info!(
        "status feed listening on {}",
        listener.local_addr()?
    );
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("status consumer connected from {peer}");
        let subscription = bus.subscribe();
        tokio::spawn(async move {
            if let Err(e) = forward_events(stream, subscription).await {
                debug!("status consumer {peer} dropped: {e}");
            }
        });
    }
}

async fn forward_events(
    mut stream: TcpStream,
    subscription: tokio::sync::broadcast::Receiver<super::types::StatusEvent>,
) -> Result<()> {
    let mut events = BroadcastStream::new(subscription);
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                let mut line = serde_json::to_string(&event)?;
                line.push('\n');
                stream.write_all(line.as_bytes()).await?;
            }
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                // at-most-once delivery: skipped events are gone for good
                warn!("status consumer lagged, skipped {missed} events");
            }
        }
    }
    Ok(())
}
