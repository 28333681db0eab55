//! Line-based TCP control channel.
//!
//! One command per line, one reply line per command. The operator identity
//! attached to accepted jobs is the peer address of the connection that
//! issued the command. Errors are rendered as `error: ...` lines; a
//! malformed command never creates or alters a job.

use anyhow::Result;
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use crate::error::ControlError;
use crate::job::Command;

use super::parser::{parse, ControlRequest};

/// Accept operator connections forever.
pub async fn serve_control(listener: TcpListener, commands: mpsc::Sender<Command>) -> Result<()> {
    info!("control channel listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("operator connected from {peer}");
        let commands = commands.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, peer.to_string(), commands).await {
                debug!("operator {peer} dropped: {e}");
            }
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    owner: String,
    commands: mpsc::Sender<Command>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match dispatch(&line, &owner, &commands).await {
            Ok(reply) => reply,
            Err(e) => format!("error: {e}"),
        };
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

/// Parse one line, round-trip it through the manager and render the reply.
async fn dispatch(
    line: &str,
    owner: &str,
    commands: &mpsc::Sender<Command>,
) -> Result<String, ControlError> {
    match parse(line, owner)? {
        ControlRequest::Archive(request) => {
            let (reply, rx) = oneshot::channel();
            commands
                .send(Command::Archive { request, reply })
                .await
                .map_err(|_| ControlError::ShuttingDown)?;
            let id = rx.await.map_err(|_| ControlError::ShuttingDown)??;
            Ok(format!("{id} queued"))
        }
        ControlRequest::Status(id) => {
            let (reply, rx) = oneshot::channel();
            commands
                .send(Command::Status { id, reply })
                .await
                .map_err(|_| ControlError::ShuttingDown)?;
            rx.await.map_err(|_| ControlError::ShuttingDown)?
        }
        ControlRequest::Revoke(id) => {
            let (reply, rx) = oneshot::channel();
            commands
                .send(Command::Revoke { id, reply })
                .await
                .map_err(|_| ControlError::ShuttingDown)?;
            let id = rx.await.map_err(|_| ControlError::ShuttingDown)??;
            Ok(format!("{id} revoked"))
        }
    }
}
