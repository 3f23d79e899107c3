//! Local dispatch endpoint of a running gateway.
//!
//! `serve` holds the database lock, so other invocations hand their dispatch
//! requests to it over a loopback TCP socket instead of opening the file.
//! Each request line is one JSON [`DispatchRequest`]; each reply line is one
//! JSON [`ControlReply`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use irbridge_commands::{CommandDispatcher, DispatchRequest};
use irbridge_core::CommandRecord;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Gateway answer to one dispatch request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlReply {
    /// The command was stored and its publish settled.
    Dispatched { command: CommandRecord },
    /// Validation, decoding or storage failed.
    Rejected { error: String },
}

/// Accepts dispatch requests while the gateway runs.
pub struct ControlServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ControlServer {
    pub async fn bind(addr: &str, dispatcher: Arc<CommandDispatcher>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind control address {addr}"))?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, dispatcher, shutdown_rx));

        info!(addr = %local_addr, "Control endpoint listening");
        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Control endpoint task panicked");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<CommandDispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Control connection accepted");
                    tokio::spawn(serve_connection(stream, dispatcher.clone()));
                }
                Err(e) => warn!(error = %e, "Control accept failed"),
            }
        }
    }
    debug!("Control endpoint stopped");
}

async fn serve_connection(stream: TcpStream, dispatcher: Arc<CommandDispatcher>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Control read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<DispatchRequest>(&line) {
            Ok(request) => match dispatcher.dispatch(request).await {
                Ok(command) => ControlReply::Dispatched { command },
                Err(e) => ControlReply::Rejected {
                    error: e.to_string(),
                },
            },
            Err(e) => ControlReply::Rejected {
                error: format!("Malformed request: {e}"),
            },
        };
        if let Err(e) = write_line(&mut writer, &reply).await {
            warn!(error = %e, "Control reply failed");
            break;
        }
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Connection to a running gateway's control endpoint.
pub struct ControlClient {
    stream: BufReader<TcpStream>,
}

impl ControlClient {
    /// Fails when no gateway listens at `addr`.
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    pub async fn dispatch(&mut self, request: &DispatchRequest) -> Result<ControlReply> {
        write_line(self.stream.get_mut(), request)
            .await
            .context("Failed to send request to gateway")?;

        let mut line = String::new();
        let read = self
            .stream
            .read_line(&mut line)
            .await
            .context("Failed to read gateway reply")?;
        anyhow::ensure!(read > 0, "Gateway closed the connection");
        serde_json::from_str(&line).context("Malformed gateway reply")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use irbridge_commands::{AckCorrelator, AckOutcome, DispatchDirectories, PublishOutcome, Publisher};
    use irbridge_core::{
        ApplianceRecord, CommandStatus, CommandStore, ControllerRecord, IrCodeRecord, RealtimeHub,
    };
    use irbridge_storage::{DirectoryAdmin, MemoryStore};

    struct Loopback;

    #[async_trait]
    impl Publisher for Loopback {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> PublishOutcome {
            PublishOutcome::Published
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .put_controller(&ControllerRecord::new("C1", "esp-01", "u1", "Living room"))
            .unwrap();
        store
            .put_appliance(&ApplianceRecord::new("A1", "C1", "u1", "TV", "tv"))
            .unwrap();
        store
            .put_ir_code(&IrCodeRecord::new("IR1", "PowerOn", "nec"))
            .unwrap();
        store
    }

    async fn start(store: &Arc<MemoryStore>) -> ControlServer {
        let dispatcher = CommandDispatcher::new(
            DispatchDirectories::shared(store.clone()),
            store.clone(),
            Arc::new(Loopback),
        );
        ControlServer::bind("127.0.0.1:0", Arc::new(dispatcher))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_through_gateway_then_ack() {
        let store = seeded_store();
        let server = start(&store).await;
        let hub = Arc::new(RealtimeHub::new());
        let acks = AckCorrelator::new(store.clone(), hub);

        let mut client = ControlClient::connect(&server.local_addr().to_string())
            .await
            .unwrap();
        let reply = client
            .dispatch(&DispatchRequest::new("u1", "C1", "A1", "IR1", "PowerOn"))
            .await
            .unwrap();
        let ControlReply::Dispatched { command } = reply else {
            panic!("unexpected reply {reply:?}");
        };
        assert_eq!(command.status, CommandStatus::Sent);

        let ack = serde_json::json!({"command_id": command.id, "status": "acked"});
        let outcome = acks.handle_ack(ack.to_string().as_bytes()).await.unwrap();
        assert!(matches!(outcome, AckOutcome::Applied(_)));
        let stored = store.get(&command.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::Acked);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected_per_line() {
        let store = seeded_store();
        let server = start(&store).await;
        let mut client = ControlClient::connect(&server.local_addr().to_string())
            .await
            .unwrap();

        let reply = client
            .dispatch(&DispatchRequest::new("u1", "C9", "A1", "IR1", "PowerOn"))
            .await
            .unwrap();
        assert!(
            matches!(reply, ControlReply::Rejected { ref error } if error.contains("C9")),
            "{reply:?}"
        );

        // The connection stays usable after a rejection.
        let reply = client
            .dispatch(&DispatchRequest::new("u1", "C1", "A1", "IR1", "PowerOn"))
            .await
            .unwrap();
        assert!(matches!(reply, ControlReply::Dispatched { .. }));
        assert_eq!(store.command_count(), 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_fails_without_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(ControlClient::connect(&addr).await.is_err());
    }
}
