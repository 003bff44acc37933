//! Socket bridge: emulates a data channel between two hosts over TCP.
//! Frames are 4-byte BE length + JSON bridge message; data frames feed the labelled session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dc_core::{
    encode_frame, BridgeKind, BridgeMessage, EngineContext, FrameBuffer, FrameDecodeError,
    MultipartWriter, PartDescriptor, Session, SessionEvent, SessionRegistry, Transport,
    TransportError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::Role;

const RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Body bytes per data frame when sending a file.
const SEND_CHUNK_SIZE: usize = 16 * 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Outbound side of one session: wraps bytes into data frames for its label.
struct LabelTransport {
    label: String,
    out: mpsc::UnboundedSender<BridgeMessage>,
}

impl Transport for LabelTransport {
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.out
            .send(BridgeMessage::data(&self.label, &bytes))
            .map_err(|_| TransportError::Closed)
    }
}

/// Sessions of the emulated call plus the queue of frames waiting for a connection.
pub struct Bridge {
    registry: Mutex<SessionRegistry>,
    out_tx: mpsc::UnboundedSender<BridgeMessage>,
    /// Held by the live connection's writer; a replacement connection waits for it.
    out_rx: Mutex<mpsc::UnboundedReceiver<BridgeMessage>>,
}

impl Bridge {
    /// Build the bridge and open the bootstrap session.
    pub async fn new(ctx: EngineContext) -> anyhow::Result<Arc<Self>> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let factory_tx = out_tx.clone();
        let registry = SessionRegistry::new(ctx, move |label: &str| {
            Arc::new(LabelTransport {
                label: label.to_string(),
                out: factory_tx.clone(),
            }) as Arc<dyn Transport>
        });
        let bridge = Arc::new(Self {
            registry: Mutex::new(registry),
            out_tx,
            out_rx: Mutex::new(out_rx),
        });
        let bdc = bridge.registry.lock().await.open_bootstrap()?;
        watch_session(&bdc);
        Ok(bridge)
    }

    /// Act on one inbound frame.
    pub async fn handle_frame(&self, msg: BridgeMessage) {
        match msg.kind() {
            BridgeKind::CreateChannels => {
                let labels = msg.create_labels.unwrap_or_default();
                let created = self.registry.lock().await.open_application(&labels);
                for session in &created {
                    watch_session(session);
                }
                tracing::info!(requested = labels.len(), created = created.len(), "peer created channels");
            }
            BridgeKind::Data => {
                let label = msg.data_label.as_deref().unwrap_or("");
                let payload = match msg.payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(label, error = %e, "bad base64 payload, frame dropped");
                        return;
                    }
                };
                let Some(session) = self.registry.lock().await.get(label) else {
                    tracing::warn!(label, len = payload.len(), "data for unknown channel");
                    return;
                };
                // Receiving writes files and reads packages; awaited so chunks stay in order.
                if let Err(e) = tokio::task::spawn_blocking(move || session.receive(&payload)).await {
                    tracing::error!(label, error = %e, "chunk handling task failed");
                }
            }
            BridgeKind::HangUp => {
                tracing::info!("peer hung up, closing all channels");
                self.registry.lock().await.close_all();
            }
            BridgeKind::CallAdded => tracing::info!("peer call added"),
            BridgeKind::CallActive => tracing::info!("peer call active"),
            BridgeKind::Unknown(kind) => tracing::warn!(kind, "unknown bridge frame type"),
        }
    }

    /// Queue a file upload on `label`: channel creation, then the multipart messages.
    pub async fn queue_file(&self, path: &Path, label: &str, from: &str, to: &str) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let writer = MultipartWriter::new();
        let part = PartDescriptor {
            id: format!("{from}_{}", &writer.boundary()[..8]),
            from: from.to_string(),
            to: to.to_string(),
            checksum: dc_core::integrity::md5_hex(&bytes),
            start: 0,
            end: bytes.len() as u64,
            total_size: bytes.len() as u64,
            file_name: file_name.clone(),
            content_type: content_type_for(&file_name).to_string(),
        };
        let part_header = writer.part_header(&part);
        let terminal = writer.terminal();
        let content_length = (part_header.len() + bytes.len() + terminal.len()) as u64;

        self.enqueue(BridgeMessage::create_channels(vec![label.to_string()]))?;
        self.enqueue(BridgeMessage::data(label, &writer.request_header(to, content_length)))?;
        self.enqueue(BridgeMessage::data(label, &part_header))?;
        for chunk in bytes.chunks(SEND_CHUNK_SIZE) {
            self.enqueue(BridgeMessage::data(label, chunk))?;
        }
        self.enqueue(BridgeMessage::data(label, &terminal))?;
        tracing::info!(file = %file_name, bytes = bytes.len(), label, "file queued");
        Ok(())
    }

    fn enqueue(&self, msg: BridgeMessage) -> anyhow::Result<()> {
        self.out_tx
            .send(msg)
            .map_err(|_| anyhow::anyhow!("bridge outbound queue closed"))
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        self.registry.lock().await.close_all();
    }
}

/// Log a session's events until its observer stream ends.
fn watch_session(session: &Arc<Session>) {
    let mut rx = session.register_observer();
    let label = session.label().to_string();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::StateChanged { state, code } => {
                    tracing::info!(label = %label, state = ?state, code, "channel state")
                }
                SessionEvent::Message(bytes) => tracing::info!(
                    label = %label,
                    len = bytes.len(),
                    text = %String::from_utf8_lossy(&bytes),
                    "channel message"
                ),
                SessionEvent::TransferStarted(meta) => {
                    tracing::info!(label = %label, file = %meta.file_name, size = meta.total_size, "receiving file")
                }
                SessionEvent::TransferCompleted(meta) => tracing::info!(
                    label = %label,
                    file = %meta.file_name,
                    path = ?meta.path,
                    received = meta.received,
                    verified = ?meta.verified,
                    incomplete = meta.incomplete,
                    "file received"
                ),
            }
        }
    });
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Run the bridge in the configured role until the runtime shuts down.
pub async fn run(bridge: Arc<Bridge>, role: Role, addr: String) -> anyhow::Result<()> {
    match role {
        Role::Server => run_server(bridge, &addr).await,
        Role::Client => {
            run_client(bridge, &addr).await;
            Ok(())
        }
    }
}

/// Accept connections; a new connection replaces the previous one.
async fn run_server(bridge: Arc<Bridge>, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr, "bridge listening");
    let mut current: Option<JoinHandle<()>> = None;
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "bridge connection accepted");
        if let Some(old) = current.take() {
            old.abort();
            tracing::info!("previous connection replaced");
        }
        let bridge = bridge.clone();
        current = Some(tokio::spawn(async move {
            if let Err(e) = run_connection(stream, bridge).await {
                tracing::warn!(error = %e, "bridge connection ended");
            }
        }));
    }
}

/// Connect, retrying every few seconds; reconnect after the connection drops.
async fn run_client(bridge: Arc<Bridge>, addr: &str) {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::info!(addr, "bridge connected");
                if let Err(e) = run_connection(stream, bridge.clone()).await {
                    tracing::warn!(error = %e, "bridge connection ended");
                }
            }
            Err(e) => tracing::warn!(addr, error = %e, "bridge connect failed, retrying"),
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Pump frames both ways until either direction fails.
async fn run_connection(stream: TcpStream, bridge: Arc<Bridge>) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (in_tx, mut in_rx) = mpsc::unbounded_channel::<BridgeMessage>();
    let _reader = AbortOnDrop(tokio::spawn(async move {
        if let Err(e) = read_frames(reader, in_tx).await {
            tracing::debug!(error = %e, "bridge reader stopped");
        }
    }));
    let mut out_rx = bridge.out_rx.lock().await;
    loop {
        tokio::select! {
            inbound = in_rx.recv() => match inbound {
                Some(msg) => bridge.handle_frame(msg).await,
                None => return Ok(()),
            },
            outbound = out_rx.recv() => {
                let Some(msg) = outbound else {
                    return Ok(());
                };
                let frame = match encode_frame(&msg) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!(error = %e, "frame not encodable, dropped");
                        continue;
                    }
                };
                writer.write_all(&frame).await.context("writing frame")?;
                writer.flush().await.context("flushing frame")?;
            }
        }
    }
}

/// Read stream bytes, split them into frames and forward the decoded messages.
async fn read_frames(
    mut reader: OwnedReadHalf,
    in_tx: mpsc::UnboundedSender<BridgeMessage>,
) -> anyhow::Result<()> {
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if frames.pending() > 0 {
                tracing::debug!(bytes = frames.pending(), "connection closed inside a frame");
            }
            return Ok(());
        }
        frames.extend(&chunk[..n]);
        loop {
            match frames.next_message() {
                Ok(Some(msg)) => {
                    if in_tx.send(msg).is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(FrameDecodeError::Decode(e)) => {
                    tracing::warn!(error = %e, "undecodable frame skipped")
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
