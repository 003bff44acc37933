//! Channel session: lifecycle state machine, observer subscription, chunk handling.
//!
//! The transport pushes inbound chunks into [`Session::receive`]; replies go out through the
//! session's [`Transport`] in the order they were produced. Observers get a single-consumer
//! event stream from [`Session::register_observer`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::catalog::{CatalogStore, StaticCatalog};
use crate::config::EngineConfig;
use crate::directory::DirectoryResponder;
use crate::dispatch::{self, Inbound};
use crate::error::EngineError;
use crate::multipart::{Reassembler, ReassemblyEvent};
use crate::negotiate::{self, AcceptAll, AcceptPolicy};
use crate::sink::{Clock, SystemClock};
use crate::transfer::TransferMetadata;
use crate::transport::Transport;

/// Amount the channel reports as buffered, in bytes.
pub const BUFFERED_AMOUNT: u64 = 33 * 1024;

/// Code attached to every state notification.
const STATE_CODE_OK: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelKind {
    /// Bootstrap channel; serves the app directory.
    Bootstrap,
    /// Application channel; carries file transfers.
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// What the observer receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Inbound bytes no sub-protocol claimed.
    Message(Vec<u8>),
    StateChanged { state: SessionState, code: i32 },
    TransferStarted(TransferMetadata),
    TransferCompleted(TransferMetadata),
}

/// Collaborators shared by every session of a call.
#[derive(Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub catalog: Arc<dyn CatalogStore>,
    pub policy: Arc<dyn AcceptPolicy>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            catalog: Arc::new(StaticCatalog::default()),
            policy: Arc::new(AcceptAll),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogStore>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn AcceptPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

struct Inner {
    /// `None` until the session is first opened.
    state: Option<SessionState>,
    observer: Option<UnboundedSender<SessionEvent>>,
    reassembler: Reassembler,
    close_task: Option<JoinHandle<()>>,
}

pub struct Session {
    label: String,
    kind: ChannelKind,
    stream_id: String,
    call_id: String,
    phone_number: String,
    close_delay: Duration,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn AcceptPolicy>,
    directory: DirectoryResponder,
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new(
        label: impl Into<String>,
        kind: ChannelKind,
        stream_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        ctx: &EngineContext,
    ) -> Arc<Self> {
        let config = &ctx.config;
        Arc::new(Self {
            label: label.into(),
            kind,
            stream_id: stream_id.into(),
            call_id: config.call_id.clone(),
            phone_number: config.phone_number.clone(),
            close_delay: config.close_delay(),
            transport,
            policy: ctx.policy.clone(),
            directory: DirectoryResponder::new(ctx.catalog.clone(), config.call_id.clone()),
            inner: Mutex::new(Inner {
                state: None,
                observer: None,
                reassembler: Reassembler::new(config.cache_dir.clone(), ctx.clock.clone()),
                close_task: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the single observer and open the session. A previous observer is replaced.
    pub fn register_observer(&self) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = unbounded_channel();
        let mut inner = self.lock();
        if inner.observer.replace(tx).is_some() {
            tracing::debug!(label = %self.label, "observer replaced");
        }
        self.enter_open(&mut inner);
        rx
    }

    pub fn unregister_observer(&self) {
        self.lock().observer = None;
        tracing::debug!(label = %self.label, "observer removed");
    }

    /// Enter `Open`. Also re-opens a closing or closed session.
    pub fn open(&self) {
        let mut inner = self.lock();
        self.enter_open(&mut inner);
    }

    fn enter_open(&self, inner: &mut Inner) {
        if let Some(task) = inner.close_task.take() {
            task.abort();
        }
        self.set_state(inner, SessionState::Open);
    }

    /// `Open → Closing` now, `Closing → Closed` after the configured delay.
    /// Calling again while closing or closed does nothing.
    pub fn close(self: &Arc<Self>) {
        let mut inner = self.lock();
        if inner.close_task.is_some()
            || matches!(
                inner.state,
                Some(SessionState::Closing | SessionState::Closed)
            )
        {
            tracing::debug!(label = %self.label, "close already in progress");
            return;
        }
        self.set_state(&mut inner, SessionState::Closing);
        if let Some(dropped) = inner.reassembler.reset() {
            let event = SessionEvent::TransferCompleted(dropped);
            self.emit(&mut inner, event);
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let session = Arc::downgrade(self);
                let delay = self.close_delay;
                inner.close_task = Some(handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(session) = session.upgrade() {
                        session.finish_close();
                    }
                }));
            }
            Err(_) => {
                tracing::warn!(label = %self.label, "no runtime for delayed close, closing now");
                self.set_state(&mut inner, SessionState::Closed);
            }
        }
    }

    fn finish_close(&self) {
        let mut inner = self.lock();
        inner.close_task = None;
        if inner.state == Some(SessionState::Closing) {
            self.set_state(&mut inner, SessionState::Closed);
        }
    }

    /// Send bytes to the peer. Outside `Open` this reports success without transmitting.
    pub fn send(&self, bytes: &[u8]) -> Result<(), EngineError> {
        let inner = self.lock();
        if inner.state != Some(SessionState::Open) {
            tracing::debug!(label = %self.label, state = ?inner.state, "send outside open state dropped");
            return Ok(());
        }
        self.transport.send(bytes.to_vec())?;
        Ok(())
    }

    /// Handle one inbound chunk. Chunks are processed one at a time, in call order.
    pub fn receive(&self, bytes: &[u8]) {
        let mut inner = self.lock();
        if inner.state != Some(SessionState::Open) {
            tracing::debug!(label = %self.label, len = bytes.len(), "chunk outside open state ignored");
            return;
        }
        if let Err(e) = self.dispatch(&mut inner, bytes) {
            tracing::warn!(label = %self.label, kind = e.kind(), error = %e, "chunk not handled");
        }
    }

    fn dispatch(&self, inner: &mut Inner, bytes: &[u8]) -> Result<(), EngineError> {
        match dispatch::classify(bytes, &inner.reassembler) {
            Inbound::Multipart => {
                for event in inner.reassembler.feed(bytes) {
                    let event = match event {
                        ReassemblyEvent::Started(meta) => SessionEvent::TransferStarted(meta),
                        ReassemblyEvent::Completed(meta) => SessionEvent::TransferCompleted(meta),
                    };
                    self.emit(inner, event);
                }
                Ok(())
            }
            Inbound::FileRequest(request) => {
                let response = negotiate::respond(&request?, self.policy.as_ref());
                tracing::info!(label = %self.label, accept = response.accept, files = response.list.len(), "file request answered");
                self.transport.send(negotiate::encode_response(&response)?)?;
                Ok(())
            }
            Inbound::Directory(request) => {
                let request = request?;
                if self.kind != ChannelKind::Bootstrap {
                    tracing::debug!(label = %self.label, "directory request on application channel");
                }
                for message in self.directory.respond(&request) {
                    self.transport.send(message)?;
                }
                Ok(())
            }
            Inbound::Unknown => {
                tracing::debug!(label = %self.label, len = bytes.len(), "unclassified chunk passed to observer");
                self.emit(inner, SessionEvent::Message(bytes.to_vec()));
                Ok(())
            }
        }
    }

    /// Record the new state; notify only when it differs from the previous one.
    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        if inner.state == Some(state) {
            return;
        }
        tracing::info!(label = %self.label, from = ?inner.state, to = ?state, "state change");
        inner.state = Some(state);
        self.emit(
            inner,
            SessionEvent::StateChanged {
                state,
                code: STATE_CODE_OK,
            },
        );
    }

    fn emit(&self, inner: &mut Inner, event: SessionEvent) {
        let Some(observer) = inner.observer.as_ref() else {
            return;
        };
        if observer.send(event).is_err() {
            let e = EngineError::RemoteDeliveryFailure(crate::transport::TransportError::Closed);
            tracing::warn!(label = %self.label, kind = e.kind(), "observer gone, dropping it");
            inner.observer = None;
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn buffered_amount(&self) -> u64 {
        BUFFERED_AMOUNT
    }

    pub fn state(&self) -> Option<SessionState> {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == Some(SessionState::Closed)
    }

    /// Snapshot of the transfer in flight.
    pub fn current_transfer(&self) -> Option<TransferMetadata> {
        self.lock().reassembler.current().cloned()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = inner.close_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .field("state", &self.state())
            .finish()
    }
}
