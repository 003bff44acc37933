//! Session registry: at most one session per label within a call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::session::{ChannelKind, EngineContext, Session};
use crate::transport::Transport;

/// Label of the bootstrap channel.
pub const BOOTSTRAP_LABEL: &str = "bdc";
const BOOTSTRAP_STREAM_ID: &str = "0";
const APPLICATION_STREAM_BASE: usize = 1000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session {0:?} already exists")]
    Exists(String),
}

/// Builds a transport for a newly created session label.
pub trait TransportFactory: Send + Sync {
    fn transport_for(&self, label: &str) -> Arc<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn(&str) -> Arc<dyn Transport> + Send + Sync,
{
    fn transport_for(&self, label: &str) -> Arc<dyn Transport> {
        self(label)
    }
}

pub struct SessionRegistry {
    ctx: EngineContext,
    transports: Box<dyn TransportFactory>,
    sessions: HashMap<String, Arc<Session>>,
    /// Sessions created so far; application stream ids derive from it.
    created: usize,
}

impl SessionRegistry {
    pub fn new(ctx: EngineContext, transports: impl TransportFactory + 'static) -> Self {
        Self {
            ctx,
            transports: Box::new(transports),
            sessions: HashMap::new(),
            created: 0,
        }
    }

    /// Create the bootstrap session. Refused if one exists.
    pub fn open_bootstrap(&mut self) -> Result<Arc<Session>, RegistryError> {
        if self.sessions.contains_key(BOOTSTRAP_LABEL) {
            return Err(RegistryError::Exists(BOOTSTRAP_LABEL.to_string()));
        }
        Ok(self.insert(BOOTSTRAP_LABEL, ChannelKind::Bootstrap, BOOTSTRAP_STREAM_ID.to_string()))
    }

    /// Create an application session for every label not yet known. Returns the new ones.
    pub fn open_application<S: AsRef<str>>(&mut self, labels: &[S]) -> Vec<Arc<Session>> {
        let mut created = Vec::new();
        for label in labels {
            let label: &str = label.as_ref();
            if label.is_empty() || self.sessions.contains_key(label) {
                tracing::debug!(label, "application channel exists or label empty, skipped");
                continue;
            }
            let stream_id = (APPLICATION_STREAM_BASE + self.created * 2).to_string();
            created.push(self.insert(label, ChannelKind::Application, stream_id));
        }
        created
    }

    fn insert(&mut self, label: &str, kind: ChannelKind, stream_id: String) -> Arc<Session> {
        let transport = self.transports.transport_for(label);
        let session = Session::new(label, kind, stream_id, transport, &self.ctx);
        tracing::info!(label, kind = ?kind, stream_id = session.stream_id(), "session created");
        self.sessions.insert(label.to_string(), session.clone());
        self.created += 1;
        session
    }

    pub fn get(&self, label: &str) -> Option<Arc<Session>> {
        self.sessions.get(label).cloned()
    }

    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<_> = self.sessions.keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close and forget one session.
    pub fn close(&mut self, label: &str) -> Option<Arc<Session>> {
        let session = self.sessions.remove(label)?;
        session.close();
        Some(session)
    }

    /// Close every session (hang-up).
    pub fn close_all(&mut self) {
        for (label, session) in self.sessions.drain() {
            tracing::debug!(label = %label, "closing on hang-up");
            session.close();
        }
        self.created = 0;
    }
}
