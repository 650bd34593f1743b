//! Session creation and lookup by identifier.

use crate::session::inbound::SocketInbound;
use crate::session::machine::Session;
use crate::session::timer::TimerService;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Shared part of the registry; sessions hold a weak reference to it so they
/// can unregister themselves on shutdown.
#[derive(Debug)]
pub(crate) struct RegistryShared {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    timers: TimerService,
}

impl RegistryShared {
    pub(crate) fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if removed.is_some() {
            debug!(session_id, "Removed session from registry");
        }
        removed
    }
}

/// Owner of every live [`Session`], keyed by session id.
///
/// The map lock is only held for insert/lookup/remove, never while a
/// session does work. Cloning yields another handle to the same registry.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    shared: Arc<RegistryShared>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_timer_service(TimerService::new())
    }

    /// Create a registry whose sessions schedule timers on `timers`
    pub fn with_timer_service(timers: TimerService) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                sessions: RwLock::new(HashMap::new()),
                timers,
            }),
        }
    }

    pub fn timer_service(&self) -> &TimerService {
        &self.shared.timers
    }

    /// Create and register a session with a fresh unique id.
    ///
    /// A session created without an application is aborted on first connect.
    pub fn create_session(&self, inbound: Option<Arc<dyn SocketInbound>>) -> Arc<Session> {
        let mut sessions = self
            .shared
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let id = loop {
            let candidate = generate_session_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Session::new(
            id.clone(),
            inbound,
            self.shared.timers.clone(),
            Arc::downgrade(&self.shared),
        );
        sessions.insert(id.clone(), Arc::clone(&session));
        info!(session_id = %id, "Created session");
        session
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.shared
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn remove_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.shared.remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.shared
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.shared
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Disconnect every live session and empty the registry
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .shared
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, session)| session)
            .collect();

        info!(count = sessions.len(), "Shutting down session registry");
        for session in sessions {
            session.disconnect().await;
        }
    }
}

/// Opaque, URL-safe session identifier
fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}
