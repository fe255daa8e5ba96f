//! Process-wide session state: who is logged in, if anyone.
//!
//! [`SessionStore`] is the single owner of the current [`SessionState`]. It is
//! mutated only through [`SessionStore::establish`] and [`SessionStore::clear`]
//! (the latter also reachable through an [`AuthInvalidated`] event), writes
//! through to [`SessionStorage`] on every change, and notifies subscribers
//! synchronously, in mutation order, once the mutation lock is released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use serde::{Deserialize, Serialize};

use crate::storage::SessionStorage;
use crate::UserIdentity;

/// Storage key the session is persisted under.
pub const SESSION_STORAGE_KEY: &str = "nexus.session";

const PERSISTED_VERSION: u32 = 1;

/// Current authentication state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated(Arc<UserIdentity>),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn identity(&self) -> Option<&Arc<UserIdentity>> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            SessionState::Anonymous => None,
        }
    }
}

/// On-disk envelope.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    version: u32,
    identity: Option<UserIdentity>,
}

/// Credentials were rejected somewhere; the session must go back to anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInvalidated {
    pub status_code: u16,
    pub code: Option<String>,
}

/// Receiver of [`AuthInvalidated`] events.
pub trait AuthInvalidationListener: Send + Sync {
    fn on_auth_invalidated(&self, event: &AuthInvalidated);
}

/// Handle returned by [`SessionStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type SessionListener = Arc<dyn Fn(&SessionState) + Send + Sync>;

/// State changes waiting for their listeners, in mutation order.
#[derive(Default)]
struct Delivery {
    pending: VecDeque<(u64, SessionState)>,
    next_seq: u64,
    delivered: u64,
    /// Thread currently running listeners, if any.
    deliverer: Option<ThreadId>,
}

/// Owner of the process-wide session.
///
/// Listeners run after the mutation lock is released and may call back into
/// the store, including `establish` and `clear`. A change made from inside a
/// listener is delivered once the current round of listeners has returned.
pub struct SessionStore {
    state: RwLock<SessionState>,
    mutation: Mutex<()>,
    storage: Arc<dyn SessionStorage>,
    listeners: Mutex<Vec<(SubscriptionId, SessionListener)>>,
    next_subscription: AtomicU64,
    delivery: Mutex<Delivery>,
    delivered: Condvar,
}

impl core::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// A store starting anonymous, ignoring anything already persisted.
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self::with_state(storage, SessionState::Anonymous)
    }

    /// A store restored from whatever `storage` holds.
    ///
    /// Best effort: unreadable, corrupt or unknown persisted values all start
    /// the store anonymous.
    pub fn rehydrate(storage: Arc<dyn SessionStorage>) -> Self {
        let state = match storage.read(SESSION_STORAGE_KEY) {
            Ok(Some(raw)) => decode_persisted(&raw),
            Ok(None) => SessionState::Anonymous,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read persisted session; starting anonymous");
                SessionState::Anonymous
            }
        };

        match state.identity() {
            Some(identity) => tracing::info!(user_id = %identity.id, "session rehydrated"),
            None => tracing::debug!("no persisted session"),
        }

        Self::with_state(storage, state)
    }

    fn with_state(storage: Arc<dyn SessionStorage>, state: SessionState) -> Self {
        Self {
            state: RwLock::new(state),
            mutation: Mutex::new(()),
            storage,
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            delivery: Mutex::new(Delivery::default()),
            delivered: Condvar::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_identity(&self) -> Option<Arc<UserIdentity>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .identity()
            .cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_authenticated()
    }

    /// Replace the session with `identity`.
    pub fn establish(&self, identity: UserIdentity) {
        let guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);

        let user_id = identity.id;
        self.persist(Some(&identity));
        let next = SessionState::Authenticated(Arc::new(identity));
        self.replace(next.clone());
        let seq = self.enqueue(next);
        drop(guard);

        tracing::info!(user_id = %user_id, "session established");
        self.deliver(seq);
    }

    /// Reset to anonymous.
    ///
    /// Always removes the persisted value; subscribers are only notified when
    /// the session actually changed.
    pub fn clear(&self) {
        let guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(err) = self.storage.remove(SESSION_STORAGE_KEY) {
            tracing::warn!(error = %err, "failed to remove persisted session");
        }

        let previous = self.replace(SessionState::Anonymous);
        let Some(identity) = previous.identity() else {
            tracing::debug!("session clear on anonymous session");
            return;
        };
        let seq = self.enqueue(SessionState::Anonymous);
        drop(guard);

        tracing::info!(user_id = %identity.id, "session cleared");
        self.deliver(seq);
    }

    /// Register a listener called with the new state after every change.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns whether a listener was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    fn replace(&self, next: SessionState) -> SessionState {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }

    fn persist(&self, identity: Option<&UserIdentity>) {
        let envelope = PersistedSession {
            version: PERSISTED_VERSION,
            identity: identity.cloned(),
        };
        let result = serde_json::to_string(&envelope)
            .map_err(anyhow::Error::from)
            .and_then(|raw| {
                self.storage
                    .write(SESSION_STORAGE_KEY, &raw)
                    .map_err(anyhow::Error::from)
            });
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to persist session");
        }
    }

    /// Queue a change for delivery. Called with the mutation lock held so the
    /// queue order is the mutation order.
    fn enqueue(&self, state: SessionState) -> u64 {
        let mut delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        delivery.next_seq += 1;
        let seq = delivery.next_seq;
        delivery.pending.push_back((seq, state));
        seq
    }

    /// Return once change `seq` has reached every listener.
    ///
    /// The first caller to find no delivery in progress drains the whole queue.
    /// A nested call from a listener returns at once and leaves its change to
    /// the outer drain.
    fn deliver(&self, seq: u64) {
        let me = thread::current().id();
        let mut delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if delivery.delivered >= seq {
                return;
            }
            match delivery.deliverer {
                Some(owner) if owner == me => return,
                Some(_) => {
                    delivery = self
                        .delivered
                        .wait(delivery)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => break,
            }
        }

        delivery.deliverer = Some(me);
        while let Some((next, state)) = delivery.pending.pop_front() {
            drop(delivery);
            for listener in self.listeners_snapshot() {
                listener(&state);
            }
            delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
            delivery.delivered = next;
            self.delivered.notify_all();
        }
        delivery.deliverer = None;
        self.delivered.notify_all();
    }

    fn listeners_snapshot(&self) -> Vec<SessionListener> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl AuthInvalidationListener for SessionStore {
    fn on_auth_invalidated(&self, event: &AuthInvalidated) {
        tracing::info!(
            status_code = event.status_code,
            code = event.code.as_deref().unwrap_or(""),
            "authentication invalidated"
        );
        self.clear();
    }
}

fn decode_persisted(raw: &str) -> SessionState {
    match serde_json::from_str::<PersistedSession>(raw) {
        Ok(PersistedSession {
            version: PERSISTED_VERSION,
            identity: Some(identity),
        }) => SessionState::Authenticated(Arc::new(identity)),
        Ok(PersistedSession {
            version: PERSISTED_VERSION,
            identity: None,
        }) => SessionState::Anonymous,
        Ok(PersistedSession { version, .. }) => {
            tracing::warn!(version, "unsupported persisted session version; starting anonymous");
            SessionState::Anonymous
        }
        Err(err) => {
            tracing::warn!(error = %err, "corrupt persisted session; starting anonymous");
            SessionState::Anonymous
        }
    }
}
