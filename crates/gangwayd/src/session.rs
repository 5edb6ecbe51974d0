//! Server-side sessions and their lifecycle.
//!
//! Sessions are keyed by a server-generated, unguessable id that the client
//! presents on every reconnect. State mutation on a single session is
//! guarded by the session's own lock; the manager's coarse map lock only
//! serialises creation, lookup and removal.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use gangway_config::SessionSettings;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Number of decimal digits in a generated session id.
const SESSION_ID_DIGITS: usize = 64;

#[derive(Debug)]
struct SessionState {
    data: HashMap<String, Value>,
    last_access: Instant,
    invalidated: bool,
}

/// One client's server-side state, shared across its connections.
#[derive(Debug)]
pub struct Session {
    id: String,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState {
                data: HashMap::new(),
                last_access: Instant::now(),
                invalidated: false,
            }),
        }
    }

    /// The session id held by the client.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Refreshes the last-access timestamp.
    pub fn touch(&self) {
        self.lock().last_access = Instant::now();
    }

    /// Time since the session was last touched.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.lock().last_access.elapsed()
    }

    /// Whether the session has been invalidated.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.lock().invalidated
    }

    /// Returns a clone of the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().data.get(key).cloned()
    }

    /// Stores `value` under `key`.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().data.insert(key.into(), value);
    }

    /// Removes and returns the value stored under `key`.
    #[must_use]
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().data.remove(key)
    }

    /// A point-in-time copy of the whole key/value state.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Map<String, Value> {
        self.lock()
            .data
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Clears all state and marks the session unusable.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.data.clear();
        state.invalidated = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: Duration) {
        let mut state = self.lock();
        if let Some(past) = Instant::now().checked_sub(by) {
            state.last_access = past;
        }
    }
}

/// Creates, looks up and expires sessions.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a session by id.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.lock().get(session_id).cloned()
    }

    /// Creates and registers a session under a fresh unguessable id.
    #[must_use]
    pub fn create(&self) -> Arc<Session> {
        let mut map = self.lock();
        let id = loop {
            let candidate = random_session_id();
            if !map.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Arc::new(Session::new(id.clone()));
        map.insert(id, Arc::clone(&session));
        debug!(target: SESSION_TARGET, session = %session.id(), "session created");
        session
    }

    /// Unregisters and invalidates a session.
    pub fn destroy(&self, session: &Session) {
        let removed = self.lock().remove(session.id());
        session.invalidate();
        if removed.is_some() {
            debug!(target: SESSION_TARGET, session = %session.id(), "session destroyed");
        }
    }

    /// Removes and invalidates every session idle for longer than `max_idle`.
    ///
    /// The map lock is held only to snapshot the registered sessions and to
    /// remove the expired ones; idle-time checks and invalidation run
    /// outside it so lookups are never blocked on session locks.
    pub fn sweep_expired(&self, max_idle: Duration) -> usize {
        let snapshot: Vec<Arc<Session>> = self.lock().values().cloned().collect();
        let expired: Vec<Arc<Session>> = snapshot
            .into_iter()
            .filter(|session| session.idle_for() > max_idle)
            .collect();

        if expired.is_empty() {
            return 0;
        }

        {
            let mut map = self.lock();
            for session in &expired {
                map.remove(session.id());
            }
        }
        for session in &expired {
            session.invalidate();
            debug!(target: SESSION_TARGET, session = %session.id(), "session expired");
        }
        expired.len()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn random_session_id() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_ID_DIGITS)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

/// Background thread running the expiry sweep on a fixed cadence.
#[derive(Debug)]
pub struct SessionSweeper {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl SessionSweeper {
    /// Starts the sweeper thread.
    #[must_use]
    pub fn start(manager: Arc<SessionManager>, settings: SessionSettings) -> Self {
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("gangway-session-sweeper".into())
            .spawn(move || run_sweeper(&manager, &settings, &flag))
            .map_err(|error| {
                warn!(target: SESSION_TARGET, %error, "failed to start session sweeper");
                error
            })
            .ok();
        Self {
            shutdown,
            handle,
        }
    }

    /// Signals the sweeper to stop and waits for it to finish.
    pub fn stop(mut self) {
        let (lock, signal) = &*self.shutdown;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        signal.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(target: SESSION_TARGET, "session sweeper panicked");
            }
        }
    }
}

fn run_sweeper(
    manager: &SessionManager,
    settings: &SessionSettings,
    shutdown: &(Mutex<bool>, Condvar),
) {
    let (lock, signal) = shutdown;
    let mut stop = lock.lock().unwrap_or_else(PoisonError::into_inner);
    while !*stop {
        let (guard, _timeout) = signal
            .wait_timeout(stop, settings.sweep_interval())
            .unwrap_or_else(PoisonError::into_inner);
        stop = guard;
        if *stop {
            break;
        }
        let swept = manager.sweep_expired(settings.max_idle());
        if swept > 0 {
            debug!(target: SESSION_TARGET, swept, "expiry sweep removed sessions");
        }
    }
}
