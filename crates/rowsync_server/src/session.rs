//! Per-session cache kept between the steps of one synchronization.

use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use rowsync_core::{BatchInfo, ScopeInfo, ServerChanges};
use rowsync_protocol::BatchPartPayload;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// State the server keeps for one session.
#[derive(Debug)]
pub struct SessionCache {
    /// Session identifier.
    pub session_id: Uuid,
    /// Scope the session was opened for.
    pub scope_name: String,
    /// Last time a step touched the session.
    pub last_access: Instant,
    /// Client scope announced with the upload.
    pub client_scope: Option<ScopeInfo>,
    /// Upload being assembled, part by part.
    pub upload: Option<BatchInfo>,
    /// Distinct upload parts received.
    pub parts_received: u32,
    /// Server changes computed once the upload is complete.
    pub changes: Option<Arc<ServerChanges>>,
    /// The last download part, kept so that a retried request for it can
    /// be answered after its batch directory is gone.
    pub last_part: Option<BatchPartPayload>,
    /// Download part reads running outside the session lock.
    readers: u32,
    /// Set once the session is dropped; the last reader removes the batch.
    released: bool,
}

impl SessionCache {
    fn new(session_id: Uuid, scope_name: &str) -> Self {
        Self {
            session_id,
            scope_name: scope_name.to_string(),
            last_access: Instant::now(),
            client_scope: None,
            upload: None,
            parts_received: 0,
            changes: None,
            last_part: None,
            readers: 0,
            released: false,
        }
    }

    /// Server timestamp of the computed changes.
    pub fn remote_timestamp(&self) -> Option<i64> {
        self.changes.as_ref().map(|c| c.remote_timestamp)
    }

    /// Registers a download part read about to run without the lock.
    pub fn begin_read(&mut self) {
        self.readers += 1;
    }

    /// Ends a read registered with [`begin_read`](Self::begin_read).
    pub fn end_read(&mut self) {
        self.readers = self.readers.saturating_sub(1);
    }

    /// Download part reads in flight.
    pub fn readers(&self) -> u32 {
        self.readers
    }

    /// Removes the download batch directory once the last part has been
    /// served, or the session released, and no read is in flight.
    ///
    /// Returns true if the directory is gone.
    pub fn release_download(&self) -> bool {
        let Some(changes) = &self.changes else {
            return true;
        };
        if self.last_part.is_none() && !self.released {
            return false;
        }
        let readers = self.readers;
        changes.batch.try_cleanup(|_| readers == 0)
    }

    /// Removes the session's batch directories, best effort.
    ///
    /// The upload is only touched under the session lock and goes at once;
    /// the download batch waits for its readers.
    pub fn release(&mut self) {
        self.released = true;
        if let Some(upload) = &self.upload {
            upload.try_cleanup(|_| true);
        }
        self.release_download();
    }
}

/// Shared handle to one session.
pub type SessionHandle = Arc<Mutex<SessionCache>>;

/// Live sessions, keyed by session id.
///
/// Each session is locked on its own, so steps of different sessions never
/// wait on each other beyond the table lookup.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
    ttl: Duration,
    max_sessions: usize,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Returns the session, creating it if needed.
    ///
    /// Only the handshake steps call this.
    ///
    /// # Errors
    ///
    /// Returns `TooManySessions` if the table is full of live sessions.
    pub fn open(&self, session_id: Uuid, scope_name: &str) -> ServerResult<SessionHandle> {
        let existing = self.sessions.lock().get(&session_id).cloned();
        if let Some(handle) = existing {
            let mut cache = handle.lock();
            let now = Instant::now();
            if cache.scope_name == scope_name && !self.is_expired(&cache, now) {
                cache.last_access = now;
                drop(cache);
                return Ok(handle);
            }
        }

        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.max_sessions {
            Self::sweep_locked(&mut sessions, self.ttl);
            if sessions.len() >= self.max_sessions {
                return Err(ServerError::TooManySessions {
                    max: self.max_sessions,
                });
            }
        }
        let handle = Arc::new(Mutex::new(SessionCache::new(session_id, scope_name)));
        if let Some(previous) = sessions.insert(session_id, Arc::clone(&handle)) {
            previous.lock().release();
        }
        debug!(%session_id, scope = scope_name, "session opened");
        Ok(handle)
    }

    /// Returns a live session for the same scope.
    ///
    /// # Errors
    ///
    /// Returns `SessionLost` if the session is unknown, expired, or was
    /// opened for another scope. An expired session is dropped.
    pub fn get(&self, session_id: Uuid, scope_name: &str) -> ServerResult<SessionHandle> {
        let lost = || ServerError::SessionLost { session_id };
        let handle = self
            .sessions
            .lock()
            .get(&session_id)
            .cloned()
            .ok_or_else(lost)?;
        let mut cache = handle.lock();
        let now = Instant::now();
        if self.is_expired(&cache, now) {
            cache.release();
            drop(cache);
            self.sessions.lock().remove(&session_id);
            debug!(%session_id, "expired session dropped");
            return Err(lost());
        }
        if cache.scope_name != scope_name {
            return Err(lost());
        }
        cache.last_access = now;
        drop(cache);
        Ok(handle)
    }

    /// Removes a session and releases its batches.
    pub fn remove(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.lock().remove(&session_id);
        match removed {
            Some(handle) => {
                handle.lock().release();
                true
            }
            None => false,
        }
    }

    /// Drops every expired session. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.lock();
        Self::sweep_locked(&mut sessions, self.ttl)
    }

    fn sweep_locked(sessions: &mut HashMap<Uuid, SessionHandle>, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, handle| {
            // A session busy with a step is live.
            let Some(mut cache) = handle.try_lock() else {
                return true;
            };
            let live = now.saturating_duration_since(cache.last_access) < ttl;
            if !live {
                cache.release();
            }
            live
        });
        let dropped = before - sessions.len();
        if dropped > 0 {
            info!(dropped, live = sessions.len(), "expired sessions swept");
        }
        dropped
    }

    fn is_expired(&self, cache: &SessionCache, now: Instant) -> bool {
        now.saturating_duration_since(cache.last_access) >= self.ttl
    }

    /// Number of sessions held, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns true if no session is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
