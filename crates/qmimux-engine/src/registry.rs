use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::session::{Session, SessionKey};

/// Owns the set of live sessions.
///
/// Lock-ordering contract: the registry lock is taken before any per-session
/// inbox lock and is never held across a blocking wait. Routing walks the
/// list under the registry lock and only ever does non-blocking appends to
/// each matching inbox.
pub struct SessionRegistry {
    sessions: Mutex<Vec<Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Create a session with the given initial key and insert it.
    pub fn create(&self, key: SessionKey) -> Arc<Session> {
        let session = Arc::new(Session::new(key));
        self.lock().push(Arc::clone(&session));
        debug!(key = ?session.key(), "session created");
        session
    }

    /// Unlink a session and release any blocked consumer with `Closed`.
    ///
    /// Queued frames are discarded. Safe to call twice; the second call only
    /// re-closes an already closed session.
    pub fn destroy(&self, session: &Arc<Session>) {
        self.lock().retain(|s| !Arc::ptr_eq(s, session));
        session.close();
        debug!(key = ?session.key(), "session destroyed");
    }

    /// Close every live session and empty the registry.
    ///
    /// Fatal-channel path: with the channel gone there is nothing left to
    /// route, and every blocked consumer must observe `Closed`.
    pub fn close_all(&self) {
        let drained = std::mem::take(&mut *self.lock());
        for session in &drained {
            session.close();
        }
        debug!(count = drained.len(), "all sessions closed");
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Visit every session whose current key satisfies `predicate`.
    ///
    /// The registry lock is held for the traversal only; `visit` must not
    /// block (the demultiplexer uses it for non-blocking inbox appends).
    pub fn for_each_matching(
        &self,
        predicate: impl Fn(SessionKey) -> bool,
        mut visit: impl FnMut(&Arc<Session>),
    ) {
        for session in self.lock().iter() {
            if predicate(session.key()) {
                visit(session);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
