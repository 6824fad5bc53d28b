use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use qmimux_frame::Frame;

use crate::error::{MuxError, Result};

/// A session address: service id in the high byte, client id in the low.
///
/// Packing the pair into one `u16` keeps key updates atomic and lets the
/// demultiplexer match with a mask/value pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(u16);

impl SessionKey {
    /// The key every session starts with, before allocate binds it.
    pub const UNBOUND: SessionKey = SessionKey(0xffff);

    pub fn new(service: u8, client: u8) -> Self {
        Self((service as u16) << 8 | client as u16)
    }

    pub fn service(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn client(self) -> u8 {
        self.0 as u8
    }

    pub fn is_unbound(self) -> bool {
        self == Self::UNBOUND
    }

    pub(crate) fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbound() {
            write!(f, "SessionKey(unbound)")
        } else {
            write!(f, "SessionKey({}:{})", self.service(), self.client())
        }
    }
}

#[derive(Debug, Default)]
struct Inbox {
    queue: VecDeque<Frame>,
    closed: bool,
}

/// An addressable endpoint on the shared channel.
///
/// The reader thread is the sole producer into the inbox; any number of
/// consumers may block in [`recv`](Self::recv). Destroying the session wakes
/// every blocked consumer with [`MuxError::Closed`].
pub struct Session {
    key: AtomicU16,
    inbox: Mutex<Inbox>,
    ready: Condvar,
}

impl Session {
    pub(crate) fn new(key: SessionKey) -> Self {
        Self {
            key: AtomicU16::new(key.raw()),
            inbox: Mutex::new(Inbox::default()),
            ready: Condvar::new(),
        }
    }

    /// The current session key, as the demultiplexer sees it.
    pub fn key(&self) -> SessionKey {
        SessionKey(self.key.load(Ordering::Acquire))
    }

    /// Bind the session to its allocated key.
    ///
    /// A session binds at most once: fails with [`MuxError::AlreadyBound`]
    /// unless the current key is the unbound sentinel. The swap is atomic
    /// with respect to concurrent routing.
    pub fn bind(&self, key: SessionKey) -> Result<()> {
        self.key
            .compare_exchange(
                SessionKey::UNBOUND.raw(),
                key.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| MuxError::AlreadyBound)
    }

    /// Reset the key to the unbound sentinel, returning the previous key.
    ///
    /// Routing stops delivering to the old key the moment this returns.
    pub(crate) fn unbind(&self) -> SessionKey {
        SessionKey(self.key.swap(SessionKey::UNBOUND.raw(), Ordering::AcqRel))
    }

    /// Receive the next frame, blocking until one is queued or the session
    /// is destroyed.
    pub fn recv(&self) -> Result<Frame> {
        let mut inbox = self.lock_inbox();
        loop {
            if let Some(frame) = inbox.queue.pop_front() {
                return Ok(frame);
            }
            if inbox.closed {
                return Err(MuxError::Closed);
            }
            inbox = self
                .ready
                .wait(inbox)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Receive the next frame, giving up at `deadline`.
    ///
    /// Returns `Ok(None)` once the deadline passes with nothing queued.
    pub fn recv_deadline(&self, deadline: Instant) -> Result<Option<Frame>> {
        let mut inbox = self.lock_inbox();
        loop {
            if let Some(frame) = inbox.queue.pop_front() {
                return Ok(Some(frame));
            }
            if inbox.closed {
                return Err(MuxError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            inbox = self
                .ready
                .wait_timeout(inbox, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Receive with a relative timeout; maps an expired wait to
    /// [`MuxError::Timeout`].
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Frame> {
        self.recv_deadline(Instant::now() + timeout)?
            .ok_or(MuxError::Timeout(timeout))
    }

    /// Number of frames waiting in the inbox.
    pub fn pending(&self) -> usize {
        self.lock_inbox().queue.len()
    }

    /// True once the session has been destroyed.
    pub fn is_closed(&self) -> bool {
        self.lock_inbox().closed
    }

    /// Append an inbound frame and wake one waiting consumer.
    ///
    /// Frames arriving after close are dropped; there is no consumer left
    /// to read them.
    pub(crate) fn push(&self, frame: Frame) {
        let mut inbox = self.lock_inbox();
        if inbox.closed {
            return;
        }
        inbox.queue.push_back(frame);
        drop(inbox);
        self.ready.notify_one();
    }

    /// Drain the inbox and release every blocked consumer with `Closed`.
    pub(crate) fn close(&self) {
        let mut inbox = self.lock_inbox();
        inbox.queue.clear();
        inbox.closed = true;
        drop(inbox);
        self.ready.notify_all();
    }

    fn lock_inbox(&self) -> MutexGuard<'_, Inbox> {
        // A panicked producer leaves the queue consistent; keep going.
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key())
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
