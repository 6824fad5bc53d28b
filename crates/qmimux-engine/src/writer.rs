use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{MuxError, Result};

/// The write half of the shared channel.
///
/// The channel is a single ordered byte stream; interleaved writes would
/// corrupt framing, so every send runs under one exclusive lock. Once the
/// reader loop reports a channel failure the writer refuses further sends.
pub(crate) struct ChannelWriter {
    inner: Mutex<Box<dyn Write + Send>>,
    failed: AtomicBool,
}

impl ChannelWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Mutex::new(Box::new(writer)),
            failed: AtomicBool::new(false),
        }
    }

    /// Write one complete frame, holding the channel write lock throughout.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.is_failed() {
            return Err(MuxError::Closed);
        }

        let mut writer = self.lock();
        let mut offset = 0usize;
        while offset < bytes.len() {
            match writer.write(&bytes[offset..]) {
                Ok(0) => return Err(MuxError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(MuxError::Io(err)),
            }
        }
        loop {
            match writer.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(MuxError::Io(err)),
            }
        }
    }

    /// Mark the channel dead; subsequent sends fail with `Closed`.
    pub fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
