use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use bytes::BytesMut;
use tracing::debug;

use qmimux_frame::{encode_frame, ServiceVersion};

use crate::config::MuxConfig;
use crate::control_client::ControlPlane;
use crate::error::{MuxError, Result};
use crate::reader::spawn_reader;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionKey};
use crate::writer::ChannelWriter;

/// The multiplexing engine over one shared duplex channel.
///
/// Front ends open sessions here, bind them to a service via
/// [`get_service_cid`](Self::get_service_cid), and exchange payloads; the
/// engine wraps outbound payloads in QMUX envelopes, demultiplexes inbound
/// frames to the right sessions, and runs the control-plane protocol.
pub struct Mux {
    registry: Arc<SessionRegistry>,
    writer: Arc<ChannelWriter>,
    control: ControlPlane,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Mux {
    /// Build an engine over the two halves of a duplex channel with default
    /// configuration.
    pub fn new(
        reader_half: impl Read + Send + 'static,
        writer_half: impl Write + Send + 'static,
    ) -> Result<Self> {
        Self::with_config(reader_half, writer_half, MuxConfig::default())
    }

    /// Build an engine with explicit configuration. Spawns the reader
    /// thread.
    pub fn with_config(
        reader_half: impl Read + Send + 'static,
        writer_half: impl Write + Send + 'static,
        config: MuxConfig,
    ) -> Result<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let writer = Arc::new(ChannelWriter::new(writer_half));
        let reader = spawn_reader(
            reader_half,
            Arc::clone(&registry),
            Arc::clone(&writer),
            config.read_buffer_size,
        )?;

        Ok(Self {
            control: ControlPlane::new(Arc::clone(&registry), Arc::clone(&writer), config),
            registry,
            writer,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Open a new, unbound session.
    pub fn open(&self) -> Arc<Session> {
        self.registry.create(SessionKey::UNBOUND)
    }

    /// Close a session: unlink it, discard queued frames, and release any
    /// consumer blocked in `recv` with `Closed`.
    pub fn close(&self, session: &Arc<Session>) {
        self.registry.destroy(session);
    }

    /// Send a payload on a bound session.
    ///
    /// The payload is wrapped in a QMUX envelope addressed with the
    /// session's key and written under the channel write lock.
    pub fn send(&self, session: &Session, payload: &[u8]) -> Result<()> {
        let key = session.key();
        if key.is_unbound() {
            return Err(MuxError::NotBound);
        }

        let mut wire = BytesMut::new();
        encode_frame(key.service(), key.client(), payload, &mut wire)?;
        self.writer.send(&wire)
    }

    /// Allocate a client id for `service` and bind `session` to it.
    pub fn get_service_cid(&self, session: &Session, service: u8) -> Result<u8> {
        self.control.allocate_client_id(session, service)
    }

    /// Release `session`'s client id, returning it to the unbound state.
    pub fn release_cid(&self, session: &Session) -> Result<()> {
        self.control.release_client_id(session)
    }

    /// Query the service versions the far end supports.
    pub fn query_versions(&self) -> Result<Vec<ServiceVersion>> {
        self.control.query_versions()
    }

    /// The live session registry (sessions currently open on this engine).
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// True once the channel has failed and the engine is defunct.
    pub fn is_failed(&self) -> bool {
        self.writer.is_failed()
    }

    /// Tear the engine down: close every session and stop accepting sends.
    ///
    /// The reader thread is joined only if the channel has already failed;
    /// a thread parked in a blocking `read` cannot be interrupted portably,
    /// so otherwise it is detached and exits when the channel does.
    pub fn shutdown(&self) {
        debug!("engine shutdown");
        self.writer.fail();
        self.registry.close_all();

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        self.shutdown();
    }
}
