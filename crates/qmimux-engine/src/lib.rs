//! QMI session demultiplexing engine.
//!
//! One shared, ordered, bidirectional byte channel carries QMUX frames for
//! many independent logical sessions, each addressed by a (service id,
//! client id) pair. This crate owns everything between the raw channel and
//! the session API:
//!
//! - a session registry with atomic key (re)binding,
//! - a demultiplexer fanning each inbound frame out to the sessions it
//!   addresses,
//! - the control-plane client (allocate/release client ids, version query)
//!   with its request/reply correlation loop, and
//! - the dedicated reader thread plus the exclusive channel write lock.
//!
//! The channel itself is any `Read`/`Write` pair that preserves message
//! boundaries (one read yields one frame), such as a cdc-wdm character
//! device.
//!
//! ```no_run
//! use qmimux_engine::Mux;
//!
//! # fn main() -> qmimux_engine::Result<()> {
//! # let device = std::os::unix::net::UnixStream::connect("/run/qmi.sock")?;
//! let mux = Mux::new(device.try_clone()?, device)?;
//! let session = mux.open();
//! let cid = mux.get_service_cid(&session, 2)?;
//! mux.send(&session, b"request bytes")?;
//! let reply = session.recv()?;
//! # let _ = (cid, reply);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod demux;
pub mod error;
pub mod mux;
pub mod registry;
pub mod session;

mod control_client;
mod reader;
mod writer;

pub use config::MuxConfig;
pub use demux::route;
pub use error::{MuxError, Result};
pub use mux::Mux;
pub use registry::SessionRegistry;
pub use session::{Session, SessionKey};

pub use qmimux_frame::{Frame, ServiceVersion};
