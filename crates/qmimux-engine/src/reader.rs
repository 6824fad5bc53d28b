use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, trace, warn};

use qmimux_frame::decode_frame;

use crate::demux::route;
use crate::registry::SessionRegistry;
use crate::writer::ChannelWriter;

/// Spawn the dedicated reader thread: read, decode, route.
///
/// The channel preserves message boundaries, so each successful read is one
/// frame. Malformed frames are logged and dropped. EOF or a read error is
/// fatal to the whole engine: the writer is marked failed and every live
/// session is closed, releasing blocked consumers.
pub(crate) fn spawn_reader(
    mut channel: impl Read + Send + 'static,
    registry: Arc<SessionRegistry>,
    writer: Arc<ChannelWriter>,
    buffer_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("qmimux-reader".into())
        .spawn(move || {
            let mut buf = vec![0u8; buffer_size];
            loop {
                let read = match channel.read(&mut buf) {
                    Ok(0) => {
                        error!("channel closed by the far end");
                        break;
                    }
                    Ok(n) => n,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        error!(%err, "channel read failed");
                        break;
                    }
                };

                trace!(bytes = read, "inbound");
                match decode_frame(&buf[..read]) {
                    Ok(frame) => route(&registry, &frame),
                    Err(err) => warn!(%err, "dropping malformed frame"),
                }
            }

            // No channel left to serve anyone: fail sends, wake consumers.
            writer.fail();
            registry.close_all();
        })
}
