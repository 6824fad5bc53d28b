//! Control-plane client: version query, client-id allocate/release.
//!
//! Every call follows the same shape: create an ephemeral session keyed
//! (control service, client 0), write the request under the channel write
//! lock, then dequeue control replies until one carries the expected message
//! id. Replies are matched by message id only — the wire protocol assigns no
//! usable per-call transaction id — so calls are serialized end-to-end by a
//! dedicated lock to keep two concurrent calls from cross-delivering.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, trace, warn};

use qmimux_frame::{
    alloc_cid_request, get_version_request, parse_alloc_reply, parse_status, parse_version_reply,
    release_cid_request, ControlHeader, Frame, ServiceVersion, MSG_ALLOC_CID, MSG_GET_VERSION,
    MSG_RELEASE_CID, QMI_CTL, QMUX_FLAG_RESPONSE,
};

use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionKey};
use crate::writer::ChannelWriter;

pub(crate) struct ControlPlane {
    registry: Arc<SessionRegistry>,
    writer: Arc<ChannelWriter>,
    serial: Mutex<()>,
    config: MuxConfig,
}

impl ControlPlane {
    pub fn new(
        registry: Arc<SessionRegistry>,
        writer: Arc<ChannelWriter>,
        config: MuxConfig,
    ) -> Self {
        Self {
            registry,
            writer,
            serial: Mutex::new(()),
            config,
        }
    }

    /// Query the service versions the far end supports.
    pub fn query_versions(&self) -> Result<Vec<ServiceVersion>> {
        let reply = self.correlated_request(&get_version_request(), MSG_GET_VERSION)?;
        let block = checked_reply_block(&reply)?;
        parse_version_reply(block).map_err(MuxError::MalformedReply)
    }

    /// Allocate a client id for `service` and bind the caller's session.
    ///
    /// Fails with `AlreadyBound` without touching the existing key if the
    /// session is already bound. On any failure the session stays unbound.
    pub fn allocate_client_id(&self, session: &Session, service: u8) -> Result<u8> {
        if !session.key().is_unbound() {
            return Err(MuxError::AlreadyBound);
        }

        let reply = self.correlated_request(&alloc_cid_request(service), MSG_ALLOC_CID)?;
        let block = checked_reply_block(&reply)?;
        let (_, client) = parse_alloc_reply(block).map_err(MuxError::MalformedReply)?;

        session.bind(SessionKey::new(service, client))?;
        debug!(service, client, "client id allocated");
        Ok(client)
    }

    /// Release the caller's client id.
    ///
    /// The session is unbound *before* the release request goes out, so the
    /// demultiplexer stops delivering frames for a client id mid-teardown.
    /// A send failure after that point is best-effort teardown: the key is
    /// not restored.
    pub fn release_client_id(&self, session: &Session) -> Result<()> {
        let key = session.unbind();
        if key.is_unbound() {
            return Err(MuxError::NotBound);
        }
        debug!(service = key.service(), client = key.client(), "releasing client id");

        let request = release_cid_request(key.service(), key.client());
        let reply = self.correlated_request(&request, MSG_RELEASE_CID)?;
        checked_reply_block(&reply).map(drop)
    }

    /// Send a control request and wait for the reply carrying `match_msg`.
    ///
    /// The deadline is absolute and shared across the whole retry loop; a
    /// bounded number of non-matching replies is discarded before the call
    /// gives up early. The ephemeral session is destroyed on every exit
    /// path.
    pub fn correlated_request(&self, request: &[u8], match_msg: u16) -> Result<Frame> {
        let _serial = self.serial.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now() + self.config.ctl_deadline;
        let ephemeral = self.registry.create(SessionKey::new(QMI_CTL, 0));

        let outcome = self.exchange(&ephemeral, request, match_msg, deadline);
        self.registry.destroy(&ephemeral);
        outcome
    }

    fn exchange(
        &self,
        ephemeral: &Session,
        request: &[u8],
        match_msg: u16,
        deadline: Instant,
    ) -> Result<Frame> {
        self.writer.send(request)?;

        let mut mismatches = 0usize;
        loop {
            let frame = match ephemeral.recv_deadline(deadline)? {
                Some(frame) => frame,
                None => {
                    warn!(msg = match_msg, "control request deadline expired");
                    return Err(MuxError::Timeout(self.config.ctl_deadline));
                }
            };

            if is_reply_match(&frame, match_msg) {
                trace!(msg = match_msg, "control reply matched");
                return Ok(frame);
            }

            mismatches += 1;
            trace!(msg = match_msg, mismatches, "discarding unrelated control frame");
            if mismatches >= self.config.ctl_mismatch_budget {
                warn!(msg = match_msg, "control request mismatch budget exhausted");
                return Err(MuxError::Timeout(self.config.ctl_deadline));
            }
        }
    }
}

/// A reply matches when it is a service-to-host control frame for client 0
/// whose sub-header carries the awaited message id.
fn is_reply_match(frame: &Frame, match_msg: u16) -> bool {
    if frame.ctrl_flags != QMUX_FLAG_RESPONSE || frame.service != QMI_CTL || frame.client != 0 {
        return false;
    }
    matches!(
        ControlHeader::decode(&frame.payload),
        Ok((header, _)) if header.message == match_msg
    )
}

/// Decode a reply's TLV block and map a non-zero status to `ControlFailure`.
///
/// A reply whose status TLV is missing or short is `MalformedReply`, not a
/// wire-level frame error: the frame itself decoded fine.
fn checked_reply_block(reply: &Frame) -> Result<&[u8]> {
    let (_, block) = ControlHeader::decode(&reply.payload).map_err(MuxError::MalformedReply)?;
    let status = parse_status(block).map_err(MuxError::MalformedReply)?;
    if !status.is_success() {
        return Err(MuxError::ControlFailure {
            result: status.result,
            error: status.error,
        });
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use bytes::{BufMut, Bytes, BytesMut};
    use qmimux_frame::CTL_FLAG_RESPONSE;

    use super::*;
    use crate::demux::route;

    struct NullSink;
    impl Write for NullSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn control_plane(registry: &Arc<SessionRegistry>, deadline_ms: u64) -> ControlPlane {
        ControlPlane::new(
            Arc::clone(registry),
            Arc::new(ChannelWriter::new(NullSink)),
            MuxConfig {
                ctl_deadline: Duration::from_millis(deadline_ms),
                ..MuxConfig::default()
            },
        )
    }

    fn ctl_response(msg: u16, block: &[u8]) -> Frame {
        let mut payload = BytesMut::new();
        payload.put_u8(CTL_FLAG_RESPONSE);
        payload.put_u8(0x01);
        payload.put_u16_le(msg);
        payload.put_u16_le(block.len() as u16);
        payload.put_slice(block);
        Frame {
            ctrl_flags: QMUX_FLAG_RESPONSE,
            service: QMI_CTL,
            client: 0,
            payload: payload.freeze(),
        }
    }

    const SUCCESS_STATUS: &[u8] = &[0x02, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];

    fn alloc_reply_block(service: u8, client: u8) -> Vec<u8> {
        let mut block = SUCCESS_STATUS.to_vec();
        block.extend_from_slice(&[0x01, 0x02, 0x00, service, client]);
        block
    }

    /// Route `frames` once the registry holds `when_len` sessions.
    fn feed_when(
        registry: &Arc<SessionRegistry>,
        when_len: usize,
        frames: Vec<Frame>,
    ) -> std::thread::JoinHandle<()> {
        let registry = Arc::clone(registry);
        std::thread::spawn(move || {
            while registry.len() < when_len {
                std::thread::sleep(Duration::from_millis(1));
            }
            for frame in &frames {
                route(&registry, frame);
            }
        })
    }

    #[test]
    fn matching_reply_is_returned() {
        let registry = Arc::new(SessionRegistry::new());
        let ctl = control_plane(&registry, 1000);

        let feeder = feed_when(
            &registry,
            1,
            vec![ctl_response(MSG_GET_VERSION, SUCCESS_STATUS)],
        );

        let reply = ctl
            .correlated_request(&get_version_request(), MSG_GET_VERSION)
            .unwrap();
        assert!(is_reply_match(&reply, MSG_GET_VERSION));
        feeder.join().unwrap();
    }

    #[test]
    fn retry_discards_mismatches_then_matches() {
        let registry = Arc::new(SessionRegistry::new());
        let ctl = control_plane(&registry, 1000);

        // Four unrelated control replies, then the one being awaited.
        let mut frames: Vec<_> = (0..4)
            .map(|_| ctl_response(MSG_GET_VERSION, SUCCESS_STATUS))
            .collect();
        frames.push(ctl_response(MSG_ALLOC_CID, &alloc_reply_block(2, 9)));
        let feeder = feed_when(&registry, 1, frames);

        let reply = ctl
            .correlated_request(&alloc_cid_request(2), MSG_ALLOC_CID)
            .unwrap();
        let (header, _) = ControlHeader::decode(&reply.payload).unwrap();
        assert_eq!(header.message, MSG_ALLOC_CID);

        feeder.join().unwrap();
        // The ephemeral session is gone again.
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn mismatch_budget_exhaustion_times_out() {
        let registry = Arc::new(SessionRegistry::new());
        let ctl = control_plane(&registry, 30_000);

        let frames: Vec<_> = (0..5)
            .map(|_| ctl_response(MSG_GET_VERSION, SUCCESS_STATUS))
            .collect();
        let feeder = feed_when(&registry, 1, frames);

        let err = ctl
            .correlated_request(&alloc_cid_request(2), MSG_ALLOC_CID)
            .unwrap_err();
        assert!(matches!(err, MuxError::Timeout(_)));
        feeder.join().unwrap();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn timeout_cleans_up_ephemeral_session() {
        let registry = Arc::new(SessionRegistry::new());
        let _caller = registry.create(SessionKey::UNBOUND);
        let before = registry.len();

        let ctl = control_plane(&registry, 30);
        let err = ctl
            .correlated_request(&get_version_request(), MSG_GET_VERSION)
            .unwrap_err();
        assert!(matches!(err, MuxError::Timeout(_)));
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn allocate_binds_callers_session() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(SessionKey::UNBOUND);
        let ctl = control_plane(&registry, 1000);

        let feeder = feed_when(
            &registry,
            2,
            vec![ctl_response(MSG_ALLOC_CID, &alloc_reply_block(2, 9))],
        );

        let client = ctl.allocate_client_id(&session, 2).unwrap();
        feeder.join().unwrap();

        assert_eq!(client, 9);
        assert_eq!(session.key(), SessionKey::new(2, 9));
    }

    #[test]
    fn allocate_on_bound_session_is_rejected() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(SessionKey::new(2, 9));
        let ctl = control_plane(&registry, 1000);

        let err = ctl.allocate_client_id(&session, 3).unwrap_err();
        assert!(matches!(err, MuxError::AlreadyBound));
        assert_eq!(session.key(), SessionKey::new(2, 9));
        // No ephemeral session was ever created.
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn allocate_failure_leaves_session_unbound() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(SessionKey::UNBOUND);
        let ctl = control_plane(&registry, 1000);

        // Modem rejects the allocation.
        let mut block = vec![0x02, 0x04, 0x00, 0x01, 0x00, 0x05, 0x00];
        block.extend_from_slice(&[0x01, 0x02, 0x00, 0x02, 0x09]);
        let feeder = feed_when(&registry, 2, vec![ctl_response(MSG_ALLOC_CID, &block)]);

        let err = ctl.allocate_client_id(&session, 2).unwrap_err();
        feeder.join().unwrap();

        assert!(matches!(
            err,
            MuxError::ControlFailure {
                result: 1,
                error: 5
            }
        ));
        assert!(session.key().is_unbound());
    }

    #[test]
    fn alloc_reply_without_cid_tlv_is_malformed() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(SessionKey::UNBOUND);
        let ctl = control_plane(&registry, 1000);

        // Status ok, but the cid TLV is absent.
        let feeder = feed_when(&registry, 2, vec![ctl_response(MSG_ALLOC_CID, SUCCESS_STATUS)]);

        let err = ctl.allocate_client_id(&session, 2).unwrap_err();
        feeder.join().unwrap();

        assert!(matches!(err, MuxError::MalformedReply(_)));
        assert!(session.key().is_unbound());
    }

    #[test]
    fn reply_without_status_tlv_is_malformed() {
        let registry = Arc::new(SessionRegistry::new());
        let ctl = control_plane(&registry, 1000);

        let feeder = feed_when(&registry, 1, vec![ctl_response(MSG_GET_VERSION, &[])]);

        let err = ctl.query_versions().unwrap_err();
        feeder.join().unwrap();
        assert!(matches!(err, MuxError::MalformedReply(_)));
    }

    #[test]
    fn release_unbinds_before_the_request_completes() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(SessionKey::new(2, 9));
        let ctl = control_plane(&registry, 1000);

        let feeder = feed_when(
            &registry,
            2,
            vec![ctl_response(MSG_RELEASE_CID, SUCCESS_STATUS)],
        );

        ctl.release_client_id(&session).unwrap();
        feeder.join().unwrap();
        assert!(session.key().is_unbound());
    }

    #[test]
    fn release_timeout_still_unbinds() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(SessionKey::new(2, 9));
        let ctl = control_plane(&registry, 30);

        let err = ctl.release_client_id(&session).unwrap_err();
        assert!(matches!(err, MuxError::Timeout(_)));
        // Best-effort teardown: no rollback of the unbind.
        assert!(session.key().is_unbound());
    }

    #[test]
    fn release_on_unbound_session_is_rejected() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry.create(SessionKey::UNBOUND);
        let ctl = control_plane(&registry, 1000);

        let err = ctl.release_client_id(&session).unwrap_err();
        assert!(matches!(err, MuxError::NotBound));
    }

    #[test]
    fn version_query_parses_service_list() {
        let registry = Arc::new(SessionRegistry::new());
        let ctl = control_plane(&registry, 1000);

        let mut block = SUCCESS_STATUS.to_vec();
        block.extend_from_slice(&[
            0x01, 0x0b, 0x00, 0x02, 0x00, 0x01, 0x00, 0x03, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00,
        ]);
        let feeder = feed_when(&registry, 1, vec![ctl_response(MSG_GET_VERSION, &block)]);

        let versions = ctl.query_versions().unwrap();
        feeder.join().unwrap();

        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].service, 0);
        assert_eq!((versions[1].major, versions[1].minor), (1, 0));
    }

    #[test]
    fn reply_match_requires_service_and_direction() {
        let good = ctl_response(MSG_ALLOC_CID, SUCCESS_STATUS);
        assert!(is_reply_match(&good, MSG_ALLOC_CID));
        assert!(!is_reply_match(&good, MSG_RELEASE_CID));

        let mut wrong_direction = good.clone();
        wrong_direction.ctrl_flags = 0;
        assert!(!is_reply_match(&wrong_direction, MSG_ALLOC_CID));

        let mut wrong_service = good.clone();
        wrong_service.service = 2;
        assert!(!is_reply_match(&wrong_service, MSG_ALLOC_CID));

        let mut wrong_client = good;
        wrong_client.client = 1;
        assert!(!is_reply_match(&wrong_client, MSG_ALLOC_CID));

        let garbage = Frame {
            ctrl_flags: QMUX_FLAG_RESPONSE,
            service: QMI_CTL,
            client: 0,
            payload: Bytes::from_static(&[0x01]),
        };
        assert!(!is_reply_match(&garbage, MSG_ALLOC_CID));
    }
}
