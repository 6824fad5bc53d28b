//! Inbound frame routing.
//!
//! One decoded frame fans out to zero or more sessions:
//! - control-service responses are delivered to every live session, so any
//!   caller awaiting a control reply can see it;
//! - everything else is matched by (service, client), where the broadcast
//!   client sentinel addresses all clients of a service.

use tracing::{trace, warn};

use qmimux_frame::{Frame, BROADCAST_CLIENT, CTL_FLAG_RESPONSE, QMI_CTL};

use crate::registry::SessionRegistry;
use crate::session::SessionKey;

/// The session set a frame addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameMatch {
    /// Every live session, regardless of key.
    All,
    /// Sessions whose packed key satisfies `key & mask == value`.
    Masked { mask: u16, value: u16 },
}

impl FrameMatch {
    /// Classify a frame. `None` means the frame addresses nothing and is
    /// dropped (a frame needs at least one payload byte to classify its
    /// control flags).
    fn of(frame: &Frame) -> Option<Self> {
        let flags = *frame.payload.first()?;

        if frame.service == QMI_CTL && flags == CTL_FLAG_RESPONSE {
            return Some(Self::All);
        }

        let mut value = (frame.service as u16) << 8;
        let mut mask = 0xff00;
        if frame.client != BROADCAST_CLIENT {
            value |= frame.client as u16;
            mask |= 0x00ff;
        }
        Some(Self::Masked { mask, value })
    }

    fn matches(self, key: SessionKey) -> bool {
        match self {
            Self::All => true,
            Self::Masked { mask, value } => key.raw() & mask == value,
        }
    }
}

/// Deliver a copy of `frame` to every session it addresses.
///
/// Cost is O(live sessions); the copy is a cheap `Bytes` clone. Never fails:
/// unroutable frames are logged and dropped.
pub fn route(registry: &SessionRegistry, frame: &Frame) {
    let Some(matcher) = FrameMatch::of(frame) else {
        warn!(
            service = frame.service,
            client = frame.client,
            "dropping frame with empty payload"
        );
        return;
    };

    let mut delivered = 0usize;
    registry.for_each_matching(
        |key| matcher.matches(key),
        |session| {
            session.push(frame.clone());
            delivered += 1;
        },
    );
    trace!(
        service = frame.service,
        client = frame.client,
        delivered,
        "frame routed"
    );
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use qmimux_frame::QMUX_FLAG_RESPONSE;

    use super::*;

    fn data_frame(service: u8, client: u8) -> Frame {
        Frame::new(service, client, Bytes::from_static(b"\x00payload"))
    }

    fn ctl_response() -> Frame {
        Frame {
            ctrl_flags: QMUX_FLAG_RESPONSE,
            service: QMI_CTL,
            client: 0,
            payload: Bytes::from_static(&[0x01, 0x01, 0x22, 0x00, 0x00, 0x00]),
        }
    }

    #[test]
    fn exact_match_routes_to_one_session() {
        let registry = SessionRegistry::new();
        let target = registry.create(SessionKey::new(2, 9));
        let sibling = registry.create(SessionKey::new(2, 10));
        let other = registry.create(SessionKey::new(3, 9));

        route(&registry, &data_frame(2, 9));

        assert_eq!(target.pending(), 1);
        assert_eq!(sibling.pending(), 0);
        assert_eq!(other.pending(), 0);
    }

    #[test]
    fn broadcast_client_reaches_whole_service() {
        let registry = SessionRegistry::new();
        let a = registry.create(SessionKey::new(2, 9));
        let b = registry.create(SessionKey::new(2, 10));
        let other = registry.create(SessionKey::new(3, 9));
        let unbound = registry.create(SessionKey::UNBOUND);

        route(&registry, &data_frame(2, BROADCAST_CLIENT));

        assert_eq!(a.pending(), 1);
        assert_eq!(b.pending(), 1);
        assert_eq!(other.pending(), 0);
        assert_eq!(unbound.pending(), 0);
    }

    #[test]
    fn control_response_broadcasts_to_everyone() {
        let registry = SessionRegistry::new();
        let bound = registry.create(SessionKey::new(2, 9));
        let unbound = registry.create(SessionKey::UNBOUND);
        let ephemeral = registry.create(SessionKey::new(QMI_CTL, 0));

        route(&registry, &ctl_response());

        assert_eq!(bound.pending(), 1);
        assert_eq!(unbound.pending(), 1);
        assert_eq!(ephemeral.pending(), 1);
    }

    #[test]
    fn control_request_routes_by_key_only() {
        let registry = SessionRegistry::new();
        let ephemeral = registry.create(SessionKey::new(QMI_CTL, 0));
        let bound = registry.create(SessionKey::new(2, 9));

        // Control-service frame without the response flag (an indication).
        let frame = Frame::new(QMI_CTL, 0, Bytes::from_static(&[0x02, 0x00]));
        route(&registry, &frame);

        assert_eq!(ephemeral.pending(), 1);
        assert_eq!(bound.pending(), 0);
    }

    #[test]
    fn empty_payload_is_dropped() {
        let registry = SessionRegistry::new();
        let session = registry.create(SessionKey::new(2, 9));

        route(&registry, &Frame::new(2, 9, Bytes::new()));

        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn unbound_sessions_never_match_data_frames() {
        let registry = SessionRegistry::new();
        let unbound = registry.create(SessionKey::UNBOUND);

        route(&registry, &data_frame(2, 9));
        route(&registry, &data_frame(0xff, 0x42));

        assert_eq!(unbound.pending(), 0);
    }

    #[test]
    fn delivery_preserves_arrival_order() {
        let registry = SessionRegistry::new();
        let session = registry.create(SessionKey::new(1, 1));

        for tag in 0..5u8 {
            let frame = Frame::new(1, 1, vec![0x00, tag]);
            route(&registry, &frame);
        }
        for tag in 0..5u8 {
            assert_eq!(session.recv().unwrap().payload[1], tag);
        }
    }
}
