//! Fragment intake — raw transport fragments into one classified message.

use courier_core::message::InboundMessage;

/// One raw fragment as it came off the transport.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub sender: String,
    pub sender_device_id: u32,
    pub body: String,
}

/// Reassembly of messages split above the fragment layer.
///
/// Only bodies carrying a cryptographic wire prefix pass through here; an
/// implementation may hold an incomplete message back by returning `None`.
pub trait MultipartHandler: Send + Sync {
    fn process(&self, message: InboundMessage) -> Option<InboundMessage>;
}

/// Identity handler for deployments without multipart framing.
pub struct PassthroughMultipart;

impl MultipartHandler for PassthroughMultipart {
    fn process(&self, message: InboundMessage) -> Option<InboundMessage> {
        Some(message)
    }
}

/// Concatenate a fragment group into one message and classify it.
///
/// Fragments must already be in order; sender identity comes from the first
/// fragment. Returns `None` for an empty group or when the multipart
/// handler is still waiting for more parts.
pub fn assemble(fragments: &[Fragment], multipart: &dyn MultipartHandler) -> Option<InboundMessage> {
    let first = fragments.first()?;
    let body: String = fragments.iter().map(|f| f.body.as_str()).collect();
    let message = InboundMessage::new(first.sender.clone(), first.sender_device_id, body);
    if message.kind.is_session_protocol() {
        multipart.process(message)
    } else {
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::message::MessageKind;

    fn frag(body: &str) -> Fragment {
        Fragment {
            sender: "+15550100".into(),
            sender_device_id: 1,
            body: body.into(),
        }
    }

    struct Holding;
    impl MultipartHandler for Holding {
        fn process(&self, _message: InboundMessage) -> Option<InboundMessage> {
            None
        }
    }

    #[test]
    fn fragments_concatenate_in_order() {
        let msg = assemble(&[frag("?TSMaaa"), frag("bbb")], &PassthroughMultipart).unwrap();
        assert_eq!(msg.body, "?TSMaaabbb");
        assert_eq!(msg.kind, MessageKind::Secure);
    }

    #[test]
    fn empty_group_yields_nothing() {
        assert!(assemble(&[], &PassthroughMultipart).is_none());
    }

    #[test]
    fn standard_bodies_bypass_multipart() {
        // the holding handler would swallow it; standard text must not reach it
        let msg = assemble(&[frag("hello")], &Holding).unwrap();
        assert_eq!(msg.kind, MessageKind::Standard);
    }

    #[test]
    fn prefixed_bodies_go_through_multipart() {
        assert!(assemble(&[frag("?TSKpart1")], &Holding).is_none());
    }
}
