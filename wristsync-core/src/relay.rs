//! Transport relay seam: the capabilities a phone/watch session exposes, inbound dispatch,
//! and an in-process loopback link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::Message;
use crate::session::SessionSync;
use crate::usecase::RequestHandler;

/// Session that must be switched on before it delivers anything. Activation is idempotent.
pub trait Activatable {
    fn activate(&self);
}

/// Best-effort message transport to the paired device.
pub trait MessageTransport: Send + Sync {
    /// Snapshot; may change right after it is read.
    fn is_reachable(&self) -> bool;

    /// Hand a message to the transport. Unreachable peers get nothing: there is no queue.
    fn send(&self, message: Message) -> Result<(), SendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("peer not reachable")]
    Unreachable,
    #[error("transport closed")]
    Closed,
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Routes inbound messages: requests to the local handler, replies to the session repository.
#[derive(Clone, Default)]
pub struct InboundDispatcher {
    handler: Option<Arc<dyn RequestHandler>>,
    session: Option<Arc<SessionSync>>,
}

impl InboundDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve requests from the peer.
    pub fn with_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Deliver replies from the peer to this session's streams.
    pub fn with_session(mut self, session: Arc<SessionSync>) -> Self {
        self.session = Some(session);
        self
    }

    /// Returns the reply to send back, if the message asks for one.
    pub fn dispatch(&self, message: Message) -> Option<Message> {
        tracing::debug!(kind = message.kind(), "inbound message");
        match message {
            Message::Ping => Some(Message::Pong),
            Message::Pong => None,
            request @ (Message::RecentExercisesRequest { .. }
            | Message::SearchExercisesRequest { .. }) => match &self.handler {
                Some(handler) => handler.handle(&request),
                None => {
                    tracing::warn!(kind = request.kind(), "no handler for request; dropped");
                    None
                }
            },
            reply @ (Message::RecentExercisesReply { .. }
            | Message::SearchExercisesReply { .. }) => {
                match &self.session {
                    Some(session) => session.on_message(reply),
                    None => tracing::warn!(kind = reply.kind(), "no session for reply; dropped"),
                }
                None
            }
        }
    }
}

/// Drain `inbound` until it closes, answering through `transport`.
pub async fn pump_inbound(
    mut inbound: mpsc::UnboundedReceiver<Message>,
    dispatcher: InboundDispatcher,
    transport: Arc<dyn MessageTransport>,
) {
    while let Some(message) = inbound.recv().await {
        if let Some(reply) = dispatcher.dispatch(message) {
            if let Err(e) = transport.send(reply) {
                tracing::warn!(error = %e, "reply not delivered");
            }
        }
    }
}

struct LinkState {
    active: [AtomicBool; 2],
    up: AtomicBool,
}

/// One end of an in-process link. Reachable once both ends are activated and the link is up.
pub struct LoopbackTransport {
    side: usize,
    link: Arc<LinkState>,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Transport plus the receiver of messages the other end sent.
pub struct LoopbackEnd {
    pub transport: Arc<LoopbackTransport>,
    pub inbound: mpsc::UnboundedReceiver<Message>,
}

/// Build a connected phone/watch pair.
pub fn loopback_pair() -> (LoopbackEnd, LoopbackEnd) {
    let link = Arc::new(LinkState {
        active: [AtomicBool::new(false), AtomicBool::new(false)],
        up: AtomicBool::new(true),
    });
    let (to_b, b_inbound) = mpsc::unbounded_channel();
    let (to_a, a_inbound) = mpsc::unbounded_channel();
    let a = LoopbackEnd {
        transport: Arc::new(LoopbackTransport {
            side: 0,
            link: link.clone(),
            outbound: to_b,
        }),
        inbound: a_inbound,
    };
    let b = LoopbackEnd {
        transport: Arc::new(LoopbackTransport {
            side: 1,
            link,
            outbound: to_a,
        }),
        inbound: b_inbound,
    };
    (a, b)
}

impl LoopbackTransport {
    /// Simulate the devices moving in or out of range.
    pub fn set_link_up(&self, up: bool) {
        self.link.up.store(up, Ordering::SeqCst);
    }
}

impl Activatable for LoopbackTransport {
    fn activate(&self) {
        self.link.active[self.side].store(true, Ordering::SeqCst);
    }
}

impl MessageTransport for LoopbackTransport {
    fn is_reachable(&self) -> bool {
        self.link.up.load(Ordering::SeqCst)
            && self.link.active.iter().all(|a| a.load(Ordering::SeqCst))
    }

    fn send(&self, message: Message) -> Result<(), SendError> {
        if !self.is_reachable() {
            tracing::debug!(kind = message.kind(), "peer unreachable; message dropped");
            return Err(SendError::Unreachable);
        }
        self.outbound.send(message).map_err(|_| SendError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachable_only_after_both_sides_activate() {
        let (phone, watch) = loopback_pair();
        assert!(!watch.transport.is_reachable());
        watch.transport.activate();
        assert!(!watch.transport.is_reachable());
        phone.transport.activate();
        phone.transport.activate();
        assert!(watch.transport.is_reachable());
        assert!(phone.transport.is_reachable());
    }

    #[test]
    fn unreachable_send_is_dropped() {
        let (mut phone, watch) = loopback_pair();
        phone.transport.activate();
        watch.transport.activate();
        phone.transport.set_link_up(false);
        assert_eq!(
            watch.transport.send(Message::Ping),
            Err(SendError::Unreachable)
        );
        phone.transport.set_link_up(true);
        assert!(phone.inbound.try_recv().is_err());
    }

    #[test]
    fn ping_is_answered_without_handler() {
        let dispatcher = InboundDispatcher::new();
        assert_eq!(dispatcher.dispatch(Message::Ping), Some(Message::Pong));
        assert_eq!(dispatcher.dispatch(Message::Pong), None);
    }

    #[test]
    fn request_without_handler_gets_no_reply() {
        let dispatcher = InboundDispatcher::new();
        let request = Message::RecentExercisesRequest {
            request_id: crate::protocol::RequestId(1),
            limit: 3,
        };
        assert_eq!(dispatcher.dispatch(request), None);
    }
}
