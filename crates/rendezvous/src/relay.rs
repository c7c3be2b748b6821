//! Signaling relay: room bookkeeping plus blind forwarding.
//!
//! All state sits behind one coarse lock. Room counts are small and every
//! operation is a map lookup followed by non-blocking `try_send`s, so the
//! lock is never held across I/O.

use std::collections::HashMap;

use handoff_protocol::{Message, RelayEvent, SessionCode, SessionErrorKind};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture};
use crate::registry::{MemberId, RegistryError, RendezvousRegistry};

#[derive(Default)]
struct RelayState {
    registry: RendezvousRegistry,
    /// Senders for members currently bound to a room.
    senders: HashMap<MemberId, Sender>,
}

/// Routes relay traffic between the two members of each room.
#[derive(Default)]
pub struct SignalingRelay {
    state: Mutex<RelayState>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.state.lock().await.registry.room_count()
    }

    /// Members currently bound to `code`, in join order.
    pub async fn members(&self, code: &SessionCode) -> Vec<MemberId> {
        self.state
            .lock()
            .await
            .registry
            .room(code)
            .map(|r| r.members().to_vec())
            .unwrap_or_default()
    }

    async fn create(&self, member: MemberId, sender: Sender, code: SessionCode) {
        let mut state = self.state.lock().await;
        match state.registry.create(code.clone(), member) {
            Ok(()) => {
                info!(%code, %member, "session created");
                state.senders.insert(member, sender.clone());
                let _ = sender.send_msg(Message::bare(RelayEvent::SessionCreated, Some(code)));
            }
            Err(e) => reject(&sender, Some(code), e),
        }
    }

    async fn join(&self, member: MemberId, sender: Sender, code: SessionCode) {
        let mut state = self.state.lock().await;
        match state.registry.join(code.clone(), member) {
            Ok(existing) => {
                info!(%code, %member, "peer joined session");
                state.senders.insert(member, sender.clone());
                let _ = sender.send_msg(Message::bare(RelayEvent::SessionJoined, Some(code.clone())));
                match state.senders.get(&existing) {
                    Some(creator) => {
                        let _ = creator.send_msg(Message::bare(RelayEvent::PeerJoined, Some(code)));
                    }
                    None => warn!(%code, member = %existing, "room member has no sender"),
                }
            }
            Err(e) => reject(&sender, Some(code), e),
        }
    }

    async fn forward(&self, member: MemberId, sender: Sender, code: SessionCode, msg: Message) {
        let state = self.state.lock().await;
        let target = match state.registry.peer_of(&code, member) {
            Ok(peer) => peer,
            Err(e) => return reject(&sender, Some(code), e),
        };
        debug!(%code, from = %member, to = %target, event = ?msg.event, "relaying");
        match state.senders.get(&target) {
            Some(peer) => {
                let _ = peer.send_msg(msg);
            }
            None => reject(&sender, Some(code.clone()), RegistryError::NoPeer(code)),
        }
    }

    async fn depart(&self, member: MemberId) {
        let mut state = self.state.lock().await;
        state.senders.remove(&member);
        let Some(departure) = state.registry.leave(member) else {
            return;
        };
        match departure.remaining {
            Some(remaining) => {
                info!(code = %departure.code, %member, "member left, notifying peer");
                if let Some(peer) = state.senders.get(&remaining) {
                    let _ = peer.send_msg(Message::bare(
                        RelayEvent::PeerLeft,
                        Some(departure.code),
                    ));
                }
            }
            None => info!(code = %departure.code, "session closed"),
        }
    }
}

/// Reports a registry failure to the requesting member only.
fn reject(sender: &Sender, code: Option<SessionCode>, err: RegistryError) {
    debug!("rejecting request: {err}");
    let _ = sender.send_msg(Message::session_error(code, err.kind(), err.to_string()));
}

/// Extracts the session code or reports the request as malformed.
fn require_code(sender: &Sender, msg: &Message) -> Option<SessionCode> {
    if msg.code.is_none() {
        let _ = sender.send_msg(Message::session_error(
            None,
            SessionErrorKind::MalformedMessage,
            format!("{:?} requires a session code", msg.event),
        ));
    }
    msg.code.clone()
}

impl Handler for SignalingRelay {
    fn on_create(&self, member: MemberId, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Some(code) = require_code(&sender, &msg) {
                self.create(member, sender, code).await;
            }
        })
    }

    fn on_join(&self, member: MemberId, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Some(code) = require_code(&sender, &msg) {
                self.join(member, sender, code).await;
            }
        })
    }

    fn on_relay(&self, member: MemberId, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Some(code) = require_code(&sender, &msg) {
                self.forward(member, sender, code, msg).await;
            }
        })
    }

    fn on_disconnected(&self, member: MemberId) -> HandlerFuture<'_> {
        Box::pin(self.depart(member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_protocol::{SdpKind, SessionDescription, SessionErrorPayload, Signal};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

    struct Client {
        id: MemberId,
        sender: Sender,
        rx: mpsc::Receiver<WsMessage>,
    }

    impl Client {
        fn new() -> Self {
            let (sender, rx) = Sender::channel(16);
            Self {
                id: MemberId::new(),
                sender,
                rx,
            }
        }

        fn recv(&mut self) -> Option<Signal> {
            match self.rx.try_recv().ok()? {
                WsMessage::Text(text) => {
                    let msg: Message = serde_json::from_str(&text).unwrap();
                    Some(Signal::from_message(&msg).unwrap())
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }

        fn expect_error(&mut self) -> SessionErrorPayload {
            match self.recv() {
                Some(Signal::SessionError(p)) => p,
                other => panic!("expected session error, got {other:?}"),
            }
        }
    }

    fn code(raw: &str) -> SessionCode {
        SessionCode::new(raw).unwrap()
    }

    fn request(event: RelayEvent, raw: &str) -> Message {
        Message::bare(event, Some(code(raw)))
    }

    fn offer(raw: &str) -> Message {
        let sdp = SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0".into(),
        };
        Message::new(RelayEvent::Offer, Some(code(raw)), Some(&sdp)).unwrap()
    }

    async fn pair(relay: &SignalingRelay, raw: &str) -> (Client, Client) {
        let mut a = Client::new();
        let mut b = Client::new();
        relay
            .on_create(a.id, a.sender.clone(), request(RelayEvent::Create, raw))
            .await;
        relay
            .on_join(b.id, b.sender.clone(), request(RelayEvent::Join, raw))
            .await;
        assert!(matches!(a.recv(), Some(Signal::SessionCreated(_))));
        assert!(matches!(b.recv(), Some(Signal::SessionJoined(_))));
        (a, b)
    }

    #[tokio::test]
    async fn create_then_join_notifies_creator_once() {
        let relay = SignalingRelay::new();
        let (mut a, mut b) = pair(&relay, "blue-fox-42").await;

        assert_eq!(a.recv(), Some(Signal::PeerJoined));
        assert_eq!(a.recv(), None);
        // The joiner itself is not told about its own arrival.
        assert_eq!(b.recv(), None);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let relay = SignalingRelay::new();
        let a = Client::new();
        let mut b = Client::new();
        relay
            .on_create(a.id, a.sender.clone(), request(RelayEvent::Create, "X"))
            .await;
        relay
            .on_create(b.id, b.sender.clone(), request(RelayEvent::Create, "x"))
            .await;

        assert_eq!(b.expect_error().kind, SessionErrorKind::CodeAlreadyExists);
    }

    #[tokio::test]
    async fn third_join_gets_session_full() {
        let relay = SignalingRelay::new();
        let (mut a, mut b) = pair(&relay, "X").await;
        a.recv();

        let mut c = Client::new();
        relay
            .on_join(c.id, c.sender.clone(), request(RelayEvent::Join, "X"))
            .await;
        assert_eq!(c.expect_error().kind, SessionErrorKind::SessionFull);

        // Existing pair unaffected and not notified.
        assert_eq!(a.recv(), None);
        assert_eq!(b.recv(), None);
        assert_eq!(relay.members(&code("X")).await, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn offer_goes_to_other_member_only() {
        let relay = SignalingRelay::new();
        let (mut a, mut b) = pair(&relay, "X").await;
        a.recv();

        relay.on_relay(a.id, a.sender.clone(), offer("x")).await;
        assert!(matches!(b.recv(), Some(Signal::Offer(_))));
        assert_eq!(a.recv(), None);
    }

    #[tokio::test]
    async fn relay_to_unknown_room_errors_back_to_sender() {
        let relay = SignalingRelay::new();
        let mut a = Client::new();
        relay.on_relay(a.id, a.sender.clone(), offer("GHOST")).await;
        assert_eq!(a.expect_error().kind, SessionErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn relay_from_outsider_is_rejected() {
        let relay = SignalingRelay::new();
        let (mut a, mut b) = pair(&relay, "X").await;
        a.recv();

        let mut outsider = Client::new();
        relay
            .on_relay(outsider.id, outsider.sender.clone(), offer("X"))
            .await;
        assert_eq!(outsider.expect_error().kind, SessionErrorKind::NotInSession);
        assert_eq!(a.recv(), None);
        assert_eq!(b.recv(), None);
    }

    #[tokio::test]
    async fn relay_before_peer_joins_is_rejected() {
        let relay = SignalingRelay::new();
        let mut a = Client::new();
        relay
            .on_create(a.id, a.sender.clone(), request(RelayEvent::Create, "X"))
            .await;
        a.recv();

        relay.on_relay(a.id, a.sender.clone(), offer("X")).await;
        assert_eq!(a.expect_error().kind, SessionErrorKind::NoPeer);
    }

    #[tokio::test]
    async fn missing_code_is_malformed() {
        let relay = SignalingRelay::new();
        let mut a = Client::new();
        relay
            .on_join(a.id, a.sender.clone(), Message::bare(RelayEvent::Join, None))
            .await;
        assert_eq!(a.expect_error().kind, SessionErrorKind::MalformedMessage);
    }

    #[tokio::test]
    async fn disconnect_notifies_peer_and_last_one_out_frees_code() {
        let relay = SignalingRelay::new();
        let (mut a, b) = pair(&relay, "X").await;
        a.recv();

        relay.on_disconnected(b.id).await;
        assert!(matches!(a.recv(), Some(Signal::PeerLeft)));
        assert_eq!(relay.room_count().await, 1);

        relay
            .on_leave(a.id, a.sender.clone(), request(RelayEvent::Leave, "X"))
            .await;
        assert_eq!(relay.room_count().await, 0);

        // A later socket drop for the same member is a no-op.
        relay.on_disconnected(a.id).await;
        assert_eq!(a.recv(), None);
    }
}
