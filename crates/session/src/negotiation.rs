//! Offer/answer state machine.
//!
//! The creator always offers and the joiner always answers, so the two
//! sides never offer at once. Signals that do not fit the current state
//! are dropped and reported as [`NegotiationOutcome::Ignored`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use handoff_protocol::{IceCandidate, SessionCode, SessionDescription};
use handoff_signaling::{ClientError, SignalingClient};
use tracing::{debug, info, warn};

use crate::SessionError;
use crate::transport::{DATA_CHANNEL_LABEL, PeerTransport};

/// Which side of the rendezvous this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Issued `create`; sends the offer.
    Creator,
    /// Issued `join`; answers.
    Joiner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// What a signal did to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Applied,
    /// A remote candidate is held until the remote description is set.
    Buffered,
    /// A stale or misplaced signal was dropped.
    Ignored(&'static str),
}

/// A boxed future returned by [`Signaler`] calls.
pub type SignalFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ClientError>> + Send + 'a>>;

/// Outbound half of the relay as seen by the state machine.
pub trait Signaler: Send + Sync {
    fn send_description<'a>(
        &'a self,
        code: &'a SessionCode,
        desc: &'a SessionDescription,
    ) -> SignalFuture<'a>;

    fn send_ice_candidate<'a>(
        &'a self,
        code: &'a SessionCode,
        candidate: &'a IceCandidate,
    ) -> SignalFuture<'a>;
}

impl Signaler for SignalingClient {
    fn send_description<'a>(
        &'a self,
        code: &'a SessionCode,
        desc: &'a SessionDescription,
    ) -> SignalFuture<'a> {
        Box::pin(SignalingClient::send_description(self, code, desc))
    }

    fn send_ice_candidate<'a>(
        &'a self,
        code: &'a SessionCode,
        candidate: &'a IceCandidate,
    ) -> SignalFuture<'a> {
        Box::pin(SignalingClient::send_ice_candidate(self, code, candidate))
    }
}

pub struct Negotiation {
    role: Role,
    code: SessionCode,
    state: NegotiationState,
    transport: Arc<dyn PeerTransport>,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
}

impl Negotiation {
    pub fn new(role: Role, code: SessionCode, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            role,
            code,
            state: NegotiationState::Stable,
            transport,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// `true` once an offer and an answer have both been applied.
    pub fn is_negotiated(&self) -> bool {
        self.state == NegotiationState::Stable && self.remote_description_set
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// The joiner arrived: the creator opens the channel and offers.
    pub async fn on_peer_joined(
        &mut self,
        signaler: &dyn Signaler,
    ) -> Result<NegotiationOutcome, SessionError> {
        if self.role != Role::Creator {
            return Ok(self.ignore("peer-joined", "joiner never offers"));
        }
        if self.state != NegotiationState::Stable || self.remote_description_set {
            return Ok(self.ignore("peer-joined", "already negotiating"));
        }

        self.transport.create_data_channel(DATA_CHANNEL_LABEL).await?;
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        self.state = NegotiationState::HaveLocalOffer;
        signaler.send_description(&self.code, &offer).await?;
        info!(code = %self.code, "offer sent");
        Ok(NegotiationOutcome::Applied)
    }

    /// Answers an offer from the creator.
    pub async fn on_offer(
        &mut self,
        offer: SessionDescription,
        signaler: &dyn Signaler,
    ) -> Result<NegotiationOutcome, SessionError> {
        if self.role != Role::Joiner {
            return Ok(self.ignore("offer", "creator never answers"));
        }
        if self.state != NegotiationState::Stable {
            return Ok(self.ignore("offer", "not stable"));
        }
        if self.remote_description_set {
            return Ok(self.ignore("offer", "offer already answered"));
        }

        self.state = NegotiationState::HaveRemoteOffer;
        self.apply_remote(offer).await?;
        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.state = NegotiationState::Stable;
        signaler.send_description(&self.code, &answer).await?;
        info!(code = %self.code, "answer sent");
        Ok(NegotiationOutcome::Applied)
    }

    /// Completes the creator's offer.
    pub async fn on_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<NegotiationOutcome, SessionError> {
        if self.state != NegotiationState::HaveLocalOffer {
            return Ok(self.ignore("answer", "no offer outstanding"));
        }
        self.apply_remote(answer).await?;
        self.state = NegotiationState::Stable;
        info!(code = %self.code, "negotiation complete");
        Ok(NegotiationOutcome::Applied)
    }

    /// Adds a remote route, or holds it until the remote description is set.
    pub async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> NegotiationOutcome {
        if !self.remote_description_set {
            debug!(code = %self.code, "buffering remote candidate");
            self.pending_candidates.push(candidate);
            return NegotiationOutcome::Buffered;
        }
        match self.transport.add_ice_candidate(candidate).await {
            Ok(()) => NegotiationOutcome::Applied,
            Err(e) => {
                warn!(code = %self.code, "remote candidate rejected: {e}");
                NegotiationOutcome::Ignored("candidate rejected")
            }
        }
    }

    /// Relays a route the local transport discovered.
    pub async fn on_local_candidate(
        &self,
        candidate: &IceCandidate,
        signaler: &dyn Signaler,
    ) -> Result<(), SessionError> {
        signaler.send_ice_candidate(&self.code, candidate).await?;
        Ok(())
    }

    async fn apply_remote(&mut self, desc: SessionDescription) -> Result<(), SessionError> {
        self.transport.set_remote_description(desc).await?;
        self.remote_description_set = true;
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(code = %self.code, "buffered candidate rejected: {e}");
            }
        }
        Ok(())
    }

    fn ignore(&self, signal: &str, why: &'static str) -> NegotiationOutcome {
        debug!(code = %self.code, signal, state = ?self.state, "stale signal: {why}");
        NegotiationOutcome::Ignored(why)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportFuture;
    use handoff_protocol::SdpKind;
    use handoff_transfer::TransportError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<String>>,
        reject_candidates: bool,
    }

    impl MockTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    fn desc(kind: SdpKind, sdp: &str) -> SessionDescription {
        SessionDescription {
            kind,
            sdp: sdp.into(),
        }
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n}"),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    impl PeerTransport for MockTransport {
        fn create_data_channel(&self, label: &str) -> TransportFuture<'_, ()> {
            self.record(format!("channel:{label}"));
            Box::pin(async { Ok(()) })
        }

        fn create_offer(&self) -> TransportFuture<'_, SessionDescription> {
            self.record("create-offer");
            Box::pin(async { Ok(desc(SdpKind::Offer, "offer")) })
        }

        fn create_answer(&self) -> TransportFuture<'_, SessionDescription> {
            self.record("create-answer");
            Box::pin(async { Ok(desc(SdpKind::Answer, "answer")) })
        }

        fn set_local_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()> {
            self.record(format!("local:{}", desc.sdp));
            Box::pin(async { Ok(()) })
        }

        fn set_remote_description(&self, desc: SessionDescription) -> TransportFuture<'_, ()> {
            self.record(format!("remote:{}", desc.sdp));
            Box::pin(async { Ok(()) })
        }

        fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportFuture<'_, ()> {
            self.record(format!("add:{}", candidate.candidate));
            let reject = self.reject_candidates;
            Box::pin(async move {
                if reject {
                    Err(TransportError::Negotiation("bad candidate".into()))
                } else {
                    Ok(())
                }
            })
        }

        fn close(&self) -> TransportFuture<'_, ()> {
            self.record("close");
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct MockSignaler {
        descriptions: Mutex<Vec<SessionDescription>>,
        candidates: Mutex<Vec<IceCandidate>>,
    }

    impl Signaler for MockSignaler {
        fn send_description<'a>(
            &'a self,
            _code: &'a SessionCode,
            desc: &'a SessionDescription,
        ) -> SignalFuture<'a> {
            self.descriptions.lock().unwrap().push(desc.clone());
            Box::pin(async { Ok(()) })
        }

        fn send_ice_candidate<'a>(
            &'a self,
            _code: &'a SessionCode,
            candidate: &'a IceCandidate,
        ) -> SignalFuture<'a> {
            self.candidates.lock().unwrap().push(candidate.clone());
            Box::pin(async { Ok(()) })
        }
    }

    fn negotiation(role: Role) -> (Negotiation, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::default());
        let code = SessionCode::new("BLUE-FOX-42").unwrap();
        (Negotiation::new(role, code, transport.clone()), transport)
    }

    #[tokio::test]
    async fn creator_offers_on_peer_joined() {
        let (mut n, transport) = negotiation(Role::Creator);
        let signaler = MockSignaler::default();

        assert_eq!(n.on_peer_joined(&signaler).await.unwrap(), NegotiationOutcome::Applied);
        assert_eq!(n.state(), NegotiationState::HaveLocalOffer);
        assert_eq!(
            transport.calls(),
            vec!["channel:handoff", "create-offer", "local:offer"]
        );
        assert_eq!(
            *signaler.descriptions.lock().unwrap(),
            vec![desc(SdpKind::Offer, "offer")]
        );

        assert_eq!(
            n.on_answer(desc(SdpKind::Answer, "answer")).await.unwrap(),
            NegotiationOutcome::Applied
        );
        assert_eq!(n.state(), NegotiationState::Stable);
        assert!(n.is_negotiated());
    }

    #[tokio::test]
    async fn joiner_answers_offer() {
        let (mut n, transport) = negotiation(Role::Joiner);
        let signaler = MockSignaler::default();

        let outcome = n
            .on_offer(desc(SdpKind::Offer, "offer"), &signaler)
            .await
            .unwrap();
        assert_eq!(outcome, NegotiationOutcome::Applied);
        assert_eq!(n.state(), NegotiationState::Stable);
        assert!(n.is_negotiated());
        assert_eq!(
            transport.calls(),
            vec!["remote:offer", "create-answer", "local:answer"]
        );
        assert_eq!(
            *signaler.descriptions.lock().unwrap(),
            vec![desc(SdpKind::Answer, "answer")]
        );
    }

    #[tokio::test]
    async fn duplicate_offer_is_not_answered_twice() {
        let (mut n, _transport) = negotiation(Role::Joiner);
        let signaler = MockSignaler::default();
        n.on_offer(desc(SdpKind::Offer, "offer"), &signaler)
            .await
            .unwrap();
        let outcome = n
            .on_offer(desc(SdpKind::Offer, "offer"), &signaler)
            .await
            .unwrap();
        assert!(matches!(outcome, NegotiationOutcome::Ignored(_)));
        assert_eq!(signaler.descriptions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn answer_without_offer_is_stale() {
        let (mut n, transport) = negotiation(Role::Creator);
        let outcome = n.on_answer(desc(SdpKind::Answer, "late")).await.unwrap();
        assert!(matches!(outcome, NegotiationOutcome::Ignored(_)));
        assert_eq!(n.state(), NegotiationState::Stable);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn roles_are_fixed() {
        let signaler = MockSignaler::default();

        let (mut joiner, transport) = negotiation(Role::Joiner);
        assert!(matches!(
            joiner.on_peer_joined(&signaler).await.unwrap(),
            NegotiationOutcome::Ignored(_)
        ));
        assert!(transport.calls().is_empty());

        let (mut creator, transport) = negotiation(Role::Creator);
        assert!(matches!(
            creator
                .on_offer(desc(SdpKind::Offer, "glare"), &signaler)
                .await
                .unwrap(),
            NegotiationOutcome::Ignored(_)
        ));
        assert!(transport.calls().is_empty());
        assert!(signaler.descriptions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_peer_joined_does_not_reoffer() {
        let (mut n, _transport) = negotiation(Role::Creator);
        let signaler = MockSignaler::default();
        n.on_peer_joined(&signaler).await.unwrap();
        assert!(matches!(
            n.on_peer_joined(&signaler).await.unwrap(),
            NegotiationOutcome::Ignored(_)
        ));
        assert_eq!(signaler.descriptions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn early_candidates_wait_for_remote_description() {
        let (mut n, transport) = negotiation(Role::Joiner);
        let signaler = MockSignaler::default();

        assert_eq!(n.on_remote_candidate(candidate(1)).await, NegotiationOutcome::Buffered);
        assert_eq!(n.on_remote_candidate(candidate(2)).await, NegotiationOutcome::Buffered);
        assert_eq!(n.pending_candidates(), 2);
        assert!(transport.calls().is_empty());

        n.on_offer(desc(SdpKind::Offer, "offer"), &signaler)
            .await
            .unwrap();
        assert_eq!(n.pending_candidates(), 0);
        assert_eq!(
            transport.calls()[..3],
            ["remote:offer", "add:candidate:1", "add:candidate:2"]
        );

        assert_eq!(n.on_remote_candidate(candidate(3)).await, NegotiationOutcome::Applied);
        assert_eq!(transport.calls().last().unwrap(), "add:candidate:3");
    }

    #[tokio::test]
    async fn rejected_candidate_is_not_fatal() {
        let transport = Arc::new(MockTransport {
            reject_candidates: true,
            ..Default::default()
        });
        let code = SessionCode::new("X").unwrap();
        let mut n = Negotiation::new(Role::Joiner, code, transport);
        let signaler = MockSignaler::default();
        n.on_offer(desc(SdpKind::Offer, "offer"), &signaler)
            .await
            .unwrap();
        assert!(matches!(
            n.on_remote_candidate(candidate(1)).await,
            NegotiationOutcome::Ignored(_)
        ));
        assert!(n.is_negotiated());
    }

    #[tokio::test]
    async fn local_candidates_go_to_the_relay() {
        let (n, _transport) = negotiation(Role::Creator);
        let signaler = MockSignaler::default();
        n.on_local_candidate(&candidate(9), &signaler).await.unwrap();
        assert_eq!(*signaler.candidates.lock().unwrap(), vec![candidate(9)]);
    }
}
