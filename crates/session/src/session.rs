//! One endpoint's side of a handoff session.
//!
//! [`Session::create`] and [`Session::join`] claim a room on the relay and
//! then hand everything to a single event loop task. The loop owns the
//! signaling client, the peer transport, the negotiation state machine and
//! the transfer engine; callers talk to it through [`SessionHandle`] and
//! observe it through a stream of [`SessionEvent`]s.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use handoff_protocol::{SessionCode, SessionErrorKind, Signal};
use handoff_signaling::SignalingClient;
use handoff_transfer::{OutboundFile, TransferEngine, TransferError, TransferEvent, TransferItem};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::SessionError;
use crate::bridge::{ChannelEventBridge, ConnectionStatus};
use crate::codegen::generate_code;
use crate::config::SessionConfig;
use crate::negotiation::{Negotiation, Role};
use crate::transport::{
    ChannelEvent, PeerConnectionState, PeerTransport, TransportEvent, TransportFactory,
};

/// How long to wait for the relay to confirm `create` or `join`.
const RELAY_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

const COMMAND_BUFFER_SIZE: usize = 32;

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// [`SessionHandle::end`] was called or the handle was dropped.
    Local,
    PeerLeft,
    TransportFailed(PeerConnectionState),
    ChannelClosed,
    NegotiationFailed(String),
    RelayLost,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("session ended"),
            Self::PeerLeft => f.write_str("peer left"),
            Self::TransportFailed(state) => write!(f, "connection {state:?}"),
            Self::ChannelClosed => f.write_str("data channel closed"),
            Self::NegotiationFailed(reason) => write!(f, "negotiation failed: {reason}"),
            Self::RelayLost => f.write_str("relay connection lost"),
        }
    }
}

/// What the rendering layer needs to know.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    CodeAssigned(SessionCode),
    StatusChanged(ConnectionStatus),
    ItemAdded(TransferItem),
    ItemUpdated(TransferItem),
    Ended(EndReason),
}

enum Command {
    SendText {
        text: String,
        reply: oneshot::Sender<Result<u64, TransferError>>,
    },
    SendFile {
        file: OutboundFile,
        reply: oneshot::Sender<u64>,
    },
    End {
        done: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Starts sessions with a fixed configuration and transport.
pub struct Session {
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
}

impl Session {
    pub fn new(config: SessionConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self { config, factory }
    }

    /// Opens a room and waits there for a peer.
    ///
    /// With `code` set, that exact code is requested once. Without it, codes
    /// are generated and retried while the relay reports them taken.
    pub async fn create(
        &self,
        code: Option<SessionCode>,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let (client, mut signals) = SignalingClient::connect(&self.config.relay_url).await?;
        let code = match code {
            Some(code) => request_room(&client, &mut signals, Role::Creator, &code).await?,
            None => self.create_generated(&client, &mut signals).await?,
        };
        info!(%code, "room created");
        self.start(Role::Creator, code, client, signals)
    }

    /// Joins the room for `code`.
    pub async fn join(
        &self,
        code: SessionCode,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let (client, mut signals) = SignalingClient::connect(&self.config.relay_url).await?;
        let code = request_room(&client, &mut signals, Role::Joiner, &code).await?;
        info!(%code, "room joined");
        self.start(Role::Joiner, code, client, signals)
    }

    async fn create_generated(
        &self,
        client: &SignalingClient,
        signals: &mut mpsc::Receiver<Signal>,
    ) -> Result<SessionCode, SessionError> {
        let attempts = self.config.create_attempts.max(1);
        let mut attempt = 1;
        loop {
            let code = generate_code(&mut rand::thread_rng())?;
            match request_room(client, signals, Role::Creator, &code).await {
                Err(SessionError::Rejected {
                    kind: SessionErrorKind::CodeAlreadyExists,
                    ..
                }) if attempt < attempts => {
                    debug!(%code, attempt, "code taken, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn start(
        &self,
        role: Role,
        code: SessionCode,
        client: SignalingClient,
        signals: mpsc::Receiver<Signal>,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let (transport, transport_events) = self.factory.create(&self.config.ice_servers)?;
        let (engine, transfer_events) = TransferEngine::new(self.config.engine_config());
        let (events, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER_SIZE);

        let status = match role {
            Role::Creator => ConnectionStatus::WaitingForPeer,
            Role::Joiner => ConnectionStatus::Negotiating,
        };
        let _ = events.send(SessionEvent::CodeAssigned(code.clone()));
        let _ = events.send(SessionEvent::StatusChanged(status));

        let session_loop = SessionLoop {
            negotiation: Negotiation::new(role, code.clone(), Arc::clone(&transport)),
            code: code.clone(),
            client,
            signals,
            transport,
            transport_events,
            engine,
            transfer_events,
            bridge: ChannelEventBridge::new(status),
            commands,
            events,
            end_waiters: Vec::new(),
        };
        tokio::spawn(session_loop.run());

        let handle = SessionHandle {
            code,
            role,
            commands: commands_tx,
        };
        Ok((handle, events_rx))
    }
}

/// Sends `create` or `join` and waits for the relay's verdict.
async fn request_room(
    client: &SignalingClient,
    signals: &mut mpsc::Receiver<Signal>,
    role: Role,
    code: &SessionCode,
) -> Result<SessionCode, SessionError> {
    match role {
        Role::Creator => client.create(code).await?,
        Role::Joiner => client.join(code).await?,
    }

    let reply = async {
        while let Some(signal) = signals.recv().await {
            match (role, signal) {
                (Role::Creator, Signal::SessionCreated(code))
                | (Role::Joiner, Signal::SessionJoined(code)) => return Ok(code),
                (_, Signal::SessionError(e)) => {
                    return Err(SessionError::Rejected {
                        kind: e.kind,
                        reason: e.reason,
                    });
                }
                (_, other) => debug!(signal = other.name(), "ignoring signal before confirmation"),
            }
        }
        Err(SessionError::RelayClosed)
    };
    tokio::time::timeout(RELAY_REPLY_TIMEOUT, reply)
        .await
        .map_err(|_| SessionError::Timeout)?
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Command side of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    code: SessionCode,
    role: Role,
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// `false` once the session loop has stopped.
    pub fn is_active(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Sends a text message. Fails with [`TransferError::NotConnected`]
    /// until the data channel is open.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<u64, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SendText {
            text: text.into(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| SessionError::Ended)??)
    }

    /// Queues a file and returns its history id.
    pub async fn send_file(&self, file: OutboundFile) -> Result<u64, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SendFile { file, reply }).await?;
        rx.await.map_err(|_| SessionError::Ended)
    }

    /// Ends the session and waits until the transport is closed and the
    /// room has been left.
    pub async fn end(&self) {
        let (done, rx) = oneshot::channel();
        if self.command(Command::End { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Ended)
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct SessionLoop {
    code: SessionCode,
    client: SignalingClient,
    signals: mpsc::Receiver<Signal>,
    transport: Arc<dyn PeerTransport>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    negotiation: Negotiation,
    engine: TransferEngine,
    transfer_events: mpsc::UnboundedReceiver<TransferEvent>,
    bridge: ChannelEventBridge,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    end_waiters: Vec<oneshot::Sender<()>>,
}

impl SessionLoop {
    async fn run(mut self) {
        let reason = loop {
            let ended = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => Some(EndReason::Local),
                },
                signal = self.signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => Some(EndReason::RelayLost),
                },
                event = self.transport_events.recv() => match event {
                    Some(event) => self.handle_transport(event).await,
                    None => Some(EndReason::TransportFailed(PeerConnectionState::Closed)),
                },
                Some(update) = self.engine.next_update() => {
                    self.engine.apply_update(update).await;
                    None
                }
            };
            self.forward_transfer_events();
            if let Some(reason) = ended {
                break reason;
            }
        };
        self.teardown(reason).await;
    }

    async fn handle_command(&mut self, command: Command) -> Option<EndReason> {
        match command {
            Command::SendText { text, reply } => {
                let _ = reply.send(self.engine.send_text(text).await);
            }
            Command::SendFile { file, reply } => {
                let _ = reply.send(self.engine.send_file(file).await);
            }
            Command::End { done } => {
                self.end_waiters.push(done);
                return Some(EndReason::Local);
            }
        }
        None
    }

    async fn handle_signal(&mut self, signal: Signal) -> Option<EndReason> {
        debug!(code = %self.code, signal = signal.name(), "relay signal");
        let result = match signal {
            Signal::PeerJoined => {
                self.set_status(ConnectionStatus::Negotiating);
                self.negotiation.on_peer_joined(&self.client).await
            }
            Signal::Offer(offer) => self.negotiation.on_offer(offer, &self.client).await,
            Signal::Answer(answer) => self.negotiation.on_answer(answer).await,
            Signal::IceCandidate(candidate) => {
                Ok(self.negotiation.on_remote_candidate(candidate).await)
            }
            Signal::PeerLeft => {
                info!(code = %self.code, "peer left");
                return Some(EndReason::PeerLeft);
            }
            Signal::SessionError(e) => {
                warn!(code = %self.code, kind = ?e.kind, "relay error: {}", e.reason);
                return None;
            }
            Signal::SessionCreated(_) | Signal::SessionJoined(_) => return None,
        };

        match result {
            Ok(_) => None,
            Err(e) => {
                warn!(code = %self.code, "negotiation failed: {e}");
                Some(EndReason::NegotiationFailed(e.to_string()))
            }
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) -> Option<EndReason> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if let Err(e) = self
                    .negotiation
                    .on_local_candidate(&candidate, &self.client)
                    .await
                {
                    warn!(code = %self.code, "could not relay candidate: {e}");
                }
                None
            }
            TransportEvent::StateChanged(state) if state.is_terminal() => {
                warn!(code = %self.code, ?state, "peer connection lost");
                Some(EndReason::TransportFailed(state))
            }
            TransportEvent::StateChanged(state) => {
                debug!(code = %self.code, ?state, "peer connection state");
                None
            }
            TransportEvent::Channel(event) => {
                let closed = matches!(event, ChannelEvent::Close);
                if let Some(status) = self.bridge.handle(&mut self.engine, event).await {
                    self.emit(SessionEvent::StatusChanged(status));
                }
                closed.then_some(EndReason::ChannelClosed)
            }
        }
    }

    /// Tells the peer, closes the transport, leaves the room.
    async fn teardown(mut self, reason: EndReason) {
        info!(code = %self.code, %reason, "ending session");
        self.engine.abort_all(&reason.to_string()).await;
        if let Err(e) = self.transport.close().await {
            debug!(code = %self.code, "closing transport: {e}");
        }
        if reason != EndReason::RelayLost
            && let Err(e) = self.client.leave(&self.code).await
        {
            debug!(code = %self.code, "leaving room: {e}");
        }
        self.client.close();

        self.forward_transfer_events();
        self.set_status(ConnectionStatus::Disconnected);
        self.emit(SessionEvent::Ended(reason));
        for done in self.end_waiters.drain(..) {
            let _ = done.send(());
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if let Some(status) = self.bridge.set_status(status) {
            self.emit(SessionEvent::StatusChanged(status));
        }
    }

    fn forward_transfer_events(&mut self) {
        while let Ok(event) = self.transfer_events.try_recv() {
            let event = match event {
                TransferEvent::Added(item) => SessionEvent::ItemAdded(item),
                TransferEvent::Updated(item) => SessionEvent::ItemUpdated(item),
            };
            self.emit(event);
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
