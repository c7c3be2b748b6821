//! Handler trait for processing relay messages.
//!
//! The server framework owns sockets, pumps and keepalive; implementors
//! own room bookkeeping and routing.

use std::future::Future;
use std::pin::Pin;

use handoff_protocol::{Message, SessionErrorKind};

use crate::connection::Sender;
use crate::registry::MemberId;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling messages from relay clients.
///
/// Each method receives:
/// - `member`: the id assigned to the socket when it connected
/// - `sender`: channel back to that socket
/// - `msg`: the parsed JSON envelope
pub trait Handler: Send + Sync + 'static {
    /// Called for `create`.
    fn on_create(&self, member: MemberId, sender: Sender, msg: Message) -> HandlerFuture<'_>;

    /// Called for `join`.
    fn on_join(&self, member: MemberId, sender: Sender, msg: Message) -> HandlerFuture<'_>;

    /// Called for `leave`. Defaults to the disconnect path.
    fn on_leave(&self, member: MemberId, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        let _ = (sender, msg);
        self.on_disconnected(member)
    }

    /// Called for `offer`, `answer` and `ice-candidate`.
    fn on_relay(&self, member: MemberId, sender: Sender, msg: Message) -> HandlerFuture<'_>;

    /// Called for text that is not a valid envelope, or for an event a
    /// client may not send.
    fn on_malformed(&self, member: MemberId, sender: Sender, reason: String) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::warn!(%member, "malformed relay message: {reason}");
            let _ = sender.send_msg(Message::session_error(
                None,
                SessionErrorKind::MalformedMessage,
                reason,
            ));
        })
    }

    /// Called once when the socket goes away (cleanup hook).
    fn on_disconnected(&self, member: MemberId) -> HandlerFuture<'_> {
        let _ = member;
        Box::pin(async {})
    }
}
