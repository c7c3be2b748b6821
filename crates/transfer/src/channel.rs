//! The ready, ordered, reliable message channel the engine writes to.

use std::future::Future;
use std::pin::Pin;

use crate::TransportError;

/// A boxed future returned by channel sends.
pub type ChannelFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Send half of a negotiated data channel.
///
/// Implementations must deliver frames in call order. Text and binary frames
/// share one ordered stream and remain distinguishable on the far side.
pub trait DataChannel: Send + Sync + 'static {
    /// Sends one UTF-8 text frame.
    fn send_text(&self, text: String) -> ChannelFuture<'_>;

    /// Sends one binary frame.
    fn send_binary(&self, data: Vec<u8>) -> ChannelFuture<'_>;
}
