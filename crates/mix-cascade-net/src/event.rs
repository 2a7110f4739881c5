//! Events delivered from a channel to its owner.
//!
//! Every channel is created with an [`EventSender`]; the owner holds the
//! matching receiver and learns about inbound data, closure and faults
//! without polling.

use thiserror::Error;
use tokio::sync::mpsc;

/// Sender half handed to a channel at creation time.
pub type EventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Receiver half kept by the channel's owner.
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Creates a connected event channel pair.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// What happened on a channel.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A decrypted downstream payload arrived.
    PacketReceived(Vec<u8>),
    /// The channel reached its end of life. A CLOSE cell may carry one
    /// final payload, delivered here instead of as a separate packet.
    Closed { trailing: Option<Vec<u8>> },
    /// The channel failed. A final `Closed` event still follows.
    Exception(ChannelError),
}

/// Terminal channel faults reported through [`ChannelEvent::Exception`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A bounded channel closed before the announced number of cells arrived.
    #[error("channel closed after {received} of {expected} expected cells")]
    MissingCells { received: usize, expected: usize },

    /// A cell arrived that the channel's state machine cannot accept.
    #[error("received a cell the channel did not expect")]
    UnexpectedCell,

    /// A bounded channel's response did not arrive in time.
    #[error("timed out waiting for the response")]
    Timeout,

    /// The multiplexer went away underneath the channel.
    #[error("multiplexer closed while the channel was open")]
    MultiplexerClosed,
}
