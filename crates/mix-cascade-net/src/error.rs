//! Error types for the multiplexing layer.

use thiserror::Error;

/// Errors raised by the multiplexer and its channels.
#[derive(Error, Debug)]
pub enum NetError {
    /// Cell framing, cipher or transport failure in the core layer.
    #[error("core error: {0}")]
    Core(#[from] mix_cascade_core::Error),

    /// A send exceeded what fits in one cell after cipher overhead.
    #[error("payload of {len} bytes exceeds the {max} bytes left in this cell")]
    PayloadTooLarge { len: usize, max: usize },

    /// Control channel ids must lie in the reserved range.
    #[error("channel id {0} is not a valid control channel id")]
    InvalidControlChannelId(u32),

    /// A bounded channel's single send budget was already spent.
    #[error("bounded channel already sent its request")]
    AlreadySent,

    /// Send or close attempted on a channel that is already closed.
    #[error("channel is closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, NetError>;
