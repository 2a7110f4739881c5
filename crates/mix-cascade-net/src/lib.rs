//! Channel multiplexing over a MixCascade connection
//!
//! This crate drives one encrypted connection to the first mix of a
//! cascade and multiplexes many logical channels over it:
//!
//! - [`mux`]: the connection owner, reader task and shared writer
//! - [`table`]: the id registry, slot accounting and shutdown fan-out
//! - [`channel`]: the per-channel state machines
//! - [`event`]: the queue each channel reports through
//! - [`config`]: multiplexer tunables
//! - [`error`]: error types
//!
//! Cascade topology and per-mix key material arrive from the directory
//! layer as opaque [`MixParameters`](mix_cascade_core::MixParameters);
//! cell framing and the onion cipher chain live in `mix-cascade-core`.

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod mux;
pub mod table;

pub use channel::Channel;
pub use config::MuxConfig;
pub use error::{NetError, Result};
pub use event::{event_channel, ChannelError, ChannelEvent, EventReceiver, EventSender};
pub use mux::{Multiplexer, MuxWriter};
pub use table::{
    is_control_channel_id, ChannelTable, CONTROL_CHANNEL_ID_DUMMY, CONTROL_CHANNEL_ID_PAY,
    CONTROL_CHANNEL_ID_REPLAY, DUMMY_TRAFFIC_CHANNEL_ID, MAX_CONTROL_CHANNEL_ID,
};
