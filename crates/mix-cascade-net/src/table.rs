//! Shared registry of live channels.
//!
//! The table maps channel ids to channel instances, allocates fresh
//! data channel ids, enforces the data channel cap and fans the
//! multiplexer's shutdown out to every registered channel. Allocating
//! a data channel is the one blocking point in the stack: callers
//! suspend until a slot frees or the table closes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::error::{NetError, Result};

/// Id 0 carries internal filler traffic and never names a channel.
pub const DUMMY_TRAFFIC_CHANNEL_ID: u32 = 0;

/// Highest id in the reserved control channel range.
pub const MAX_CONTROL_CHANNEL_ID: u32 = 255;

/// Payment signaling control channel.
pub const CONTROL_CHANNEL_ID_PAY: u32 = 2;

/// Replay timestamp distribution control channel.
pub const CONTROL_CHANNEL_ID_REPLAY: u32 = 3;

/// Dummy traffic control channel.
pub const CONTROL_CHANNEL_ID_DUMMY: u32 = 4;

/// Whether `id` lies in the reserved control channel range.
pub fn is_control_channel_id(id: u32) -> bool {
    (1..=MAX_CONTROL_CHANNEL_ID).contains(&id)
}

/// The channel registry for one multiplexer.
pub struct ChannelTable {
    inner: Mutex<TableInner>,
    /// Data channel slots. Closed together with the table so blocked
    /// allocators wake up.
    slots: Semaphore,
}

struct TableInner {
    channels: HashMap<u32, Arc<Channel>>,
    closed: bool,
}

impl ChannelTable {
    /// Create a table admitting at most `max_data_channels` concurrent
    /// data channels.
    pub fn new(max_data_channels: usize) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                channels: HashMap::new(),
                closed: false,
            }),
            slots: Semaphore::new(max_data_channels),
        }
    }

    /// Allocate a fresh id, build a channel for it and register it.
    ///
    /// Blocks while the data channel cap is exhausted. When the table
    /// is already closed (or closes while waiting) the builder runs
    /// with the dummy id and the resulting channel is handed back
    /// pre-notified of shutdown, so the caller's error path is the
    /// same as for a channel that dies later.
    pub async fn create_data_channel(
        &self,
        build: impl FnOnce(u32) -> Channel,
    ) -> Arc<Channel> {
        match self.slots.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Self::closed_stub(build),
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            // lost the race against close(); the slot stays forfeited
            // since the closed semaphore admits nobody anyway
            drop(inner);
            return Self::closed_stub(build);
        }
        let id = Self::free_id(&inner.channels);
        let channel = Arc::new(build(id));
        inner.channels.insert(id, Arc::clone(&channel));
        debug!("registered data channel {}", id);
        channel
    }

    fn closed_stub(build: impl FnOnce(u32) -> Channel) -> Arc<Channel> {
        let stub = Arc::new(build(DUMMY_TRAFFIC_CHANNEL_ID));
        stub.notify_mux_closed();
        stub
    }

    /// Draw random ids until one is outside the reserved range and not
    /// in use. Ids are opaque bit patterns; the high bit is as good as
    /// any other.
    fn free_id(channels: &HashMap<u32, Arc<Channel>>) -> u32 {
        loop {
            let id = OsRng.next_u32();
            if id != DUMMY_TRAFFIC_CHANNEL_ID
                && !is_control_channel_id(id)
                && !channels.contains_key(&id)
            {
                return id;
            }
        }
    }

    /// Register a control channel at its fixed id. If the table is
    /// already closed the channel is notified of shutdown instead of
    /// being registered.
    pub fn register_control_channel(&self, channel: Channel) -> Result<Arc<Channel>> {
        let id = channel.id();
        if !is_control_channel_id(id) {
            return Err(NetError::InvalidControlChannelId(id));
        }
        let channel = Arc::new(channel);
        let mut inner = self.inner.lock();
        if inner.closed {
            drop(inner);
            channel.notify_mux_closed();
            return Ok(channel);
        }
        inner.channels.insert(id, Arc::clone(&channel));
        debug!("registered control channel {}", id);
        Ok(channel)
    }

    /// Look up a live channel. Absence is not an error; cells for an
    /// already removed channel arrive routinely.
    pub fn get(&self, id: u32) -> Option<Arc<Channel>> {
        self.inner.lock().channels.get(&id).cloned()
    }

    /// Unregister a channel, freeing its slot (and waking one blocked
    /// allocator) if it was a data channel.
    pub fn remove(&self, id: u32) {
        let freed_slot = {
            let mut inner = self.inner.lock();
            match inner.channels.remove(&id) {
                Some(channel) => channel.is_data() && !inner.closed,
                None => false,
            }
        };
        if freed_slot {
            self.slots.add_permits(1);
            debug!("removed data channel {}", id);
        }
    }

    /// Number of currently registered channels.
    pub fn len(&self) -> usize {
        self.inner.lock().channels.len()
    }

    /// Whether no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut the table down: notify every registered channel exactly
    /// once, clear the registry and wake all blocked allocators.
    /// Idempotent.
    pub fn close(&self) {
        let channels: Vec<Arc<Channel>> = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.channels.drain().map(|(_, channel)| channel).collect()
        };
        self.slots.close();
        for channel in &channels {
            channel.notify_mux_closed();
        }
        info!("channel table closed, {} channels notified", channels.len());
    }

    /// Whether the table has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
