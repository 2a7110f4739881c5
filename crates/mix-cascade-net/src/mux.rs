//! The multiplexer: one cascade connection, many channels.
//!
//! A [`Multiplexer`] owns the single connection to the first mix. A
//! dedicated reader task pulls cells off the wire and dispatches them
//! through the [`ChannelTable`]; all channels write through one shared
//! [`MuxWriter`], which serializes access to the sink. Cells for
//! unknown ids are dropped, since a channel may legitimately have been
//! removed before a late cell arrives. Any read failure or EOF closes
//! the table, which fans shutdown out to every channel.

use std::sync::Arc;

use futures::{Sink, SinkExt, StreamExt};
use mix_cascade_core::cell::{CellCodec, FLAG_DUMMY};
use mix_cascade_core::chain::MixCipherChain;
use mix_cascade_core::params::MixParameters;
use mix_cascade_core::MixCell;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::MuxConfig;
use crate::error::{NetError, Result};
use crate::event::EventSender;
use crate::table::{ChannelTable, DUMMY_TRAFFIC_CHANNEL_ID};

type CellSink = Box<dyn Sink<MixCell, Error = mix_cascade_core::Error> + Send + Unpin>;

/// Shared handle for writing cells to the connection.
///
/// Writes from all channels funnel through here; the lock keeps whole
/// cells atomic on the wire.
pub struct MuxWriter {
    sink: AsyncMutex<CellSink>,
}

impl MuxWriter {
    pub(crate) fn new(
        sink: impl Sink<MixCell, Error = mix_cascade_core::Error> + Send + Unpin + 'static,
    ) -> Self {
        Self {
            sink: AsyncMutex::new(Box::new(sink)),
        }
    }

    /// Write one cell and flush it. Returning `Ok` confirms the cell
    /// reached the transport.
    pub async fn send_cell(&self, cell: MixCell) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(cell).await.map_err(NetError::Core)
    }
}

/// One multiplexed cascade connection.
pub struct Multiplexer {
    writer: Arc<MuxWriter>,
    table: Arc<ChannelTable>,
    cascade: Vec<MixParameters>,
    config: MuxConfig,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Multiplexer {
    /// Start a multiplexer over `read`/`write` with plain cell codecs.
    pub fn start<R, W>(
        read: R,
        write: W,
        cascade: Vec<MixParameters>,
        config: MuxConfig,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::start_with_codecs(read, write, CellCodec::new(), CellCodec::new(), cascade, config)
    }

    /// Start a multiplexer with caller-supplied codecs, e.g. carrying
    /// the link-layer header ciphers negotiated with the first mix.
    pub fn start_with_codecs<R, W>(
        read: R,
        write: W,
        read_codec: CellCodec,
        write_codec: CellCodec,
        cascade: Vec<MixParameters>,
        config: MuxConfig,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer = Arc::new(MuxWriter::new(FramedWrite::new(write, write_codec)));
        let table = Arc::new(ChannelTable::new(config.max_data_channels));

        let reader_table = Arc::clone(&table);
        let reader = tokio::spawn(async move {
            let mut cells = FramedRead::new(read, read_codec);
            loop {
                match cells.next().await {
                    Some(Ok(cell)) => {
                        if cell.channel_id == DUMMY_TRAFFIC_CHANNEL_ID {
                            debug!("dropping filler cell");
                            continue;
                        }
                        match reader_table.get(cell.channel_id) {
                            Some(channel) => channel.handle_cell(cell).await,
                            None => {
                                debug!("dropping cell for unknown channel {}", cell.channel_id)
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!("connection read failed: {}", err);
                        break;
                    }
                    None => {
                        info!("connection closed by peer");
                        break;
                    }
                }
            }
            reader_table.close();
        });

        Arc::new(Self {
            writer,
            table,
            cascade,
            config,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Open a bidirectional data channel. Blocks while the data
    /// channel cap is exhausted.
    pub async fn open_unbounded_channel(&self, events: EventSender) -> Arc<Channel> {
        let writer = Arc::clone(&self.writer);
        let table = Arc::downgrade(&self.table);
        let chain = MixCipherChain::new(&self.cascade);
        self.table
            .create_data_channel(move |id| Channel::new_unbounded(id, writer, table, chain, events))
            .await
    }

    /// Open a send-once channel expecting `expected` downstream cells
    /// before a CLOSE, watched by the configured timeout.
    pub async fn open_bounded_channel(&self, expected: usize, events: EventSender) -> Arc<Channel> {
        let writer = Arc::clone(&self.writer);
        let table = Arc::downgrade(&self.table);
        let chain = MixCipherChain::new(&self.cascade);
        let timeout = self.config.channel_timeout();
        self.table
            .create_data_channel(move |id| {
                Channel::new_bounded(id, writer, table, chain, events, expected, timeout)
            })
            .await
    }

    /// Register a control channel at a fixed reserved id.
    pub fn register_control_channel(&self, id: u32, events: EventSender) -> Result<Arc<Channel>> {
        let channel = Channel::new_control(
            id,
            Arc::clone(&self.writer),
            Arc::downgrade(&self.table),
            events,
        );
        self.table.register_control_channel(channel)
    }

    /// Write one random filler cell on the reserved dummy id.
    pub async fn send_dummy(&self) -> Result<()> {
        let mut cell = MixCell::new(DUMMY_TRAFFIC_CHANNEL_ID);
        cell.channel_flags = FLAG_DUMMY;
        self.writer.send_cell(cell).await
    }

    /// The channel registry of this connection.
    pub fn table(&self) -> &Arc<ChannelTable> {
        &self.table
    }

    /// Tear the multiplexer down: stop the reader and close the table,
    /// notifying every live channel. Idempotent.
    pub fn close(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.table.close();
    }
}
