//! Per-channel state machines.
//!
//! One [`Channel`] represents one logical stream multiplexed over the
//! cascade connection. Three variants exist:
//!
//! - [`BoundedChannel`]: sends one request and expects a known number of
//!   downstream cells, guarded by a timeout watcher
//! - [`UnboundedChannel`]: a plain bidirectional stream, closed explicitly
//! - [`ControlChannel`]: a fixed-id signaling channel that bypasses the
//!   onion cipher chain
//!
//! Every variant reports to its owner through the event queue it was
//! created with; see [`crate::event`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use mix_cascade_core::cell::{FLAG_CLOSE, FLAG_DATA, FLAG_DUMMY, FLAG_OPEN, PAYLOAD_LEN};
use mix_cascade_core::chain::MixCipherChain;
use mix_cascade_core::MixCell;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::debug;

use crate::error::{NetError, Result};
use crate::event::{ChannelError, ChannelEvent, EventSender};
use crate::mux::MuxWriter;
use crate::table::ChannelTable;

/// State common to the data channel variants.
pub(crate) struct ChannelShared {
    id: u32,
    writer: Arc<MuxWriter>,
    table: Weak<ChannelTable>,
    /// Held across encrypt-and-write so cells reach the wire in
    /// keystream order.
    chain: AsyncMutex<MixCipherChain>,
    events: EventSender,
}

impl ChannelShared {
    fn new(
        id: u32,
        writer: Arc<MuxWriter>,
        table: Weak<ChannelTable>,
        chain: MixCipherChain,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            writer,
            table,
            chain: AsyncMutex::new(chain),
            events,
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.events.send(event);
    }

    fn remove_from_table(&self) {
        if let Some(table) = self.table.upgrade() {
            table.remove(self.id);
        }
    }

    /// Pads `data` with random filler, onion-encrypts it and writes the
    /// cell. `decide_flags` runs under the chain lock, so the flag
    /// decision and the keystream position can never be reordered
    /// against another sender on the same channel.
    async fn encrypt_and_send(
        &self,
        data: &[u8],
        decide_flags: impl FnOnce() -> Result<u16>,
    ) -> Result<()> {
        let mut chain = self.chain.lock().await;
        let flags = decide_flags()?;
        let max = PAYLOAD_LEN - chain.next_cell_overhead();
        if data.len() > max {
            return Err(NetError::PayloadTooLarge {
                len: data.len(),
                max,
            });
        }
        let mut body = vec![0u8; max];
        body[..data.len()].copy_from_slice(data);
        OsRng.fill_bytes(&mut body[data.len()..]);
        let payload = chain.encrypt_cell(&body, PAYLOAD_LEN)?;
        let cell = MixCell::with_payload(self.id, flags, payload).map_err(NetError::Core)?;
        self.writer.send_cell(cell).await
    }

    async fn decrypt(&self, payload: &mut [u8]) {
        let mut chain = self.chain.lock().await;
        chain.decrypt_cell(payload);
    }

    /// Bytes of order data the next cell can carry.
    async fn max_payload_size(&self) -> usize {
        PAYLOAD_LEN - self.chain.lock().await.next_cell_overhead()
    }
}

/// A send-once channel expecting a fixed number of downstream cells.
pub struct BoundedChannel {
    shared: ChannelShared,
    expected: usize,
    timeout: Duration,
    state: Arc<Mutex<BoundedState>>,
    close_wakeup: Arc<Notify>,
}

#[derive(Default)]
struct BoundedState {
    sent: bool,
    received: usize,
    closed: bool,
    trailing: Option<Vec<u8>>,
}

enum BoundedAction {
    Deliver,
    Close,
    CloseShort(usize),
    Excess,
    Drop,
}

impl BoundedChannel {
    /// Sends the single request this channel is allowed. The timeout
    /// watcher starts before the OPEN cell goes out, so a response can
    /// never race an unarmed timer.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(NetError::ChannelClosed);
            }
            if state.sent {
                return Err(NetError::AlreadySent);
            }
            state.sent = true;
        }
        self.spawn_watcher();
        self.shared.encrypt_and_send(data, || Ok(FLAG_OPEN)).await
    }

    /// Either the timeout expires or a close wakes us; whichever loses
    /// the race finds `closed` already set and stands down. The watcher
    /// always delivers the final `Closed` event and unregisters the
    /// channel.
    fn spawn_watcher(&self) {
        let state = Arc::clone(&self.state);
        let close_wakeup = Arc::clone(&self.close_wakeup);
        let events = self.shared.events.clone();
        let table = self.shared.table.clone();
        let id = self.shared.id;
        let timeout = self.timeout;
        tokio::spawn(async move {
            let _ = tokio::time::timeout(timeout, close_wakeup.notified()).await;
            let (timed_out, trailing) = {
                let mut state = state.lock();
                if state.closed {
                    (false, state.trailing.take())
                } else {
                    state.closed = true;
                    (true, None)
                }
            };
            if timed_out {
                debug!("channel {} timed out after {:?}", id, timeout);
                let _ = events.send(ChannelEvent::Exception(ChannelError::Timeout));
            }
            let _ = events.send(ChannelEvent::Closed { trailing });
            if let Some(table) = table.upgrade() {
                table.remove(id);
            }
        });
    }

    async fn handle_cell(&self, cell: MixCell) {
        let mut payload = cell.payload;
        // decrypt even what gets dropped, the keystream must advance
        self.shared.decrypt(&mut payload).await;
        if cell.channel_flags & FLAG_DUMMY != 0 {
            debug!("dropping dummy cell on channel {}", self.shared.id);
            return;
        }
        let closing = cell.channel_flags & FLAG_CLOSE != 0;
        let (action, sent) = {
            let mut state = self.state.lock();
            let sent = state.sent;
            let action = if state.closed {
                BoundedAction::Drop
            } else if closing {
                state.closed = true;
                if state.received < self.expected {
                    BoundedAction::CloseShort(state.received)
                } else {
                    state.trailing = Some(payload.clone());
                    BoundedAction::Close
                }
            } else if state.received == self.expected {
                state.closed = true;
                BoundedAction::Excess
            } else {
                state.received += 1;
                BoundedAction::Deliver
            };
            (action, sent)
        };
        match action {
            BoundedAction::Deliver => self.shared.emit(ChannelEvent::PacketReceived(payload)),
            BoundedAction::Close => self.settle(sent),
            BoundedAction::CloseShort(received) => {
                self.shared
                    .emit(ChannelEvent::Exception(ChannelError::MissingCells {
                        received,
                        expected: self.expected,
                    }));
                self.settle(sent);
            }
            BoundedAction::Excess => {
                self.shared
                    .emit(ChannelEvent::Exception(ChannelError::UnexpectedCell));
                self.settle(sent);
            }
            BoundedAction::Drop => {
                debug!("dropping late cell on closed channel {}", self.shared.id);
            }
        }
    }

    /// Hands the terminal event to the watcher, or delivers it here
    /// when no send ever armed one.
    fn settle(&self, sent: bool) {
        if sent {
            self.close_wakeup.notify_one();
        } else {
            let trailing = self.state.lock().trailing.take();
            self.shared.emit(ChannelEvent::Closed { trailing });
            self.shared.remove_from_table();
        }
    }

    fn close(&self) {
        let sent = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.sent
        };
        if sent {
            self.close_wakeup.notify_one();
        } else {
            self.shared.emit(ChannelEvent::Closed { trailing: None });
            self.shared.remove_from_table();
        }
    }

    fn notify_mux_closed(&self) {
        let sent = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.sent
        };
        if sent {
            // The watcher is armed; hand it the terminal event.
            self.shared
                .emit(ChannelEvent::Exception(ChannelError::MultiplexerClosed));
            self.close_wakeup.notify_one();
        } else {
            self.shared.emit(ChannelEvent::Closed { trailing: None });
        }
    }
}

/// A bidirectional stream channel with no cell budget.
pub struct UnboundedChannel {
    shared: ChannelShared,
    state: Mutex<UnboundedState>,
}

#[derive(Default)]
struct UnboundedState {
    opened: bool,
    closed: bool,
}

impl UnboundedChannel {
    /// Sends one payload; the first send carries the OPEN flag, every
    /// later one is a plain DATA cell.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.shared
            .encrypt_and_send(data, || {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(NetError::ChannelClosed);
                }
                if state.opened {
                    Ok(FLAG_DATA)
                } else {
                    state.opened = true;
                    Ok(FLAG_OPEN)
                }
            })
            .await
    }

    /// Closes the channel locally. If it was ever opened, the CLOSE
    /// cell is confirmed written before the channel leaves the table,
    /// so no in-flight cell is silently dropped.
    pub async fn close(&self) -> Result<()> {
        let send_close = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.opened
        };
        let result = if send_close {
            self.shared.encrypt_and_send(&[], || Ok(FLAG_CLOSE)).await
        } else {
            Ok(())
        };
        if result.is_err() {
            // The transport is gone; the channel still has to finish
            // its local teardown or its slot stays occupied forever.
            self.shared
                .emit(ChannelEvent::Exception(ChannelError::MultiplexerClosed));
        }
        self.shared.emit(ChannelEvent::Closed { trailing: None });
        self.shared.remove_from_table();
        result
    }

    async fn handle_cell(&self, cell: MixCell) {
        let mut payload = cell.payload;
        // decrypt even what gets dropped, the keystream must advance
        self.shared.decrypt(&mut payload).await;
        if cell.channel_flags & FLAG_DUMMY != 0 {
            debug!("dropping dummy cell on channel {}", self.shared.id);
            return;
        }
        if cell.channel_flags & FLAG_CLOSE != 0 {
            let was_closed = {
                let mut state = self.state.lock();
                std::mem::replace(&mut state.closed, true)
            };
            if was_closed {
                return;
            }
            self.shared.emit(ChannelEvent::Closed {
                trailing: Some(payload),
            });
            self.shared.remove_from_table();
        } else {
            if self.state.lock().closed {
                debug!("dropping late cell on closed channel {}", self.shared.id);
                return;
            }
            self.shared.emit(ChannelEvent::PacketReceived(payload));
        }
    }

    /// An unbounded channel has no way to learn the exchange finished
    /// other than its own CLOSE cell, so the connection going away
    /// underneath it is always an error.
    fn notify_mux_closed(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared
            .emit(ChannelEvent::Exception(ChannelError::MultiplexerClosed));
        self.shared.emit(ChannelEvent::Closed { trailing: None });
    }
}

/// A signaling channel at a fixed reserved id. Control cells skip the
/// onion chain; only the link-layer cipher of the codec touches them.
pub struct ControlChannel {
    id: u32,
    writer: Arc<MuxWriter>,
    table: Weak<ChannelTable>,
    events: EventSender,
    closed: Mutex<bool>,
}

impl ControlChannel {
    /// Sends one control payload, padded with random filler.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        if *self.closed.lock() {
            return Err(NetError::ChannelClosed);
        }
        if data.len() > PAYLOAD_LEN {
            return Err(NetError::PayloadTooLarge {
                len: data.len(),
                max: PAYLOAD_LEN,
            });
        }
        let mut payload = vec![0u8; PAYLOAD_LEN];
        payload[..data.len()].copy_from_slice(data);
        OsRng.fill_bytes(&mut payload[data.len()..]);
        let cell = MixCell::with_payload(self.id, FLAG_DATA, payload).map_err(NetError::Core)?;
        self.writer.send_cell(cell).await
    }

    fn handle_cell(&self, cell: MixCell) {
        if *self.closed.lock() {
            return;
        }
        let _ = self
            .events
            .send(ChannelEvent::PacketReceived(cell.payload));
    }

    fn close(&self) {
        self.notify_mux_closed();
        if let Some(table) = self.table.upgrade() {
            table.remove(self.id);
        }
    }

    fn notify_mux_closed(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;
        let _ = self.events.send(ChannelEvent::Closed { trailing: None });
    }
}

/// One multiplexed channel.
pub enum Channel {
    Bounded(BoundedChannel),
    Unbounded(UnboundedChannel),
    Control(ControlChannel),
}

impl Channel {
    pub(crate) fn new_bounded(
        id: u32,
        writer: Arc<MuxWriter>,
        table: Weak<ChannelTable>,
        chain: MixCipherChain,
        events: EventSender,
        expected: usize,
        timeout: Duration,
    ) -> Self {
        Self::Bounded(BoundedChannel {
            shared: ChannelShared::new(id, writer, table, chain, events),
            expected,
            timeout,
            state: Arc::new(Mutex::new(BoundedState::default())),
            close_wakeup: Arc::new(Notify::new()),
        })
    }

    pub(crate) fn new_unbounded(
        id: u32,
        writer: Arc<MuxWriter>,
        table: Weak<ChannelTable>,
        chain: MixCipherChain,
        events: EventSender,
    ) -> Self {
        Self::Unbounded(UnboundedChannel {
            shared: ChannelShared::new(id, writer, table, chain, events),
            state: Mutex::new(UnboundedState::default()),
        })
    }

    pub(crate) fn new_control(
        id: u32,
        writer: Arc<MuxWriter>,
        table: Weak<ChannelTable>,
        events: EventSender,
    ) -> Self {
        Self::Control(ControlChannel {
            id,
            writer,
            table,
            events,
            closed: Mutex::new(false),
        })
    }

    /// The wire id this channel answers to.
    pub fn id(&self) -> u32 {
        match self {
            Self::Bounded(c) => c.shared.id,
            Self::Unbounded(c) => c.shared.id,
            Self::Control(c) => c.id,
        }
    }

    /// Data channels occupy a table slot; control channels do not.
    pub fn is_data(&self) -> bool {
        !matches!(self, Self::Control(_))
    }

    /// How many bytes of order data the next cell can carry. Smaller
    /// on a data channel's first cell, which still has to fit the
    /// bootstrap blocks.
    pub async fn max_payload_size(&self) -> usize {
        match self {
            Self::Bounded(c) => c.shared.max_payload_size().await,
            Self::Unbounded(c) => c.shared.max_payload_size().await,
            Self::Control(_) => PAYLOAD_LEN,
        }
    }

    /// Submits a payload according to the variant's send rules.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        match self {
            Self::Bounded(c) => c.send(data).await,
            Self::Unbounded(c) => c.send(data).await,
            Self::Control(c) => c.send(data).await,
        }
    }

    /// Dispatches one cell received from the wire.
    pub(crate) async fn handle_cell(&self, cell: MixCell) {
        match self {
            Self::Bounded(c) => c.handle_cell(cell).await,
            Self::Unbounded(c) => c.handle_cell(cell).await,
            Self::Control(c) => c.handle_cell(cell),
        }
    }

    /// Requests local closure.
    pub async fn close(&self) -> Result<()> {
        match self {
            Self::Bounded(c) => {
                c.close();
                Ok(())
            }
            Self::Unbounded(c) => c.close().await,
            Self::Control(c) => {
                c.close();
                Ok(())
            }
        }
    }

    /// Invoked by the table when the multiplexer shuts down.
    pub(crate) fn notify_mux_closed(&self) {
        match self {
            Self::Bounded(c) => c.notify_mux_closed(),
            Self::Unbounded(c) => c.notify_mux_closed(),
            Self::Control(c) => c.notify_mux_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use mix_cascade_core::cell::CellCodec;
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::event::{event_channel, EventReceiver};
    use crate::mux::test_support::test_writer;

    const TEST_ID: u32 = 0x1000_0000;

    async fn next_event(rx: &mut EventReceiver) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event arrived")
            .expect("event queue closed")
    }

    fn data_cell(id: u32, flags: u16, content: &[u8]) -> MixCell {
        let mut payload = vec![0u8; PAYLOAD_LEN];
        payload[..content.len()].copy_from_slice(content);
        MixCell::with_payload(id, flags, payload).unwrap()
    }

    fn bounded(
        expected: usize,
        timeout: Duration,
    ) -> (Channel, EventReceiver, tokio::io::DuplexStream) {
        let (writer, far) = test_writer();
        let (events, rx) = event_channel();
        let channel = Channel::new_bounded(
            TEST_ID,
            writer,
            Weak::new(),
            MixCipherChain::new(&[]),
            events,
            expected,
            timeout,
        );
        (channel, rx, far)
    }

    #[tokio::test]
    async fn bounded_receives_exact_count() {
        let (channel, mut rx, _far) = bounded(2, Duration::from_secs(5));
        channel.send(b"request").await.unwrap();

        channel.handle_cell(data_cell(TEST_ID, FLAG_DATA, b"one")).await;
        channel.handle_cell(data_cell(TEST_ID, FLAG_DATA, b"two")).await;
        channel
            .handle_cell(data_cell(TEST_ID, FLAG_CLOSE, b"done"))
            .await;

        match next_event(&mut rx).await {
            ChannelEvent::PacketReceived(payload) => assert_eq!(&payload[..3], b"one"),
            other => panic!("unexpected event {:?}", other),
        }
        match next_event(&mut rx).await {
            ChannelEvent::PacketReceived(payload) => assert_eq!(&payload[..3], b"two"),
            other => panic!("unexpected event {:?}", other),
        }
        match next_event(&mut rx).await {
            ChannelEvent::Closed {
                trailing: Some(trailing),
            } => assert_eq!(&trailing[..4], b"done"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn bounded_flags_missing_cells() {
        let (channel, mut rx, _far) = bounded(3, Duration::from_secs(5));
        channel.send(b"request").await.unwrap();

        channel.handle_cell(data_cell(TEST_ID, FLAG_DATA, b"one")).await;
        channel.handle_cell(data_cell(TEST_ID, FLAG_CLOSE, &[])).await;

        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::PacketReceived(_)
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Exception(ChannelError::MissingCells {
                received: 1,
                expected: 3,
            })
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Closed { trailing: None }
        ));
    }

    #[tokio::test]
    async fn bounded_close_cell_before_any_send_still_delivers_closed() {
        // No send, so no timeout watcher is armed; the close path has
        // to deliver the terminal event itself.
        let (channel, mut rx, _far) = bounded(2, Duration::from_secs(5));
        channel.handle_cell(data_cell(TEST_ID, FLAG_CLOSE, &[])).await;

        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Exception(ChannelError::MissingCells {
                received: 0,
                expected: 2,
            })
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Closed { trailing: None }
        ));
    }

    #[tokio::test]
    async fn bounded_flags_excess_cells() {
        let (channel, mut rx, _far) = bounded(1, Duration::from_secs(5));
        channel.send(b"request").await.unwrap();

        channel.handle_cell(data_cell(TEST_ID, FLAG_DATA, b"one")).await;
        channel.handle_cell(data_cell(TEST_ID, FLAG_DATA, b"two")).await;

        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::PacketReceived(_)
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Exception(ChannelError::UnexpectedCell)
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Closed { trailing: None }
        ));
    }

    #[tokio::test]
    async fn bounded_times_out_without_a_close() {
        let (channel, mut rx, _far) = bounded(1, Duration::from_millis(50));
        channel.send(b"request").await.unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Exception(ChannelError::Timeout)
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Closed { trailing: None }
        ));
    }

    #[tokio::test]
    async fn bounded_sends_only_once() {
        let (channel, _rx, _far) = bounded(1, Duration::from_secs(5));
        channel.send(b"request").await.unwrap();
        assert!(matches!(
            channel.send(b"again").await,
            Err(NetError::AlreadySent)
        ));
    }

    #[tokio::test]
    async fn unbounded_opens_then_sends_data() {
        let (writer, far) = test_writer();
        let (events, _rx) = event_channel();
        let channel = Channel::new_unbounded(
            TEST_ID,
            writer,
            Weak::new(),
            MixCipherChain::new(&[]),
            events,
        );

        channel.send(b"first").await.unwrap();
        channel.send(b"second").await.unwrap();

        let mut wire = FramedRead::new(far, CellCodec::new());
        let first = wire.next().await.unwrap().unwrap();
        assert_eq!(first.channel_flags, FLAG_OPEN);
        assert_eq!(&first.payload[..5], b"first");
        let second = wire.next().await.unwrap().unwrap();
        assert_eq!(second.channel_flags, FLAG_DATA);
        assert_eq!(&second.payload[..6], b"second");
    }

    #[tokio::test]
    async fn unbounded_close_sends_a_close_cell() {
        let (writer, far) = test_writer();
        let (events, mut rx) = event_channel();
        let channel = Channel::new_unbounded(
            TEST_ID,
            writer,
            Weak::new(),
            MixCipherChain::new(&[]),
            events,
        );

        channel.send(b"payload").await.unwrap();
        channel.close().await.unwrap();

        let mut wire = FramedRead::new(far, CellCodec::new());
        let open = wire.next().await.unwrap().unwrap();
        assert_eq!(open.channel_flags, FLAG_OPEN);
        let close = wire.next().await.unwrap().unwrap();
        assert_eq!(close.channel_flags, FLAG_CLOSE);

        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Closed { trailing: None }
        ));
        // further sends are refused
        assert!(matches!(
            channel.send(b"late").await,
            Err(NetError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn unbounded_failed_close_still_closes_and_frees_the_slot() {
        let (writer, far) = test_writer();
        let table = Arc::new(ChannelTable::new(1));
        let (events, mut rx) = event_channel();
        let channel = {
            let writer = Arc::clone(&writer);
            let weak = Arc::downgrade(&table);
            table
                .create_data_channel(move |id| {
                    Channel::new_unbounded(id, writer, weak, MixCipherChain::new(&[]), events)
                })
                .await
        };
        channel.send(b"open").await.unwrap();

        // Tear down the far end so the CLOSE cell cannot be written.
        drop(far);
        assert!(channel.close().await.is_err());

        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Exception(ChannelError::MultiplexerClosed)
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Closed { trailing: None }
        ));
        assert_eq!(table.len(), 0);

        // the single slot came back
        let (events, _rx) = event_channel();
        let weak = Arc::downgrade(&table);
        tokio::time::timeout(
            Duration::from_secs(1),
            table.create_data_channel(move |id| {
                Channel::new_unbounded(id, writer, weak, MixCipherChain::new(&[]), events)
            }),
        )
        .await
        .expect("slot was not released");
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn unbounded_never_opened_closes_silently() {
        let (writer, _far) = test_writer();
        let (events, mut rx) = event_channel();
        let channel = Channel::new_unbounded(
            TEST_ID,
            writer,
            Weak::new(),
            MixCipherChain::new(&[]),
            events,
        );

        channel.close().await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Closed { trailing: None }
        ));
    }

    #[tokio::test]
    async fn unbounded_treats_mux_teardown_as_an_error() {
        let (writer, _far) = test_writer();
        let (events, mut rx) = event_channel();
        let channel = Channel::new_unbounded(
            TEST_ID,
            writer,
            Weak::new(),
            MixCipherChain::new(&[]),
            events,
        );
        channel.send(b"in flight").await.unwrap();

        channel.notify_mux_closed();
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Exception(ChannelError::MultiplexerClosed)
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            ChannelEvent::Closed { trailing: None }
        ));
    }

    #[tokio::test]
    async fn control_channel_pads_and_delivers() {
        let (writer, far) = test_writer();
        let (events, mut rx) = event_channel();
        let channel = Channel::new_control(4, writer, Weak::new(), events);

        channel.send(b"ping").await.unwrap();
        let mut wire = FramedRead::new(far, CellCodec::new());
        let cell = wire.next().await.unwrap().unwrap();
        assert_eq!(cell.channel_id, 4);
        assert_eq!(cell.channel_flags, FLAG_DATA);
        assert_eq!(cell.payload.len(), PAYLOAD_LEN);
        assert_eq!(&cell.payload[..4], b"ping");

        channel.handle_cell(data_cell(4, FLAG_DATA, b"pong")).await;
        match next_event(&mut rx).await {
            ChannelEvent::PacketReceived(payload) => assert_eq!(&payload[..4], b"pong"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn control_send_rejects_oversized_payloads() {
        let (writer, _far) = test_writer();
        let channel = Channel::new_control(2, writer, Weak::new(), event_channel().0);
        let too_big = vec![0u8; PAYLOAD_LEN + 1];
        assert!(matches!(
            channel.send(&too_big).await,
            Err(NetError::PayloadTooLarge { .. })
        ));
    }
}
