//! Per-hop cascade parameters
//!
//! Identity, public-key material and optional replay protection for
//! one mix. The values are opaque inputs handed over by the directory
//! and key-exchange layers; nothing here is fetched or verified.

use std::time::{Duration, SystemTime};

use crate::asym::RsaMixCipher;

/// Length of the replay offset spliced into the session key
pub const REPLAY_OFFSET_LEN: usize = 2;

/// Replay-protection timestamp negotiated with one mix
///
/// The mix rejects bootstrap blocks whose embedded interval counter
/// is too far from its own clock. The counter replaces the final two
/// session-key bytes, so it must be computed right before the first
/// cell is encrypted.
#[derive(Clone, Debug)]
pub struct ReplayTimestamp {
    epoch: SystemTime,
    interval: Duration,
}

impl ReplayTimestamp {
    /// Create a timestamp source from the mix's epoch base and interval
    pub fn new(epoch: SystemTime, interval: Duration) -> Self {
        Self { epoch, interval }
    }

    /// Big-endian interval counter for the current wall-clock time
    pub fn current_offset(&self) -> [u8; REPLAY_OFFSET_LEN] {
        let elapsed = SystemTime::now()
            .duration_since(self.epoch)
            .unwrap_or_default();
        let intervals = (elapsed.as_secs() / self.interval.as_secs().max(1)) as u16;
        intervals.to_be_bytes()
    }
}

/// Opaque parameters for one mix of the cascade
#[derive(Clone)]
pub struct MixParameters {
    /// Mix identity as published by the directory layer
    pub mix_id: String,
    /// Bootstrap public key
    pub asym: RsaMixCipher,
    /// Replay protection, when the mix negotiated it
    pub replay: Option<ReplayTimestamp>,
}

impl MixParameters {
    /// Parameters for a mix without replay protection
    pub fn new(mix_id: impl Into<String>, asym: RsaMixCipher) -> Self {
        Self {
            mix_id: mix_id.into(),
            asym,
            replay: None,
        }
    }

    /// Enable replay protection
    pub fn with_replay(mut self, replay: ReplayTimestamp) -> Self {
        self.replay = Some(replay);
        self
    }
}
