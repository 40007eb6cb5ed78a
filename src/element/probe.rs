//! Pad probes.
//!
//! A probe is a callback installed on a pad that sees the data passing
//! through it on the streaming thread. Blocking probes additionally park the
//! streaming thread at the pad until they are removed, which is how links
//! are changed safely on a running graph:
//!
//! ```rust,ignore
//! let block = tee_src.block();
//! block.wait_blocked(ClockTime::SECOND);
//! tee_src.unlink(&old_sink)?;
//! tee_src.link(&new_sink)?;
//! block.unblock();
//! ```

use super::pad::Pad;
use crate::buffer::Buffer;
use crate::clock::ClockTime;
use crate::event::Event;
use std::sync::Arc;

crate::flags::bit_flags! {
    /// What a probe is interested in.
    pub struct ProbeType {
        /// Fire when the pad is idle (one-shot).
        const IDLE = 1 << 0;
        /// Park the streaming thread while the probe is installed.
        const BLOCK = 1 << 1;
        /// Buffers.
        const BUFFER = 1 << 4;
        /// Downstream events.
        const EVENT_DOWNSTREAM = 1 << 6;
        /// Upstream events.
        const EVENT_UPSTREAM = 1 << 7;
        /// Downstream queries.
        const QUERY_DOWNSTREAM = 1 << 9;
        /// Upstream queries.
        const QUERY_UPSTREAM = 1 << 10;
        /// Push-mode scheduling.
        const PUSH = 1 << 12;
        /// Pull-mode scheduling.
        const PULL = 1 << 13;
        /// Block as soon as the pad is idle or data arrives.
        const BLOCKING = (1 << 0) | (1 << 1);
        /// All downstream data.
        const DATA_DOWNSTREAM = (1 << 4) | (1 << 6);
        /// All upstream data.
        const DATA_UPSTREAM = 1 << 7;
    }
}

impl ProbeType {
    pub(crate) const DATA_MASK: Self = Self::from_bits(
        Self::BUFFER.bits()
            | Self::EVENT_DOWNSTREAM.bits()
            | Self::EVENT_UPSTREAM.bits()
            | Self::QUERY_DOWNSTREAM.bits()
            | Self::QUERY_UPSTREAM.bits(),
    );

    /// Whether a probe of these types fires for data of kind `data`.
    pub(crate) fn matches(self, data: ProbeType) -> bool {
        let wanted = self & Self::DATA_MASK;
        if !wanted.is_empty() && !wanted.intersects(data) {
            return false;
        }
        let scheduling = self & (Self::PUSH | Self::PULL);
        scheduling.is_empty() || scheduling.contains(Self::PUSH)
    }
}

/// Identifies an installed probe on its pad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(pub(crate) u64);

/// What the streaming thread does after a probe callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeReturn {
    /// Keep the probe; blocking probes block.
    Ok,
    /// Drop the data; the push reports success.
    Drop,
    /// Remove the probe and let the data pass.
    Remove,
    /// Let the data pass without blocking.
    Pass,
}

/// Data seen by a probe.
#[derive(Debug)]
pub enum ProbeData {
    /// A buffer.
    Buffer(Buffer),
    /// An event.
    Event(Event),
}

/// Argument of a probe callback.
#[derive(Debug)]
pub struct ProbeInfo {
    /// Probe being invoked.
    pub id: ProbeId,
    /// Kind of the invocation (`BUFFER`, `EVENT_DOWNSTREAM`, `IDLE`, ...).
    pub types: ProbeType,
    /// The data, absent for idle notifications. Callbacks may modify it.
    pub data: Option<ProbeData>,
}

impl ProbeInfo {
    /// The buffer, if this is a buffer probe.
    pub fn buffer(&self) -> Option<&Buffer> {
        match &self.data {
            Some(ProbeData::Buffer(b)) => Some(b),
            _ => None,
        }
    }

    /// Mutable access to the buffer.
    pub fn buffer_mut(&mut self) -> Option<&mut Buffer> {
        match &mut self.data {
            Some(ProbeData::Buffer(b)) => Some(b),
            _ => None,
        }
    }

    /// The event, if this is an event probe.
    pub fn event(&self) -> Option<&Event> {
        match &self.data {
            Some(ProbeData::Event(e)) => Some(e),
            _ => None,
        }
    }
}

/// Probe callback.
pub type ProbeCallback = Arc<dyn Fn(&Pad, &mut ProbeInfo) -> ProbeReturn + Send + Sync>;

#[derive(Clone)]
pub(crate) struct ProbeEntry {
    pub(crate) id: ProbeId,
    pub(crate) types: ProbeType,
    pub(crate) callback: ProbeCallback,
}

/// A blocking probe wrapped for the block, mutate, unblock sequence.
///
/// Dropping the handle unblocks the pad.
pub struct BlockHandle {
    pad: Pad,
    id: Option<ProbeId>,
}

impl BlockHandle {
    pub(crate) fn new(pad: Pad, id: Option<ProbeId>) -> Self {
        Self { pad, id }
    }

    /// The blocked pad.
    pub fn pad(&self) -> &Pad {
        &self.pad
    }

    /// Wait until the streaming thread is parked at the pad or the pad is
    /// idle, so its links can be changed. Returns `false` on timeout.
    pub fn wait_blocked(&self, timeout: ClockTime) -> bool {
        self.pad.wait_blocked_or_idle(timeout)
    }

    /// Whether a streaming thread is parked at the pad right now.
    pub fn is_blocked(&self) -> bool {
        self.pad.is_blocked()
    }

    /// Remove the probe and let data flow again.
    pub fn unblock(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.pad.remove_probe(id);
        }
    }
}

impl Drop for BlockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockHandle")
            .field("pad", &self.pad.name())
            .field("id", &self.id)
            .finish()
    }
}
