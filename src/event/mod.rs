//! Events that travel through pads alongside buffers.
//!
//! Downstream events (stream start, caps, segment, EOS) follow the data.
//! Seeks travel upstream from sinks to sources. Flush events bypass
//! serialization: `FlushStart` unblocks every waiting streaming thread on its
//! way down, `FlushStop` re-arms the pads.
//!
//! ```rust
//! use pipewright::event::{Event, SeekEvent, SeekFlags};
//! use pipewright::clock::ClockTime;
//!
//! let seek = Event::Seek(SeekEvent::new(1.0, SeekFlags::FLUSH, ClockTime::SECOND, ClockTime::NONE));
//! assert!(seek.is_upstream());
//! assert!(!Event::FlushStart.is_serialized());
//! ```

use crate::caps::Caps;
use crate::clock::ClockTime;
use std::sync::atomic::{AtomicU32, Ordering};

static SEQNUM: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-wide sequence number.
pub(crate) fn next_seqnum() -> u32 {
    SEQNUM.fetch_add(1, Ordering::Relaxed)
}

crate::flags::bit_flags! {
    /// Flags of a seek request.
    pub struct SeekFlags {
        /// Flush the pipeline before seeking.
        const FLUSH = 1 << 0;
        /// Seek to the exact position.
        const ACCURATE = 1 << 1;
        /// Seek to the nearest key unit.
        const KEY_UNIT = 1 << 2;
        /// Segment seek: post a segment-done instead of EOS.
        const SEGMENT = 1 << 3;
        /// Trick mode playback.
        const TRICKMODE = 1 << 4;
        /// Alias of TRICKMODE.
        const SKIP = 1 << 4;
        /// Snap to the key unit before the position.
        const SNAP_BEFORE = 1 << 5;
        /// Snap to the key unit after the position.
        const SNAP_AFTER = 1 << 6;
        /// Snap to the nearest key unit.
        const SNAP_NEAREST = (1 << 5) | (1 << 6);
        /// Only decode key units in trick mode.
        const TRICKMODE_KEY_UNITS = 1 << 7;
    }
}

/// A seek request.
#[derive(Clone, Debug, PartialEq)]
pub struct SeekEvent {
    /// Playback rate; 1.0 is normal speed.
    pub rate: f64,
    /// Seek flags.
    pub flags: SeekFlags,
    /// New start position.
    pub start: ClockTime,
    /// New stop position; NONE plays to the end.
    pub stop: ClockTime,
    /// Identifies one seek while it fans out over several branches.
    pub seqnum: u32,
}

impl SeekEvent {
    /// Create a seek request with a fresh sequence number.
    pub fn new(rate: f64, flags: SeekFlags, start: ClockTime, stop: ClockTime) -> Self {
        Self {
            rate,
            flags,
            start,
            stop,
            seqnum: next_seqnum(),
        }
    }
}

/// An event flowing through pads.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A new stream starts; carries the stream id.
    StreamStart(String),
    /// The format of following buffers.
    Caps(Caps),
    /// Playback segment: buffers before `start` are outside the segment.
    Segment {
        /// Segment start.
        start: ClockTime,
        /// Playback rate.
        rate: f64,
    },
    /// No more data follows.
    Eos,
    /// Discard data and unblock.
    FlushStart,
    /// End of a flush.
    FlushStop {
        /// Whether running time restarts from zero.
        reset_time: bool,
    },
    /// Upstream seek request.
    Seek(SeekEvent),
}

impl Event {
    /// Whether the event flows with the data.
    pub fn is_downstream(&self) -> bool {
        !self.is_upstream()
    }

    /// Whether the event flows against the data.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Event::Seek(_))
    }

    /// Whether the event keeps its place between buffers.
    pub fn is_serialized(&self) -> bool {
        !matches!(self, Event::FlushStart | Event::FlushStop { .. } | Event::Seek(_))
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::StreamStart(_) => "stream-start",
            Event::Caps(_) => "caps",
            Event::Segment { .. } => "segment",
            Event::Eos => "eos",
            Event::FlushStart => "flush-start",
            Event::FlushStop { .. } => "flush-stop",
            Event::Seek(_) => "seek",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_flag_values() {
        assert_eq!(SeekFlags::FLUSH.bits(), 1);
        assert_eq!(SeekFlags::KEY_UNIT.bits(), 4);
        assert_eq!(SeekFlags::SNAP_NEAREST, SeekFlags::SNAP_BEFORE | SeekFlags::SNAP_AFTER);
        assert_eq!(SeekFlags::SKIP, SeekFlags::TRICKMODE);
    }

    #[test]
    fn test_seek_seqnums_are_unique() {
        let a = SeekEvent::new(1.0, SeekFlags::FLUSH, ClockTime::ZERO, ClockTime::NONE);
        let b = SeekEvent::new(1.0, SeekFlags::FLUSH, ClockTime::ZERO, ClockTime::NONE);
        assert_ne!(a.seqnum, b.seqnum);
    }

    #[test]
    fn test_directions() {
        assert!(Event::Eos.is_downstream());
        assert!(Event::Eos.is_serialized());
        assert!(!Event::FlushStart.is_serialized());
        assert_eq!(Event::FlushStop { reset_time: true }.name(), "flush-stop");
    }
}
