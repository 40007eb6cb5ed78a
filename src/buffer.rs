//! Data units pushed between pads.

use crate::clock::ClockTime;
use std::sync::Arc;

/// A chunk of media data with timing.
///
/// The payload is reference counted, so cloning a buffer (for example in a
/// tee) does not copy the bytes.
#[derive(Clone, Debug)]
pub struct Buffer {
    data: Arc<[u8]>,
    pts: ClockTime,
    duration: ClockTime,
    offset: u64,
}

impl Buffer {
    /// Wrap `data` in a buffer with unset timing.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: data.into(),
            pts: ClockTime::NONE,
            duration: ClockTime::NONE,
            offset: u64::MAX,
        }
    }

    /// A zero-filled buffer of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    /// Presentation timestamp.
    pub fn pts(&self) -> ClockTime {
        self.pts
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: ClockTime) {
        self.pts = pts;
    }

    /// Duration of the data.
    pub fn duration(&self) -> ClockTime {
        self.duration
    }

    /// Set the duration.
    pub fn set_duration(&mut self, duration: ClockTime) {
        self.duration = duration;
    }

    /// Sequence offset (buffer count for sources that set it).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Set the sequence offset.
    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// End timestamp (`pts + duration`), if both are set.
    pub fn end(&self) -> Option<ClockTime> {
        match (self.pts.to_option(), self.duration.to_option()) {
            (Some(pts), Some(duration)) => Some(pts + duration),
            _ => None,
        }
    }
}
