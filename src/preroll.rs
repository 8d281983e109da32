//! Fixed-capacity lookback buffer of recent frames.

use std::collections::VecDeque;

use crate::camera::Frame;
use crate::recording::{FrameSink, SinkError};

/// Default lookback window.
pub const DEFAULT_PRE_ROLL_SECS: f64 = 0.5;

/// Longest accepted lookback window.
pub const MAX_PRE_ROLL_SECS: f64 = 10.0;

/// Upper bound on buffered frames whatever the frame rate.
pub const MAX_PRE_ROLL_FRAMES: usize = 1200;

/// Frames allocated up front; the rest grows on demand.
const INITIAL_ALLOCATION: usize = 64;

/// FIFO ring of the most recent frames, kept warm while no recording is active.
#[derive(Debug, Clone)]
pub struct PreRollBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl PreRollBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity.min(INITIAL_ALLOCATION)),
            capacity,
        }
    }

    /// Create a buffer covering `seconds` of video at `fps`.
    pub fn for_frame_rate(fps: f64, seconds: f64) -> Self {
        Self::new(Self::capacity_for(fps, seconds))
    }

    /// `round(fps * seconds)`, clamped to `1..=MAX_PRE_ROLL_FRAMES`.
    pub fn capacity_for(fps: f64, seconds: f64) -> usize {
        let frames = (fps * seconds).round();
        if !frames.is_finite() || frames < 1.0 {
            1
        } else if frames >= MAX_PRE_ROLL_FRAMES as f64 {
            MAX_PRE_ROLL_FRAMES
        } else {
            frames as usize
        }
    }

    /// Append a copy of `frame`, evicting the oldest entry when full.
    pub fn push(&mut self, frame: &Frame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame.clone());
    }

    /// Write every buffered frame to `sink`, oldest first.
    ///
    /// The buffer keeps its contents; call [`clear`](Self::clear) to empty it.
    pub fn drain_into(&self, sink: &mut dyn FrameSink) -> Result<usize, SinkError> {
        for frame in &self.frames {
            sink.write(frame)?;
        }
        Ok(self.frames.len())
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered frames, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn frame(sequence: u64) -> Frame {
        Frame::from_rgb(1, 1, vec![0, 0, 0], sequence).unwrap()
    }

    #[derive(Default)]
    struct RecordingSink {
        path: PathBuf,
        written: Vec<u64>,
        fail_after: Option<usize>,
    }

    impl FrameSink for RecordingSink {
        fn path(&self) -> &Path {
            &self.path
        }

        fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
            if self.fail_after == Some(self.written.len()) {
                return Err(SinkError::Closed {
                    path: self.path.clone(),
                });
            }
            self.written.push(frame.sequence);
            Ok(())
        }

        fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_capacity_from_frame_rate() {
        assert_eq!(PreRollBuffer::capacity_for(30.0, 0.5), 15);
        assert_eq!(PreRollBuffer::capacity_for(25.0, 0.5), 13);
        assert_eq!(PreRollBuffer::capacity_for(20.0, 0.5), 10);
        assert_eq!(PreRollBuffer::capacity_for(1.0, 0.5), 1);
        assert_eq!(PreRollBuffer::capacity_for(0.0, 0.5), 1);
        assert_eq!(PreRollBuffer::capacity_for(f64::NAN, 0.5), 1);
        assert_eq!(PreRollBuffer::new(0).capacity(), 1);
    }

    #[test]
    fn test_huge_window_is_clamped() {
        assert_eq!(PreRollBuffer::capacity_for(120.0, MAX_PRE_ROLL_SECS), MAX_PRE_ROLL_FRAMES);
        assert_eq!(PreRollBuffer::capacity_for(30.0, 1e20), MAX_PRE_ROLL_FRAMES);
        assert_eq!(PreRollBuffer::capacity_for(f64::INFINITY, 0.5), 1);

        let buffer = PreRollBuffer::for_frame_rate(30.0, 1e20);
        assert_eq!(buffer.capacity(), MAX_PRE_ROLL_FRAMES);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_keeps_last_frames_in_order() {
        let mut buffer = PreRollBuffer::new(4);
        for seq in 0..11 {
            buffer.push(&frame(seq));
            assert!(buffer.len() <= 4);
        }
        assert_eq!(buffer.len(), 4);
        let kept: Vec<u64> = buffer.iter().map(|f| f.sequence).collect();
        assert_eq!(kept, vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_drain_writes_in_order_without_clearing() {
        let mut buffer = PreRollBuffer::new(3);
        for seq in [5, 6] {
            buffer.push(&frame(seq));
        }
        let mut sink = RecordingSink::default();
        assert_eq!(buffer.drain_into(&mut sink).unwrap(), 2);
        assert_eq!(sink.written, vec![5, 6]);
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 3);
    }

    #[test]
    fn test_drain_stops_on_sink_error() {
        let mut buffer = PreRollBuffer::new(3);
        for seq in 0..3 {
            buffer.push(&frame(seq));
        }
        let mut sink = RecordingSink {
            fail_after: Some(1),
            ..Default::default()
        };
        assert!(buffer.drain_into(&mut sink).is_err());
        assert_eq!(sink.written, vec![0]);
    }
}
