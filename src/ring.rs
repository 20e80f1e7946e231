//! Fixed-length circular store of recent frames.
//!
//! Storage is one contiguous `(L, *template.shape)` byte block allocated from
//! the first frame's template. `get_most_recent()` serves the display path;
//! `get()` walks a replay window that restarts at its oldest frame after
//! every `put()`.
//!
//! Putting a frame with a different template reallocates the store and
//! discards all history.

use anyhow::{anyhow, Result};

use crate::frame::{Frame, FrameTemplate};

pub struct RingBuffer {
    length: usize,
    replay_window: usize,
    template: Option<FrameTemplate>,
    store: Vec<u8>,
    timestamps: Vec<f64>,
    /// Next write position.
    insert: usize,
    /// Offset into the replay window.
    replay: usize,
    /// Number of positions written since the last (re)allocation, capped at `length`.
    filled: usize,
}

impl RingBuffer {
    /// Ring of `length` frames whose replay window covers all of them.
    pub fn new(length: usize) -> Result<Self> {
        Self::with_replay_window(length, length)
    }

    /// Ring of `length` frames replaying the most recent `replay_window`.
    pub fn with_replay_window(length: usize, replay_window: usize) -> Result<Self> {
        if length == 0 {
            return Err(anyhow!("ring buffer length must be > 0"));
        }
        if replay_window == 0 || replay_window > length {
            return Err(anyhow!(
                "replay window must be in 1..={} (got {})",
                length,
                replay_window
            ));
        }
        Ok(Self {
            length,
            replay_window,
            template: None,
            store: Vec::new(),
            timestamps: Vec::new(),
            insert: 0,
            replay: 0,
            filled: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn capacity(&self) -> usize {
        self.length
    }

    pub fn template(&self) -> Option<FrameTemplate> {
        self.template
    }

    pub fn put(&mut self, frame: &Frame) {
        let template = frame.template();
        if self.template != Some(template) {
            if self.template.is_some() {
                log::debug!(
                    "ring buffer template changed to {}x{} {:?}, history discarded",
                    template.width,
                    template.height,
                    template.format
                );
            }
            self.store = vec![0u8; self.length * template.byte_len()];
            self.timestamps = vec![f64::NAN; self.length];
            self.template = Some(template);
            self.insert = 0;
            self.filled = 0;
        }

        let size = template.byte_len();
        let offset = self.insert * size;
        self.store[offset..offset + size].copy_from_slice(frame.data());
        self.timestamps[self.insert] = frame.timestamp;
        self.insert = (self.insert + 1) % self.length;
        self.filled = (self.filled + 1).min(self.length);
        self.replay = 0;
    }

    /// Next frame of the replay window, oldest first, wrapping after the newest.
    ///
    /// Before the ring has been filled the window only spans written frames.
    pub fn get(&mut self) -> Result<Frame> {
        let template = self
            .template
            .ok_or_else(|| anyhow!("ring buffer read before any put"))?;
        let window = self.replay_window.min(self.filled);
        let start = (self.insert + self.length - window) % self.length;
        let index = (start + self.replay) % self.length;
        self.replay = (self.replay + 1) % window;
        Ok(self.frame_at(template, index))
    }

    /// The frame written by the last `put()`.
    pub fn get_most_recent(&self) -> Result<Frame> {
        let template = self
            .template
            .ok_or_else(|| anyhow!("ring buffer read before any put"))?;
        let index = (self.insert + self.length - 1) % self.length;
        Ok(self.frame_at(template, index))
    }

    fn frame_at(&self, template: FrameTemplate, index: usize) -> Frame {
        let size = template.byte_len();
        let offset = index * size;
        Frame::from_parts(
            template,
            self.timestamps[index],
            self.store[offset..offset + size].to_vec(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(i: u8) -> Frame {
        Frame::filled(FrameTemplate::gray8(3, 2), i as f64, i)
    }

    #[test]
    fn read_before_put_is_an_error() -> Result<()> {
        let mut ring = RingBuffer::new(4)?;
        assert!(ring.get().is_err());
        assert!(ring.get_most_recent().is_err());
        Ok(())
    }

    #[test]
    fn most_recent_is_last_put() -> Result<()> {
        let mut ring = RingBuffer::new(4)?;
        for i in 0..11 {
            ring.put(&frame(i));
        }
        assert_eq!(ring.get_most_recent()?, frame(10));
        // Replay reads do not move the most-recent position.
        ring.get()?;
        ring.get()?;
        assert_eq!(ring.get_most_recent()?, frame(10));
        Ok(())
    }

    #[test]
    fn replay_cycles_over_most_recent_frames() -> Result<()> {
        let mut ring = RingBuffer::new(4)?;
        for i in 0..10 {
            ring.put(&frame(i));
        }
        let cycle: Vec<f64> = (0..4).map(|_| ring.get().map(|f| f.timestamp)).collect::<Result<_>>()?;
        assert_eq!(cycle, vec![6.0, 7.0, 8.0, 9.0]);
        // Wraps back to the oldest frame of the window.
        assert_eq!(ring.get()?.timestamp, 6.0);

        ring.put(&frame(10));
        assert_eq!(ring.get()?.timestamp, 7.0);
        Ok(())
    }

    #[test]
    fn partial_fill_replays_written_frames_only() -> Result<()> {
        let mut ring = RingBuffer::new(5)?;
        ring.put(&frame(1));
        ring.put(&frame(2));
        assert_eq!(ring.get()?.timestamp, 1.0);
        assert_eq!(ring.get()?.timestamp, 2.0);
        assert_eq!(ring.get()?.timestamp, 1.0);
        Ok(())
    }

    #[test]
    fn shorter_replay_window() -> Result<()> {
        let mut ring = RingBuffer::with_replay_window(6, 2)?;
        for i in 0..6 {
            ring.put(&frame(i));
        }
        assert_eq!(ring.get()?.timestamp, 4.0);
        assert_eq!(ring.get()?.timestamp, 5.0);
        assert_eq!(ring.get()?.timestamp, 4.0);
        Ok(())
    }

    #[test]
    fn template_change_discards_history() -> Result<()> {
        let mut ring = RingBuffer::new(3)?;
        ring.put(&frame(1));
        ring.put(&frame(2));
        let wide = Frame::filled(FrameTemplate::gray8(6, 2), 3.0, 3);
        ring.put(&wide);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.get()?, wide);
        assert_eq!(ring.get()?, wide);
        Ok(())
    }

    #[test]
    fn rejects_bad_dimensions() {
        assert!(RingBuffer::new(0).is_err());
        assert!(RingBuffer::with_replay_window(3, 4).is_err());
    }
}
