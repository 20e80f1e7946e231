//! Fixed-capacity slot pool backing the frame transport.
//!
//! Each slot is sized to exactly one frame of the pool's template. Slot ids
//! circulate through a free list: the writer takes an id, fills the slot and
//! hands the id to the reader; the reader copies the bytes out and pushes the
//! id back. At most one party holds an id at a time.

use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::frame::FrameTemplate;

pub(crate) struct SlotPool {
    generation: u64,
    template: FrameTemplate,
    slots: Vec<Mutex<Vec<u8>>>,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
}

pub(crate) enum Acquire {
    Slot(usize),
    TimedOut,
}

impl SlotPool {
    pub(crate) fn new(generation: u64, template: FrameTemplate, capacity: usize) -> Self {
        let (free_tx, free_rx) = bounded(capacity);
        let slots = (0..capacity)
            .map(|_| Mutex::new(vec![0u8; template.byte_len()]))
            .collect();
        for id in 0..capacity {
            // Cannot fail: the channel was sized to hold every id.
            let _ = free_tx.send(id);
        }
        Self {
            generation,
            template,
            slots,
            free_tx,
            free_rx,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn template(&self) -> FrameTemplate {
        self.template
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Ids currently checked out by a writer or waiting to be read.
    pub(crate) fn in_flight(&self) -> usize {
        self.capacity() - self.free_rx.len()
    }

    /// Take a free slot id, waiting up to `timeout` (forever when `None`).
    pub(crate) fn acquire(&self, timeout: Option<Duration>) -> Acquire {
        match timeout {
            None => match self.free_rx.recv() {
                Ok(id) => Acquire::Slot(id),
                // The pool owns both ends of the free list.
                Err(_) => Acquire::TimedOut,
            },
            Some(timeout) => match self.free_rx.recv_timeout(timeout) {
                Ok(id) => Acquire::Slot(id),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    Acquire::TimedOut
                }
            },
        }
    }

    pub(crate) fn write(&self, id: usize, bytes: &[u8]) {
        let mut slot = self.slots[id].lock();
        slot.copy_from_slice(bytes);
    }

    /// Copy the slot contents out and return the id to the free list.
    pub(crate) fn take(&self, id: usize) -> Vec<u8> {
        let data = self.slots[id].lock().clone();
        self.release(id);
        data
    }

    fn release(&self, id: usize) {
        let _ = self.free_tx.try_send(id);
    }
}
