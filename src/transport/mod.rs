//! Pooled frame transport between the capture producer and the dispatcher.
//!
//! Frames are copied into a fixed pool of K slots sized from the first
//! frame's template; only the slot id travels over the message queue.
//! When every slot is in flight, `put()` waits for the reader to release
//! one, so a slow consumer stalls the producer instead of growing memory.
//!
//! - `FrameSender::put` blocks on an exhausted pool.
//! - `FrameSender::put_timeout` gives up after a deadline and hands the frame
//!   back, for callers that want a drop-frame policy.
//! - `FrameReceiver::get` waits at most `timeout`; a timeout is an ordinary
//!   poll result (`RecvError::Timeout`).
//!
//! A template change reallocates the pool. Ids still queued from the old
//! pool are dropped on read and counted in `TransportStats::stale_dropped`.

mod pool;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{Frame, FrameTemplate};
use pool::{Acquire, SlotPool};

/// Interval at which a blocked `put()` re-checks that the reader still exists.
const LIVENESS_POLL: Duration = Duration::from_millis(50);

/// Opaque control messages. They bypass the slot pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// The producer has no more frames.
    EndOfStream,
    /// Free-form marker passed through unchanged.
    Marker(String),
}

/// What travels through the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Frame(Frame),
    Control(ControlMessage),
}

impl From<Frame> for Payload {
    fn from(frame: Frame) -> Self {
        Payload::Frame(frame)
    }
}

impl From<ControlMessage> for Payload {
    fn from(message: ControlMessage) -> Self {
        Payload::Control(message)
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RecvError {
    #[error("no payload arrived within the timeout")]
    Timeout,
    #[error("frame sender dropped and the queue is drained")]
    Disconnected,
}

/// Result of `FrameSender::put_timeout`.
#[derive(Debug)]
pub enum PutOutcome {
    Sent,
    /// No slot became free before the deadline. The frame is handed back.
    PoolExhausted(Frame),
}

/// Snapshot of transport counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub capacity: usize,
    pub in_flight: usize,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub stale_dropped: u64,
    pub reallocations: u64,
}

enum Envelope {
    Slot {
        generation: u64,
        id: usize,
        timestamp: f64,
    },
    Control(ControlMessage),
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    stale_dropped: AtomicU64,
    reallocations: AtomicU64,
}

struct Shared {
    capacity: usize,
    pool: Mutex<Option<Arc<SlotPool>>>,
    receiver_alive: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn current_pool(&self) -> Option<Arc<SlotPool>> {
        self.pool.lock().clone()
    }

    fn stats(&self) -> TransportStats {
        let in_flight = self
            .current_pool()
            .map(|pool| pool.in_flight())
            .unwrap_or(0);
        TransportStats {
            capacity: self.capacity,
            in_flight,
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            stale_dropped: self.counters.stale_dropped.load(Ordering::Relaxed),
            reallocations: self.counters.reallocations.load(Ordering::Relaxed),
        }
    }
}

/// Create a transport with a pool of `capacity` slots.
pub fn frame_transport(capacity: usize) -> Result<(FrameSender, FrameReceiver)> {
    if capacity == 0 {
        return Err(anyhow!("frame transport needs at least one slot"));
    }
    let shared = Arc::new(Shared {
        capacity,
        pool: Mutex::new(None),
        receiver_alive: AtomicBool::new(true),
        counters: Counters::default(),
    });
    let (queue_tx, queue_rx) = unbounded();
    Ok((
        FrameSender {
            shared: shared.clone(),
            queue: queue_tx,
        },
        FrameReceiver {
            shared,
            queue: queue_rx,
        },
    ))
}

/// Producer end. There is one writer per transport.
pub struct FrameSender {
    shared: Arc<Shared>,
    queue: Sender<Envelope>,
}

impl FrameSender {
    /// Send a frame or control message, blocking while the pool is exhausted.
    ///
    /// Fails only when the receiver has been dropped.
    pub fn put(&self, payload: impl Into<Payload>) -> Result<()> {
        match payload.into() {
            Payload::Control(message) => self.send_control(message),
            Payload::Frame(frame) => {
                let pool = self.pool_for(frame.template());
                loop {
                    if let Acquire::Slot(id) = pool.acquire(Some(LIVENESS_POLL)) {
                        return self.send_frame(&pool, id, &frame);
                    }
                    if !self.shared.receiver_alive.load(Ordering::Acquire) {
                        return Err(anyhow!("frame receiver dropped while waiting for a slot"));
                    }
                }
            }
        }
    }

    /// Send a frame, giving up once `timeout` passes without a free slot.
    pub fn put_timeout(&self, frame: Frame, timeout: Duration) -> Result<PutOutcome> {
        let pool = self.pool_for(frame.template());
        match pool.acquire(Some(timeout)) {
            Acquire::Slot(id) => {
                self.send_frame(&pool, id, &frame)?;
                Ok(PutOutcome::Sent)
            }
            Acquire::TimedOut => {
                if !self.shared.receiver_alive.load(Ordering::Acquire) {
                    return Err(anyhow!("frame receiver dropped"));
                }
                Ok(PutOutcome::PoolExhausted(frame))
            }
        }
    }

    pub fn stats(&self) -> TransportStats {
        self.shared.stats()
    }

    fn send_control(&self, message: ControlMessage) -> Result<()> {
        self.queue
            .send(Envelope::Control(message))
            .map_err(|_| anyhow!("frame receiver dropped"))
    }

    fn send_frame(&self, pool: &SlotPool, id: usize, frame: &Frame) -> Result<()> {
        pool.write(id, frame.data());
        self.queue
            .send(Envelope::Slot {
                generation: pool.generation(),
                id,
                timestamp: frame.timestamp,
            })
            .map_err(|_| anyhow!("frame receiver dropped"))?;
        self.shared
            .counters
            .frames_sent
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Current pool for `template`, reallocating when the template changes.
    fn pool_for(&self, template: FrameTemplate) -> Arc<SlotPool> {
        let mut current = self.shared.pool.lock();
        if let Some(pool) = current.as_ref() {
            if pool.template() == template {
                return pool.clone();
            }
        }
        let generation = match current.as_ref() {
            Some(old) => {
                log::warn!(
                    "frame template changed to {}x{} {:?}; {} in-flight slots invalidated",
                    template.width,
                    template.height,
                    template.format,
                    old.in_flight()
                );
                old.generation() + 1
            }
            None => {
                log::info!(
                    "frame transport: {} slots of {} bytes ({}x{} {:?})",
                    self.shared.capacity,
                    template.byte_len(),
                    template.width,
                    template.height,
                    template.format
                );
                1
            }
        };
        let pool = Arc::new(SlotPool::new(generation, template, self.shared.capacity));
        *current = Some(pool.clone());
        self.shared
            .counters
            .reallocations
            .fetch_add(1, Ordering::Relaxed);
        pool
    }
}

/// Consumer end. Not `Clone`: each slot has exactly one reader.
pub struct FrameReceiver {
    shared: Arc<Shared>,
    queue: Receiver<Envelope>,
}

impl FrameReceiver {
    /// Next payload, waiting at most `timeout`.
    ///
    /// Frames are copied out of their slot before it is released, so the
    /// caller owns the returned data.
    pub fn get(&self, timeout: Duration) -> Result<Payload, RecvError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let envelope = self.queue.recv_timeout(remaining).map_err(|e| match e {
                RecvTimeoutError::Timeout => RecvError::Timeout,
                RecvTimeoutError::Disconnected => RecvError::Disconnected,
            })?;
            match envelope {
                Envelope::Control(message) => return Ok(Payload::Control(message)),
                Envelope::Slot {
                    generation,
                    id,
                    timestamp,
                } => match self.shared.current_pool() {
                    Some(pool) if pool.generation() == generation => {
                        let data = pool.take(id);
                        self.shared
                            .counters
                            .frames_received
                            .fetch_add(1, Ordering::Relaxed);
                        return Ok(Payload::Frame(Frame::from_parts(
                            pool.template(),
                            timestamp,
                            data,
                        )));
                    }
                    _ => {
                        self.shared
                            .counters
                            .stale_dropped
                            .fetch_add(1, Ordering::Relaxed);
                        log::debug!("dropped slot {} from retired pool generation {}", id, generation);
                    }
                },
            }
        }
    }

    pub fn stats(&self) -> TransportStats {
        self.shared.stats()
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.shared.receiver_alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn numbered_frame(i: u8) -> Frame {
        Frame::gray8_from_fn(4, 3, i as f64, |x, y| i.wrapping_add((x + y * 4) as u8))
    }

    #[test]
    fn round_trip_preserves_fifo_order() -> Result<()> {
        let (tx, rx) = frame_transport(2)?;
        let producer = std::thread::spawn(move || -> Result<()> {
            for i in 0..50u8 {
                tx.put(numbered_frame(i))?;
            }
            tx.put(ControlMessage::EndOfStream)
        });

        for i in 0..50u8 {
            match rx.get(Duration::from_secs(2)) {
                Ok(Payload::Frame(frame)) => assert_eq!(frame, numbered_frame(i)),
                other => panic!("unexpected payload {:?}", other),
            }
        }
        assert_eq!(
            rx.get(Duration::from_secs(2)),
            Ok(Payload::Control(ControlMessage::EndOfStream))
        );
        producer.join().expect("producer thread")?;
        assert_eq!(rx.stats().in_flight, 0);
        assert_eq!(rx.stats().frames_received, 50);
        Ok(())
    }

    #[test]
    fn get_times_out_on_empty_channel() -> Result<()> {
        let (_tx, rx) = frame_transport(1)?;
        assert_eq!(rx.get(Duration::from_millis(10)), Err(RecvError::Timeout));
        Ok(())
    }

    #[test]
    fn get_reports_disconnect_after_sender_dropped() -> Result<()> {
        let (tx, rx) = frame_transport(1)?;
        drop(tx);
        assert_eq!(
            rx.get(Duration::from_millis(10)),
            Err(RecvError::Disconnected)
        );
        Ok(())
    }

    #[test]
    fn exhausted_pool_hands_frame_back() -> Result<()> {
        let (tx, rx) = frame_transport(1)?;
        assert!(matches!(
            tx.put_timeout(numbered_frame(1), Duration::from_millis(5))?,
            PutOutcome::Sent
        ));
        match tx.put_timeout(numbered_frame(2), Duration::from_millis(5))? {
            PutOutcome::PoolExhausted(frame) => assert_eq!(frame, numbered_frame(2)),
            PutOutcome::Sent => panic!("pool should be exhausted"),
        }
        assert_eq!(tx.stats().in_flight, 1);
        assert!(matches!(rx.get(Duration::from_millis(50)), Ok(Payload::Frame(_))));
        assert_eq!(tx.stats().in_flight, 0);
        Ok(())
    }

    #[test]
    fn template_change_drops_stale_ids() -> Result<()> {
        let (tx, rx) = frame_transport(4)?;
        tx.put(numbered_frame(1))?;
        let other = Frame::filled(FrameTemplate::new(2, 2, PixelFormat::Gray16), 9.0, 3);
        tx.put(other.clone())?;

        assert_eq!(rx.get(Duration::from_millis(50)), Ok(Payload::Frame(other)));
        let stats = rx.stats();
        assert_eq!(stats.stale_dropped, 1);
        assert_eq!(stats.reallocations, 2);
        Ok(())
    }

    #[test]
    fn put_fails_once_receiver_is_gone() -> Result<()> {
        let (tx, rx) = frame_transport(1)?;
        tx.put(numbered_frame(0))?;
        drop(rx);
        assert!(tx.put(numbered_frame(1)).is_err());
        Ok(())
    }
}
