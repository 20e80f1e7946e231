//! Frame dispatcher: drains the transport, traces every frame and publishes
//! compact tracking samples.
//!
//! The dispatcher runs on its own thread at camera rate, decoupled from the
//! display tick and from whoever drains its output. Each loop iteration:
//! 1. checks the cooperative stop flag,
//! 2. applies any pending `TracerUpdate`s (they take effect on the next frame),
//! 3. waits at most `poll_timeout` for a payload,
//! 4. traces the frame and sends a `TrackingSample`.
//!
//! The loop ends on the stop flag, an `EndOfStream` control message, or a
//! disconnected producer. `DispatcherHandle::stop` waits a bounded time for
//! the thread; if it does not finish, the thread is abandoned (possibly
//! holding a slot) and the caller is told so.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::accumulator::TrackingSample;
use crate::frame::Frame;
use crate::ring::RingBuffer;
use crate::tracer::{trace_tail, AngleUnwrapper, TracerParams, TracerUpdate};
use crate::transport::{ControlMessage, FrameReceiver, Payload, RecvError};

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Upper bound on one transport read, and so on stop latency.
    pub poll_timeout: Duration,
    /// Unwrap headings across frames before publishing.
    pub unwrap_angles: bool,
    /// Interval between throughput reports.
    pub report_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            unwrap_angles: true,
            report_interval: Duration::from_secs(5),
        }
    }
}

/// Live counters shared with the handle.
#[derive(Default)]
struct Monitor {
    frames: AtomicU64,
    degenerate_segments: AtomicU64,
    param_updates: AtomicU64,
    /// Frames per second over the last report interval, stored as `f64` bits.
    fps_bits: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DispatcherStats {
    pub frames: u64,
    pub degenerate_segments: u64,
    pub param_updates: u64,
    pub fps: f64,
}

impl Monitor {
    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            frames: self.frames.load(Ordering::Relaxed),
            degenerate_segments: self.degenerate_segments.load(Ordering::Relaxed),
            param_updates: self.param_updates.load(Ordering::Relaxed),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
        }
    }
}

/// Why the dispatch loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    EndOfStream,
    ProducerGone,
}

pub struct FrameDispatcher {
    frames: FrameReceiver,
    params: TracerParams,
    config: DispatcherConfig,
    output: Sender<TrackingSample>,
    updates_tx: Sender<TracerUpdate>,
    updates_rx: Receiver<TracerUpdate>,
    stop: Arc<AtomicBool>,
    monitor: Arc<Monitor>,
    display: Option<Arc<Mutex<RingBuffer>>>,
    unwrapper: AngleUnwrapper,
}

impl FrameDispatcher {
    /// Build a dispatcher and the channel its samples are published on.
    pub fn new(
        frames: FrameReceiver,
        params: TracerParams,
        config: DispatcherConfig,
    ) -> Result<(Self, Receiver<TrackingSample>)> {
        params.validate()?;
        let (output, samples) = unbounded();
        let (updates_tx, updates_rx) = unbounded();
        Ok((
            Self {
                frames,
                params,
                config,
                output,
                updates_tx,
                updates_rx,
                stop: Arc::new(AtomicBool::new(false)),
                monitor: Arc::new(Monitor::default()),
                display: None,
                unwrapper: AngleUnwrapper::new(),
            },
            samples,
        ))
    }

    /// Also copy every received frame into `ring` for display.
    pub fn with_display_buffer(mut self, ring: Arc<Mutex<RingBuffer>>) -> Self {
        self.display = Some(ring);
        self
    }

    pub fn params(&self) -> &TracerParams {
        &self.params
    }

    pub fn parameter_sender(&self) -> Sender<TracerUpdate> {
        self.updates_tx.clone()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.monitor.snapshot()
    }

    /// Run the dispatch loop on the calling thread.
    pub fn run(mut self) -> Result<StopReason> {
        log::info!(
            "dispatcher started: {} segments, anchor ({:.1}, {:.1})",
            self.params.n_segments,
            self.params.anchor.x,
            self.params.anchor.y
        );
        let mut window_start = Instant::now();
        let mut window_frames = 0u64;

        let reason = loop {
            if self.stop.load(Ordering::Acquire) {
                break StopReason::Requested;
            }
            self.apply_updates();

            match self.frames.get(self.config.poll_timeout) {
                Ok(Payload::Frame(frame)) => {
                    self.process(&frame)?;
                    window_frames += 1;
                }
                Ok(Payload::Control(ControlMessage::EndOfStream)) => break StopReason::EndOfStream,
                Ok(Payload::Control(ControlMessage::Marker(marker))) => {
                    log::debug!("dispatcher passed marker '{}'", marker);
                }
                Err(RecvError::Timeout) => {}
                Err(RecvError::Disconnected) => break StopReason::ProducerGone,
            }

            let elapsed = window_start.elapsed();
            if elapsed >= self.config.report_interval {
                let fps = window_frames as f64 / elapsed.as_secs_f64();
                self.monitor.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
                let transport = self.frames.stats();
                log::info!(
                    "dispatcher: {:.1} fps, {} frames, {}/{} slots in flight, {} degenerate segments",
                    fps,
                    self.monitor.frames.load(Ordering::Relaxed),
                    transport.in_flight,
                    transport.capacity,
                    self.monitor.degenerate_segments.load(Ordering::Relaxed)
                );
                window_start = Instant::now();
                window_frames = 0;
            }
        };

        log::info!(
            "dispatcher stopped ({:?}) after {} frames",
            reason,
            self.monitor.frames.load(Ordering::Relaxed)
        );
        Ok(reason)
    }

    /// Run the dispatch loop on a new thread.
    pub fn spawn(self) -> Result<DispatcherHandle> {
        let stop = self.stop.clone();
        let monitor = self.monitor.clone();
        let updates = self.updates_tx.clone();
        let join = std::thread::Builder::new()
            .name("tail-dispatcher".to_string())
            .spawn(move || self.run())?;
        Ok(DispatcherHandle {
            stop,
            monitor,
            updates,
            join: Some(join),
        })
    }

    fn apply_updates(&mut self) {
        loop {
            match self.updates_rx.try_recv() {
                Ok(update) => match update.apply_to(&self.params) {
                    Ok(next) => {
                        if next.n_segments != self.params.n_segments {
                            self.unwrapper.reset();
                        }
                        log::info!("dispatcher: tracer parameters updated: {:?}", update);
                        self.params = next;
                        self.monitor.param_updates.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => log::warn!("dispatcher: rejected tracer update: {}", err),
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn process(&mut self, frame: &Frame) -> Result<()> {
        if let Some(ring) = &self.display {
            ring.lock().put(frame);
        }

        let mut trace = trace_tail(frame, &self.params);
        if self.config.unwrap_angles {
            self.unwrapper.apply(&mut trace.angles);
        }
        self.monitor.frames.fetch_add(1, Ordering::Relaxed);
        if trace.degenerate_segments > 0 {
            self.monitor
                .degenerate_segments
                .fetch_add(trace.degenerate_segments as u64, Ordering::Relaxed);
        }

        self.output
            .send(TrackingSample {
                timestamp: frame.timestamp,
                tail_sum: trace.tail_sum,
                angles: trace.angles,
            })
            .map_err(|_| anyhow!("tracking sample receiver dropped"))
    }
}

/// Outcome of `DispatcherHandle::stop`.
#[derive(Debug)]
pub enum StopOutcome {
    Joined(StopReason),
    /// The thread did not finish within the timeout and was detached.
    Abandoned,
}

pub struct DispatcherHandle {
    stop: Arc<AtomicBool>,
    monitor: Arc<Monitor>,
    updates: Sender<TracerUpdate>,
    join: Option<JoinHandle<Result<StopReason>>>,
}

impl DispatcherHandle {
    /// Queue a parameter change for the next processed frame.
    pub fn update_params(&self, update: TracerUpdate) -> Result<()> {
        self.updates
            .send(update)
            .map_err(|_| anyhow!("dispatcher no longer accepts parameter updates"))
    }

    pub fn stats(&self) -> DispatcherStats {
        self.monitor.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Raise the stop flag and wait up to `timeout` for the thread.
    pub fn stop(mut self, timeout: Duration) -> Result<StopOutcome> {
        self.stop.store(true, Ordering::Release);
        let deadline = Instant::now() + timeout;
        let Some(join) = self.join.take() else {
            return Err(anyhow!("dispatcher already joined"));
        };
        while !join.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("dispatcher did not stop within {:?}; abandoning thread", timeout);
                return Ok(StopOutcome::Abandoned);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        match join.join() {
            Ok(result) => result.map(StopOutcome::Joined),
            Err(_) => Err(anyhow!("dispatcher thread panicked")),
        }
    }

    /// Wait for the loop to end on its own (end of stream or producer gone).
    pub fn join(mut self) -> Result<StopReason> {
        let Some(join) = self.join.take() else {
            return Err(anyhow!("dispatcher already joined"));
        };
        join.join()
            .map_err(|_| anyhow!("dispatcher thread panicked"))?
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.stop.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::DataAccumulator;
    use crate::frame::FrameTemplate;
    use crate::tracer::Point;
    use crate::transport::frame_transport;

    /// Poll until the dispatcher has applied `count` parameter updates.
    fn wait_for_updates(handle: &DispatcherHandle, count: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.stats().param_updates < count {
            assert!(Instant::now() < deadline, "parameter update was never applied");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn params() -> TracerParams {
        TracerParams {
            anchor: Point::new(10.0, 10.0),
            n_segments: 3,
            tail_length: 15.0,
            n_candidates: 9,
            ..TracerParams::default()
        }
    }

    #[test]
    fn stop_flag_ends_idle_loop() -> Result<()> {
        let (_tx, rx) = frame_transport(2)?;
        let (dispatcher, _samples) = FrameDispatcher::new(rx, params(), DispatcherConfig::default())?;
        let handle = dispatcher.spawn()?;
        match handle.stop(Duration::from_secs(2))? {
            StopOutcome::Joined(reason) => assert_eq!(reason, StopReason::Requested),
            StopOutcome::Abandoned => panic!("idle dispatcher must stop promptly"),
        }
        Ok(())
    }

    #[test]
    fn publishes_one_sample_per_frame_and_stops_at_end_of_stream() -> Result<()> {
        let (tx, rx) = frame_transport(2)?;
        let ring = Arc::new(Mutex::new(RingBuffer::new(4)?));
        let (dispatcher, samples) = FrameDispatcher::new(rx, params(), DispatcherConfig::default())?;
        let handle = dispatcher.with_display_buffer(ring.clone()).spawn()?;

        for i in 0..5 {
            tx.put(Frame::filled(FrameTemplate::gray8(32, 32), i as f64, 200))?;
        }
        tx.put(ControlMessage::EndOfStream)?;
        assert_eq!(handle.join()?, StopReason::EndOfStream);

        let received: Vec<TrackingSample> = samples.try_iter().collect();
        assert_eq!(received.len(), 5);
        for (i, sample) in received.iter().enumerate() {
            assert_eq!(sample.timestamp, i as f64);
            assert_eq!(sample.angles.len(), 3);
        }
        assert_eq!(ring.lock().get_most_recent()?.timestamp, 4.0);
        Ok(())
    }

    #[test]
    fn parameter_updates_apply_to_next_frame() -> Result<()> {
        let (tx, rx) = frame_transport(2)?;
        let (dispatcher, samples) = FrameDispatcher::new(rx, params(), DispatcherConfig::default())?;
        let params_tx = dispatcher.parameter_sender();
        let handle = dispatcher.spawn()?;

        tx.put(Frame::filled(FrameTemplate::gray8(32, 32), 0.0, 200))?;
        let first = samples.recv_timeout(Duration::from_secs(2))?;
        assert_eq!(first.angles.len(), 3);

        params_tx.send(TracerUpdate {
            n_segments: Some(5),
            ..TracerUpdate::default()
        })?;
        wait_for_updates(&handle, 1);
        tx.put(Frame::filled(FrameTemplate::gray8(32, 32), 1.0, 200))?;
        let second = samples.recv_timeout(Duration::from_secs(2))?;
        assert_eq!(second.angles.len(), 5);
        assert_eq!(handle.stats().param_updates, 1);
        assert!(handle.stats().degenerate_segments >= 8);

        handle.stop(Duration::from_secs(2))?;
        Ok(())
    }

    #[test]
    fn segment_change_mid_trial_keeps_log_growing() -> Result<()> {
        let (tx, rx) = frame_transport(2)?;
        let (dispatcher, samples) = FrameDispatcher::new(rx, params(), DispatcherConfig::default())?;
        let handle = dispatcher.spawn()?;
        let mut log = DataAccumulator::new(samples);

        for i in 0..5 {
            tx.put(Frame::filled(FrameTemplate::gray8(32, 32), i as f64, 200))?;
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while log.len() < 5 {
            assert!(Instant::now() < deadline, "first frames never arrived");
            log.update();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(log.width(), Some(5));

        handle.update_params(TracerUpdate {
            n_segments: Some(8),
            ..TracerUpdate::default()
        })?;
        wait_for_updates(&handle, 1);
        for i in 5..50 {
            tx.put(Frame::filled(FrameTemplate::gray8(32, 32), i as f64, 200))?;
        }
        tx.put(ControlMessage::EndOfStream)?;
        assert_eq!(handle.join()?, StopReason::EndOfStream);

        log.update();
        assert_eq!(log.width_changes(), 1);
        assert_eq!(log.width(), Some(10));
        assert_eq!(log.len(), 45);
        let last = log.get_last_n(1);
        assert_eq!(last[[0, 0]], 49.0);
        Ok(())
    }

    #[test]
    fn dropped_producer_ends_loop() -> Result<()> {
        let (tx, rx) = frame_transport(1)?;
        let (dispatcher, _samples) = FrameDispatcher::new(rx, params(), DispatcherConfig::default())?;
        let handle = dispatcher.spawn()?;
        drop(tx);
        assert_eq!(handle.join()?, StopReason::ProducerGone);
        Ok(())
    }
}
