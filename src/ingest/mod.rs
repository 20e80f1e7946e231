//! Frame producers.
//!
//! Acquisition itself lives outside this crate; a `FrameSource` is the
//! boundary. Sources return `Ok(None)` at end of stream and own their own
//! reconnect policy.
//!
//! `run_producer` pumps a source into the frame transport until the source
//! ends or the stop flag is raised, then sends `EndOfStream`.

pub mod synthetic;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;

use crate::frame::Frame;
use crate::transport::{ControlMessage, FrameSender, PutOutcome};

pub use synthetic::{BendProfile, SyntheticConfig, SyntheticTailSource};

/// Slot wait between stop-flag checks while the pool is exhausted.
const PRODUCER_POLL: Duration = Duration::from_millis(20);

pub trait FrameSource: Send {
    /// Next frame, or `None` when the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Statistics for one producer run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub frames_sent: u64,
    /// Times the producer found every slot in flight.
    pub stalls: u64,
    pub stopped_early: bool,
}

pub fn run_producer(
    source: &mut dyn FrameSource,
    sender: &FrameSender,
    stop: &AtomicBool,
) -> Result<ProducerStats> {
    let mut stats = ProducerStats::default();
    'frames: while let Some(mut frame) = source.next_frame()? {
        loop {
            if stop.load(Ordering::Acquire) {
                stats.stopped_early = true;
                break 'frames;
            }
            match sender.put_timeout(frame, PRODUCER_POLL)? {
                PutOutcome::Sent => break,
                PutOutcome::PoolExhausted(pending) => {
                    stats.stalls += 1;
                    frame = pending;
                }
            }
        }
        stats.frames_sent += 1;
        if stop.load(Ordering::Acquire) {
            stats.stopped_early = true;
            break;
        }
    }
    sender.put(ControlMessage::EndOfStream)?;
    log::info!(
        "producer finished: {} frames, {} stalls{}",
        stats.frames_sent,
        stats.stalls,
        if stats.stopped_early { " (stopped)" } else { "" }
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameTemplate;
    use crate::transport::{frame_transport, Payload};

    struct CountingSource {
        remaining: u32,
    }

    impl FrameSource for CountingSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Frame::filled(FrameTemplate::gray8(2, 2), self.remaining as f64, 1)))
        }
    }

    #[test]
    fn sends_end_of_stream_after_last_frame() -> Result<()> {
        let (tx, rx) = frame_transport(8)?;
        let stop = AtomicBool::new(false);
        let stats = run_producer(&mut CountingSource { remaining: 3 }, &tx, &stop)?;
        assert_eq!(stats.frames_sent, 3);
        for _ in 0..3 {
            assert!(matches!(rx.get(Duration::from_millis(50)), Ok(Payload::Frame(_))));
        }
        assert_eq!(
            rx.get(Duration::from_millis(50)),
            Ok(Payload::Control(ControlMessage::EndOfStream))
        );
        Ok(())
    }

    #[test]
    fn stop_flag_unblocks_exhausted_pool() -> Result<()> {
        let (tx, _rx) = frame_transport(1)?;
        let stop = AtomicBool::new(false);
        std::thread::scope(|scope| -> Result<()> {
            let worker = scope.spawn(|| run_producer(&mut CountingSource { remaining: 100 }, &tx, &stop));
            std::thread::sleep(Duration::from_millis(100));
            stop.store(true, Ordering::Release);
            let stats = worker.join().expect("producer thread")?;
            assert!(stats.stopped_early);
            assert_eq!(stats.frames_sent, 1);
            assert!(stats.stalls > 0);
            Ok(())
        })
    }
}
