use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use tailtrack::estimator::{VigorConfig, VigorEstimator};
use tailtrack::ingest::BendProfile;
use tailtrack::{
    frame_transport, run_producer, DataAccumulator, DispatcherConfig, FrameDispatcher,
    MotionEstimator, Point, RingBuffer, StopReason, SyntheticConfig, SyntheticTailSource,
    TracerParams,
};

const ANCHOR: Point = Point { x: 40.0, y: 100.0 };

fn tracer_params() -> TracerParams {
    TracerParams {
        anchor: ANCHOR,
        n_segments: 6,
        tail_length: 120.0,
        n_candidates: 61,
        baseline_heading: 0.0,
        ..TracerParams::default()
    }
}

/// Run `frames` synthetic frames through transport, dispatcher and log.
fn run_session(bend: BendProfile, frames: u64) -> Result<(DataAccumulator, Arc<Mutex<RingBuffer>>)> {
    let mut source = SyntheticTailSource::new(SyntheticConfig {
        anchor: ANCHOR,
        tail_length: 140.0,
        fps: 200.0,
        bend,
        frames: Some(frames),
        ..SyntheticConfig::default()
    })?;
    let (sender, receiver) = frame_transport(8)?;
    let ring = Arc::new(Mutex::new(RingBuffer::new(16)?));
    let (dispatcher, samples) =
        FrameDispatcher::new(receiver, tracer_params(), DispatcherConfig::default())?;
    let handle = dispatcher.with_display_buffer(ring.clone()).spawn()?;

    let stop = Arc::new(AtomicBool::new(false));
    let producer = std::thread::spawn(move || run_producer(&mut source, &sender, &stop));

    let stats = producer.join().expect("producer thread")?;
    assert_eq!(stats.frames_sent, frames);
    assert_eq!(handle.join()?, StopReason::EndOfStream);

    let mut log = DataAccumulator::new(samples);
    log.update();
    Ok((log, ring))
}

#[test]
fn fixed_bend_flows_end_to_end() -> Result<()> {
    let theta = 0.3;
    let (log, ring) = run_session(BendProfile::Fixed(theta), 100)?;

    assert_eq!(log.len(), 100);
    assert_eq!(log.width(), Some(8));
    let rows = log.get_last_n(100);
    assert_eq!(rows.dim(), (100, 8));

    for (i, row) in rows.outer_iter().enumerate() {
        assert!((row[0] - i as f64 / 200.0).abs() < 1e-9, "timestamps stay in order");
        let angles = row.slice(ndarray::s![2..]);
        let mean = angles.sum() / angles.len() as f64;
        assert!((mean - theta).abs() < 0.05, "row {} mean angle {}", i, mean);
        for angle in angles.iter() {
            assert!((angle - theta).abs() < 0.1, "row {} angle {}", i, angle);
        }
    }

    let mut vigor = VigorEstimator::new(VigorConfig::default());
    let estimate = vigor.get_estimate(&log, 0.5)?;
    assert!(estimate.vigor().expect("vigor estimate").abs() < 1e-9);
    assert_eq!(vigor.window_rows(), 10);

    let ring = ring.lock();
    assert_eq!(ring.len(), 16);
    assert!((ring.get_most_recent()?.timestamp - 99.0 / 200.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn oscillating_tail_raises_vigor() -> Result<()> {
    let bend = BendProfile::Oscillating {
        baseline: 0.0,
        amplitude: 0.5,
        frequency_hz: 20.0,
    };
    let (log, _ring) = run_session(bend, 60)?;
    assert_eq!(log.len(), 60);

    let mut vigor = VigorEstimator::new(VigorConfig::default());
    let value = vigor
        .get_estimate(&log, 0.3)?
        .vigor()
        .expect("vigor estimate");
    assert!(value > 0.05, "vigor {}", value);
    Ok(())
}
