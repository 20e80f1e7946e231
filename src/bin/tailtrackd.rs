//! tailtrackd - tail tracking session runner
//!
//! This binary:
//! 1. Loads the session configuration (file + environment)
//! 2. Runs a synthetic tail camera on a producer thread
//! 3. Traces every frame on the dispatcher thread
//! 4. Drains the tracking log and queries the chosen estimator at the tick rate
//! 5. Shuts every stage down on Ctrl-C or when the stream ends

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tailtrack::estimator::{
    BoutDetector, BoutEvent, RecurrentVelocityModel, SequenceEstimator, SimulatedEstimator,
    VigorEstimator,
};
use tailtrack::ingest::BendProfile;
use tailtrack::{
    frame_transport, run_producer, DataAccumulator, Estimate, FrameDispatcher, MotionEstimator,
    RingBuffer, StopOutcome, SyntheticConfig, SyntheticTailSource, TrackingConfig,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EstimatorKind {
    Vigor,
    Sequence,
    Simulated,
}

#[derive(Parser, Debug)]
#[command(name = "tailtrackd", about = "Run a tail tracking session on a synthetic camera")]
struct Args {
    /// Session length in seconds (0 runs until Ctrl-C)
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,

    /// Synthetic camera frame rate
    #[arg(long, default_value_t = 200.0)]
    fps: f64,

    /// Baseline tail heading in radians
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    bend: f64,

    /// Oscillation amplitude in radians; 0 keeps the tail still
    #[arg(long, default_value_t = 0.0)]
    amplitude: f64,

    /// Oscillation frequency in Hz
    #[arg(long, default_value_t = 20.0)]
    frequency: f64,

    /// Uniform pixel noise in grey levels
    #[arg(long, default_value_t = 0)]
    noise: u8,

    /// Motion estimator to query each tick
    #[arg(long, value_enum, default_value_t = EstimatorKind::Vigor)]
    estimator: EstimatorKind,

    /// Recurrent model weights (JSON) for the sequence estimator
    #[arg(long, value_name = "PATH", env = "TAILTRACK_MODEL")]
    model: Option<PathBuf>,

    /// Bout schedule (JSON) for the simulated estimator
    #[arg(long, value_name = "PATH", env = "TAILTRACK_BOUTS")]
    bouts: Option<PathBuf>,

    /// Override the configured display tick rate
    #[arg(long)]
    tick_hz: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = TrackingConfig::load()?;
    if let Some(hz) = args.tick_hz {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(anyhow!("--tick-hz must be positive"));
        }
        cfg.tick_hz = hz;
    }

    let mut estimator = build_estimator(&args, &cfg)?;
    let mut bouts = BoutDetector::new(cfg.bout_threshold);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Release))
            .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let bend = if args.amplitude > 0.0 {
        BendProfile::Oscillating {
            baseline: args.bend,
            amplitude: args.amplitude,
            frequency_hz: args.frequency,
        }
    } else {
        BendProfile::Fixed(args.bend)
    };
    let frames = (args.seconds > 0.0).then(|| (args.seconds * args.fps).round() as u64);
    let mut source = SyntheticTailSource::new(SyntheticConfig {
        anchor: cfg.tracer.anchor,
        tail_length: cfg.tracer.tail_length * 1.1,
        fps: args.fps,
        bend,
        noise: args.noise,
        frames,
        ..SyntheticConfig::default()
    })?;

    let (sender, receiver) = frame_transport(cfg.pool_slots)?;
    let display = Arc::new(Mutex::new(RingBuffer::with_replay_window(
        cfg.ring_length,
        cfg.replay_window,
    )?));
    let (dispatcher, samples) =
        FrameDispatcher::new(receiver, cfg.tracer.clone(), cfg.dispatcher.clone())?;
    let dispatcher = dispatcher.with_display_buffer(display.clone()).spawn()?;

    let producer = {
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("tail-producer".to_string())
            .spawn(move || run_producer(&mut source, &sender, &stop))?
    };

    let mut log = DataAccumulator::new(samples);
    let tick = cfg.tick_interval();
    let started = Instant::now();
    let mut last_health_log = Instant::now();
    let mut last_estimate: Option<Estimate> = None;

    log::info!(
        "tailtrackd running: estimator={} pool_slots={} segments={} tick={:?}",
        estimator.name(),
        cfg.pool_slots,
        cfg.tracer.n_segments,
        tick
    );

    while !stop.load(Ordering::Acquire) {
        let tick_start = Instant::now();
        log.update();

        let now = started.elapsed().as_secs_f64();
        let estimate = estimator.get_estimate(&log, now)?;
        if let Some(vigor) = estimate.vigor() {
            match bouts.update(vigor, now) {
                Some(BoutEvent::Started { time }) => {
                    log::info!("bout {} started at {:.3}s", bouts.count(), time)
                }
                Some(BoutEvent::Ended { time, duration }) => {
                    log::info!("bout ended at {:.3}s after {:.3}s", time, duration)
                }
                None => {}
            }
        }
        last_estimate = Some(estimate);

        if last_health_log.elapsed() >= Duration::from_secs(1) {
            let stats = dispatcher.stats();
            let frames_in_ring = display.lock().len();
            log::info!(
                "rows={} fps={:.1} degenerate={} ring={} estimate={:?}",
                log.len(),
                stats.fps,
                stats.degenerate_segments,
                frames_in_ring,
                last_estimate
            );
            last_health_log = Instant::now();
        }

        if dispatcher.is_finished() {
            log.update();
            log::info!("dispatcher finished; ending session");
            break;
        }

        if let Some(rest) = tick.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    stop.store(true, Ordering::Release);
    let producer_stats = producer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))??;
    match dispatcher.stop(Duration::from_secs(1))? {
        StopOutcome::Joined(reason) => log::info!("dispatcher stopped: {:?}", reason),
        StopOutcome::Abandoned => log::warn!("dispatcher abandoned during shutdown"),
    }
    log.update();

    log::info!(
        "session summary: frames_sent={} stalls={} rows={} width_changes={} bouts={} last_estimate={:?}",
        producer_stats.frames_sent,
        producer_stats.stalls,
        log.len(),
        log.width_changes(),
        bouts.count(),
        last_estimate
    );
    Ok(())
}

fn build_estimator(args: &Args, cfg: &TrackingConfig) -> Result<Box<dyn MotionEstimator>> {
    match args.estimator {
        EstimatorKind::Vigor => Ok(Box::new(VigorEstimator::new(cfg.vigor.clone()))),
        EstimatorKind::Sequence => {
            let path = args
                .model
                .as_deref()
                .ok_or_else(|| anyhow!("--model (or TAILTRACK_MODEL) must be set for the sequence estimator"))?;
            let model = RecurrentVelocityModel::load(path)?;
            Ok(Box::new(SequenceEstimator::new(model, cfg.sequence.clone())))
        }
        EstimatorKind::Simulated => {
            let path = args
                .bouts
                .as_deref()
                .ok_or_else(|| anyhow!("--bouts (or TAILTRACK_BOUTS) must be set for the simulated estimator"))?;
            Ok(Box::new(SimulatedEstimator::load(path)?))
        }
    }
}
