//! Real-time tail tracking
//!
//! This crate turns a stream of camera frames into per-frame tail posture
//! measurements and, from the accumulated history, into motion estimates a
//! stimulus loop can consume.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> FrameSender ==slots==> FrameReceiver -> FrameDispatcher
//!                                                          |  trace_tail
//!                                                          |  AngleUnwrapper
//!                                                          v
//!                 MotionEstimator <- DataAccumulator <- TrackingSample
//! ```
//!
//! # Module Structure
//!
//! - `frame`: Frame model (Frame, FrameTemplate, PixelFormat)
//! - `transport`: Slot-pool frame transport between producer and consumer
//! - `ring`: Fixed-length frame history with a replay cursor
//! - `tracer`: Segment-by-segment tail tracing and phase unwrapping
//! - `dispatcher`: Consumer loop that traces each frame and publishes samples
//! - `accumulator`: Growing tabular log of samples
//! - `estimator`: Vigor, sequence-model and simulated motion estimators
//! - `ingest`: Frame sources and the producer loop
//! - `config`: Session configuration from file and environment

pub mod accumulator;
pub mod config;
pub mod dispatcher;
pub mod estimator;
pub mod frame;
pub mod ingest;
pub mod ring;
pub mod tracer;
pub mod transport;

pub use accumulator::{DataAccumulator, TrackingSample, Watermark};
pub use config::TrackingConfig;
pub use dispatcher::{
    DispatcherConfig, DispatcherHandle, DispatcherStats, FrameDispatcher, StopOutcome, StopReason,
};
pub use estimator::{Estimate, MotionEstimator, Pose};
pub use frame::{Frame, FrameTemplate, PixelFormat};
pub use ingest::{run_producer, FrameSource, SyntheticConfig, SyntheticTailSource};
pub use ring::RingBuffer;
pub use tracer::{trace_tail, Point, TraceResult, TracerParams, TracerUpdate};
pub use transport::{
    frame_transport, ControlMessage, FrameReceiver, FrameSender, Payload, RecvError,
};
