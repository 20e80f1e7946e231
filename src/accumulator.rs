//! Append-only tracking log.
//!
//! The accumulator drains the dispatcher's sample channel when `update()` is
//! called and keeps every row of the current trial in arrival order. Rows are
//! `[timestamp, tail_sum, theta_0 .. theta_{n-1}]`. The width is fixed by the
//! first row after each `reset()`. A row of another width (the segment count
//! was changed live) starts a new width epoch: earlier rows are discarded and
//! outstanding watermarks rewind, as if the trial had been reset.
//!
//! Arrival order is not guaranteed to be capture order. Consumers that care
//! about causality must sort or window by the timestamp column.
//!
//! Estimators that must see each row exactly once hold a `Watermark`. A
//! watermark is not `Clone`, so a given read position has exactly one owner.

use crossbeam::channel::{Receiver, TryRecvError};
use ndarray::Array2;

/// Leading columns before the segment angles.
pub const TIMESTAMP_COLUMN: usize = 0;
pub const TAIL_SUM_COLUMN: usize = 1;
pub const FIRST_ANGLE_COLUMN: usize = 2;

/// One traced frame.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackingSample {
    pub timestamp: f64,
    pub tail_sum: f64,
    pub angles: Vec<f64>,
}

impl TrackingSample {
    pub fn width(&self) -> usize {
        FIRST_ANGLE_COLUMN + self.angles.len()
    }
}

/// Read position of a single consumer.
#[derive(Debug, Default)]
pub struct Watermark {
    epoch: u64,
    position: usize,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `log` already consumed through this watermark. Never exceeds
    /// `log.len()`, and reads as zero after a reset or width change.
    pub fn position(&self, log: &DataAccumulator) -> usize {
        if self.epoch == log.epoch {
            self.position.min(log.len)
        } else {
            0
        }
    }
}

pub struct DataAccumulator {
    source: Receiver<TrackingSample>,
    /// Row-major log storage.
    rows: Vec<f64>,
    width: Option<usize>,
    len: usize,
    epoch: u64,
    width_changes: u64,
    source_closed: bool,
}

impl DataAccumulator {
    pub fn new(source: Receiver<TrackingSample>) -> Self {
        Self {
            source,
            rows: Vec::new(),
            width: None,
            len: 0,
            epoch: 0,
            width_changes: 0,
            source_closed: false,
        }
    }

    /// Drain everything currently waiting on the channel. Never blocks.
    ///
    /// Returns the number of rows appended.
    pub fn update(&mut self) -> usize {
        let mut appended = 0;
        loop {
            match self.source.try_recv() {
                Ok(sample) => {
                    if self.append(sample) {
                        appended += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.source_closed {
                        log::debug!("tracking sample source closed");
                        self.source_closed = true;
                    }
                    break;
                }
            }
        }
        appended
    }

    /// Append a row directly, as `update()` does for each drained sample.
    pub fn append(&mut self, sample: TrackingSample) -> bool {
        let width = sample.width();
        match self.width {
            Some(expected) if expected != width => {
                log::info!(
                    "tracking row width changed from {} to {}; discarding {} rows",
                    expected,
                    width,
                    self.len
                );
                self.width_changes += 1;
                self.reset();
                self.width = Some(width);
            }
            Some(_) => {}
            None => self.width = Some(width),
        }
        self.rows.push(sample.timestamp);
        self.rows.push(sample.tail_sum);
        self.rows.extend_from_slice(&sample.angles);
        self.len += 1;
        true
    }

    /// Clear the log for a new trial. Outstanding watermarks rewind to zero.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.width = None;
        self.len = 0;
        self.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Row width, once the first row of the trial has arrived.
    pub fn width(&self) -> Option<usize> {
        self.width
    }

    /// Width epochs started by a live segment-count change.
    pub fn width_changes(&self) -> u64 {
        self.width_changes
    }

    /// True once the dispatcher side of the channel is gone.
    pub fn source_closed(&self) -> bool {
        self.source_closed
    }

    /// The most recent `n` rows, oldest first. Fewer rows come back when the
    /// log is shorter; an empty log gives a `(0, width)` matrix.
    pub fn get_last_n(&self, n: usize) -> Array2<f64> {
        let take = n.min(self.len);
        self.rows_between(self.len - take, self.len)
    }

    /// Rows appended since `watermark`, advancing it to the end of the log.
    pub fn rows_since(&self, watermark: &mut Watermark) -> Array2<f64> {
        let rows = self.peek_since(watermark);
        self.advance(watermark, rows.nrows());
        rows
    }

    /// Rows appended since `watermark`, leaving it where it is.
    pub fn peek_since(&self, watermark: &Watermark) -> Array2<f64> {
        self.rows_between(watermark.position(self), self.len)
    }

    /// Mark `rows` more rows as consumed, starting from the watermark's
    /// current position in this log.
    pub fn advance(&self, watermark: &mut Watermark, rows: usize) {
        let start = watermark.position(self);
        watermark.epoch = self.epoch;
        watermark.position = (start + rows).min(self.len);
    }

    /// The full log, for handing to an exporter at trial end.
    pub fn snapshot(&self) -> Array2<f64> {
        self.rows_between(0, self.len)
    }

    /// Column names matching the row layout.
    pub fn header(&self) -> Vec<String> {
        let angles = self.width.map_or(0, |w| w - FIRST_ANGLE_COLUMN);
        let mut header = vec!["t".to_string(), "tail_sum".to_string()];
        header.extend((0..angles).map(|i| format!("theta_{:02}", i)));
        header
    }

    fn rows_between(&self, start: usize, end: usize) -> Array2<f64> {
        let width = self.width.unwrap_or(0);
        let data = self.rows[start * width..end * width].to_vec();
        // `append` keeps `rows.len() == len * width`, so the shape always fits.
        Array2::from_shape_vec((end - start, width), data)
            .unwrap_or_else(|_| Array2::zeros((0, width)))
    }
}
