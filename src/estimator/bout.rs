/// Start or end of a movement bout.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoutEvent {
    Started { time: f64 },
    Ended { time: f64, duration: f64 },
}

/// Segments a vigor stream into bouts with a single threshold.
#[derive(Clone, Debug)]
pub struct BoutDetector {
    threshold: f64,
    started_at: Option<f64>,
    count: u64,
}

impl BoutDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            started_at: None,
            count: 0,
        }
    }

    pub fn in_bout(&self) -> bool {
        self.started_at.is_some()
    }

    /// Bouts started since the last reset.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn update(&mut self, vigor: f64, time: f64) -> Option<BoutEvent> {
        match self.started_at {
            None if vigor > self.threshold => {
                self.started_at = Some(time);
                self.count += 1;
                Some(BoutEvent::Started { time })
            }
            Some(start) if vigor <= self.threshold => {
                self.started_at = None;
                Some(BoutEvent::Ended {
                    time,
                    duration: time - start,
                })
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.started_at = None;
        self.count = 0;
    }
}
