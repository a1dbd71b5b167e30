// Smoothed metadata arrival rate.
// rate = alpha * instantaneous + (1 - alpha) * rate, seeded by the first interval.

/// Exponential moving average of frames per second, fed with wall-clock arrival times.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    alpha: f64,
    rate: Option<f64>,
    last_arrival_ms: Option<f64>,
    // Frames that arrived at the same instant as the previous sample.
    coalesced: u32,
}

impl RateEstimator {
    pub fn new(alpha: f64) -> Self {
        RateEstimator {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            rate: None,
            last_arrival_ms: None,
            coalesced: 0,
        }
    }

    /// Record one frame arriving at `now_ms`.
    pub fn record(&mut self, now_ms: f64) {
        let Some(last) = self.last_arrival_ms else {
            self.last_arrival_ms = Some(now_ms);
            return;
        };

        let dt = now_ms - last;
        if dt <= 0.0 {
            self.coalesced += 1;
            return;
        }

        let frames = f64::from(self.coalesced + 1);
        let instantaneous = frames * 1000.0 / dt;
        self.rate = Some(match self.rate {
            Some(rate) => self.alpha * instantaneous + (1.0 - self.alpha) * rate,
            None => instantaneous,
        });
        self.last_arrival_ms = Some(now_ms);
        self.coalesced = 0;
    }

    /// Frames per second, 0 until two arrivals have been seen.
    pub fn rate(&self) -> f64 {
        self.rate.unwrap_or(0.0)
    }

    pub fn last_arrival_ms(&self) -> Option<f64> {
        self.last_arrival_ms
    }

    pub fn reset(&mut self) {
        self.rate = None;
        self.last_arrival_ms = None;
        self.coalesced = 0;
    }
}
