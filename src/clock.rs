// Wall-clock access for latency and backoff bookkeeping.

use std::cell::Cell;
use std::rc::Rc;

/// Source of wall-clock milliseconds.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// `Date.now()` in the browser, `SystemTime` natively.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[cfg(target_arch = "wasm32")]
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn now_ms(&self) -> f64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

/// Hand-driven clock; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<f64>>);

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        ManualClock(Rc::new(Cell::new(start_ms)))
    }

    pub fn set(&self, ms: f64) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: f64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.0.get()
    }
}
