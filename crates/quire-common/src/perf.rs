//! Lightweight timing instrumentation.

use web_time::Instant;

/// Measure the execution time of a closure and log it at debug level.
pub fn measure<T, F: FnOnce() -> T>(label: &'static str, f: F) -> T {
    let stopwatch = Stopwatch::start(label);
    let result = f();
    stopwatch.finish();
    result
}

/// Logs elapsed time when finished or dropped, whichever comes first.
pub struct Stopwatch {
    label: &'static str,
    started: Instant,
    reported: bool,
}

impl Stopwatch {
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            started: Instant::now(),
            reported: false,
        }
    }

    /// Milliseconds since `start`.
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Log and consume. Returns the elapsed milliseconds.
    pub fn finish(mut self) -> f64 {
        self.report()
    }

    fn report(&mut self) -> f64 {
        let elapsed_ms = self.elapsed_ms();
        if !self.reported {
            self.reported = true;
            tracing::debug!(elapsed_ms, "{}", self.label);
        }
        elapsed_ms
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        self.report();
    }
}
