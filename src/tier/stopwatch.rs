use std::time::{Duration, Instant};

use crate::channel::UtilizationLog;

/// Splits wall time into computing and waiting spans.
#[derive(Debug)]
pub struct Stopwatch {
    run: Duration,
    wait: Duration,
    mark: Instant,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            run: Duration::ZERO,
            wait: Duration::ZERO,
            mark: Instant::now(),
        }
    }

    /// Books the time since the last mark as waiting.
    pub fn waited(&mut self) {
        let lap = self.lap();
        self.wait += lap;
    }

    /// Books the time since the last mark as computing.
    pub fn ran(&mut self) {
        let lap = self.lap();
        self.run += lap;
    }

    /// Takes the accumulated spans, starting over from zero.
    pub fn sample(&mut self) -> UtilizationLog {
        let log = UtilizationLog {
            run: self.run.as_secs_f64(),
            wait: self.wait.as_secs_f64(),
        };

        self.run = Duration::ZERO;
        self.wait = Duration::ZERO;
        log
    }

    fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let lap = now - self.mark;
        self.mark = now;
        lap
    }
}
