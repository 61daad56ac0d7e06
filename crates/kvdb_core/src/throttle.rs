//! Put rate limiting.
//!
//! Non-priority puts are admitted at most `rate` times per one-second
//! window; a put over budget sleeps until the next window opens. Priority
//! puts never wait and are not counted.

use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) struct Throttle {
    rate: Option<u64>,
    window: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    start: Instant,
    admitted: u64,
}

impl Throttle {
    /// `None` disables throttling.
    pub(crate) fn new(rate: Option<u64>) -> Self {
        Self {
            rate,
            window: Mutex::new(Window {
                start: Instant::now(),
                admitted: 0,
            }),
        }
    }

    /// Blocks until one more put fits the budget. Returns the time waited.
    pub(crate) fn admit(&self, priority: bool) -> Duration {
        let Some(rate) = self.rate else {
            return Duration::ZERO;
        };
        if priority {
            return Duration::ZERO;
        }

        let mut waited = Duration::ZERO;
        loop {
            let pause = {
                let mut window = self.window.lock();
                let elapsed = window.start.elapsed();
                if elapsed >= WINDOW {
                    window.start = Instant::now();
                    window.admitted = 0;
                }
                if window.admitted < rate {
                    window.admitted += 1;
                    return waited;
                }
                WINDOW.saturating_sub(window.start.elapsed())
            };
            tracing::trace!(?pause, "put throttled");
            thread::sleep(pause);
            waited += pause;
        }
    }
}
