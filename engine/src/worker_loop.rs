//! Cooperative poll loop shared by reader and writer workers.
//!
//! Exactly one `Tick` implementation runs per iteration, with no
//! preemption — a long tick starves the rest of that loop. It is
//! expressed as a plain `loop { tick(); sleep(poll_interval) }`,
//! polling instead of blocking on a syscall-level readiness
//! multiplexer.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One iteration's worth of work for a worker loop. `tick` should be
/// non-blocking and return quickly; `cron` fires at most once per
/// `cron_interval` regardless of how often `tick` runs.
pub trait Tick {
    fn tick(&mut self);
    fn cron(&mut self);
}

pub struct WorkerLoop {
    poll_interval: Duration,
    cron_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl WorkerLoop {
    pub fn new(poll_interval: Duration, cron_interval: Duration, shutdown: Arc<AtomicBool>) -> Self {
        WorkerLoop {
            poll_interval,
            cron_interval,
            shutdown,
        }
    }

    /// Runs `body` until the shared shutdown flag is observed — a
    /// single cancellation boolean observed by all loops at their cron
    /// tick.
    pub fn run(&self, mut body: impl Tick) {
        let mut last_cron = Instant::now();
        while !self.shutdown.load(Ordering::Relaxed) {
            body.tick();
            if last_cron.elapsed() >= self.cron_interval {
                body.cron();
                last_cron = Instant::now();
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Counter {
        ticks: Arc<Mutex<usize>>,
        crons: Arc<Mutex<usize>>,
        shutdown: Arc<AtomicBool>,
        stop_after: usize,
    }

    impl Tick for Counter {
        fn tick(&mut self) {
            let mut ticks = self.ticks.lock().unwrap();
            *ticks += 1;
            if *ticks >= self.stop_after {
                self.shutdown.store(true, Ordering::Relaxed);
            }
        }

        fn cron(&mut self) {
            *self.crons.lock().unwrap() += 1;
        }
    }

    #[test]
    fn run_stops_once_shutdown_flag_is_set() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(Mutex::new(0));
        let crons = Arc::new(Mutex::new(0));
        let loop_ = WorkerLoop::new(
            Duration::from_millis(1),
            Duration::from_millis(0),
            shutdown.clone(),
        );
        loop_.run(Counter {
            ticks: ticks.clone(),
            crons: crons.clone(),
            shutdown: shutdown.clone(),
            stop_after: 5,
        });
        assert_eq!(*ticks.lock().unwrap(), 5);
        assert!(*crons.lock().unwrap() >= 1);
    }
}
