//! Rolling-minute limiter for job starts.
//!
//! Throttles load placed on the NLP service independently of the worker
//! pool bound. Shared behind an `Arc` so the limit holds across every
//! concurrent execution in the process.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub struct JobStartLimiter {
    max_per_minute: usize,
    window: Duration,
    starts: Mutex<VecDeque<DateTime<Utc>>>,
}

impl JobStartLimiter {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            window: Duration::seconds(60),
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// How many job starts the rolling window currently allows.
    pub fn available(&self) -> usize {
        let mut starts = self.starts.lock().expect("limiter lock poisoned");
        Self::evict(&mut starts, Utc::now() - self.window);
        self.max_per_minute.saturating_sub(starts.len())
    }

    /// Record one job start. Callers must have checked `available` first;
    /// recording past the limit only tightens the window further.
    pub fn record_start(&self) {
        let mut starts = self.starts.lock().expect("limiter lock poisoned");
        Self::evict(&mut starts, Utc::now() - self.window);
        starts.push_back(Utc::now());
    }

    fn evict(starts: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
        while starts.front().is_some_and(|t| *t < cutoff) {
            starts.pop_front();
        }
    }
}
