use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Something which can be told that documents were written.
pub trait Progress: Send + Sync {
    fn inc(&self, amount: u64);
}

/// Thread safe document counter, with the expected total.
#[derive(Debug, Default)]
pub struct Counter {
    current: AtomicU64,
    max: u64,
}

impl Counter {
    pub fn new(max: u64) -> Self {
        Counter {
            current: AtomicU64::new(0),
            max,
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

impl Progress for Counter {
    fn inc(&self, amount: u64) {
        self.current.fetch_add(amount, Ordering::Relaxed);
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.current())
    }
}
