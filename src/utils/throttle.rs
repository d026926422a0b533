//! Log throttling for per-frame warnings
//!
//! A pump that hits the same read or encode failure on every cycle would log
//! it dozens of times per second. The throttler lets one message per key
//! through per interval and counts what it swallowed in between.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct KeyState {
    last_logged: Instant,
    suppressed: u64,
}

/// Limits how often the same message is logged
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Admit a message for `key`.
    ///
    /// Returns the number of messages suppressed since the last admitted one,
    /// or `None` if this one should be dropped.
    pub fn admit(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = std::mem::take(&mut state.suppressed);
                state.last_logged = now;
                Some(suppressed)
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`, tagging the event with the suppressed count
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.admit($key) {
            tracing::warn!(suppressed = suppressed, $($arg)*);
        }
    };
}
