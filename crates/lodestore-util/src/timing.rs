//! Timing of storage round trips.
//!
//! ```rust,ignore
//! let _timing = TimingGuard::flush("prefs");
//! server.update_items("prefs", batch).await?;
//! // logged here, when `_timing` goes out of scope
//! ```

use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Level};

const NOTICE_AFTER: Duration = Duration::from_millis(100);
const SLOW_AFTER: Duration = Duration::from_secs(2);

/// Logs how long a load or flush took when dropped.
///
/// Round trips under 100ms go to debug, up to 2s to info, anything slower
/// to warn.
pub struct TimingGuard {
    operation: &'static str,
    namespace: String,
    started: Instant,
    notice_after: Duration,
    slow_after: Duration,
}

impl TimingGuard {
    pub fn new(operation: &'static str, namespace: impl Into<String>) -> Self {
        Self {
            operation,
            namespace: namespace.into(),
            started: Instant::now(),
            notice_after: NOTICE_AFTER,
            slow_after: SLOW_AFTER,
        }
    }

    pub fn flush(namespace: impl Into<String>) -> Self {
        Self::new("flush", namespace)
    }

    pub fn load(namespace: impl Into<String>) -> Self {
        Self::new("load", namespace)
    }

    /// Override when a round trip is reported at info and at warn.
    pub fn with_thresholds(mut self, notice_after: Duration, slow_after: Duration) -> Self {
        self.notice_after = notice_after;
        self.slow_after = slow_after;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Level the round trip would be logged at if it ended now.
    pub fn level(&self) -> Level {
        let elapsed = self.elapsed();
        if elapsed >= self.slow_after {
            Level::WARN
        } else if elapsed >= self.notice_after {
            Level::INFO
        } else {
            Level::DEBUG
        }
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let duration_ms = self.elapsed().as_millis() as u64;
        let (operation, namespace) = (self.operation, self.namespace.as_str());

        let level = self.level();
        if level == Level::WARN {
            warn!(operation, namespace, duration_ms, "Slow storage round trip");
        } else if level == Level::INFO {
            info!(operation, namespace, duration_ms, "Storage round trip");
        } else {
            debug!(operation, namespace, duration_ms, "Storage round trip");
        }
    }
}
