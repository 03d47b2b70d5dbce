//! Renewal Driver: periodic renew-if-needed checks.
//!
//! A failed tick is logged and retried on the next one; the lifecycle
//! itself never retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::DevcertError;
use crate::lifecycle::{CertLifecycle, RenewalOutcome};

/// Default period between checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Granularity at which a sleeping driver notices shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

pub struct RenewalDriver<'a> {
    lifecycle: &'a CertLifecycle,
    interval: Duration,
}

impl<'a> RenewalDriver<'a> {
    pub fn new(lifecycle: &'a CertLifecycle, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
        }
    }

    /// One renew-if-needed check.
    pub fn tick(&self) -> Result<RenewalOutcome, DevcertError> {
        let outcome = self.lifecycle.renew_if_needed()?;
        match &outcome {
            RenewalOutcome::Renewed(path) => {
                tracing::info!(path = %path.display(), "Certificate renewed")
            }
            RenewalOutcome::NotDue { remaining_secs } => {
                tracing::debug!(?remaining_secs, "Certificate not due for renewal")
            }
        }
        Ok(outcome)
    }

    /// Tick every interval until `shutdown` is set. Returns the number of
    /// ticks that ran.
    pub fn run(&self, shutdown: &AtomicBool) -> usize {
        tracing::info!(interval_secs = self.interval.as_secs(), "Renewal loop started");
        let mut ticks = 0;
        loop {
            ticks += 1;
            if let Err(e) = self.tick() {
                tracing::warn!(error = %e, "Renewal check failed, retrying next interval");
            }
            if self.sleep_or_shutdown(shutdown) {
                break;
            }
        }
        tracing::info!(ticks, "Renewal loop stopped");
        ticks
    }

    /// Sleep for the interval. Returns `true` if shutdown was requested.
    fn sleep_or_shutdown(&self, shutdown: &AtomicBool) -> bool {
        let deadline = Instant::now() + self.interval;
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SHUTDOWN_POLL.min(deadline - now));
        }
    }
}
