use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use devkube_core::{Check, Error, Result};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::{real_clock_if_unset, Clock, Ticker};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn env_duration(key: &str, unit: fn(u64) -> Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(unit)
        .unwrap_or(Duration::ZERO)
}

/// Runs a [`Check`] on a fixed interval until it reports ready.
///
/// A zero `interval` means [`DEFAULT_POLL_INTERVAL`]; a zero `max_wait`
/// means no deadline of its own, the caller's token is the only way out.
#[derive(Clone, Default)]
pub struct Poller {
    pub clock: Option<Arc<dyn Clock>>,
    pub max_wait: Duration,
    pub interval: Duration,
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("custom_clock", &self.clock.is_some())
            .field("max_wait", &self.max_wait)
            .field("interval", &self.interval)
            .finish()
    }
}

struct StopOnDrop(Box<dyn Ticker>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `DEVKUBE_POLL_INTERVAL_MS` and `DEVKUBE_MAX_WAIT_SECS`.
    pub fn from_env() -> Self {
        Self {
            clock: None,
            interval: env_duration("DEVKUBE_POLL_INTERVAL_MS", Duration::from_millis),
            max_wait: env_duration("DEVKUBE_MAX_WAIT_SECS", Duration::from_secs),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn resolved_interval(&self) -> Duration {
        if self.interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            self.interval
        }
    }

    pub async fn wait<C>(&self, cancel: &CancellationToken, check: &C) -> Result<()>
    where
        C: Check + ?Sized,
    {
        let clock = real_clock_if_unset(self.clock.clone());
        let interval = self.resolved_interval();
        let started = Instant::now();

        // Handed to the check; cancelled when this wait returns for any reason.
        let session = cancel.child_token();
        let _session_guard = session.clone().drop_guard();

        // A max wait too large to represent as an instant never expires.
        let deadline = if self.max_wait.is_zero() { None } else { started.checked_add(self.max_wait) };
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        let mut ticker = StopOnDrop(clock.new_ticker(interval));
        counter!("poll_waits_total", 1u64);
        info!(interval = ?interval, max_wait = ?self.max_wait, "waiting");

        let res = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(Error::Cancelled),
                _ = &mut expired => break Err(Error::DeadlineExceeded(self.max_wait)),
                _ = ticker.0.tick() => {}
            }

            counter!("poll_checks_total", 1u64);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                _ = &mut expired => Err(Error::DeadlineExceeded(self.max_wait)),
                res = check.check(&session) => res,
            };
            match outcome {
                Ok(true) => break Ok(()),
                Ok(false) => debug!(elapsed = ?started.elapsed(), "not ready yet"),
                Err(e) => break Err(e),
            }
        };

        if matches!(res, Err(Error::DeadlineExceeded(_))) {
            counter!("poll_timeouts_total", 1u64);
        }
        histogram!("poll_wait_ms", started.elapsed().as_secs_f64() * 1000.0);
        res
    }
}
