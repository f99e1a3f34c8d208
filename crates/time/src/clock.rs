//! Tick sources for the poller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[async_trait]
pub trait Ticker: Send {
    /// Resolves on the next tick. Never resolves once stopped.
    async fn tick(&mut self);
    fn stop(&mut self);
}

pub trait Clock: Send + Sync {
    fn new_ticker(&self, period: Duration) -> Box<dyn Ticker>;
}

/// Wall-clock ticker backed by tokio timers. The first tick fires one full
/// period after creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn new_ticker(&self, period: Duration) -> Box<dyn Ticker> {
        // No representable first tick means the ticker never fires.
        let interval = Instant::now().checked_add(period).map(|start| {
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Box::new(RealTicker { interval })
    }
}

struct RealTicker {
    interval: Option<Interval>,
}

#[async_trait]
impl Ticker for RealTicker {
    async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    fn stop(&mut self) {
        self.interval = None;
    }
}

pub fn real_clock_if_unset(clock: Option<Arc<dyn Clock>>) -> Arc<dyn Clock> {
    clock.unwrap_or_else(|| Arc::new(RealClock))
}

#[derive(Debug, Default)]
struct ManualState {
    requested: Vec<Duration>,
    stops: usize,
}

/// Clock whose tickers only fire when the test says so. Ticks are shared by
/// every ticker created from the same clock.
#[derive(Clone)]
pub struct ManualClock {
    ticks: Arc<Semaphore>,
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self { ticks: Arc::new(Semaphore::new(0)), state: Arc::new(Mutex::new(ManualState::default())) }
    }

    /// A clock whose tickers fire immediately, forever.
    pub fn free_running() -> Self {
        let clock = Self::new();
        clock.ticks.add_permits(Semaphore::MAX_PERMITS);
        clock
    }

    /// Queue `n` ticks.
    pub fn advance(&self, n: usize) {
        self.ticks.add_permits(n);
    }

    /// Periods passed to `new_ticker`, in call order.
    pub fn requested_periods(&self) -> Vec<Duration> {
        self.lock().requested.clone()
    }

    pub fn stop_count(&self) -> usize {
        self.lock().stops
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn new_ticker(&self, period: Duration) -> Box<dyn Ticker> {
        self.lock().requested.push(period);
        Box::new(ManualTicker { clock: self.clone(), stopped: false })
    }
}

struct ManualTicker {
    clock: ManualClock,
    stopped: bool,
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.stopped {
            return std::future::pending::<()>().await;
        }
        match self.clock.ticks.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => std::future::pending::<()>().await,
        }
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.clock.lock().stops += 1;
        }
    }
}
