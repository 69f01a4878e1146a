//! Time source that can be pinned for replay.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{EngineError, Result};

pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct ClockState {
    current: DateTime<Utc>,
    tick: chrono::Duration,
}

/// Deterministic clock: each `now()` returns the current value, then
/// advances it by a fixed tick.
pub struct ReplayClock {
    state: Mutex<ClockState>,
}

impl ReplayClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ClockState {
                current: base,
                tick: to_chrono(DEFAULT_TICK),
            }),
        }
    }

    /// Clock starting at an RFC 3339 timestamp, as written by `--server-time`.
    pub fn from_rfc3339(raw: &str) -> Result<Self> {
        let base = DateTime::parse_from_rfc3339(raw.trim())
            .map_err(|e| EngineError::Config(format!("invalid server time {raw:?}: {e}")))?;
        Ok(Self::new(base.with_timezone(&Utc)))
    }

    pub fn set_time(&self, base: DateTime<Utc>) {
        self.state.lock().current = base;
    }

    pub fn set_tick(&self, tick: Duration) {
        self.state.lock().tick = to_chrono(tick);
    }

    /// Current value without advancing.
    pub fn peek(&self) -> DateTime<Utc> {
        self.state.lock().current
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> DateTime<Utc> {
        let mut state = self.state.lock();
        let now = state.current;
        state.current = now + state.tick;
        now
    }
}

impl std::fmt::Debug for ReplayClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayClock").field("current", &self.peek()).finish()
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}
