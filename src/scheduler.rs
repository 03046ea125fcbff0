use serde::{Deserialize, Serialize};

pub const FAST_PERIOD_MS: u32 = 10;
pub const MEDIUM_PERIOD_MS: u32 = 100;
pub const SLOW_PERIOD_MS: u32 = 1000;

/// Which cadences fired on one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueTasks {
    pub fast: bool,
    pub medium: bool,
    pub slow: bool,
}

impl DueTasks {
    pub fn any(&self) -> bool {
        self.fast || self.medium || self.slow
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub fast_ticks: u32,
    pub medium_ticks: u32,
    pub slow_ticks: u32,
}

/// Last-fired timestamps for the 10, 100 and 1000 ms cadences.
///
/// Elapsed time is computed with wrapping subtraction, so a rollover of the
/// millisecond counter costs at most one late tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScheduleClock {
    last_fast_ms: u32,
    last_medium_ms: u32,
    last_slow_ms: u32,
    stats: ScheduleStats,
}

impl ScheduleClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts every cadence counting from `now`.
    pub fn starting_at(now: u32) -> Self {
        Self {
            last_fast_ms: now,
            last_medium_ms: now,
            last_slow_ms: now,
            stats: ScheduleStats::default(),
        }
    }

    fn fire(last: &mut u32, period: u32, now: u32) -> bool {
        if now.wrapping_sub(*last) >= period {
            *last = now;
            true
        } else {
            false
        }
    }

    /// Marks and returns the cadences due at `now`.
    pub fn poll(&mut self, now: u32) -> DueTasks {
        let due = DueTasks {
            fast: Self::fire(&mut self.last_fast_ms, FAST_PERIOD_MS, now),
            medium: Self::fire(&mut self.last_medium_ms, MEDIUM_PERIOD_MS, now),
            slow: Self::fire(&mut self.last_slow_ms, SLOW_PERIOD_MS, now),
        };

        if due.fast {
            self.stats.fast_ticks = self.stats.fast_ticks.wrapping_add(1);
        }
        if due.medium {
            self.stats.medium_ticks = self.stats.medium_ticks.wrapping_add(1);
        }
        if due.slow {
            self.stats.slow_ticks = self.stats.slow_ticks.wrapping_add(1);
        }
        due
    }

    pub fn stats(&self) -> &ScheduleStats {
        &self.stats
    }
}
