//! Wall-clock trigger loop.
//!
//! Cycles fire at fixed local times in a named timezone. Instead of polling,
//! the loop computes the next trigger instant, sleeps towards it in bounded
//! slices and re-reads the clock on every wake, so clock adjustments are picked
//! up within one slice.

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::{debug, info};
use std::thread;
use std::time::Duration as StdDuration;

/// Longest single sleep before the clock is checked again.
pub const MAX_SLEEP_SLICE: StdDuration = StdDuration::from_secs(300);

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: StdDuration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: StdDuration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    tz: Tz,
    triggers: Vec<NaiveTime>,
}

impl Schedule {
    pub fn new(tz: Tz, mut triggers: Vec<NaiveTime>) -> Result<Self, String> {
        if triggers.is_empty() {
            return Err("at least one trigger time is required".to_string());
        }
        triggers.sort_unstable();
        triggers.dedup();
        Ok(Schedule { tz, triggers })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn triggers(&self) -> &[NaiveTime] {
        &self.triggers
    }

    /// First trigger instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = after.with_timezone(&self.tz).date_naive();
        // a trigger falling into a DST gap is skipped; scanning a few days always finds one
        for offset in 0..=7u64 {
            let Some(date) = local_date.checked_add_days(Days::new(offset)) else {
                break;
            };
            for t in &self.triggers {
                if let Some(local) = self.tz.from_local_datetime(&date.and_time(*t)).earliest() {
                    let instant = local.with_timezone(&Utc);
                    if instant > after {
                        return instant;
                    }
                }
            }
        }
        after + chrono::Duration::days(1)
    }

    /// Block until the first trigger after `after` is reached and return it.
    pub fn wait_for_next<C: Clock + ?Sized>(&self, clock: &C, after: DateTime<Utc>) -> DateTime<Utc> {
        let target = self.next_after(after);
        info!(
            "Scheduler: next cycle at {} ({})",
            target.with_timezone(&self.tz).format("%Y-%m-%d %H:%M:%S %Z"),
            target
        );
        loop {
            let now = clock.now();
            if now >= target {
                return target;
            }
            let remaining = (target - now).to_std().unwrap_or(StdDuration::ZERO);
            let slice = remaining.min(MAX_SLEEP_SLICE);
            debug!("Scheduler: {}s until trigger, sleeping {}s", remaining.as_secs(), slice.as_secs());
            clock.sleep(slice);
        }
    }

    /// Run `on_trigger` at every trigger, forever. The next trigger is computed
    /// from the clock after each run, so a trigger fires at most once and
    /// triggers missed while a run was in progress collapse into none.
    pub fn run_forever<C, F>(&self, clock: &C, mut on_trigger: F) -> !
    where
        C: Clock + ?Sized,
        F: FnMut(DateTime<Utc>),
    {
        loop {
            let fired = self.wait_for_next(clock, clock.now());
            on_trigger(fired);
        }
    }
}

/// Parse a comma-separated list of `HH:MM` or `HH:MM:SS` local times.
pub fn parse_trigger_times(list: &str) -> Result<Vec<NaiveTime>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
                .map_err(|_| format!("invalid trigger time '{}' (expected HH:MM)", s))
        })
        .collect()
}
