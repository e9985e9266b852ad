use crate::core::context::week_start;
use crate::core::member::MemberId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cycles already paid to one member in the current day and week.
///
/// One row per member; the ledger rolls the counters forward when the stored
/// date (or week) is older than the date being asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CappingRecord {
    pub member_id: MemberId,
    pub date: NaiveDate,
    pub week_start: NaiveDate,
    pub cycles_paid_today: u32,
    pub cycles_paid_this_week: u32,
    pub last_reset_date: NaiveDate,
}

/// Which cap window bounded a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapWindow {
    Daily,
    Weekly,
}

impl fmt::Display for CapWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapWindow::Daily => f.write_str("daily"),
            CapWindow::Weekly => f.write_str("weekly"),
        }
    }
}

/// Outcome of applying the caps to a number of available cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapDecision {
    pub granted: u32,
    /// Set when a cap cut the grant below what was available.
    pub limited_by: Option<CapWindow>,
}

impl CappingRecord {
    pub fn new(member_id: MemberId, date: NaiveDate) -> Self {
        Self {
            member_id,
            date,
            week_start: week_start(date),
            cycles_paid_today: 0,
            cycles_paid_this_week: 0,
            last_reset_date: date,
        }
    }

    /// Move the record to `date`, zeroing counters for elapsed windows.
    /// Returns true when anything changed.
    pub fn roll_to(&mut self, date: NaiveDate) -> bool {
        let mut changed = false;
        if self.date < date {
            self.date = date;
            self.cycles_paid_today = 0;
            self.last_reset_date = date;
            changed = true;
        }
        let week = week_start(date);
        if self.week_start < week {
            self.week_start = week;
            self.cycles_paid_this_week = 0;
            changed = true;
        }
        changed
    }

    pub fn add_cycles(&mut self, n: u32) {
        self.cycles_paid_today = self.cycles_paid_today.saturating_add(n);
        self.cycles_paid_this_week = self.cycles_paid_this_week.saturating_add(n);
    }

    /// Cycles still grantable out of `available` under the given limits
    /// (0 = unlimited).
    pub fn grantable(&self, available: u32, daily_limit: u32, weekly_limit: u32) -> CapDecision {
        let mut granted = available;
        let mut limited_by = None;

        if daily_limit > 0 {
            let remaining = daily_limit.saturating_sub(self.cycles_paid_today);
            if remaining < granted {
                granted = remaining;
                limited_by = Some(CapWindow::Daily);
            }
        }
        if weekly_limit > 0 {
            let remaining = weekly_limit.saturating_sub(self.cycles_paid_this_week);
            if remaining < granted {
                granted = remaining;
                limited_by = Some(CapWindow::Weekly);
            }
        }

        CapDecision {
            granted,
            limited_by,
        }
    }
}
