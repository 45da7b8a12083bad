//! Headline numbers for the dashboard.

use crate::datetime;
use crate::reports::percentage;
use crate::types::{AttendanceRecord, EmployeeRegistration};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub present: usize,
    pub absent: usize,
    pub total: usize,
    pub percentage: u32,
    /// Percentage-point change against the same day one week earlier.
    pub trend: i32,
}

/// Distinct attendee names with a check-in on `date`.
fn present_on(records: &[AttendanceRecord], date: NaiveDate) -> usize {
    records
        .iter()
        .filter(|r| datetime::parse_date(&r.date) == Some(date))
        .map(|r| r.name.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

pub fn compute_stats(
    employees: &[EmployeeRegistration],
    records: &[AttendanceRecord],
    today: NaiveDate,
) -> DashboardStats {
    let total = employees.len();
    let present = present_on(records, today);
    let pct = percentage(present, total);

    let last_week = percentage(present_on(records, today - Duration::days(7)), total);

    DashboardStats {
        present,
        absent: total.saturating_sub(present),
        total,
        percentage: pct,
        trend: pct as i32 - last_week as i32,
    }
}
