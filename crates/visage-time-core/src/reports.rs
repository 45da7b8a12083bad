//! Daily attendance report and per-department summary.
//!
//! Attendance records are matched to registered employees by display name;
//! there is no stronger link between the two collections.

use crate::datetime;
use crate::types::{AttendanceRecord, EmployeeRegistration};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Present,
    Late,
    Absent,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Present => "Present",
            Status::Late => "Late",
            Status::Absent => "Absent",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub name: String,
    pub employee_id: String,
    pub department: String,
    pub date: String,
    pub status: Status,
    pub time_in: String,
    pub time_out: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentSummary {
    pub department: String,
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub percentage: u32,
}

/// Search box plus the department and status selectors. `"all"` disables
/// a selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportFilter {
    pub search: String,
    pub department: String,
    pub status: String,
}

impl Default for ReportFilter {
    fn default() -> Self {
        Self {
            search: String::new(),
            department: "all".to_string(),
            status: "all".to_string(),
        }
    }
}

impl ReportFilter {
    pub fn matches(&self, row: &ReportRow) -> bool {
        let query = self.search.to_lowercase();
        let matches_search = row.name.to_lowercase().contains(&query)
            || row.employee_id.to_lowercase().contains(&query);

        let matches_department = self.department == "all" || row.department == self.department;

        let matches_status =
            self.status == "all" || row.status.to_string().eq_ignore_ascii_case(&self.status);

        matches_search && matches_department && matches_status
    }

    /// The department tab shares the search box, matched against the
    /// department name.
    pub fn matches_summary(&self, summary: &DepartmentSummary) -> bool {
        summary
            .department
            .to_lowercase()
            .contains(&self.search.to_lowercase())
    }
}

/// Build one row per registered employee for `date`.
///
/// The first check-in of the day decides Present vs Late against
/// `late_after`. With more than one check-in, the last one is the time out.
pub fn daily_report(
    employees: &[EmployeeRegistration],
    records: &[AttendanceRecord],
    date: NaiveDate,
    late_after: NaiveTime,
) -> Vec<ReportRow> {
    let date_str = datetime::format_date(&date);

    let mut by_name: BTreeMap<&str, Vec<NaiveTime>> = BTreeMap::new();
    for rec in records {
        if datetime::parse_date(&rec.date) != Some(date) {
            continue;
        }
        let Some(t) = datetime::parse_time(&rec.time) else {
            tracing::debug!(time = %rec.time, "unparseable attendance time");
            continue;
        };
        by_name.entry(rec.name.as_str()).or_default().push(t);
    }

    employees
        .iter()
        .map(|emp| {
            let mut times = by_name.get(emp.name.as_str()).cloned().unwrap_or_default();
            times.sort();

            let (status, time_in, time_out) = match (times.first(), times.last()) {
                (Some(first), Some(last)) => {
                    let status = if *first > late_after {
                        Status::Late
                    } else {
                        Status::Present
                    };
                    let time_out = if times.len() > 1 {
                        last.format("%I:%M %p").to_string()
                    } else {
                        "-".to_string()
                    };
                    (status, first.format("%I:%M %p").to_string(), time_out)
                }
                _ => (Status::Absent, "-".to_string(), "-".to_string()),
            };

            ReportRow {
                name: emp.name.clone(),
                employee_id: emp.employee_id.clone(),
                department: emp.department.clone(),
                date: date_str.clone(),
                status,
                time_in,
                time_out,
            }
        })
        .collect()
}

/// Per-department totals, sorted by department name. Late counts as present.
pub fn department_summary(rows: &[ReportRow]) -> Vec<DepartmentSummary> {
    let mut depts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for row in rows {
        let entry = depts.entry(row.department.as_str()).or_default();
        entry.0 += 1;
        if row.status != Status::Absent {
            entry.1 += 1;
        }
    }

    depts
        .into_iter()
        .map(|(department, (total, present))| DepartmentSummary {
            department: department.to_string(),
            total,
            present,
            absent: total - present,
            percentage: percentage(present, total),
        })
        .collect()
}

/// Rounded percentage, 0 when `total` is 0.
pub fn percentage(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emp(name: &str, id: &str, dept: &str) -> EmployeeRegistration {
        EmployeeRegistration {
            name: name.into(),
            employee_id: id.into(),
            department: dept.into(),
            face_image: String::new(),
        }
    }

    fn rec(name: &str, time: &str, date: &str) -> AttendanceRecord {
        AttendanceRecord {
            name: name.into(),
            time: time.into(),
            date: date.into(),
            user_id: "u".into(),
            timestamp: 0,
        }
    }

    fn fixture() -> Vec<ReportRow> {
        let employees = vec![
            emp("John Smith", "EMP001", "Engineering"),
            emp("Maria Garcia", "EMP002", "Marketing"),
            emp("Carlos Rodriguez", "EMP005", "Sales"),
            emp("Michael Johnson", "EMP007", "Finance"),
        ];
        let records = vec![
            rec("John Smith", "08:32 AM", "06/12/2023"),
            rec("John Smith", "05:45 PM", "06/12/2023"),
            rec("Maria Garcia", "08:45 AM", "06/12/2023"),
            rec("Michael Johnson", "10:15 AM", "06/12/2023"),
            rec("Carlos Rodriguez", "08:00 AM", "06/11/2023"),
        ];
        daily_report(
            &employees,
            &records,
            NaiveDate::from_ymd_opt(2023, 6, 12).unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        )
    }

    #[test]
    fn test_daily_report_statuses() {
        let rows = fixture();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].status, Status::Present);
        assert_eq!(rows[0].time_in, "08:32 AM");
        assert_eq!(rows[0].time_out, "05:45 PM");
        assert_eq!(rows[1].time_out, "-");
        assert_eq!(rows[2].status, Status::Absent);
        assert_eq!(rows[2].time_in, "-");
        assert_eq!(rows[3].status, Status::Late);
        assert!(rows.iter().all(|r| r.date == "06/12/2023"));
    }

    #[test]
    fn test_filter_search_is_case_insensitive() {
        let rows = fixture();
        let filter = ReportFilter { search: "emp00".into(), ..Default::default() };
        assert_eq!(rows.iter().filter(|r| filter.matches(r)).count(), 4);

        let filter = ReportFilter { search: "garcia".into(), ..Default::default() };
        let hits: Vec<_> = rows.iter().filter(|r| filter.matches(r)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].employee_id, "EMP002");
    }

    #[test]
    fn test_filter_department_and_status() {
        let rows = fixture();
        let filter = ReportFilter {
            department: "Finance".into(),
            status: "late".into(),
            ..Default::default()
        };
        let hits: Vec<_> = rows.iter().filter(|r| filter.matches(r)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Michael Johnson");

        let filter = ReportFilter { status: "absent".into(), ..Default::default() };
        assert_eq!(rows.iter().filter(|r| filter.matches(r)).count(), 1);
    }

    #[test]
    fn test_department_summary() {
        let summary = department_summary(&fixture());
        let sales = summary.iter().find(|d| d.department == "Sales").unwrap();
        assert_eq!((sales.total, sales.present, sales.absent, sales.percentage), (1, 0, 1, 0));
        let finance = summary.iter().find(|d| d.department == "Finance").unwrap();
        assert_eq!(finance.percentage, 100);
        assert_eq!(summary[0].department, "Engineering");
    }

    #[test]
    fn test_department_search() {
        let summary = department_summary(&fixture());
        let filter = ReportFilter { search: "ENG".into(), ..Default::default() };
        let hits: Vec<_> = summary.iter().filter(|d| filter.matches_summary(d)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].department, "Engineering");
        assert!(summary.iter().all(|d| ReportFilter::default().matches_summary(d)));
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(7, 8), 88);
        assert_eq!(percentage(14, 15), 93);
    }
}
