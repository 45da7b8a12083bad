use super::ViewContext;
use crate::records::{all_attendance, list_employees};
use crate::store::StoreError;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use visage_time_core::reports::{
    daily_report, department_summary, DepartmentSummary, ReportFilter, ReportRow, Status,
};

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub date: NaiveDate,
    /// Daily rows after filtering.
    pub rows: Vec<ReportRow>,
    /// Computed over every registered employee; only the search box narrows
    /// which departments are listed.
    pub departments: Vec<DepartmentSummary>,
    /// Department names available to the department selector.
    pub department_options: Vec<String>,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
}

pub struct ReportsView {
    ctx: ViewContext,
}

impl ReportsView {
    pub fn enter(ctx: ViewContext) -> Self {
        Self { ctx }
    }

    pub async fn report(
        &self,
        date: Option<NaiveDate>,
        filter: &ReportFilter,
    ) -> Result<ReportSummary, StoreError> {
        let loaded = async {
            let employees = list_employees(self.ctx.store.as_ref()).await?;
            let records = all_attendance(self.ctx.store.as_ref()).await?;
            Ok::<_, StoreError>((employees, records))
        }
        .await;

        let (employees, records) = match loaded {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "failed to load report data");
                self.ctx.notifier.error("Error", "Failed to load attendance reports");
                return Err(e);
            }
        };

        let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
        let all_rows = daily_report(&employees, &records, date, self.ctx.config.late_after);
        let departments = department_summary(&all_rows)
            .into_iter()
            .filter(|d| filter.matches_summary(d))
            .collect();
        let department_options = all_rows
            .iter()
            .map(|r| r.department.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let count = |status: Status| all_rows.iter().filter(|r| r.status == status).count();
        let (present, late, absent) = (
            count(Status::Present),
            count(Status::Late),
            count(Status::Absent),
        );

        let rows = all_rows.iter().filter(|r| filter.matches(r)).cloned().collect();
        tracing::debug!(%date, rows = all_rows.len(), "report built");

        Ok(ReportSummary {
            date,
            rows,
            departments,
            department_options,
            present,
            late,
            absent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::FakeSource;
    use crate::records::{register_employee, ATTENDANCE};
    use crate::store::RealtimeStore;
    use crate::views::tests::view_context;
    use visage_time_core::EmployeeRegistration;

    #[tokio::test]
    async fn test_report_filters_and_summarizes() {
        let (ctx, store) = view_context(FakeSource::scripted(&[]), &[]).await;
        for (name, id, dept) in [
            ("John Smith", "EMP001", "Engineering"),
            ("Maria Garcia", "EMP002", "Marketing"),
            ("Wei Chen", "EMP003", "Engineering"),
        ] {
            register_employee(
                store.as_ref(),
                &EmployeeRegistration {
                    name: name.into(),
                    employee_id: id.into(),
                    department: dept.into(),
                    face_image: "data:image/png;base64,AA".into(),
                },
            )
            .await
            .unwrap();
        }
        for (name, time, ts) in [("John Smith", "08:32 AM", 1), ("Wei Chen", "10:15 AM", 2)] {
            store
                .push(ATTENDANCE, serde_json::json!({
                    "name": name, "time": time, "date": "06/12/2023",
                    "userId": "u", "timestamp": ts
                }))
                .await
                .unwrap();
        }

        let view = ReportsView::enter(ctx);
        let date = NaiveDate::from_ymd_opt(2023, 6, 12);
        let all = view.report(date, &ReportFilter::default()).await.unwrap();
        assert_eq!(all.rows.len(), 3);
        assert_eq!((all.present, all.late, all.absent), (1, 1, 1));
        assert_eq!(all.department_options, vec!["Engineering", "Marketing"]);
        assert_eq!(all.departments[0].present, 2);

        let filter = ReportFilter {
            status: "late".into(),
            ..ReportFilter::default()
        };
        let late = view.report(date, &filter).await.unwrap();
        assert_eq!(late.rows.len(), 1);
        assert_eq!(late.rows[0].employee_id, "EMP003");
        assert_eq!(late.departments.len(), 2);

        let filter = ReportFilter {
            search: "market".into(),
            ..ReportFilter::default()
        };
        let searched = view.report(date, &filter).await.unwrap();
        assert!(searched.rows.is_empty());
        assert_eq!(searched.departments.len(), 1);
        assert_eq!(searched.departments[0].department, "Marketing");
        assert_eq!(searched.departments[0].total, 1);
        assert_eq!(searched.department_options, vec!["Engineering", "Marketing"]);
    }
}
