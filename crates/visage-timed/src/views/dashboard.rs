use super::{RecentFeed, ViewContext};
use crate::records::{all_attendance, list_employees};
use crate::store::StoreError;
use serde::Serialize;
use visage_time_core::dashboard::{compute_stats, DashboardStats};
use visage_time_core::AttendanceRecord;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    /// Display name of the signed-in user, for the greeting.
    pub user: Option<String>,
    pub stats: DashboardStats,
    pub recent: Vec<AttendanceRecord>,
}

pub struct DashboardView {
    ctx: ViewContext,
    feed: RecentFeed,
}

impl DashboardView {
    pub fn enter(ctx: ViewContext) -> Self {
        let feed = RecentFeed::spawn(ctx.store.as_ref());
        Self { ctx, feed }
    }

    pub async fn summary(&self) -> Result<DashboardSummary, StoreError> {
        let loaded = async {
            let employees = list_employees(self.ctx.store.as_ref()).await?;
            let records = all_attendance(self.ctx.store.as_ref()).await?;
            Ok::<_, StoreError>((employees, records))
        }
        .await;

        let (employees, records) = match loaded {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "failed to load dashboard data");
                self.ctx
                    .notifier
                    .error("Error", "Failed to load attendance data");
                return Err(e);
            }
        };

        let today = chrono::Local::now().date_naive();
        Ok(DashboardSummary {
            user: self.ctx.auth.current_user().map(|u| u.name),
            stats: compute_stats(&employees, &records, today),
            recent: self.feed.recent(),
        })
    }

    pub fn leave(self) {
        tracing::debug!("leaving dashboard");
    }
}
