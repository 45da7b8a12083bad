//! Views the operator moves between. Each view is entered when routed to
//! and torn down when left; nothing it started outlives it.

mod attendance;
mod dashboard;
mod registration;
mod reports;

pub use attendance::{AttendanceStatus, AttendanceView};
pub use dashboard::{DashboardSummary, DashboardView};
pub use registration::{RegistrationStatus, RegistrationView};
pub use reports::{ReportSummary, ReportsView};

use crate::auth::AuthContext;
use crate::config::Config;
use crate::engine::FaceSource;
use crate::notify::Notifier;
use crate::records::subscribe_to_attendance;
use crate::store::RealtimeStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use visage_time_core::AttendanceRecord;

/// Services shared by every view.
#[derive(Clone)]
pub struct ViewContext {
    pub store: Arc<dyn RealtimeStore>,
    pub source: Arc<dyn FaceSource>,
    pub auth: Arc<AuthContext>,
    pub notifier: Notifier,
    pub config: Arc<Config>,
}

/// Live list of the five most recent attendance records. Dropping it ends
/// the store subscription.
pub(crate) struct RecentFeed {
    rx: watch::Receiver<Vec<AttendanceRecord>>,
    task: JoinHandle<()>,
}

impl RecentFeed {
    pub(crate) fn spawn(store: &dyn RealtimeStore) -> Self {
        let mut feed = subscribe_to_attendance(store);
        let (tx, rx) = watch::channel(Vec::new());
        let task = tokio::spawn(async move {
            while let Some(recent) = feed.next().await {
                tx.send_replace(recent);
            }
            tracing::debug!("attendance feed ended");
        });
        Self { rx, task }
    }

    pub(crate) fn recent(&self) -> Vec<AttendanceRecord> {
        self.rx.borrow().clone()
    }

    #[cfg(test)]
    pub(crate) async fn changed(&mut self) {
        let _ = self.rx.changed().await;
    }
}

impl Drop for RecentFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}
