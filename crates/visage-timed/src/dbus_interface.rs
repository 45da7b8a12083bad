use crate::app::{App, AppError};
use crate::notify::Notifier;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use visage_time_core::registry::RegistrationForm;
use visage_time_core::reports::ReportFilter;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.freedesktop.VisageTime1";
pub const OBJECT_PATH: &str = "/org/freedesktop/VisageTime1";

impl From<AppError> for fdo::Error {
    fn from(e: AppError) -> Self {
        match e {
            AppError::WrongView { .. } => fdo::Error::NotSupported(e.to_string()),
            other => fdo::Error::Failed(other.to_string()),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

/// D-Bus interface for the Visage Time attendance daemon.
///
/// Bus name: org.freedesktop.VisageTime1
/// Object path: /org/freedesktop/VisageTime1
pub struct VisageTimeService {
    app: Arc<Mutex<App>>,
    notifier: Notifier,
}

impl VisageTimeService {
    pub fn new(app: Arc<Mutex<App>>, notifier: Notifier) -> Self {
        Self { app, notifier }
    }
}

#[interface(name = "org.freedesktop.VisageTime1")]
impl VisageTimeService {
    /// Sign in with an identity-provider credential. Returns the path of the
    /// view landed on.
    async fn sign_in(&self, credential: &str) -> fdo::Result<String> {
        tracing::info!("sign-in requested");
        let route = self.app.lock().await.sign_in(credential).await?;
        Ok(route.path().to_string())
    }

    async fn sign_out(&self) -> fdo::Result<()> {
        tracing::info!("sign-out requested");
        Ok(self.app.lock().await.sign_out().await?)
    }

    /// Open the view at `path`. Returns the routing outcome as JSON.
    async fn navigate(&self, path: &str) -> fdo::Result<String> {
        let nav = self.app.lock().await.navigate(path).await;
        to_json(&nav)
    }

    async fn start_detection(&self) -> fdo::Result<()> {
        Ok(self.app.lock().await.start_detection().await?)
    }

    async fn capture_face(&self) -> fdo::Result<()> {
        Ok(self.app.lock().await.capture_face().await?)
    }

    async fn retake_face(&self) -> fdo::Result<()> {
        Ok(self.app.lock().await.retake_face()?)
    }

    /// Register an employee with the captured face.
    async fn register(
        &self,
        name: &str,
        employee_id: &str,
        department: &str,
    ) -> fdo::Result<String> {
        let form = RegistrationForm {
            name: name.to_string(),
            employee_id: employee_id.to_string(),
            department: department.to_string(),
        };
        let registered = self.app.lock().await.register(&form).await?;
        Ok(serde_json::json!({
            "name": registered.name,
            "employeeId": registered.employee_id,
            "department": registered.department,
        })
        .to_string())
    }

    async fn registration(&self) -> fdo::Result<String> {
        let status = self.app.lock().await.registration()?;
        to_json(&status)
    }

    async fn attendance(&self) -> fdo::Result<String> {
        let status = self.app.lock().await.attendance().await?;
        to_json(&status)
    }

    async fn dashboard(&self) -> fdo::Result<String> {
        let summary = self.app.lock().await.dashboard().await?;
        to_json(&summary)
    }

    /// Daily report. An empty `date` means today; otherwise `YYYY-MM-DD`.
    /// Empty selectors mean "all".
    async fn report(
        &self,
        date: &str,
        search: &str,
        department: &str,
        status: &str,
    ) -> fdo::Result<String> {
        let date = match date {
            "" => None,
            d => Some(
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|e| fdo::Error::InvalidArgs(format!("date {d:?}: {e}")))?,
            ),
        };
        let or_all = |s: &str| if s.is_empty() { "all".to_string() } else { s.to_string() };
        let filter = ReportFilter {
            search: search.to_string(),
            department: or_all(department),
            status: or_all(status),
        };
        let summary = self.app.lock().await.report(date, &filter).await?;
        to_json(&summary)
    }

    /// Drain pending notifications, oldest first.
    async fn notifications(&self) -> fdo::Result<String> {
        to_json(&self.notifier.drain())
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let status = self.app.lock().await.status().await;
        to_json(&status)
    }
}
