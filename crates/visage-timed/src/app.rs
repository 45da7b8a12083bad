//! Routing between views and the session actions that drive it.

use crate::auth::AuthError;
use crate::capture::{CaptureStatus, ControlError};
use crate::engine::EngineStatus;
use crate::records::RegisterError;
use crate::store::StoreError;
use crate::views::{
    AttendanceStatus, AttendanceView, DashboardSummary, DashboardView, RegistrationStatus,
    RegistrationView, ReportSummary, ReportsView, ViewContext,
};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use visage_time_core::capture::CaptureError;
use visage_time_core::registry::RegistrationForm;
use visage_time_core::reports::ReportFilter;
use visage_time_core::router::{guard, landing, nav_items};
use visage_time_core::{EmployeeRegistration, Navigation, Route, SessionUser};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{action} is not available on {route}")]
    WrongView { action: &'static str, route: Route },
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

enum ActiveView {
    /// Login, not-found and access-denied screens hold no resources.
    Static,
    Dashboard(DashboardView),
    Registration(RegistrationView),
    Attendance(AttendanceView),
    Reports(ReportsView),
}

#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub version: &'static str,
    pub route: Route,
    pub loading: bool,
    pub user: Option<SessionUser>,
    pub admin: bool,
    pub nav: Vec<Route>,
    pub engine: EngineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureStatus>,
}

pub struct App {
    ctx: ViewContext,
    route: Route,
    /// View requested before the sign-in redirect.
    from: Option<Route>,
    view: ActiveView,
}

impl App {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            route: Route::Login,
            from: None,
            view: ActiveView::Static,
        }
    }

    pub fn route(&self) -> Route {
        self.route
    }

    /// Route to `path`, applying the session guard.
    pub async fn navigate(&mut self, path: &str) -> Navigation {
        let route = Route::parse(path);
        let user = self.ctx.auth.current_user();
        let nav = guard(route, self.ctx.auth.loading(), user.as_ref());
        tracing::debug!(path, ?nav, "navigate");

        match nav {
            Navigation::Render { route } => self.show(route).await,
            Navigation::Redirect { to, from } => {
                self.from = Some(from);
                self.show(to).await;
            }
            Navigation::Loading => {}
            Navigation::Forbidden { route } => {
                self.ctx.notifier.error(
                    "Access Denied",
                    "Only administrators can register new employees.",
                );
                self.leave_view().await;
                self.route = route;
            }
        }
        nav
    }

    async fn show(&mut self, route: Route) {
        self.leave_view().await;
        let ctx = self.ctx.clone();
        self.view = match route {
            Route::Dashboard => ActiveView::Dashboard(DashboardView::enter(ctx)),
            Route::Register => ActiveView::Registration(RegistrationView::enter(ctx).await),
            Route::Attendance => ActiveView::Attendance(AttendanceView::enter(ctx).await),
            Route::Reports => ActiveView::Reports(ReportsView::enter(ctx)),
            Route::Login | Route::NotFound => ActiveView::Static,
        };
        self.route = route;
        tracing::info!(%route, "view entered");
    }

    async fn leave_view(&mut self) {
        match std::mem::replace(&mut self.view, ActiveView::Static) {
            ActiveView::Static => {}
            ActiveView::Dashboard(v) => v.leave(),
            ActiveView::Registration(v) => v.leave().await,
            ActiveView::Attendance(v) => v.leave().await,
            ActiveView::Reports(_) => {}
        }
    }

    /// Complete a sign-in and land on the originally requested view.
    pub async fn sign_in(&mut self, credential: &str) -> Result<Route, AppError> {
        match self.ctx.auth.sign_in_with_popup(credential).await {
            Ok(user) => {
                self.ctx
                    .notifier
                    .success("Login successful!", format!("Welcome back, {}", user.name));
                let target = landing(self.from.take());
                self.navigate(target.path()).await;
                Ok(self.route)
            }
            Err(e) => {
                self.ctx
                    .notifier
                    .error("Login failed", "Unable to sign in with Google. Please try again.");
                Err(e.into())
            }
        }
    }

    pub async fn sign_out(&mut self) -> Result<(), AppError> {
        self.leave_view().await;
        match self.ctx.auth.sign_out().await {
            Ok(()) => {
                self.ctx
                    .notifier
                    .success("Logged out", "You have been successfully logged out");
                self.from = None;
                self.navigate(Route::Login.path()).await;
                Ok(())
            }
            Err(e) => {
                self.ctx
                    .notifier
                    .error("Logout failed", "Unable to sign out. Please try again.");
                Err(e.into())
            }
        }
    }

    fn wrong_view(&self, action: &'static str) -> AppError {
        AppError::WrongView {
            action,
            route: self.route,
        }
    }

    pub async fn start_detection(&mut self) -> Result<(), AppError> {
        match &mut self.view {
            ActiveView::Registration(v) => Ok(v.start_detection()?),
            ActiveView::Attendance(v) => Ok(v.start_detection().await?),
            _ => Err(self.wrong_view("face detection")),
        }
    }

    pub async fn capture_face(&mut self) -> Result<(), AppError> {
        match &mut self.view {
            ActiveView::Registration(v) => Ok(v.capture_face().await?),
            _ => Err(self.wrong_view("face capture")),
        }
    }

    pub fn retake_face(&mut self) -> Result<(), AppError> {
        match &mut self.view {
            ActiveView::Registration(v) => Ok(v.retake()?),
            _ => Err(self.wrong_view("retake")),
        }
    }

    pub async fn register(
        &mut self,
        form: &RegistrationForm,
    ) -> Result<EmployeeRegistration, AppError> {
        match &mut self.view {
            ActiveView::Registration(v) => Ok(v.submit(form).await?),
            _ => Err(self.wrong_view("registration")),
        }
    }

    pub fn registration(&self) -> Result<RegistrationStatus, AppError> {
        match &self.view {
            ActiveView::Registration(v) => Ok(v.status()),
            _ => Err(self.wrong_view("registration status")),
        }
    }

    pub async fn attendance(&self) -> Result<AttendanceStatus, AppError> {
        match &self.view {
            ActiveView::Attendance(v) => Ok(v.status().await),
            _ => Err(self.wrong_view("attendance status")),
        }
    }

    pub async fn dashboard(&self) -> Result<DashboardSummary, AppError> {
        match &self.view {
            ActiveView::Dashboard(v) => Ok(v.summary().await?),
            _ => Err(self.wrong_view("dashboard")),
        }
    }

    pub async fn report(
        &self,
        date: Option<NaiveDate>,
        filter: &ReportFilter,
    ) -> Result<ReportSummary, AppError> {
        match &self.view {
            ActiveView::Reports(v) => Ok(v.report(date, filter).await?),
            _ => Err(self.wrong_view("reports")),
        }
    }

    pub async fn status(&self) -> AppStatus {
        let user = self.ctx.auth.current_user();
        let capture = match &self.view {
            ActiveView::Registration(v) => Some(v.status().capture),
            ActiveView::Attendance(v) => Some(v.status().await.capture),
            _ => None,
        };
        AppStatus {
            version: env!("CARGO_PKG_VERSION"),
            route: self.route,
            loading: self.ctx.auth.loading(),
            admin: self.ctx.auth.is_admin(),
            nav: user.as_ref().map(|u| nav_items(u.role)).unwrap_or_default(),
            user,
            engine: self.ctx.source.status().await,
            capture,
        }
    }

    pub async fn shutdown(&mut self) {
        self.leave_view().await;
    }
}
