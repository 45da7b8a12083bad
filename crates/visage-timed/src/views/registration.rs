use super::ViewContext;
use crate::capture::{CaptureController, CaptureStatus, ControlError};
use crate::records::{register_employee, RegisterError};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use visage_time_core::capture::CaptureError;
use visage_time_core::registry::{RegistrationError, RegistrationForm};
use visage_time_core::{DetectionMode, EmployeeRegistration};

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationStatus {
    pub capture: CaptureStatus,
    pub captured: bool,
    pub submitting: bool,
    pub registered: bool,
}

#[derive(Default)]
struct FormState {
    captured_image: Option<String>,
    submitting: bool,
    registered: bool,
}

/// Admin-only view: capture a face and register an employee with it.
pub struct RegistrationView {
    ctx: ViewContext,
    capture: CaptureController,
    state: Arc<Mutex<FormState>>,
    reset: Option<JoinHandle<()>>,
}

impl RegistrationView {
    pub async fn enter(ctx: ViewContext) -> Self {
        let (mut capture, _events) = CaptureController::new(
            ctx.source.clone(),
            DetectionMode::Register,
            ctx.config.detect_interval,
            ctx.config.recognition_delay,
        );
        // Failures stay visible through the capture status.
        let _ = capture.prepare().await;
        Self {
            ctx,
            capture,
            state: Arc::new(Mutex::new(FormState::default())),
            reset: None,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FormState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start_detection(&mut self) -> Result<(), CaptureError> {
        self.capture.start()
    }

    /// Inputs stay locked from a successful submit until the form resets.
    fn locked(&self) -> bool {
        self.state().registered
    }

    pub async fn capture_face(&mut self) -> Result<(), ControlError> {
        if self.locked() {
            return Err(CaptureError::Locked.into());
        }
        match self.capture.capture().await {
            Ok(image) => {
                self.state().captured_image = Some(image);
                tracing::info!("face captured for registration");
                Ok(())
            }
            Err(e) => {
                self.ctx.notifier.error("Face capture failed", e.to_string());
                Err(e)
            }
        }
    }

    /// Discard the captured image and detect again.
    pub fn retake(&mut self) -> Result<(), CaptureError> {
        if self.locked() {
            return Err(CaptureError::Locked);
        }
        self.state().captured_image = None;
        self.capture.start()
    }

    pub async fn submit(
        &mut self,
        form: &RegistrationForm,
    ) -> Result<EmployeeRegistration, RegisterError> {
        if self.locked() {
            return Err(RegistrationError::InProgress.into());
        }
        let captured = self.state().captured_image.clone();
        let registration = match form.validate(captured.as_deref()) {
            Ok(r) => r,
            Err(e) => {
                let (title, description) = match &e {
                    RegistrationError::MissingFields => {
                        ("Validation error", "Please fill in all required fields")
                    }
                    _ => (
                        "Face capture required",
                        "Please capture a face image for registration",
                    ),
                };
                self.ctx.notifier.error(title, description);
                return Err(e.into());
            }
        };

        self.state().submitting = true;
        let result = register_employee(self.ctx.store.as_ref(), &registration).await;
        self.state().submitting = false;

        match result {
            Ok(_) => {
                self.ctx.notifier.success(
                    "Registration successful!",
                    format!("{} has been registered successfully.", registration.name),
                );
                self.state().registered = true;
                self.schedule_reset();
                Ok(registration)
            }
            Err(RegisterError::Invalid(RegistrationError::DuplicateEmployeeId(id))) => {
                self.ctx.notifier.error(
                    "Registration failed",
                    "An employee with this ID already exists",
                );
                Err(RegistrationError::DuplicateEmployeeId(id).into())
            }
            Err(e) => {
                tracing::error!(error = %e, "registration error");
                self.ctx.notifier.error(
                    "Registration failed",
                    "There was an error registering the employee. Please try again.",
                );
                Err(e)
            }
        }
    }

    /// Clear the form for the next entry once the success state has shown.
    fn schedule_reset(&mut self) {
        if let Some(task) = self.reset.take() {
            task.abort();
        }
        let state = self.state.clone();
        let delay = self.ctx.config.registration_reset;
        self.reset = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            *state = FormState::default();
            tracing::debug!("registration form reset");
        }));
    }

    pub fn status(&self) -> RegistrationStatus {
        let state = self.state();
        RegistrationStatus {
            capture: self.capture.status(),
            captured: state.captured_image.is_some(),
            submitting: state.submitting,
            registered: state.registered,
        }
    }

    pub async fn leave(mut self) {
        if let Some(task) = self.reset.take() {
            task.abort();
        }
        self.capture.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::FakeSource;
    use crate::notify::Variant;
    use crate::records::{list_employees, EMPLOYEES};
    use crate::store::RealtimeStore;
    use crate::views::tests::view_context;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn form(id: &str) -> RegistrationForm {
        RegistrationForm {
            name: "Ada Lovelace".into(),
            employee_id: id.into(),
            department: "Engineering".into(),
        }
    }

    async fn captured_view(source: Arc<FakeSource>) -> (RegistrationView, Arc<crate::store::MemoryStore>) {
        let (ctx, store) = view_context(source, &["boss@example.com"]).await;
        let mut view = RegistrationView::enter(ctx).await;
        view.start_detection().unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        view.capture_face().await.unwrap();
        (view, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_registers_and_resets() {
        let (mut view, store) = captured_view(FakeSource::scripted(&[Some(1)])).await;
        assert!(view.status().captured);

        let reg = view.submit(&form("EMP001")).await.unwrap();
        assert_eq!(reg.employee_id, "EMP001");
        assert!(reg.face_image.starts_with("data:image/png;base64,"));
        assert_eq!(list_employees(store.as_ref()).await.unwrap().len(), 1);
        assert!(view.status().registered);
        let toasts = view.ctx.notifier.drain();
        assert_eq!(toasts.last().unwrap().title, "Registration successful!");

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let status = view.status();
        assert!(!status.registered);
        assert!(!status.captured);
        view.leave().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_inputs_locked_until_reset() {
        let (mut view, store) = captured_view(FakeSource::scripted(&[Some(1), Some(1)])).await;
        view.submit(&form("EMP001")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(matches!(
            view.capture_face().await,
            Err(ControlError::Capture(CaptureError::Locked))
        ));
        assert_eq!(view.retake(), Err(CaptureError::Locked));
        assert!(matches!(
            view.submit(&form("EMP002")).await,
            Err(RegisterError::Invalid(RegistrationError::InProgress))
        ));
        assert_eq!(list_employees(store.as_ref()).await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert!(!view.status().registered);
        view.retake().unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        view.capture_face().await.unwrap();
        assert!(view.status().captured);
        view.leave().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_rejected_without_write() {
        let (mut view, store) = captured_view(FakeSource::scripted(&[Some(1), Some(1)])).await;
        view.submit(&form("EMP001")).await.unwrap();
        let before = store.snapshot(EMPLOYEES).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        view.retake().unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        view.capture_face().await.unwrap();
        view.ctx.notifier.drain();

        let err = view.submit(&form("EMP001")).await.unwrap_err();
        assert!(matches!(
            err,
            RegisterError::Invalid(RegistrationError::DuplicateEmployeeId(_))
        ));
        assert_eq!(store.snapshot(EMPLOYEES).await.unwrap(), before);
        let toasts = view.ctx.notifier.drain();
        assert_eq!(toasts[0].variant, Variant::Destructive);
        assert_eq!(toasts[0].description, "An employee with this ID already exists");
        view.leave().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_requires_fields_and_capture() {
        let (ctx, store) = view_context(FakeSource::scripted(&[]), &[]).await;
        let mut view = RegistrationView::enter(ctx).await;

        let err = view.submit(&form("EMP001")).await.unwrap_err();
        assert!(matches!(err, RegisterError::Invalid(RegistrationError::FaceCaptureRequired)));

        let err = view
            .submit(&RegistrationForm::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegisterError::Invalid(RegistrationError::MissingFields)));

        let titles: Vec<_> = view.ctx.notifier.drain().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["Face capture required", "Validation error"]);
        assert!(list_employees(store.as_ref()).await.unwrap().is_empty());
        view.leave().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_releases_camera() {
        let source = FakeSource::scripted(&[]);
        let (ctx, _) = view_context(source.clone(), &[]).await;
        let mut view = RegistrationView::enter(ctx).await;
        assert!(source.camera_open.load(Ordering::SeqCst));
        view.start_detection().unwrap();
        view.leave().await;
        assert!(!source.camera_open.load(Ordering::SeqCst));
    }
}
