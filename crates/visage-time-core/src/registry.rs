//! Employee registration rules: required fields and id uniqueness.

use crate::types::EmployeeRegistration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("please fill in all required fields")]
    MissingFields,
    #[error("please capture a face image for registration")]
    FaceCaptureRequired,
    #[error("an employee with id {0} already exists")]
    DuplicateEmployeeId(String),
    #[error("the previous registration is still completing")]
    InProgress,
}

/// Form fields entered by the operator.
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub name: String,
    pub employee_id: String,
    pub department: String,
}

impl RegistrationForm {
    /// Validate the form and combine it with the captured face image.
    pub fn validate(
        &self,
        captured_image: Option<&str>,
    ) -> Result<EmployeeRegistration, RegistrationError> {
        let name = self.name.trim();
        let employee_id = self.employee_id.trim();
        let department = self.department.trim();

        if name.is_empty() || employee_id.is_empty() || department.is_empty() {
            return Err(RegistrationError::MissingFields);
        }

        let face_image = captured_image
            .filter(|img| !img.is_empty())
            .ok_or(RegistrationError::FaceCaptureRequired)?;

        Ok(EmployeeRegistration {
            name: name.to_string(),
            employee_id: employee_id.to_string(),
            department: department.to_string(),
            face_image: face_image.to_string(),
        })
    }
}

/// Reject an id already present among the stored registrations.
pub fn check_unique(
    existing: &[EmployeeRegistration],
    employee_id: &str,
) -> Result<(), RegistrationError> {
    if existing.iter().any(|emp| emp.employee_id == employee_id) {
        return Err(RegistrationError::DuplicateEmployeeId(employee_id.to_string()));
    }
    Ok(())
}
