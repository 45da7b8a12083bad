//! Typed access to the `attendance` and `employees` collections.

use crate::store::{RealtimeStore, StoreError, Subscription};
use thiserror::Error;
use visage_time_core::ranking::{decode_entries, recent_records};
use visage_time_core::registry::{check_unique, RegistrationError};
use visage_time_core::{AttendanceRecord, EmployeeRegistration, NewAttendance, Snapshot};

pub const ATTENDANCE: &str = "attendance";
pub const EMPLOYEES: &str = "employees";

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error(transparent)]
    Invalid(#[from] RegistrationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stamp the record with the current time and append it.
pub async fn save_attendance_record(
    store: &dyn RealtimeStore,
    record: NewAttendance,
) -> Result<AttendanceRecord, StoreError> {
    let record = record.stamp(chrono::Utc::now().timestamp_millis());
    let key = store.push(ATTENDANCE, serde_json::to_value(&record)?).await?;
    tracing::info!(key = %key, name = %record.name, "attendance saved");
    Ok(record)
}

/// Every decodable attendance record in the snapshot, in key order.
pub fn attendance_in(snapshot: &Snapshot) -> Vec<AttendanceRecord> {
    decode_entries::<AttendanceRecord>(snapshot)
        .into_iter()
        .map(|(_, r)| r)
        .collect()
}

pub async fn all_attendance(store: &dyn RealtimeStore) -> Result<Vec<AttendanceRecord>, StoreError> {
    Ok(attendance_in(&store.snapshot(ATTENDANCE).await?))
}

pub async fn list_employees(
    store: &dyn RealtimeStore,
) -> Result<Vec<EmployeeRegistration>, StoreError> {
    let snapshot = store.snapshot(EMPLOYEES).await?;
    Ok(decode_entries::<EmployeeRegistration>(&snapshot)
        .into_iter()
        .map(|(_, e)| e)
        .collect())
}

/// Append a registration unless its employee id is already taken.
pub async fn register_employee(
    store: &dyn RealtimeStore,
    registration: &EmployeeRegistration,
) -> Result<String, RegisterError> {
    let existing = list_employees(store).await?;
    check_unique(&existing, &registration.employee_id)?;
    let key = store
        .push(EMPLOYEES, serde_json::to_value(registration).map_err(StoreError::from)?)
        .await?;
    tracing::info!(key = %key, employee_id = %registration.employee_id, "employee registered");
    Ok(key)
}

/// Attendance subscription yielding the five most recent records.
pub struct AttendanceFeed {
    sub: Subscription,
}

impl AttendanceFeed {
    pub async fn next(&mut self) -> Option<Vec<AttendanceRecord>> {
        self.sub.next().await.map(|snap| recent_records(&snap))
    }
}

pub fn subscribe_to_attendance(store: &dyn RealtimeStore) -> AttendanceFeed {
    AttendanceFeed {
        sub: store.subscribe(ATTENDANCE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use visage_time_core::RECENT_LIMIT;

    fn entry(name: &str) -> NewAttendance {
        NewAttendance {
            name: name.into(),
            time: "09:00 AM".into(),
            date: "06/12/2023".into(),
            user_id: "u1".into(),
        }
    }

    fn employee(id: &str) -> EmployeeRegistration {
        EmployeeRegistration {
            name: format!("Employee {id}"),
            employee_id: id.into(),
            department: "Engineering".into(),
            face_image: "data:image/png;base64,AA".into(),
        }
    }

    #[tokio::test]
    async fn test_feed_delivers_at_most_five_newest_first() {
        let store = MemoryStore::new();
        let mut feed = subscribe_to_attendance(&store);
        assert!(feed.next().await.unwrap().is_empty());

        for i in 0..8 {
            store
                .push(ATTENDANCE, serde_json::to_value(entry(&format!("p{i}")).stamp(100 + i)).unwrap())
                .await
                .unwrap();
        }

        let recent = feed.next().await.unwrap();
        assert_eq!(recent.len(), RECENT_LIMIT);
        assert!(recent.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
        assert_eq!(recent[0].name, "p7");
    }

    #[tokio::test]
    async fn test_save_attendance_stamps_timestamp() {
        let store = MemoryStore::new();
        let before = chrono::Utc::now().timestamp_millis();
        let saved = save_attendance_record(&store, entry("Ada")).await.unwrap();
        assert!(saved.timestamp >= before);
        assert_eq!(all_attendance(&store).await.unwrap(), vec![saved]);
    }

    #[tokio::test]
    async fn test_duplicate_employee_id_leaves_store_unchanged() {
        let store = MemoryStore::new();
        register_employee(&store, &employee("EMP001")).await.unwrap();
        let before = store.snapshot(EMPLOYEES).await.unwrap();

        let err = register_employee(&store, &employee("EMP001")).await.unwrap_err();
        assert!(matches!(
            err,
            RegisterError::Invalid(RegistrationError::DuplicateEmployeeId(ref id)) if id == "EMP001"
        ));
        assert_eq!(store.snapshot(EMPLOYEES).await.unwrap(), before);

        register_employee(&store, &employee("EMP002")).await.unwrap();
        assert_eq!(list_employees(&store).await.unwrap().len(), 2);
    }
}
