use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in source-frame pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Expression probabilities for a single face. Values sum to ~1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expressions {
    pub neutral: f32,
    pub happy: f32,
    pub sad: f32,
    pub angry: f32,
    pub fearful: f32,
    pub disgusted: f32,
    pub surprised: f32,
}

impl Expressions {
    /// Name and probability of the most likely expression.
    pub fn dominant(&self) -> (&'static str, f32) {
        let all = [
            ("neutral", self.neutral),
            ("happy", self.happy),
            ("sad", self.sad),
            ("angry", self.angry),
            ("fearful", self.fearful),
            ("disgusted", self.disgusted),
            ("surprised", self.surprised),
        ];
        all.into_iter()
            .fold(("neutral", f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            })
    }
}

/// A face found in a frame: region, 68-point landmarks and expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub bbox: BoundingBox,
    /// 68 landmark points in source-frame pixels (jaw, brows, nose, eyes, mouth).
    pub landmarks: Vec<(f32, f32)>,
    pub expressions: Expressions,
}

/// A stored attendance entry. Field names match the realtime store layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub name: String,
    /// Time of day, en-US style (`09:05 AM`).
    pub time: String,
    /// Calendar date, `MM/DD/YYYY`.
    pub date: String,
    pub user_id: String,
    /// Milliseconds since the Unix epoch, stamped at save time.
    pub timestamp: i64,
}

/// An attendance entry before it is stamped and saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAttendance {
    pub name: String,
    pub time: String,
    pub date: String,
    pub user_id: String,
}

impl NewAttendance {
    pub fn stamp(self, timestamp: i64) -> AttendanceRecord {
        AttendanceRecord {
            name: self.name,
            time: self.time,
            date: self.date,
            user_id: self.user_id,
            timestamp,
        }
    }
}

/// An employee registered for attendance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRegistration {
    pub name: String,
    pub employee_id: String,
    pub department: String,
    /// Captured face as a `data:image/png;base64,...` string.
    pub face_image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// The signed-in operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl SessionUser {
    /// Build a session user from provider fields, filling the usual defaults.
    pub fn from_provider(
        id: impl Into<String>,
        display_name: Option<String>,
        email: Option<String>,
        role: Role,
    ) -> Self {
        Self {
            id: id.into(),
            name: display_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "User".to_string()),
            email: email.unwrap_or_default(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
