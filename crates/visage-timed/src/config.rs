use chrono::NaiveTime;
use std::path::PathBuf;
use std::time::Duration;

/// Which realtime store backend the daemon talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Firebase Realtime Database over REST + server-sent events.
    Firebase,
    /// In-process store; contents are lost on restart.
    Memory,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the four ONNX model bundles.
    pub model_dir: PathBuf,
    pub store_backend: StoreBackend,
    /// Realtime database root, e.g. `https://<project>-default-rtdb.firebaseio.com`.
    pub database_url: String,
    /// Web API key of the identity provider project.
    pub api_key: String,
    /// Path of the local session cache (SQLite).
    pub session_path: PathBuf,
    /// Emails granted the elevated role.
    pub admin_emails: Vec<String>,
    /// Fixed detection polling period.
    pub detect_interval: Duration,
    /// Delay between the first detected face and the recognition report.
    pub recognition_delay: Duration,
    /// How long the attendance result stays on screen before resetting.
    pub result_hold: Duration,
    /// How long a successful registration stays on screen before the form resets.
    pub registration_reset: Duration,
    /// First check-ins after this time of day count as late in reports.
    pub late_after: NaiveTime,
}

impl Config {
    /// Load configuration from `VISAGE_TIME_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("VISAGE_TIME_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| visage_time_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("visage-time");

        let session_path = std::env::var("VISAGE_TIME_SESSION_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("session.db"));

        let store_backend = match std::env::var("VISAGE_TIME_STORE").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Firebase,
        };

        Self {
            camera_device: std::env::var("VISAGE_TIME_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            store_backend,
            database_url: std::env::var("VISAGE_TIME_DATABASE_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            api_key: std::env::var("VISAGE_TIME_API_KEY").unwrap_or_default(),
            session_path,
            admin_emails: parse_list(&std::env::var("VISAGE_TIME_ADMIN_EMAILS").unwrap_or_default()),
            detect_interval: Duration::from_millis(env_u64("VISAGE_TIME_DETECT_INTERVAL_MS", 500)),
            recognition_delay: Duration::from_millis(env_u64(
                "VISAGE_TIME_RECOGNITION_DELAY_MS",
                1500,
            )),
            result_hold: Duration::from_millis(env_u64("VISAGE_TIME_RESULT_HOLD_MS", 5000)),
            registration_reset: Duration::from_millis(env_u64(
                "VISAGE_TIME_REGISTRATION_RESET_MS",
                2000,
            )),
            late_after: std::env::var("VISAGE_TIME_LATE_AFTER")
                .ok()
                .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M").ok())
                .unwrap_or_else(default_late_after),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: visage_time_core::default_model_dir(),
            store_backend: StoreBackend::Memory,
            database_url: String::new(),
            api_key: String::new(),
            session_path: PathBuf::from("/tmp/visage-time/session.db"),
            admin_emails: Vec::new(),
            detect_interval: Duration::from_millis(500),
            recognition_delay: Duration::from_millis(1500),
            result_hold: Duration::from_millis(5000),
            registration_reset: Duration::from_millis(2000),
            late_after: default_late_after(),
        }
    }
}

fn default_late_after() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" a@x.com, ,b@y.org "), vec!["a@x.com", "b@y.org"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.detect_interval, Duration::from_millis(500));
        assert_eq!(config.recognition_delay, Duration::from_millis(1500));
        assert_eq!(config.late_after, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }
}
