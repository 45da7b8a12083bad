//! One-shot user notifications ("toasts").
//!
//! Every failure surfaced to the operator goes through here. Toasts are
//! logged and queued until a client drains them.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Oldest toasts are dropped past this many undrained entries.
const MAX_QUEUED: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Default,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub variant: Variant,
    pub title: String,
    pub description: String,
}

#[derive(Clone, Default)]
pub struct Notifier {
    queue: Arc<Mutex<VecDeque<Toast>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&self, title: &str, description: impl Into<String>) {
        let description = description.into();
        tracing::info!(title, description = %description, "notification");
        self.push(Toast {
            variant: Variant::Default,
            title: title.to_string(),
            description,
        });
    }

    pub fn error(&self, title: &str, description: impl Into<String>) {
        let description = description.into();
        tracing::warn!(title, description = %description, "error notification");
        self.push(Toast {
            variant: Variant::Destructive,
            title: title.to_string(),
            description,
        });
    }

    fn push(&self, toast: Toast) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUED {
            queue.pop_front();
        }
        queue.push_back(toast);
    }

    /// Take all pending toasts, oldest first.
    pub fn drain(&self) -> Vec<Toast> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_in_order() {
        let n = Notifier::new();
        n.success("Logged out", "bye");
        n.error("Login failed", "nope");
        let toasts = n.drain();
        assert_eq!(toasts.len(), 2);
        assert_eq!(toasts[0].variant, Variant::Default);
        assert_eq!(toasts[1].variant, Variant::Destructive);
        assert!(n.drain().is_empty());
    }

    #[test]
    fn test_queue_is_bounded() {
        let n = Notifier::new();
        for i in 0..(MAX_QUEUED + 3) {
            n.success("t", format!("{i}"));
        }
        let toasts = n.drain();
        assert_eq!(toasts.len(), MAX_QUEUED);
        assert_eq!(toasts[0].description, "3");
    }
}
