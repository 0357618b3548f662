use crate::models::task::Task;
use chrono::Utc;
use log::{error, info, warn};
use serde_json::{json, Map, Value};

/// Audit trail for task mutations. Implementations must be infallible:
/// handlers call these after a successful write and never roll back on
/// their account.
pub trait AuditSink: Send + Sync {
    fn task_created(&self, task: &Task);
    /// `changes` maps changed column names to their new values. It is a
    /// diff, not a snapshot of the row.
    fn task_updated(&self, task: &Task, changes: &Map<String, Value>);
    fn task_deleted(&self, task: &Task);
    fn task_restored(&self, task: &Task);
    fn task_purged(&self, task: &Task);
}

/// Default sink writing structured events through the `log` crate.
pub struct LogAudit;

impl AuditSink for LogAudit {
    fn task_created(&self, task: &Task) {
        info!(
            "Task Created {}",
            json!({
                "task_id": task.id,
                "user_id": task.user_id,
                "title": task.title,
                "priority": task.priority.as_str(),
                "status": task.status.as_str(),
                "created_at": task.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
        );
    }

    fn task_updated(&self, task: &Task, changes: &Map<String, Value>) {
        info!(
            "Task Updated {}",
            json!({
                "task_id": task.id,
                "user_id": task.user_id,
                "title": task.title,
                "changes": changes,
                "updated_at": task.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
        );
    }

    fn task_deleted(&self, task: &Task) {
        warn!(
            "Task Deleted {}",
            json!({
                "task_id": task.id,
                "user_id": task.user_id,
                "title": task.title,
                "deleted_at": Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S").to_string(),
            })
        );
    }

    fn task_restored(&self, task: &Task) {
        info!(
            "Task Restored {}",
            json!({
                "task_id": task.id,
                "user_id": task.user_id,
                "title": task.title,
                "restored_at": Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S").to_string(),
            })
        );
    }

    fn task_purged(&self, task: &Task) {
        // Irreversible, so the loudest level the log crate offers.
        error!(
            "Task Permanently Deleted {}",
            json!({
                "task_id": task.id,
                "user_id": task.user_id,
                "title": task.title,
                "force_deleted_at": Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S").to_string(),
            })
        );
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub struct AuditRecord {
        pub event: &'static str,
        pub task_id: i64,
        pub changes: Option<Map<String, Value>>,
    }

    /// Captures events in memory so tests can assert on what was emitted.
    #[derive(Default)]
    pub struct MemoryAudit {
        pub records: Mutex<Vec<AuditRecord>>,
    }

    impl MemoryAudit {
        pub fn events(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }

        fn push(&self, event: &'static str, task_id: i64, changes: Option<Map<String, Value>>) {
            self.records.lock().unwrap().push(AuditRecord {
                event,
                task_id,
                changes,
            });
        }
    }

    impl AuditSink for MemoryAudit {
        fn task_created(&self, task: &Task) {
            self.push("Task Created", task.id, None);
        }

        fn task_updated(&self, task: &Task, changes: &Map<String, Value>) {
            self.push("Task Updated", task.id, Some(changes.clone()));
        }

        fn task_deleted(&self, task: &Task) {
            self.push("Task Deleted", task.id, None);
        }

        fn task_restored(&self, task: &Task) {
            self.push("Task Restored", task.id, None);
        }

        fn task_purged(&self, task: &Task) {
            self.push("Task Permanently Deleted", task.id, None);
        }
    }
}
