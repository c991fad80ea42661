use std::fmt::Display;
use tracing::{error, info, warn};

/// Logs command start with consistent format
pub fn log_command_start(command: &str, user: &str, user_id: i64, details: Option<&str>) {
    match details {
        Some(d) => info!("CMD_START: {} by {}({}) - {}", command, user, user_id, d),
        None => info!("CMD_START: {} by {}({})", command, user, user_id),
    }
}

/// Logs command completion with consistent format
pub fn log_command_success(command: &str, user: &str, user_id: i64, details: Option<&str>) {
    match details {
        Some(d) => info!("CMD_SUCCESS: {} by {}({}) - {}", command, user, user_id, d),
        None => info!("CMD_SUCCESS: {} by {}({})", command, user, user_id),
    }
}

pub fn log_command_error(command: &str, user: &str, user_id: i64, error: &str) {
    error!("CMD_ERROR: {} by {}({}) - {}", command, user, user_id, error);
}

pub fn log_validation_error(command: &str, field: &str, value: &str, error: &str, user_id: i64) {
    warn!(
        "VALIDATION_ERROR: {} - {} field '{}' invalid: {} - user {}",
        command, field, value, error, user_id
    );
}

/// One committed balance movement.
pub fn log_ledger_posting(kind: &str, from_user_id: i64, to_user_id: i64, amount: impl Display) {
    info!("LEDGER: {} {} -> {} amount {}", kind, from_user_id, to_user_id, amount);
}

pub fn log_ledger_error(operation: &str, error: &str) {
    error!("LEDGER_ERROR: {} failed: {}", operation, error);
}

/// Arming, firing and cancelling of scheduled jobs.
pub fn log_job_event(job: impl Display, details: &str) {
    info!("JOB: {} - {}", job, details);
}

pub fn log_job_error(job: impl Display, error: &str) {
    error!("JOB_ERROR: {} - {}", job, error);
}

/// Logs system events with consistent format
pub fn log_system_event(event: &str, details: Option<&str>) {
    match details {
        Some(d) => info!("SYSTEM: {} - {}", event, d),
        None => info!("SYSTEM: {}", event),
    }
}
