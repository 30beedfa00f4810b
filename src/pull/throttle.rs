//! Progress emission throttle
//!
//! Progress payloads can arrive far faster than clients care to see them.
//! The throttle coalesces intermediate updates: the task record always holds
//! the latest payload, but callback fan-out and table persistence only happen
//! when the decision below says so. Terminal transitions bypass the throttle
//! entirely, so the last update is always observable.

use chrono::{DateTime, Utc};

use crate::config::PullsConfig;
use crate::types::PullTask;

/// Outcome of the throttle decision for one progress update
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ThrottleDecision {
    /// Fan out to callbacks and persist now
    pub emit: bool,
    /// Percent-complete derived from the payload, if any
    pub percent: Option<f64>,
}

/// Decide whether a progress update should be emitted now
///
/// Emit if any of:
/// - no prior emission exists for this task;
/// - the throttle interval elapsed since the last emission;
/// - a percent value exists and moved at least `percent_delta` from the last
///   emitted percent;
/// - a percent value exists now for the first time.
pub(crate) fn decide(
    config: &PullsConfig,
    task: &PullTask,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> ThrottleDecision {
    let percent = extract_percent(payload);

    let emit = match task.last_emit_time {
        None => true,
        Some(last_emit) => {
            let elapsed = now
                .signed_duration_since(last_emit)
                .to_std()
                .unwrap_or_default();
            if elapsed >= config.throttle_interval {
                true
            } else {
                match (percent, task.last_emitted_percent) {
                    (Some(current), Some(last)) => {
                        (current - last).abs() >= config.percent_delta
                    }
                    // A percent value became computable for the first time
                    (Some(_), None) => true,
                    _ => false,
                }
            }
        }
    };

    ThrottleDecision { emit, percent }
}

/// Derive a 0-100 percent-complete value from a progress payload
///
/// Preference order: an explicit `percent` field; a `progress` field (scaled
/// from 0-1 when it looks fractional); a `completed`/`total` byte pair; a
/// `downloaded`/`total` byte pair.
pub(crate) fn extract_percent(payload: &serde_json::Value) -> Option<f64> {
    if let Some(percent) = payload.get("percent").and_then(serde_json::Value::as_f64) {
        return Some(percent);
    }

    if let Some(progress) = payload.get("progress").and_then(serde_json::Value::as_f64) {
        return Some(if progress <= 1.0 {
            progress * 100.0
        } else {
            progress
        });
    }

    let total = payload.get("total").and_then(serde_json::Value::as_f64)?;
    if total <= 0.0 {
        return None;
    }
    let transferred = payload
        .get("completed")
        .and_then(serde_json::Value::as_f64)
        .or_else(|| payload.get("downloaded").and_then(serde_json::Value::as_f64))?;

    Some((transferred / total * 100.0).clamp(0.0, 100.0))
}
