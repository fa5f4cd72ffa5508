use super::models::{LimitStatus, Thresholds};

/// Usage as a percentage of `limit`; `0` for unlimited resources.
pub fn usage_percentage(current: f64, limit: f64) -> f64 {
    if limit == 0.0 {
        return 0.0;
    }
    current / limit * 100.0
}

/// key: limit-evaluator -> compare usage percentage against thresholds
///
/// A limit of `0` means unlimited and is always `Ok`. Boundary values belong to
/// the higher state.
pub fn evaluate_limit(current: f64, limit: f64, thresholds: Thresholds) -> LimitStatus {
    if limit == 0.0 {
        return LimitStatus::Ok;
    }

    let percentage = usage_percentage(current, limit);
    if percentage >= thresholds.hard_limit_percent {
        LimitStatus::Exceeded
    } else if percentage >= thresholds.warning_percent {
        LimitStatus::Warning
    } else {
        LimitStatus::Ok
    }
}
