//! Small integer helpers shared by the regulators.

/// Clamp without panicking on an inverted range; `min` wins if `min > max`.
pub(crate) fn clamp(value: i32, min: i32, max: i32) -> i32 {
    value.min(max).max(min)
}

/// True when `target` is close enough to `current` that acting on it would
/// only cause chatter.
pub(crate) fn within_hysteresis(target: i32, current: i32, band: i32) -> bool {
    (target - current).abs() <= band
}
