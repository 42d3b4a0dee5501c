use std::time::Duration;

/// Wait after slew command before confirming position with new solve
pub const GOTO_SETTLE_TIME: Duration = Duration::from_secs(5);

/// Exposure change step of handpad up/down buttons (seconds)
pub const EXPOSURE_STEP: f64 = 1.0;

/// Gain change step of handpad up/down buttons
pub const GAIN_STEP: i32 = 5;
