use std::time::Duration;

/// Upper bound of the adaptive-timeout histogram (spec.md §4.6).
pub const RPC_CALL_TIMEOUT_MAX: Duration = Duration::from_secs(10);

/// Width of each histogram bin.
pub const TIMEOUT_BIN_WIDTH: Duration = Duration::from_millis(50);

pub const TIMEOUT_BIN_COUNT: usize =
    (RPC_CALL_TIMEOUT_MAX.as_millis() / TIMEOUT_BIN_WIDTH.as_millis()) as usize;

/// Stats are recomputed from the histogram every this many completed calls.
pub const RECOMPUTE_EVERY: u32 = 16;

/// Multiplicative decay applied to every bin each time stats are recomputed.
pub const HISTOGRAM_DECAY: f64 = 0.95;

/// Floor added to p10 when deriving the stall timeout, so a very tight
/// low-percentile never produces an unrealistically short deadline.
pub const TIMEOUT_BASELINE_MIN: Duration = Duration::from_millis(100);

/// Retry budget for a single outbound call (spec.md §4.6: "design: 2").
pub const MAX_RETRIES: u32 = 2;

pub const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Default throttle: burst capacity and steady-state rate per remote
/// endpoint (teacher precedent: `RateLimitConfig::default()` in
/// `lib-network::handshake::rate_limiter`).
pub const THROTTLE_PER_SECOND: u32 = 20;
pub const THROTTLE_BURST: u32 = 40;

/// Token secret rotation period (spec.md §4.7).
pub const TOKEN_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);
