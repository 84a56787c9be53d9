use std::time::Duration;

use tracing::warn;

/// Default acceptance threshold, in CIEDE2000 units.
pub const DEFAULT_TOLERANCE: f32 = 10.0;

/// Engine settings passed explicitly into every linking run.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// ΔE at or below which a candidate is accepted.
    pub tolerance: f32,
    /// Wall-clock budget for one `link_colors` invocation.
    pub budget: Duration,
    /// Delay between binding confirmation re-reads.
    pub confirm_interval: Duration,
    /// Give up confirming a binding after this long.
    pub confirm_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            budget: Duration::from_secs(30),
            confirm_interval: Duration::from_millis(20),
            confirm_timeout: Duration::from_millis(200),
        }
    }
}

impl LinkConfig {
    /// Pick the tolerance for a request, falling back to the configured
    /// default when the requested value is missing, NaN or negative.
    pub fn effective_tolerance(&self, requested: Option<f32>) -> f32 {
        match requested {
            None => self.tolerance,
            Some(t) if t.is_nan() || t < 0.0 => {
                warn!(requested = t, fallback = self.tolerance, "ignoring invalid tolerance");
                self.tolerance
            }
            Some(t) => t,
        }
    }

    /// Number of confirmation re-reads that fit in `confirm_timeout`.
    pub fn confirm_attempts(&self) -> u32 {
        let interval = self.confirm_interval.as_millis().max(1);
        let attempts = self.confirm_timeout.as_millis() / interval;
        attempts.clamp(1, u32::MAX as u128) as u32
    }
}
