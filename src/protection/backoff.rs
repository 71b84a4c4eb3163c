use crate::config::RestartPolicy;
use std::time::Duration;

/// How the circuit-open cooldown grows with repeated trips
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Same cooldown every trip
    Fixed,
    /// cooldown = initial * multiplier^(trip - 1), capped
    Exponential { multiplier: f64, max: Duration },
}

impl BackoffStrategy {
    pub fn from_policy(policy: &RestartPolicy) -> Self {
        if policy.exponential_backoff {
            BackoffStrategy::Exponential {
                multiplier: policy.cooldown_multiplier,
                max: policy.max_cooldown(),
            }
        } else {
            BackoffStrategy::Fixed
        }
    }

    /// Cooldown for the given trip (1 for the first time the circuit opens)
    pub fn cooldown(&self, initial: Duration, trip: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Exponential { multiplier, max } => {
                let exponent = trip.saturating_sub(1).min(64) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}
