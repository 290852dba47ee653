//! Backoff delay strategies.
//!
//! All functions take a 0-based attempt index: attempt 0 is the wait before the
//! second call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// `base * factor^attempt`.
pub fn exponential_backoff(attempt: u32, base: Duration, factor: f64) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    scale(base, factor.powi(exponent))
}

/// `delay * factor`, saturating at `u64::MAX` nanoseconds.
pub(crate) fn scale(delay: Duration, factor: f64) -> Duration {
    let nanos = (delay.as_nanos() as f64 * factor).round();
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        Duration::from_nanos(u64::MAX)
    } else if nanos <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(nanos as u64)
    }
}

/// `base * (attempt + 1)`.
pub fn linear_backoff(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt.saturating_add(1))
}

/// Always `base`.
pub fn constant_backoff(_attempt: u32, base: Duration) -> Duration {
    base
}

/// `base * fib(attempt)` with fib(0) = fib(1) = 1.
pub fn fibonacci_backoff(attempt: u32, base: Duration) -> Duration {
    let (mut prev, mut current) = (1u32, 1u32);
    for _ in 1..attempt {
        let next = prev.saturating_add(current);
        prev = current;
        current = next;
    }
    base.saturating_mul(current)
}

/// Add up to 10% of `delay`, uniformly distributed.
pub fn with_jitter(delay: Duration) -> Duration {
    let range = delay.as_nanos() / 10;
    if range == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..range);
    delay + Duration::from_nanos(u64::try_from(jitter).unwrap_or(u64::MAX))
}

/// Caller-supplied delay function of the attempt index.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// How the wait between attempts grows.
#[derive(Clone, Default)]
pub enum BackoffStrategy {
    /// Multiply the previous delay by the policy's backoff factor, clamp, then jitter.
    #[default]
    Progressive,
    /// `initial_delay * factor^attempt`.
    Exponential { factor: f64 },
    /// `initial_delay * (attempt + 1)`.
    Linear,
    /// `initial_delay` every time.
    Constant,
    /// `initial_delay * fib(attempt)`.
    Fibonacci,
    /// Arbitrary function of the attempt index.
    Custom(BackoffFn),
}

impl BackoffStrategy {
    pub fn custom(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        BackoffStrategy::Custom(Arc::new(f))
    }

    /// Delay for `attempt`, or `None` for [`BackoffStrategy::Progressive`],
    /// which depends on the previous delay rather than the index.
    pub fn delay(&self, attempt: u32, base: Duration) -> Option<Duration> {
        match self {
            BackoffStrategy::Progressive => None,
            BackoffStrategy::Exponential { factor } => Some(exponential_backoff(attempt, base, *factor)),
            BackoffStrategy::Linear => Some(linear_backoff(attempt, base)),
            BackoffStrategy::Constant => Some(constant_backoff(attempt, base)),
            BackoffStrategy::Fibonacci => Some(fibonacci_backoff(attempt, base)),
            BackoffStrategy::Custom(f) => Some(f(attempt)),
        }
    }
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffStrategy::Progressive => f.write_str("Progressive"),
            BackoffStrategy::Exponential { factor } => f.debug_struct("Exponential").field("factor", factor).finish(),
            BackoffStrategy::Linear => f.write_str("Linear"),
            BackoffStrategy::Constant => f.write_str("Constant"),
            BackoffStrategy::Fibonacci => f.write_str("Fibonacci"),
            BackoffStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
