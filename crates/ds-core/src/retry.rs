//! Bounded retry policies

use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^n` after the n-th failed attempt (zero-based)
    Exponential { base: Duration },
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Settings writes: 3 attempts, 100ms then 200ms.
pub const SETTINGS_RETRY: RetryPolicy = RetryPolicy::exponential(3, Duration::from_millis(100));

/// Cleanup verification: 3 attempts, 100ms apart.
pub const CLEANUP_RETRY: RetryPolicy = RetryPolicy::fixed(3, Duration::from_millis(100));

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub const fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base },
        }
    }

    /// Delay after the `failed`-th failed attempt (zero-based).
    pub fn delay(&self, failed: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base } => base.saturating_mul(1u32.checked_shl(failed).unwrap_or(u32::MAX)),
        }
    }

    /// Run `op` until it succeeds or the attempts run out.
    ///
    /// `op` receives the zero-based attempt number. At least one attempt is
    /// always made.
    pub fn run<T, E>(
        &self,
        sleeper: &dyn Sleeper,
        mut op: impl FnMut(u32) -> Result<T, E>,
    ) -> Attempted<T, E> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt + 1,
                    }
                }
                Err(err) if attempt + 1 >= max_attempts => {
                    return Attempted {
                        result: Err(err),
                        attempts: attempt + 1,
                    }
                }
                Err(_) => {
                    let delay = self.delay(attempt);
                    log::debug!("attempt {} failed, retrying in {:?}", attempt + 1, delay);
                    sleeper.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Final result of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

// =============================================================================
// Sleepers
// =============================================================================

/// Waits between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Does not wait at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSleeper;

impl Sleeper for NoopSleeper {
    fn sleep(&self, _duration: Duration) {}
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.delays.borrow_mut().push(duration);
        }
    }

    #[test]
    fn test_exponential_delays() {
        let policy = SETTINGS_RETRY;
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_fixed_delays() {
        assert_eq!(CLEANUP_RETRY.delay(0), CLEANUP_RETRY.delay(5));
    }

    #[test]
    fn test_run_stops_on_success() {
        let sleeper = RecordingSleeper::default();
        let out = SETTINGS_RETRY.run(&sleeper, |attempt| if attempt == 1 { Ok("done") } else { Err(()) });
        assert_eq!(out.result, Ok("done"));
        assert_eq!(out.attempts, 2);
        assert_eq!(*sleeper.delays.borrow(), vec![Duration::from_millis(100)]);
    }

    #[test]
    fn test_run_gives_up_after_max_attempts() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let out: Attempted<(), &str> = SETTINGS_RETRY.run(&sleeper, |_| {
            calls += 1;
            Err("nope")
        });
        assert_eq!(out.result, Err("nope"));
        assert_eq!(out.attempts, 3);
        assert_eq!(calls, 3);
        assert_eq!(
            *sleeper.delays.borrow(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::fixed(0, Duration::ZERO);
        let out: Attempted<(), ()> = policy.run(&NoopSleeper, |_| Err(()));
        assert_eq!(out.attempts, 1);
    }
}
