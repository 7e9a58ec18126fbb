//! Attempt/backoff/timeout wrapper around a migration run.
//!
//! Only transient infrastructure errors are retried; a malformed export or a
//! run already in progress fails the same way every time.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::MigrationResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 2`; the last entry repeats.
    pub backoff: Vec<Duration>,
    /// Per-attempt ceiling, handed to the run as its deadline.
    pub timeout: Duration,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_secs(60),
                Duration::from_secs(5 * 60),
                Duration::from_secs(15 * 60),
            ],
            timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl JobPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug)]
pub struct JobOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// Call `attempt` with a fresh deadline until it succeeds, fails with a
/// non-transient error, or the attempts run out.
pub fn run_job<T, F>(
    policy: &JobPolicy,
    sleeper: &mut dyn Sleeper,
    mut attempt: F,
) -> MigrationResult<JobOutcome<T>>
where
    F: FnMut(Instant) -> MigrationResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut number = 1;
    loop {
        let deadline = Instant::now() + policy.timeout;
        match attempt(deadline) {
            Ok(value) => {
                return Ok(JobOutcome {
                    value,
                    attempts: number,
                });
            }
            Err(err) if err.is_transient() && number < max_attempts => {
                let delay = policy.delay_after(number);
                tracing::warn!(
                    attempt = number,
                    max_attempts,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "transient failure; retrying migration job"
                );
                sleeper.sleep(delay);
                number += 1;
            }
            Err(err) => {
                tracing::error!(attempt = number, error = %err, "migration job failed");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Vec<Duration>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration);
        }
    }

    fn busy() -> MigrationError {
        MigrationError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn transient_errors_are_retried_with_backoff() {
        let policy = JobPolicy::default();
        let mut sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let outcome = run_job(&policy, &mut sleeper, |_| {
            calls += 1;
            if calls < 3 { Err(busy()) } else { Ok("done") }
        })
        .expect("third attempt succeeds");

        assert_eq!(outcome.value, "done");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            sleeper.slept,
            vec![Duration::from_secs(60), Duration::from_secs(300)]
        );
    }

    #[test]
    fn attempts_are_capped() {
        let policy = JobPolicy {
            max_attempts: 2,
            ..JobPolicy::default()
        };
        let mut sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let err = run_job::<(), _>(&policy, &mut sleeper, |_| {
            calls += 1;
            Err(busy())
        })
        .expect_err("gives up");
        assert!(err.is_transient());
        assert_eq!(calls, 2);
    }

    #[test]
    fn data_errors_are_not_retried() {
        let policy = JobPolicy::default();
        let mut sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let err = run_job::<(), _>(&policy, &mut sleeper, |_| {
            calls += 1;
            Err(MigrationError::Malformed("not an object".to_string()))
        })
        .expect_err("fails");
        assert!(matches!(err, MigrationError::Malformed(_)));
        assert_eq!(calls, 1);
        assert!(sleeper.slept.is_empty());
    }

    #[test]
    fn backoff_repeats_last_delay() {
        let policy = JobPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(60));
        assert_eq!(policy.delay_after(7), Duration::from_secs(900));
    }
}
