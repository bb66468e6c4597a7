//! Polling a long-running job until it reaches a terminal state.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::backoff::PollDelays;
use crate::clock::Clock;
use crate::error::{Error, JobError, Result};
use crate::types::{Job, JobStatus};

/// Tuning for [`poll_job`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    pub interval: Duration,
    /// Overall budget measured from the start of polling.
    pub timeout: Duration,
    /// Report `failed`/`canceled` as [`Error::Job`] instead of returning the job.
    pub throw_on_error: bool,
    /// Growth factor between polls; `<= 1` keeps the delay constant.
    pub backoff_multiplier: f64,
    pub max_interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1_000),
            timeout: Duration::from_millis(60_000),
            throw_on_error: true,
            backoff_multiplier: 1.5,
            max_interval: Duration::from_millis(10_000),
        }
    }
}

impl PollOptions {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn throw_on_error(mut self, throw_on_error: bool) -> Self {
        self.throw_on_error = throw_on_error;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Disable growth: every delay equals `interval`.
    pub fn constant(self) -> Self {
        self.backoff_multiplier(1.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Usage("poll interval must be > 0".to_string()));
        }
        if !self.backoff_multiplier.is_finite() {
            return Err(Error::Usage(format!("backoff multiplier {} is not finite", self.backoff_multiplier)));
        }
        if self.backoff_multiplier > 1.0 && self.max_interval.is_zero() {
            return Err(Error::Usage("max poll interval must be > 0 when backoff is enabled".to_string()));
        }
        Ok(())
    }

    fn delays(&self) -> PollDelays {
        PollDelays::new(self.interval, self.backoff_multiplier, self.max_interval)
    }
}

/// Anything that can report the current state of a job.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn job(&self, job_id: &str) -> Result<Job>;
}

/// Poll `job_id` until it is terminal or `options.timeout` has elapsed.
///
/// Status fetches are strictly sequential. The deadline is checked before
/// every fetch, so no fetch starts after the budget is spent, and the last
/// sleep is cut short at the deadline. Errors from `source` propagate
/// immediately.
pub async fn poll_job(source: &dyn JobSource, clock: &dyn Clock, job_id: &str, options: &PollOptions) -> Result<Job> {
    options.validate()?;
    let started = clock.now();
    let mut delays = options.delays();
    let mut polls = 0u32;

    let timed_out = |polls: u32| -> Result<Job> {
        info!(job_id, polls, timeout_ms = options.timeout.as_millis() as u64, "job polling timed out");
        Err(Error::JobTimeout { job_id: job_id.to_string(), timeout: options.timeout })
    };

    loop {
        if clock.now().saturating_duration_since(started) > options.timeout {
            return timed_out(polls);
        }

        let job = source.job(job_id).await?;
        polls += 1;
        debug!(job_id, status = %job.status, progress = job.progress, polls, "polled job");

        match job.status {
            JobStatus::Succeeded => return Ok(job),
            JobStatus::Failed | JobStatus::Canceled if options.throw_on_error => {
                return Err(JobError::from_job(job).into());
            }
            JobStatus::Failed | JobStatus::Canceled => return Ok(job),
            JobStatus::Queued | JobStatus::Running => {}
        }

        // Never sleep past the deadline.
        let remaining = options.timeout.saturating_sub(clock.now().saturating_duration_since(started));
        if remaining.is_zero() {
            return timed_out(polls);
        }
        // PollDelays never ends.
        let delay = delays.next().unwrap_or(options.max_interval);
        clock.sleep(delay.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::clock::MockClock;
    use crate::types::Problem;

    /// Replays job states; each fetch optionally costs virtual time.
    struct ScriptedJobs {
        states: Mutex<VecDeque<JobStatus>>,
        fetches: Mutex<Vec<Duration>>,
        clock: MockClock,
        latency: Duration,
    }

    impl ScriptedJobs {
        fn new(clock: &MockClock, states: impl IntoIterator<Item = JobStatus>) -> Self {
            Self {
                states: Mutex::new(states.into_iter().collect()),
                fetches: Mutex::new(Vec::new()),
                clock: clock.clone(),
                latency: Duration::ZERO,
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn fetch_times(&self) -> Vec<Duration> {
            self.fetches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobSource for ScriptedJobs {
        async fn job(&self, job_id: &str) -> Result<Job> {
            self.fetches.lock().unwrap().push(self.clock.elapsed());
            self.clock.advance(self.latency);
            let mut states = self.states.lock().unwrap();
            let status = if states.len() > 1 { states.pop_front().unwrap() } else { *states.front().unwrap() };
            let error = matches!(status, JobStatus::Failed).then(|| Problem {
                problem_type: None,
                title: "Render failed".to_string(),
                status: 500,
                detail: Some("font missing".to_string()),
                instance: None,
                code: None,
                correlation_id: Some("corr-9".to_string()),
            });
            Ok(Job {
                id: job_id.to_string(),
                status,
                progress: None,
                stage: None,
                submitted_at: "2024-01-01T00:00:00Z".to_string(),
                updated_at: None,
                artifacts: None,
                error,
            })
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test]
    async fn returns_immediately_when_already_succeeded() {
        let clock = MockClock::new();
        let jobs = ScriptedJobs::new(&clock, [JobStatus::Succeeded]);
        let job = poll_job(&jobs, &clock, "j1", &PollOptions::default()).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(jobs.fetch_times().len(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn backs_off_between_non_terminal_polls() {
        let clock = MockClock::new();
        let jobs = ScriptedJobs::new(&clock, [JobStatus::Queued, JobStatus::Running, JobStatus::Succeeded]);
        poll_job(&jobs, &clock, "j1", &PollOptions::default()).await.unwrap();
        assert_eq!(clock.sleeps(), vec![ms(1000), ms(1500)]);
        assert_eq!(jobs.fetch_times().len(), 3);
    }

    #[tokio::test]
    async fn delays_are_capped_and_monotonic() {
        let clock = MockClock::new();
        let states = std::iter::repeat(JobStatus::Running).take(9).chain([JobStatus::Succeeded]);
        let jobs = ScriptedJobs::new(&clock, states);
        let options = PollOptions::default().timeout(Duration::from_secs(600));
        poll_job(&jobs, &clock, "j1", &options).await.unwrap();

        let sleeps = clock.sleeps();
        assert_eq!(&sleeps[..7], &[ms(1000), ms(1500), ms(2250), ms(3375), ms(5062), ms(7593), ms(10000)]);
        assert!(sleeps.windows(2).all(|w| w[0] <= w[1]));
        assert!(sleeps.iter().all(|d| *d <= ms(10000)));
    }

    #[tokio::test]
    async fn constant_delay_when_backoff_disabled() {
        let clock = MockClock::new();
        let jobs = ScriptedJobs::new(&clock, [JobStatus::Queued, JobStatus::Running, JobStatus::Running, JobStatus::Succeeded]);
        let options = PollOptions::default().interval(ms(250)).backoff_multiplier(0.5);
        poll_job(&jobs, &clock, "j1", &options).await.unwrap();
        assert_eq!(clock.sleeps(), vec![ms(250); 3]);
    }

    #[tokio::test]
    async fn failed_job_raises_job_error() {
        let clock = MockClock::new();
        let jobs = ScriptedJobs::new(&clock, [JobStatus::Running, JobStatus::Failed]);
        let err = poll_job(&jobs, &clock, "j1", &PollOptions::default()).await.unwrap_err();
        match err {
            Error::Job(e) => {
                assert_eq!(e.status, JobStatus::Failed);
                assert_eq!(e.detail, "font missing");
                assert_eq!(e.correlation_id(), Some("corr-9"));
            }
            other => panic!("expected job error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_job_is_returned_when_not_throwing() {
        let clock = MockClock::new();
        let jobs = ScriptedJobs::new(&clock, [JobStatus::Canceled]);
        let job = poll_job(&jobs, &clock, "j1", &PollOptions::default().throw_on_error(false)).await.unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
        assert_eq!(jobs.fetch_times().len(), 1);
    }

    #[tokio::test]
    async fn times_out_without_polling_after_deadline() {
        let clock = MockClock::new();
        let jobs = ScriptedJobs::new(&clock, [JobStatus::Running]).with_latency(ms(100));
        let options = PollOptions::default().interval(ms(1000)).timeout(ms(3000)).constant();

        let err = poll_job(&jobs, &clock, "j-slow", &options).await.unwrap_err();
        assert!(matches!(err, Error::JobTimeout { ref job_id, timeout } if job_id == "j-slow" && timeout == ms(3000)));
        let fetches = jobs.fetch_times();
        assert_eq!(fetches, vec![ms(0), ms(1100), ms(2200), ms(3000)]);
        assert!(fetches.iter().all(|t| *t <= ms(3000)));
        assert_eq!(clock.sleeps(), vec![ms(1000), ms(1000), ms(700)]);
    }

    #[tokio::test]
    async fn last_sleep_is_cut_to_the_remaining_budget() {
        let clock = MockClock::new();
        let jobs = ScriptedJobs::new(&clock, [JobStatus::Running]);
        let options = PollOptions::default().timeout(ms(2000));

        let err = poll_job(&jobs, &clock, "j1", &options).await.unwrap_err();
        assert!(matches!(err, Error::JobTimeout { .. }));
        assert_eq!(clock.sleeps(), vec![ms(1000), ms(1000)]);
        assert_eq!(clock.elapsed(), ms(2000));
        assert_eq!(jobs.fetch_times(), vec![ms(0), ms(1000), ms(2000)]);
    }

    #[tokio::test]
    async fn invalid_options_fail_before_polling() {
        let clock = MockClock::new();
        let jobs = ScriptedJobs::new(&clock, [JobStatus::Succeeded]);
        let zero = PollOptions::default().interval(Duration::ZERO);
        assert!(matches!(poll_job(&jobs, &clock, "j", &zero).await, Err(Error::Usage(_))));
        let nan = PollOptions::default().backoff_multiplier(f64::NAN);
        assert!(matches!(poll_job(&jobs, &clock, "j", &nan).await, Err(Error::Usage(_))));
        let no_cap = PollOptions::default().max_interval(Duration::ZERO);
        assert!(matches!(poll_job(&jobs, &clock, "j", &no_cap).await, Err(Error::Usage(_))));
        assert!(jobs.fetch_times().is_empty());

        // Without growth the cap is unused.
        let constant = PollOptions::default().max_interval(Duration::ZERO).constant();
        assert!(constant.validate().is_ok());
    }
}
