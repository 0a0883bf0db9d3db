//! Waiting on eventually-consistent external state.
//!
//! [`RetryPoller`] re-runs a command at a fixed interval until its output
//! contains the expected number of occurrences of a marker string. It is the
//! only retry mechanism in the engine; there is no backoff.
//!
//! [`wait_with_timeout`] is the generic form for conditions that need typed
//! decoding rather than text matching.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::{CommandInvocation, CommandRunner};
use crate::events::EventSender;
use crate::log_sink::LogSink;
use crate::{Error, Result};

/// Interval between poll attempts
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Consecutive failed executions before a poll gives up
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// How a poll ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The expected count was observed
    Matched,
    /// The overall timeout elapsed first
    TimedOut,
    /// Too many consecutive failed executions
    Aborted {
        /// Last failure seen
        last_error: String,
    },
}

impl PollOutcome {
    /// Whether the condition was met
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// Polls a command until its output matches
#[derive(Clone)]
pub struct RetryPoller {
    runner: Arc<dyn CommandRunner>,
    sink: LogSink,
    interval: Duration,
    max_failures: u32,
}

impl RetryPoller {
    /// Create a poller that silences `sink` while polling
    pub fn new(runner: Arc<dyn CommandRunner>, sink: LogSink) -> Self {
        Self {
            runner,
            sink,
            interval: POLL_INTERVAL,
            max_failures: MAX_CONSECUTIVE_FAILURES,
        }
    }

    /// Override the poll interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until `expected` occurrences of `match_text` appear in the output.
    ///
    /// Returns `true` once the count matches, `false` on timeout or after too
    /// many consecutive failures.
    pub async fn poll(
        &self,
        invocation: &CommandInvocation,
        timeout: Duration,
        match_text: &str,
        expected: usize,
        events: &EventSender,
    ) -> bool {
        self.poll_outcome(invocation, timeout, match_text, expected, events)
            .await
            .is_matched()
    }

    /// Like [`RetryPoller::poll`] but maps a miss to [`Error::PollTimeout`] or
    /// [`Error::PollAborted`]
    pub async fn poll_until(
        &self,
        invocation: &CommandInvocation,
        timeout: Duration,
        match_text: &str,
        expected: usize,
        events: &EventSender,
    ) -> Result<()> {
        let description = format!(
            "{} instances of '{}' from command: {}",
            expected, match_text, invocation
        );
        match self
            .poll_outcome(invocation, timeout, match_text, expected, events)
            .await
        {
            PollOutcome::Matched => Ok(()),
            PollOutcome::TimedOut => Err(Error::PollTimeout {
                description,
                timeout,
            }),
            PollOutcome::Aborted { last_error } => Err(Error::PollAborted {
                description,
                failures: self.max_failures,
                last_error,
            }),
        }
    }

    /// Poll and report exactly how the wait ended
    pub async fn poll_outcome(
        &self,
        invocation: &CommandInvocation,
        timeout: Duration,
        match_text: &str,
        expected: usize,
        events: &EventSender,
    ) -> PollOutcome {
        events.progress(format!(
            "checking for {} instances of '{}' from command: {}",
            expected, match_text, invocation
        ));

        let _quiet = self.sink.silence();
        let deadline = Instant::now() + timeout;
        let mut observed = 0usize;
        let mut failures = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => {
                    info!(command = %invocation, observed, expected, "poll timed out");
                    return PollOutcome::TimedOut;
                }
                result = self.runner.execute(invocation) => result,
            };

            let (count, failure) = match result {
                Ok(output) => {
                    let mut combined = output.stdout_str();
                    combined.push_str(&output.stderr_str());
                    let failure = (!output.success() || !output.stderr.is_empty()).then(|| {
                        format!(
                            "exit status {:?}, stderr: {}",
                            output.status,
                            output.stderr_str().trim()
                        )
                    });
                    (combined.matches(match_text).count(), failure)
                }
                Err(e) => (0, Some(e.to_string())),
            };

            match failure {
                Some(err) => {
                    failures += 1;
                    debug!(command = %invocation, failures, error = %err, "poll attempt failed");
                    if failures >= self.max_failures {
                        warn!(command = %invocation, error = %err, "poll aborted");
                        events.progress(format!("err: {}", err));
                        return PollOutcome::Aborted { last_error: err };
                    }
                }
                None => failures = 0,
            }

            if count == expected {
                events.progress(format!(
                    "found {}/{} instances of '{}' from command: {}",
                    count, expected, match_text, invocation
                ));
                return PollOutcome::Matched;
            }
            if count > observed {
                observed = count;
                events.progress(format!(
                    "found {}/{} instances of '{}' from command: {}",
                    count, expected, match_text, invocation
                ));
            }

            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => {
                    info!(command = %invocation, observed, expected, "poll timed out");
                    return PollOutcome::TimedOut;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Result type for polling check functions.
///
/// - `Ok(Some(value))` - Condition met, return the value
/// - `Ok(None)` - Condition not met yet, keep polling
/// - `Err(e)` - Fatal error, stop polling immediately
pub type PollResult<T> = std::result::Result<Option<T>, String>;

/// Poll `check_fn` every `interval` until it yields a value, fails, or
/// `timeout` elapses.
pub async fn wait_with_timeout<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    description: &str,
    mut check_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<T>>,
{
    let start = Instant::now();

    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    return Err(Error::PollTimeout {
                        description: description.to_string(),
                        timeout,
                    });
                }
                debug!("Waiting for {}...", description);
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                return Err(Error::PollAborted {
                    description: description.to_string(),
                    failures: 1,
                    last_error: e,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockCommandRunner};
    use crate::events::{event_bus, Event};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok(stdout: &str) -> crate::Result<CommandOutput> {
        Ok(CommandOutput {
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
            status: Some(0),
        })
    }

    fn scripted(outputs: Vec<crate::Result<CommandOutput>>) -> (Arc<MockCommandRunner>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let outputs = parking_lot::Mutex::new(outputs.into_iter());
        let mut runner = MockCommandRunner::new();
        runner.expect_execute().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            outputs.lock().next().unwrap_or_else(|| ok(""))
        });
        (Arc::new(runner), calls)
    }

    fn machines() -> CommandInvocation {
        CommandInvocation::new("kubectl").args(["get", "machine"])
    }

    fn messages(events: Vec<Event>) -> Vec<String> {
        events.into_iter().map(|e| e.message).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn matches_and_reports_monotonic_progress() {
        let (runner, _) = scripted(vec![
            ok("m1 Provisioning\nm2 Provisioning\nm3 Provisioning"),
            ok("m1 Running\nm2 Provisioning\nm3 Provisioning"),
            ok("m1 Running\nm2 Provisioning\nm3 Provisioning"),
            ok("m1 Running\nm2 Running\nm3 Provisioning"),
            ok("m1 Running\nm2 Running\nm3 Running"),
        ]);
        let poller = RetryPoller::new(runner, LogSink::discard());
        let (tx, mut rx) = event_bus();

        let matched = poller
            .poll(&machines(), Duration::from_secs(60), "Running", 3, &tx)
            .await;

        assert!(matched);
        let msgs = messages(rx.try_collect());
        assert_eq!(
            msgs[0],
            "checking for 3 instances of 'Running' from command: kubectl get machine"
        );
        let found: Vec<_> = msgs.iter().filter(|m| m.starts_with("found")).collect();
        assert_eq!(found.len(), 3);
        assert!(found[0].starts_with("found 1/3"));
        assert!(found[1].starts_with("found 2/3"));
        assert!(found[2].starts_with("found 3/3"));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_spurious_match() {
        let (runner, calls) = scripted(vec![]);
        let poller = RetryPoller::new(runner, LogSink::discard());
        let (tx, _rx) = event_bus();

        let outcome = poller
            .poll_outcome(&machines(), Duration::from_secs(10), "Running", 3, &tx)
            .await;

        assert_eq!(outcome, PollOutcome::TimedOut);
        // Attempts at t=0,3,6,9
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_after_consecutive_failures() {
        let failures = (0..20)
            .map(|_| {
                Err(Error::command_failed(
                    "kubectl get machine",
                    "exit status 1",
                    "connection refused",
                ))
            })
            .collect();
        let (runner, calls) = scripted(failures);
        let poller = RetryPoller::new(runner, LogSink::discard());
        let (tx, _rx) = event_bus();

        let err = poller
            .poll_until(&machines(), Duration::from_secs(3600), "Running", 1, &tx)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PollAborted { failures: 10, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn stderr_on_clean_exit_counts_as_failure() {
        let refused = (0..20)
            .map(|_| {
                Ok(CommandOutput {
                    stdout: Vec::new(),
                    stderr: b"The connection to the server was refused".to_vec(),
                    status: Some(0),
                })
            })
            .collect();
        let (runner, calls) = scripted(refused);
        let poller = RetryPoller::new(runner, LogSink::discard());
        let (tx, _rx) = event_bus();
        let nodes = CommandInvocation::new("kubectl").args(["get", "nodes"]);

        let outcome = poller
            .poll_outcome(&nodes, Duration::from_secs(3600), "Ready", 1, &tx)
            .await;

        let PollOutcome::Aborted { last_error } = outcome else {
            panic!("expected abort, got {:?}", outcome);
        };
        assert!(last_error.contains("connection to the server was refused"));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_budget() {
        let mut outputs: Vec<crate::Result<CommandOutput>> = Vec::new();
        for _ in 0..9 {
            outputs.push(Err(Error::ToolNotFound { name: "x".into() }));
        }
        outputs.push(ok(""));
        for _ in 0..9 {
            outputs.push(Err(Error::ToolNotFound { name: "x".into() }));
        }
        outputs.push(ok("Ready"));
        let (runner, _) = scripted(outputs);
        let poller = RetryPoller::new(runner, LogSink::discard());
        let (tx, _rx) = event_bus();

        assert!(
            poller
                .poll(&machines(), Duration::from_secs(3600), "Ready", 1, &tx)
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sink_is_silenced_during_poll_and_restored() {
        let sink = LogSink::memory();
        let observed = sink.clone();
        let mut runner = MockCommandRunner::new();
        runner.expect_execute().returning(move |_| {
            // Runner output written while polling goes nowhere
            observed.write(b"noise");
            ok("Ready")
        });
        let poller = RetryPoller::new(Arc::new(runner), sink.clone());
        let (tx, _rx) = event_bus();

        assert!(
            poller
                .poll(&machines(), Duration::from_secs(5), "Ready", 1, &tx)
                .await
        );
        assert!(sink.contents().is_empty());
        sink.write(b"after");
        assert_eq!(sink.contents(), b"after");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_with_timeout_returns_value() {
        let attempts = AtomicUsize::new(0);
        let value = wait_with_timeout(
            Duration::from_secs(30),
            Duration::from_secs(1),
            "test condition",
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { Ok(if n >= 2 { Some(n) } else { None }) }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_with_timeout_times_out() {
        let err = wait_with_timeout::<(), _, _>(
            Duration::from_secs(5),
            Duration::from_secs(1),
            "never",
            || async { Ok(None) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::PollTimeout { .. }));
    }

    #[tokio::test]
    async fn wait_with_timeout_stops_on_fatal_error() {
        let err = wait_with_timeout::<(), _, _>(
            Duration::from_secs(5),
            Duration::from_millis(10),
            "fatal",
            || async { Err("boom".to_string()) },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
