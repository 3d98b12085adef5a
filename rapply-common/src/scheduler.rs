//! Fan-out/fan-in runner for per-target pipelines.
//!
//! Every [`Job`] runs on its own tokio task. A failing job never cancels
//! its siblings; results are collected only after all tasks have joined.

use crate::errors::{ApplyError, FailedJob, Result};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, join_all};
use std::any::Any;
use std::future::Future;
use tokio::task::JoinError;
use tracing::{debug, error, info};

/// One pipeline, tagged with the prefix used when reporting it.
pub struct Job {
    pub prefix: String,
    future: BoxFuture<'static, Result<()>>,
}

impl Job {
    pub fn new<F>(prefix: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            prefix: prefix.into(),
            future: Box::pin(future),
        }
    }
}

/// A job that finished without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub prefix: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JobScheduler;

impl JobScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Run all jobs concurrently and wait for every one of them.
    ///
    /// With no failures the per-job outcomes are returned. A single failed
    /// job surfaces its own error; more than one yields `MultiJobFailure`.
    pub async fn run(&self, jobs: Vec<Job>) -> Result<Vec<JobOutcome>> {
        let total = jobs.len();
        info!(jobs = total, "Starting jobs");

        let mut prefixes = Vec::with_capacity(total);
        let mut handles = Vec::with_capacity(total);
        for job in jobs {
            let prefix = job.prefix;
            let future = job.future;
            prefixes.push(prefix.clone());
            handles.push(tokio::spawn(async move {
                let started_at = Utc::now();
                let result = future.await;
                (started_at, Utc::now(), result)
            }));
        }

        let joined = join_all(handles).await;

        let mut outcomes = Vec::new();
        let mut failed = Vec::new();
        for (prefix, joined) in prefixes.into_iter().zip(joined) {
            match joined {
                Ok((started_at, finished_at, Ok(()))) => {
                    debug!(prefix = %prefix, "Job succeeded");
                    outcomes.push(JobOutcome {
                        prefix,
                        started_at,
                        finished_at,
                    });
                }
                Ok((_, _, Err(error))) => {
                    error!(prefix = %prefix, code = %error.code(), error = %error, "Job failed");
                    failed.push(FailedJob { prefix, error });
                }
                Err(join_error) => {
                    let message = join_error_message(join_error);
                    error!(prefix = %prefix, message = %message, "Job task aborted");
                    failed.push(FailedJob {
                        error: ApplyError::JobPanicked {
                            prefix: prefix.clone(),
                            message,
                        },
                        prefix,
                    });
                }
            }
        }

        info!(
            jobs = total,
            succeeded = outcomes.len(),
            failed = failed.len(),
            "Jobs complete"
        );

        if failed.is_empty() {
            Ok(outcomes)
        } else if total == 1 && failed.len() == 1 {
            Err(failed.remove(0).error)
        } else {
            Err(ApplyError::MultiJobFailure(failed))
        }
    }
}

fn join_error_message(error: JoinError) -> String {
    if error.is_panic() {
        panic_message(error.into_panic())
    } else {
        "task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "panic with non-string payload".to_string(),
        },
    }
}
