//! Unit-of-work contract shared by the install and converge steps.
//!
//! An [`Action`] performs one step and reports progress through a
//! [`Notifier`]. [`run_action`] wraps the step in a tracing span, records
//! its duration, forwards any failure to the observer as an
//! [`ActionEvent::Error`], and then returns that failure to the caller.

use crate::errors::{ErrorCode, Result};
use crate::version_gate::AgentVersion;
use std::future::Future;
use std::time::Instant;
use tracing::{Instrument, debug, info_span, trace};

/// Progress events emitted by actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    AlreadyInstalled {
        version: AgentVersion,
    },
    Downloading,
    Uploading,
    Installing {
        version: String,
        upgrade_from: Option<AgentVersion>,
    },
    InstallComplete {
        version: String,
        upgrade_from: Option<AgentVersion>,
    },
    CreatingRemotePolicy,
    UploadingTrustedCerts,
    RunningChef,
    Success,
    Reboot,
    ConvergeError,
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ActionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AlreadyInstalled { .. } => "already_installed",
            Self::Downloading => "downloading",
            Self::Uploading => "uploading",
            Self::Installing { .. } => "installing",
            Self::InstallComplete { .. } => "install_complete",
            Self::CreatingRemotePolicy => "creating_remote_policy",
            Self::UploadingTrustedCerts => "uploading_trusted_certs",
            Self::RunningChef => "running_chef",
            Self::Success => "success",
            Self::Reboot => "reboot",
            Self::ConvergeError => "converge_error",
            Self::Error { .. } => "error",
        }
    }
}

pub trait ActionObserver: Send + Sync {
    fn on_event(&self, event: &ActionEvent);
}

impl<F> ActionObserver for F
where
    F: Fn(&ActionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ActionEvent) {
        self(event)
    }
}

/// Handle an action uses to emit events.
pub struct Notifier<'a> {
    action: &'static str,
    observer: Option<&'a dyn ActionObserver>,
}

impl<'a> Notifier<'a> {
    pub fn new(action: &'static str, observer: Option<&'a dyn ActionObserver>) -> Self {
        Self { action, observer }
    }

    pub fn notify(&self, event: ActionEvent) {
        trace!(action = self.action, event = event.name(), "Action event");
        if let Some(observer) = self.observer {
            observer.on_event(&event);
        }
    }
}

pub trait Action: Send {
    fn name(&self) -> &'static str;

    fn perform(&mut self, notifier: &Notifier<'_>) -> impl Future<Output = Result<()>> + Send;
}

/// Run one action to completion.
pub async fn run_action<A: Action>(
    action: &mut A,
    observer: Option<&dyn ActionObserver>,
) -> Result<()> {
    let name = action.name();
    let notifier = Notifier::new(name, observer);
    let span = info_span!("action", name);

    let started = Instant::now();
    let result = action.perform(&notifier).instrument(span.clone()).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    span.in_scope(|| debug!(elapsed_ms, ok = result.is_ok(), "Action finished"));

    if let Err(err) = &result {
        notifier.notify(ActionEvent::Error {
            code: err.code(),
            message: err.to_string(),
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApplyError;
    use std::sync::Mutex;

    struct Scripted {
        fail: bool,
    }

    impl Action for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn perform(&mut self, notifier: &Notifier<'_>) -> Result<()> {
            notifier.notify(ActionEvent::RunningChef);
            if self.fail {
                Err(ApplyError::AgentNotInstalled {
                    host: "node1".to_string(),
                })
            } else {
                notifier.notify(ActionEvent::Success);
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_success_emits_no_error_event() {
        let events = Mutex::new(Vec::new());
        let observer = |e: &ActionEvent| events.lock().unwrap().push(e.name());
        let mut action = Scripted { fail: false };

        run_action(&mut action, Some(&observer as &dyn ActionObserver)).await.unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["running_chef", "success"]);
    }

    #[tokio::test]
    async fn test_failure_is_notified_once_then_returned() {
        let events = Mutex::new(Vec::new());
        let observer = |e: &ActionEvent| events.lock().unwrap().push(e.clone());
        let mut action = Scripted { fail: true };

        let err = run_action(&mut action, Some(&observer as &dyn ActionObserver))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::AgentNotInstalled { .. }));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ActionEvent::Error {
                code: ErrorCode::AgentNotInstalled,
                message: "the configuration agent is not installed on node1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_runs_without_observer() {
        let mut action = Scripted { fail: true };
        assert!(run_action(&mut action, None).await.is_err());
    }
}
