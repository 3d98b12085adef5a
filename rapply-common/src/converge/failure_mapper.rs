//! Maps the `exception` line of a remote run report to a [`ConvergeFailure`].

use crate::errors::{ApplyError, ConvergeFailure};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static INVALID_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Chef::Exceptions::ValidationFailed: Option action must be equal to one of: (.*)!\s+You passed :(\S+?)\.?$",
    )
    .expect("valid regex")
});

static VALIDATION_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Chef::Exceptions::ValidationFailed: (.*)").expect("valid regex")
});

static NO_SUCH_RESOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Chef::Exceptions::NoSuchResourceType: Cannot find a resource for (\S+) on")
        .expect("valid regex")
});

static UNDEFINED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:NameError|NoMethodError): (undefined (?:local variable or method|method) .*)")
        .expect("valid regex")
});

static RESOURCE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+\[[^\]]*\]) \([^)]*\) had an error: (.*)").expect("valid regex")
});

#[derive(Debug, Deserialize)]
struct RunReport {
    exception: Option<String>,
}

/// Classify one exception line. Unrecognized text maps to `Unknown`.
pub fn map_exception(exception: &str) -> ConvergeFailure {
    let exception = exception.trim();

    if let Some(caps) = INVALID_ACTION.captures(exception) {
        return ConvergeFailure::InvalidAction {
            valid_actions: caps[1].trim().to_string(),
            given: caps[2].to_string(),
        };
    }
    if let Some(caps) = NO_SUCH_RESOURCE.captures(exception) {
        return ConvergeFailure::NoSuchResource {
            resource: caps[1].to_string(),
        };
    }
    if let Some(caps) = VALIDATION_FAILED.captures(exception) {
        return ConvergeFailure::ValidationFailed {
            message: caps[1].trim().to_string(),
        };
    }
    if let Some(caps) = UNDEFINED_NAME.captures(exception) {
        return ConvergeFailure::UndefinedName {
            message: caps[1].trim().to_string(),
        };
    }
    if let Some(caps) = RESOURCE_ERROR.captures(exception) {
        return ConvergeFailure::ResourceError {
            resource: caps[1].to_string(),
            message: caps[2].trim().to_string(),
        };
    }
    ConvergeFailure::Unknown {
        message: exception.to_string(),
    }
}

/// Turn the fetched report (if any) into the error for a failed run.
///
/// Missing or malformed report content yields `ConvergeReportUnreadable`.
pub fn failure_from_report(host: &str, report_path: &str, content: Option<&str>) -> ApplyError {
    let unreadable = || ApplyError::ConvergeReportUnreadable {
        host: host.to_string(),
        path: report_path.to_string(),
    };
    let Some(content) = content else {
        return unreadable();
    };
    let Ok(report) = serde_json::from_str::<RunReport>(content) else {
        return unreadable();
    };

    let failure = match report.exception.as_deref() {
        Some(exception) if !exception.trim().is_empty() => map_exception(exception),
        _ => ConvergeFailure::Unknown {
            message: "the run report did not record an exception".to_string(),
        },
    };
    ApplyError::ConvergeFailed {
        host: host.to_string(),
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_action() {
        let failure = map_exception(
            "Chef::Exceptions::ValidationFailed: Option action must be equal to one of: nothing, install, upgrade!  You passed :instal.",
        );
        assert_eq!(
            failure,
            ConvergeFailure::InvalidAction {
                valid_actions: "nothing, install, upgrade".to_string(),
                given: "instal".to_string(),
            }
        );
    }

    #[test]
    fn test_validation_failed() {
        let failure = map_exception(
            "Chef::Exceptions::ValidationFailed: mode must be a String or Integer",
        );
        assert_eq!(
            failure,
            ConvergeFailure::ValidationFailed {
                message: "mode must be a String or Integer".to_string()
            }
        );
    }

    #[test]
    fn test_no_such_resource() {
        let failure = map_exception(
            "Chef::Exceptions::NoSuchResourceType: Cannot find a resource for packge on ubuntu version 22.04",
        );
        assert_eq!(
            failure,
            ConvergeFailure::NoSuchResource {
                resource: "packge".to_string()
            }
        );
    }

    #[test]
    fn test_undefined_name() {
        let failure = map_exception(
            "NameError: undefined local variable or method `nginx' for cookbook: cw_tmp",
        );
        assert!(matches!(
            failure,
            ConvergeFailure::UndefinedName { message } if message.contains("`nginx'")
        ));
    }

    #[test]
    fn test_resource_error() {
        let failure = map_exception(
            "package[nginx] (cw_tmp::default line 1) had an error: Mixlib::ShellOut::ShellCommandFailed: Expected process to exit with [0]",
        );
        match failure {
            ConvergeFailure::ResourceError { resource, message } => {
                assert_eq!(resource, "package[nginx]");
                assert!(message.starts_with("Mixlib::ShellOut"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_keeps_message() {
        assert_eq!(
            map_exception("boom"),
            ConvergeFailure::Unknown {
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_report_outcomes() {
        let path = "/var/chef-workstation/cache/run-report.json";
        let err = failure_from_report("web1", path, Some(r#"{"exception":"boom"}"#));
        assert!(matches!(
            err,
            ApplyError::ConvergeFailed {
                failure: ConvergeFailure::Unknown { ref message },
                ..
            } if message == "boom"
        ));

        let err = failure_from_report("web1", path, None);
        assert!(matches!(
            err,
            ApplyError::ConvergeReportUnreadable { ref path, .. }
                if path.ends_with("run-report.json")
        ));

        let err = failure_from_report("web1", path, Some("{truncated"));
        assert!(matches!(err, ApplyError::ConvergeReportUnreadable { .. }));

        let err = failure_from_report("web1", path, Some(r#"{"exception":null}"#));
        assert!(matches!(err, ApplyError::ConvergeFailed { .. }));
    }
}
