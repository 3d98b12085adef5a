//! Multi-target pipeline: per-target isolation and failure aggregation.

mod common;

use common::{RecordingReporter, StubArtifactSource, init_test_logging, policy_archive};
use rapply_common::testing::{MockTransport, TestLogger, TestPhase};
use rapply_common::{
    ApplyConfig, ApplyError, PipelineOptions, RemoteTarget, Reporter, TargetSpec,
    converge_targets, run_target,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn transport_for(spec: &TargetSpec) -> MockTransport {
    let builder = MockTransport::builder().installed_version("14.4.22");
    match spec.host.as_str() {
        h if h.starts_with("broken") => builder.fail_connect("Connection refused").build(),
        h if h.starts_with("failing") => builder
            .converge_exit(1)
            .run_report(
                r#"{"exception":"Chef::Exceptions::ValidationFailed: Option mode must be a String"}"#,
            )
            .build(),
        _ => builder.converge_exit(0).build(),
    }
}

struct Harness {
    _dir: TempDir,
    options: Arc<PipelineOptions>,
    reporters: Arc<Mutex<HashMap<String, Arc<RecordingReporter>>>>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let options = Arc::new(PipelineOptions::new(policy_archive(&dir)));
        Self {
            _dir: dir,
            options,
            reporters: Arc::default(),
        }
    }

    async fn run(&self, hosts: &[&str]) -> rapply_common::Result<Vec<String>> {
        let specs = hosts.iter().map(|h| TargetSpec::new(*h)).collect();
        let reporters = Arc::clone(&self.reporters);
        let outcomes = converge_targets(
            specs,
            Arc::new(ApplyConfig::default()),
            Arc::new(StubArtifactSource::new("14.4.22")),
            Arc::clone(&self.options),
            transport_for,
            move |spec: &TargetSpec| -> Arc<dyn Reporter> {
                let reporter = Arc::new(RecordingReporter::default());
                reporters
                    .lock()
                    .unwrap()
                    .insert(spec.host.clone(), Arc::clone(&reporter));
                reporter
            },
        )
        .await?;
        Ok(outcomes.into_iter().map(|o| o.prefix).collect())
    }

    fn messages(&self, host: &str) -> Vec<(&'static str, String)> {
        self.reporters.lock().unwrap()[host].messages()
    }
}

#[tokio::test]
async fn test_all_targets_succeed() {
    init_test_logging();
    let logger = TestLogger::for_test("pipeline::test_all_targets_succeed");
    let harness = Harness::new();

    logger.log(TestPhase::Execute, "converging three targets");
    let prefixes = harness.run(&["web1", "web2", "web3"]).await.unwrap();

    logger.log(TestPhase::Verify, "checking reporter output per target");
    assert_eq!(prefixes, vec!["web1", "web2", "web3"]);
    for host in ["web1", "web2", "web3"] {
        let messages = harness.messages(host);
        assert_eq!(messages[0], ("update", "Connecting as root".to_string()));
        assert_eq!(messages[1], ("update", "Connected.".to_string()));
        assert_eq!(
            messages.last().unwrap(),
            &("success", "Successfully converged policy-7d2f.tgz.".to_string())
        );
    }
    logger.pass();
}

#[tokio::test]
async fn test_one_failure_does_not_stop_siblings() {
    init_test_logging();
    let logger = TestLogger::for_test("pipeline::test_one_failure_does_not_stop_siblings");
    let harness = Harness::new();

    logger.log(TestPhase::Execute, "converging one healthy and two failing targets");
    let err = harness
        .run(&["web1", "broken1", "failing1"])
        .await
        .unwrap_err();

    let ApplyError::MultiJobFailure(failed) = err else {
        panic!("expected aggregated failure, got {err:?}");
    };
    let prefixes: Vec<_> = failed.iter().map(|f| f.prefix.as_str()).collect();
    let codes: Vec<_> = failed.iter().map(|f| f.error.code().code_string()).collect();
    logger.log_with_data(
        TestPhase::Verify,
        "aggregated failures",
        serde_json::json!({ "failed": prefixes, "codes": codes }),
    );
    assert_eq!(prefixes, vec!["broken1", "failing1"]);
    assert!(matches!(failed[0].error, ApplyError::Connection { .. }));
    assert!(matches!(failed[1].error, ApplyError::ConvergeFailed { .. }));

    // The healthy sibling ran to completion.
    assert_eq!(harness.messages("web1").last().unwrap().0, "success");

    let broken = harness.messages("broken1");
    assert_eq!(broken.len(), 2);
    assert_eq!(broken[1].0, "error");

    let failing = harness.messages("failing1");
    let failed_update = ("update", "Failed to converge policy-7d2f.tgz.".to_string());
    let position = failing.iter().position(|m| *m == failed_update).unwrap();
    assert_eq!(position, failing.len() - 2);
    let (kind, message) = failing.last().unwrap();
    assert_eq!(*kind, "error");
    assert!(message.starts_with("[RAP-E50"));
    assert_eq!(failing.iter().filter(|(kind, _)| *kind == "error").count(), 1);
    logger.pass();
}

#[tokio::test]
async fn test_single_failure_is_returned_directly() {
    init_test_logging();
    let harness = Harness::new();

    let err = harness.run(&["broken1"]).await.unwrap_err();
    assert!(matches!(err, ApplyError::Connection { ref host, .. } if host == "broken1"));
}

#[tokio::test]
async fn test_run_target_reports_install_progress() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let options =
        PipelineOptions::new(policy_archive(&dir)).with_descriptor("recipe nginx::default");
    let transport = MockTransport::builder().converge_exit(0).build();
    let mut target = RemoteTarget::new(TargetSpec::new("db1").with_user("deploy"), transport);
    let source = StubArtifactSource::new("14.4.22");
    let reporter = RecordingReporter::default();

    run_target(&mut target, &source, &ApplyConfig::default(), &options, &reporter)
        .await
        .unwrap();

    let updates: Vec<String> = reporter
        .messages()
        .into_iter()
        .filter(|(kind, _)| *kind == "update")
        .map(|(_, m)| m)
        .collect();
    assert_eq!(updates[0], "Connecting as deploy");
    assert!(updates.contains(&"Installing agent 14.4.22.".to_string()));
    assert!(updates.contains(&"Applying recipe nginx::default.".to_string()));
    assert_eq!(
        reporter.messages().last().unwrap(),
        &("success", "Successfully converged recipe nginx::default.".to_string())
    );
}

#[tokio::test]
async fn test_run_target_without_install_fails_on_missing_agent() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let options = PipelineOptions::new(policy_archive(&dir)).with_install(false);
    let transport = MockTransport::builder().build();
    let handle = transport.handle();
    let mut target = RemoteTarget::new(TargetSpec::new("db1"), transport);
    let source = StubArtifactSource::new("14.4.22");
    let reporter = RecordingReporter::default();

    let err = run_target(&mut target, &source, &ApplyConfig::default(), &options, &reporter)
        .await
        .unwrap_err();

    assert!(matches!(err, ApplyError::AgentNotInstalled { .. }));
    assert_eq!(source.resolve_count(), 0);
    assert_eq!(handle.count_matching("chef-client"), 0);
}
