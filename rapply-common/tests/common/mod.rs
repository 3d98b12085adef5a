#![allow(dead_code)]

pub mod fixtures;
pub mod logging;

pub use fixtures::{RecordingObserver, RecordingReporter, StubArtifactSource, policy_archive};
pub use logging::init_test_logging;

use rapply_common::testing::{MockHandle, MockTransport};
use rapply_common::{RemoteTarget, TargetSpec};

/// A connected target over `transport`, plus the handle for assertions.
pub async fn connected_target(
    transport: MockTransport,
) -> (RemoteTarget<MockTransport>, MockHandle) {
    let handle = transport.handle();
    let mut target = RemoteTarget::new(TargetSpec::new("node1").with_user("deploy"), transport);
    target.connect().await.expect("mock connect");
    (target, handle)
}
