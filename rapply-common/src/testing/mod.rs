//! Test support shared by unit and integration tests.

pub mod log;
pub mod mock_transport;

pub use log::{TestLogEntry, TestLogger, TestPhase, init_global_test_logging};
pub use mock_transport::{MockHandle, MockTransport, MockTransportBuilder, UploadRecord};
