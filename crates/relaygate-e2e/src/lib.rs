//! End-to-end test utilities for relaygate
//!
//! This crate provides mock collaborators (proxy, ACME client, service
//! manager, scheduler), a temporary-root harness and a mock TCP service, so
//! the lifecycle manager, the command flows and the forwarders can be tested
//! without nginx, certbot, systemd or cron.

pub mod certificates;
pub mod harness;
pub mod mock_acme;
pub mod mock_proxy;
pub mod mock_scheduler;
pub mod mock_service;
pub mod mock_tcp_service;

pub use certificates::TestCertificates;
pub use harness::{edge_config, test_supervisor_options, TestEnv, TEST_LISTEN_HOST};
pub use mock_acme::MockAcme;
pub use mock_proxy::{MockProxy, ProxyCall};
pub use mock_scheduler::MockScheduler;
pub use mock_service::MockService;
pub use mock_tcp_service::{MockTcpService, TcpServiceMode};
