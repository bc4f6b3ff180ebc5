//! relaygate core library
//!
//! The port forwarding supervisor, the domain and edge lifecycle manager and
//! the command flows built on top of them. The `relaygate` binary and the
//! interactive menu are thin shells around this crate.

pub mod collaborators;
pub mod config;
pub mod lifecycle;
pub mod ops;
pub mod paths;
pub mod relay;
pub mod routing;
pub mod schedule;
pub mod status;
pub mod supervisor;

// Re-export public types
pub use config::{
    normalize_domain, parse_port, parse_ports, AddPortOutcome, ConfigStore, Role, TunnelConfig,
};
pub use lifecycle::{
    BootstrapPlan, BootstrapReport, DomainState, EdgeLifecycle, LifecycleError, RemoveReport,
};
pub use ops::{Context, OpsError};
pub use paths::{SystemPaths, SERVICE_NAME};
pub use routing::RoutingStore;
pub use schedule::{RestartInterval, ScheduleManager};
pub use status::StatusReport;
pub use supervisor::{ReconcileReport, Supervisor, SupervisorOptions};
