//! Concurrent installation of a service onto a fleet of SSH-reachable devices.

pub mod core;
pub mod deployment;
pub mod logger;
pub mod serialization;
pub mod states;
pub mod transport;

pub use deployment::{
    orchestrator::{BatchReport, Orchestrator},
    strategy::InstallOptions,
};
pub use states::batch_state::{BatchSummary, DeploymentOutcome};
