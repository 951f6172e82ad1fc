//! Connectivity tracking

mod monitor;
mod probe;

pub use monitor::{NetworkMonitor, Subscription};
pub use probe::{ProbeConfig, ProbeHandle, probe_once, spawn_probe};
