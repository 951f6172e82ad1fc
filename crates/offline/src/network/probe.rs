//! Background connectivity probe
//!
//! Hosts without a platform connectivity signal can run a probe that
//! periodically opens a TCP connection to the API host and reports the
//! result to a [`NetworkMonitor`].

use anyhow::{Context, Result};
use log::{debug, warn};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::NetworkMonitor;

/// Probe target and cadence
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// host:port to connect to
    pub address: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl ProbeConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(3),
        }
    }
}

fn resolve(address: &str) -> Vec<SocketAddr> {
    match address.to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            debug!("Could not resolve {}: {}", address, e);
            Vec::new()
        }
    }
}

/// Attempt one connection; true if any resolved address accepts
pub fn probe_once(address: &str, timeout: Duration) -> bool {
    resolve(address)
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, timeout).is_ok())
}

/// Handle to a running probe; stops and joins the thread when dropped
pub struct ProbeHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ProbeHandle {
    /// Stop the probe and wait for its thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("Network probe thread panicked");
            }
        }
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start probing in the background, reporting each result to `monitor`
pub fn spawn_probe(monitor: NetworkMonitor, config: ProbeConfig) -> Result<ProbeHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);

    let thread = thread::Builder::new()
        .name("network-probe".to_string())
        .spawn(move || {
            debug!("Probing {} every {:?}", config.address, config.interval);
            while !thread_stop.load(Ordering::SeqCst) {
                let online = probe_once(&config.address, config.timeout);
                monitor.report(online);
                thread::park_timeout(config.interval);
            }
            debug!("Network probe stopped");
        })
        .context("Failed to spawn network probe thread")?;

    Ok(ProbeHandle {
        stop,
        thread: Some(thread),
    })
}
