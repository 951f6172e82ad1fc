//! Engine facade
//!
//! Wires the store, processor, draft manager and cache together and keeps
//! the processor subscribed to online transitions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::{Arc, Weak};

use crate::api::{CredentialProvider, HttpRemoteApi, RemoteApi};
use crate::cache::SnapshotCache;
use crate::config::OfflineConfig;
use crate::drafts::DraftManager;
use crate::models::{
    CartMutation, CheckoutRequest, LocalId, Mutation, ProductUpdate, SyncRecord,
};
use crate::network::{NetworkMonitor, ProbeHandle, Subscription, probe_once, spawn_probe};
use crate::storage::{BlobStore, Collection, FileBlobStore, LocalStore, SqliteStore, WriteOp};
use crate::sync::{DrainOutcome, ProcessorOptions, SyncProcessor};

/// What startup recovery found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Records left syncing by a previous process
    pub released_leases: usize,
    /// Drafts that had lost their queue record
    pub requeued_drafts: Vec<LocalId>,
}

/// Indicator shown for the queue, highest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncBadge {
    Offline,
    Syncing,
    Error,
    Pending,
    Synced,
}

impl SyncBadge {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncBadge::Offline => "offline",
            SyncBadge::Syncing => "syncing",
            SyncBadge::Error => "error",
            SyncBadge::Pending => "pending",
            SyncBadge::Synced => "synced",
        }
    }
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: usize,
    pub failed: Vec<SyncRecord>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    pub fn badge(&self) -> SyncBadge {
        if !self.is_online {
            SyncBadge::Offline
        } else if self.is_syncing {
            SyncBadge::Syncing
        } else if !self.failed.is_empty() {
            SyncBadge::Error
        } else if self.pending_count > 0 {
            SyncBadge::Pending
        } else {
            SyncBadge::Synced
        }
    }
}

/// The offline engine
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    blobs: Arc<dyn BlobStore>,
    network: NetworkMonitor,
    processor: Arc<SyncProcessor>,
    drafts: DraftManager,
    cache: SnapshotCache,
    startup: StartupReport,
    _online_subscription: Subscription,
    _probe: Option<ProbeHandle>,
}

impl SyncEngine {
    /// Build the engine and run startup recovery
    ///
    /// Stale leases are released before reconciliation so drafts whose
    /// records were in flight are not re-queued twice.
    pub fn new(
        store: Arc<dyn LocalStore>,
        blobs: Arc<dyn BlobStore>,
        remote: Arc<dyn RemoteApi>,
        network: NetworkMonitor,
        options: ProcessorOptions,
    ) -> Result<Self> {
        let processor = Arc::new(SyncProcessor::new(
            Arc::clone(&store),
            Arc::clone(&blobs),
            Arc::clone(&remote),
            network.clone(),
            options,
        ));
        let drafts = DraftManager::new(
            Arc::clone(&store),
            Arc::clone(&blobs),
            Arc::clone(&processor),
        );
        let cache = SnapshotCache::new(Arc::clone(&store), remote, network.clone());

        let released_leases = processor
            .release_stale_leases()
            .context("Failed to release stale sync leases")?;
        let reconciled = drafts.init().context("Failed to reconcile drafts")?;
        let startup = StartupReport {
            released_leases,
            requeued_drafts: reconciled.requeued,
        };
        if startup != StartupReport::default() {
            info!(
                "Startup recovery: {} leases released, {} drafts re-queued",
                startup.released_leases,
                startup.requeued_drafts.len()
            );
        }

        // Weak so the subscription does not keep the processor alive
        let weak: Weak<SyncProcessor> = Arc::downgrade(&processor);
        let online_subscription = network.subscribe(
            move || {
                if let Some(processor) = weak.upgrade() {
                    info!("Back online; syncing queued changes");
                    processor.schedule_drain();
                }
            },
            || info!("Offline; changes will be queued"),
        );

        processor.schedule_drain();

        Ok(Self {
            store,
            blobs,
            network,
            processor,
            drafts,
            cache,
            startup,
            _online_subscription: online_subscription,
            _probe: None,
        })
    }

    /// Open the durable engine described by `settings`
    pub fn open(settings: &OfflineConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let data_dir = settings.resolve_data_dir()?;
        config::ensure_dir(&data_dir)?;

        let store = SqliteStore::new(settings.database_path()?)?;
        let blobs = FileBlobStore::new(settings.blob_path()?)?;
        let remote = HttpRemoteApi::new(&settings.api_base_url, credentials)?;

        let probe = settings.probe.as_ref().map(|p| p.to_probe_config());
        let initially_online = match &probe {
            Some(probe) => probe_once(&probe.address, probe.timeout),
            None => true,
        };
        let network = NetworkMonitor::new(initially_online);
        info!(
            "Opened offline store at {} ({})",
            data_dir.display(),
            if initially_online { "online" } else { "offline" }
        );

        let mut engine = Self::new(
            Arc::new(store),
            Arc::new(blobs),
            Arc::new(remote),
            network.clone(),
            ProcessorOptions {
                max_retries: settings.max_retries.max(1),
            },
        )?;
        if let Some(probe) = probe {
            engine._probe = Some(spawn_probe(network, probe)?);
        }
        Ok(engine)
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn processor(&self) -> &Arc<SyncProcessor> {
        &self.processor
    }

    pub fn drafts(&self) -> &DraftManager {
        &self.drafts
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn startup_report(&self) -> &StartupReport {
        &self.startup
    }

    pub fn queue_product_update(&self, product_id: i64, changes: ProductUpdate) -> Result<i64> {
        self.processor.enqueue(Mutation::UpdateProduct {
            product_id,
            changes,
        })
    }

    pub fn queue_product_delete(&self, product_id: i64) -> Result<i64> {
        self.processor
            .enqueue(Mutation::DeleteProduct { product_id })
    }

    pub fn queue_cart(&self, change: CartMutation) -> Result<i64> {
        self.processor.enqueue(Mutation::Cart(change))
    }

    pub fn queue_checkout(&self, request: CheckoutRequest) -> Result<i64> {
        self.processor.enqueue(Mutation::Checkout(request))
    }

    /// Drain the queue now on the calling thread
    pub fn sync(&self) -> Result<DrainOutcome> {
        self.processor.drain()
    }

    pub fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            is_online: self.network.is_online(),
            is_syncing: self.processor.is_draining(),
            pending_count: self.processor.pending_count()?,
            failed: self.processor.failed_records()?,
            last_sync_at: self.processor.last_sync_at(),
        })
    }

    /// Delete all local data: caches, drafts, the queue and attachments
    ///
    /// Intended for sign-out. Queued changes that have not synced are lost.
    pub fn clear_all(&self) -> Result<()> {
        let ops = Collection::ALL
            .into_iter()
            .map(|collection| WriteOp::Clear { collection })
            .collect();
        self.store.write_batch(ops)?;
        if let Err(e) = self.blobs.clear() {
            warn!("Failed to clear attachments: {:#}", e);
        }
        info!("Cleared all offline data");
        Ok(())
    }
}
