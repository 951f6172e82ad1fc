//! Sync queue processor
//!
//! Drains pending queue records against the remote API, one pass at a time.
//! The record's `syncing` status is its lease: a pass only picks up records
//! that are `pending` when it re-reads them, so a record is never replayed
//! by two passes.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::QueueError;
use crate::api::{ImageUpload, RemoteApi, RemoteError};
use crate::models::{
    DraftProduct, DraftStatus, Mutation, Product, RecordStatus, SyncRecord,
};
use crate::network::NetworkMonitor;
use crate::storage::{
    BlobKey, BlobStore, Collection, EntityStore, IndexValue, LocalStore, WriteConflict, WriteOp,
};

/// Tuning for the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Attempts before a record is marked failed
    pub max_retries: u32,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Counts from one completed drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Records replayed in this pass
    pub processed: usize,
    pub succeeded: usize,
    /// Failed transiently and left pending for a later pass
    pub rescheduled: usize,
    /// Marked failed (permanent rejection or out of retries)
    pub failed: usize,
    /// Succeeded, but at least one attachment did not upload
    pub degraded: usize,
}

/// Result of a drain request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Offline; nothing was attempted
    Offline,
    /// Another pass is in progress
    AlreadyRunning,
    Completed(DrainReport),
}

enum Replayed {
    Created { product_id: i64 },
    Updated(Product),
    Deleted(i64),
    Done,
}

enum RecordOutcome {
    Succeeded { degraded: bool },
    Rescheduled,
    Failed,
    /// Changed by another writer before it could be leased
    Skipped,
}

/// Clears the single-flight flag when a pass ends, including by panic
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays queued mutations with bounded retry
pub struct SyncProcessor {
    store: Arc<dyn LocalStore>,
    blobs: Arc<dyn BlobStore>,
    remote: Arc<dyn RemoteApi>,
    network: NetworkMonitor,
    options: ProcessorOptions,
    draining: AtomicBool,
    /// Set when a background drain was refused because one was running
    rerun_requested: AtomicBool,
    /// Background drain threads not yet finished
    background: AtomicUsize,
    last_sync_at: Mutex<Option<DateTime<Utc>>>,
}

impl SyncProcessor {
    pub fn new(
        store: Arc<dyn LocalStore>,
        blobs: Arc<dyn BlobStore>,
        remote: Arc<dyn RemoteApi>,
        network: NetworkMonitor,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            store,
            blobs,
            remote,
            network,
            options,
            draining: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            background: AtomicUsize::new(0),
            last_sync_at: Mutex::new(None),
        }
    }

    pub fn options(&self) -> ProcessorOptions {
        self.options
    }

    /// Build a pending record with a freshly allocated id, without storing it
    ///
    /// Callers that must write the record together with other changes put it
    /// in their own batch.
    pub fn new_record(&self, mutation: Mutation) -> Result<SyncRecord> {
        let id = self.store.allocate_id(Collection::SyncQueue)?;
        Ok(SyncRecord::new(id, mutation))
    }

    /// Append a mutation to the queue and kick off a drain if online
    pub fn enqueue(self: &Arc<Self>, mutation: Mutation) -> Result<i64> {
        let record = self.new_record(mutation)?;
        self.store.put_entity(&record)?;
        info!(
            "Queued {} as sync record {}",
            record.mutation.kind(),
            record.id
        );
        self.schedule_drain();
        Ok(record.id)
    }

    /// Start a drain on a background thread if online
    ///
    /// Fire-and-forget: errors are logged, never returned.
    pub fn schedule_drain(self: &Arc<Self>) {
        if !self.network.is_online() {
            debug!("Offline; drain deferred");
            return;
        }

        let processor = Arc::clone(self);
        self.background.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name("sync-drain".to_string())
            .spawn(move || {
                processor.run_background();
                processor.background.fetch_sub(1, Ordering::SeqCst);
            });
        if let Err(e) = spawned {
            self.background.fetch_sub(1, Ordering::SeqCst);
            error!("Failed to spawn sync thread: {}", e);
        }
    }

    fn run_background(&self) {
        loop {
            match self.drain_pass(true) {
                Ok(DrainOutcome::Completed(report)) => {
                    debug!("Background sync finished: {:?}", report);
                    // Work arrived during the pass; give it its own pass
                    if self.rerun_requested.swap(false, Ordering::AcqRel) {
                        continue;
                    }
                }
                Ok(outcome) => debug!("Background sync skipped: {:?}", outcome),
                Err(e) => error!("Background sync failed: {:#}", e),
            }
            break;
        }
    }

    /// Run one drain pass now
    ///
    /// Local storage failures abort the pass and are returned. Remote
    /// failures are recorded on the record and never returned.
    pub fn drain(&self) -> Result<DrainOutcome> {
        self.drain_pass(false)
    }

    /// `background` passes that are refused ask the running pass for a rerun
    fn drain_pass(&self, background: bool) -> Result<DrainOutcome> {
        if !self.network.is_online() {
            return Ok(DrainOutcome::Offline);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if background {
                self.rerun_requested.store(true, Ordering::Release);
            }
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.draining);
        // This pass reads the queue fresh, covering any earlier request
        self.rerun_requested.store(false, Ordering::Release);

        let mut pending: Vec<SyncRecord> = self
            .store
            .query_entities("status", RecordStatus::Pending.as_str())?;
        pending.sort_by_key(SyncRecord::drain_order);

        if !pending.is_empty() {
            info!("Syncing {} pending records", pending.len());
        }

        let mut report = DrainReport::default();
        for snapshot in pending {
            // The record may have been discarded or leased since the snapshot
            let Some(record) = self.store.get_entity::<SyncRecord>(snapshot.id)? else {
                continue;
            };
            if record.status != RecordStatus::Pending {
                continue;
            }

            match self.process_record(record)? {
                RecordOutcome::Succeeded { degraded } => {
                    report.succeeded += 1;
                    if degraded {
                        report.degraded += 1;
                    }
                }
                RecordOutcome::Rescheduled => report.rescheduled += 1,
                RecordOutcome::Failed => report.failed += 1,
                RecordOutcome::Skipped => continue,
            }
            report.processed += 1;
        }

        *self
            .last_sync_at
            .lock()
            .map_err(|_| anyhow!("last sync lock poisoned"))? = Some(Utc::now());

        if report.processed > 0 {
            info!(
                "Sync pass done: {} succeeded, {} rescheduled, {} failed",
                report.succeeded, report.rescheduled, report.failed
            );
        }
        Ok(DrainOutcome::Completed(report))
    }

    fn draft_for(&self, record: &SyncRecord) -> Result<Option<DraftProduct>> {
        match record.mutation.local_id() {
            Some(local_id) => self.store.get_entity(local_id.as_str()),
            None => Ok(None),
        }
    }

    /// Mark the record syncing and its draft uploading, atomically
    ///
    /// Returns false, writing nothing, if the record or its draft changed
    /// since they were read.
    fn lease(&self, record: &mut SyncRecord) -> Result<bool> {
        let draft = self.draft_for(record)?;
        let mut ops = vec![WriteOp::expect(record.id, Some(&*record))?];
        if let Some(local_id) = record.mutation.local_id() {
            ops.push(WriteOp::expect(local_id.as_str(), draft.as_ref())?);
        }

        record.status = RecordStatus::Syncing;
        ops.push(WriteOp::put(&*record)?);
        if let Some(mut draft) = draft {
            draft.transition(DraftStatus::Uploading, None);
            ops.push(WriteOp::put(&draft)?);
        }

        match self.store.write_batch(ops) {
            Ok(()) => Ok(true),
            Err(e) if WriteConflict::is_conflict(&e) => {
                debug!("Sync record {} changed before it was leased", record.id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn process_record(&self, mut record: SyncRecord) -> Result<RecordOutcome> {
        if !self.lease(&mut record)? {
            return Ok(RecordOutcome::Skipped);
        }
        debug!(
            "Replaying sync record {} ({}, attempt {})",
            record.id,
            record.mutation.kind(),
            record.retries + 1
        );

        match self.replay(&record.mutation) {
            Ok(replayed) => self.complete(record, replayed),
            Err(e) => self.record_failure(record, e),
        }
    }

    fn replay(&self, mutation: &Mutation) -> Result<Replayed, RemoteError> {
        match mutation {
            Mutation::CreateProduct { product, .. } => {
                let created = self.remote.create_product(product)?;
                Ok(Replayed::Created {
                    product_id: created.id,
                })
            }
            Mutation::UpdateProduct {
                product_id,
                changes,
            } => Ok(Replayed::Updated(
                self.remote.update_product(*product_id, changes)?,
            )),
            Mutation::DeleteProduct { product_id } => {
                match self.remote.delete_product(*product_id) {
                    // Already gone is the outcome we wanted
                    Ok(()) => Ok(Replayed::Deleted(*product_id)),
                    Err(e) if e.is_not_found() => Ok(Replayed::Deleted(*product_id)),
                    Err(e) => Err(e),
                }
            }
            Mutation::Cart(change) => {
                self.remote.apply_cart_mutation(change)?;
                Ok(Replayed::Done)
            }
            Mutation::Checkout(request) => {
                let order = self.remote.checkout(request)?;
                info!(
                    "Checkout placed order {} (id {})",
                    order.order_number, order.order_id
                );
                Ok(Replayed::Done)
            }
        }
    }

    /// Upload a published draft's images in order; the first is primary
    ///
    /// Returns false if any image could not be read or uploaded.
    fn upload_attachments(&self, draft: &DraftProduct, product_id: i64) -> bool {
        let mut complete = true;
        for (index, attachment) in draft.attachments.iter().enumerate() {
            let key = BlobKey::new(draft.local_id.as_str(), attachment.position);
            let data = match self.blobs.get(&key) {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(
                        "Image {} of draft {} is missing locally",
                        attachment.position, draft.local_id
                    );
                    complete = false;
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Could not read image {} of draft {}: {:#}",
                        attachment.position, draft.local_id, e
                    );
                    complete = false;
                    continue;
                }
            };

            let upload = ImageUpload {
                file_name: attachment.file_name.clone(),
                content_type: attachment.content_type.clone(),
                data,
            };
            if let Err(e) = self
                .remote
                .upload_product_image(product_id, &upload, index == 0)
            {
                warn!(
                    "Image {} of product {} failed to upload: {}",
                    attachment.position, product_id, e
                );
                complete = false;
            }
        }
        complete
    }

    fn complete(&self, record: SyncRecord, replayed: Replayed) -> Result<RecordOutcome> {
        let mut degraded = false;
        let mut ops = vec![WriteOp::delete::<SyncRecord>(record.id)];
        let mut published_draft = None;

        match replayed {
            Replayed::Created { product_id } => {
                if let Some(draft) = self.draft_for(&record)? {
                    degraded = !self.upload_attachments(&draft, product_id);
                    info!(
                        "Draft {} published as product {}",
                        draft.local_id, product_id
                    );
                }
                if let Some(local_id) = record.mutation.local_id() {
                    ops.push(WriteOp::delete::<DraftProduct>(local_id.as_str()));
                    published_draft = Some(local_id.clone());
                }
            }
            Replayed::Updated(product) => ops.push(WriteOp::put(&product)?),
            Replayed::Deleted(product_id) => ops.push(WriteOp::delete::<Product>(product_id)),
            Replayed::Done => {}
        }

        self.store.write_batch(ops)?;

        if let Some(local_id) = published_draft {
            if let Err(e) = self.blobs.delete_all_for_owner(local_id.as_str()) {
                warn!("Could not delete images of draft {}: {:#}", local_id, e);
            }
        }
        Ok(RecordOutcome::Succeeded { degraded })
    }

    fn record_failure(&self, mut record: SyncRecord, error: RemoteError) -> Result<RecordOutcome> {
        record.retries += 1;
        record.error = Some(error.to_string());
        let terminal = error.is_permanent() || record.retries >= self.options.max_retries;
        record.status = if terminal {
            RecordStatus::Failed
        } else {
            RecordStatus::Pending
        };

        let mut ops = vec![WriteOp::put(&record)?];
        if let Some(mut draft) = self.draft_for(&record)? {
            let status = if terminal {
                DraftStatus::Failed
            } else {
                DraftStatus::PendingUpload
            };
            draft.transition(status, record.error.clone());
            ops.push(WriteOp::put(&draft)?);
        }
        self.store.write_batch(ops)?;

        if terminal {
            warn!(
                "Sync record {} failed after {} attempt(s): {}",
                record.id, record.retries, error
            );
            Ok(RecordOutcome::Failed)
        } else {
            info!(
                "Sync record {} will retry ({}/{}): {}",
                record.id, record.retries, self.options.max_retries, error
            );
            Ok(RecordOutcome::Rescheduled)
        }
    }

    /// Reset a record to pending with its retry count cleared
    fn reset_ops(&self, record: &mut SyncRecord) -> Result<Vec<WriteOp>> {
        // A discard racing the retry must not be undone
        let mut ops = vec![WriteOp::expect(record.id, Some(&*record))?];
        record.status = RecordStatus::Pending;
        record.retries = 0;
        record.error = None;
        ops.push(WriteOp::put(&*record)?);
        if let Some(mut draft) = self.draft_for(record)? {
            draft.transition(DraftStatus::PendingUpload, None);
            ops.push(WriteOp::put(&draft)?);
        }
        Ok(ops)
    }

    /// Manually retry a failed record
    pub fn retry(self: &Arc<Self>, record_id: i64) -> Result<()> {
        let mut record = self
            .store
            .get_entity::<SyncRecord>(record_id)?
            .ok_or(QueueError::NotFound(record_id))?;
        if record.status != RecordStatus::Failed {
            return Err(QueueError::NotFailed {
                id: record_id,
                status: record.status,
            }
            .into());
        }

        let ops = self.reset_ops(&mut record)?;
        self.store.write_batch(ops)?;
        info!("Sync record {} queued for retry", record_id);
        self.schedule_drain();
        Ok(())
    }

    /// Retry every failed record; returns how many were reset
    pub fn retry_all_failed(self: &Arc<Self>) -> Result<usize> {
        let mut failed = self.failed_records()?;
        let mut ops = Vec::new();
        for record in &mut failed {
            ops.extend(self.reset_ops(record)?);
        }
        self.store.write_batch(ops)?;

        if !failed.is_empty() {
            info!("{} failed sync records queued for retry", failed.len());
            self.schedule_drain();
        }
        Ok(failed.len())
    }

    /// Return records left `syncing` by a terminated process to `pending`
    ///
    /// Only meaningful at startup; does nothing while a pass is running.
    pub fn release_stale_leases(&self) -> Result<usize> {
        if self.draining.load(Ordering::Acquire) {
            return Ok(0);
        }

        let stale: Vec<SyncRecord> = self
            .store
            .query_entities("status", RecordStatus::Syncing.as_str())?;
        let mut ops = Vec::new();
        for mut record in stale.iter().cloned() {
            record.status = RecordStatus::Pending;
            ops.push(WriteOp::put(&record)?);
            if let Some(mut draft) = self.draft_for(&record)? {
                draft.transition(DraftStatus::PendingUpload, draft.error.clone());
                ops.push(WriteOp::put(&draft)?);
            }
        }
        self.store.write_batch(ops)?;

        if !stale.is_empty() {
            warn!("Released {} stale sync leases", stale.len());
        }
        Ok(stale.len())
    }

    /// Number of records waiting for a pass
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self
            .store
            .query(
                Collection::SyncQueue,
                "status",
                &IndexValue::from(RecordStatus::Pending.as_str()),
            )?
            .len())
    }

    /// Records that exhausted their retries or were rejected, oldest first
    pub fn failed_records(&self) -> Result<Vec<SyncRecord>> {
        let mut failed: Vec<SyncRecord> = self
            .store
            .query_entities("status", RecordStatus::Failed.as_str())?;
        failed.sort_by_key(SyncRecord::drain_order);
        Ok(failed)
    }

    /// Every queued record in drain order
    pub fn records(&self) -> Result<Vec<SyncRecord>> {
        let mut records: Vec<SyncRecord> = self.store.all_entities()?;
        records.sort_by_key(SyncRecord::drain_order);
        Ok(records)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// When the last pass completed
    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_sync_at.lock().ok().and_then(|guard| *guard)
    }

    /// Wait for background drains to finish; false on timeout
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.background.load(Ordering::SeqCst) > 0 || self.is_draining() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}
