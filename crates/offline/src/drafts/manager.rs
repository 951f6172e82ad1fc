use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

use super::{DraftError, ReconcileReport};
use crate::models::{
    Attachment, DraftProduct, DraftStatus, LocalId, Mutation, NewAttachment, ProductFields,
    RecordStatus, SyncRecord,
};
use crate::storage::{BlobKey, BlobStore, EntityStore, LocalStore, WriteConflict, WriteOp};
use crate::sync::SyncProcessor;

/// Owns the draft lifecycle and keeps drafts and their queue records in step
pub struct DraftManager {
    store: Arc<dyn LocalStore>,
    blobs: Arc<dyn BlobStore>,
    processor: Arc<SyncProcessor>,
}

impl DraftManager {
    pub fn new(
        store: Arc<dyn LocalStore>,
        blobs: Arc<dyn BlobStore>,
        processor: Arc<SyncProcessor>,
    ) -> Self {
        Self {
            store,
            blobs,
            processor,
        }
    }

    /// Reconcile drafts with the queue; call once before serving requests
    pub fn init(&self) -> Result<ReconcileReport> {
        self.reconcile()
    }

    /// Save a new listing and queue it for publishing
    ///
    /// Every call creates a new draft, even for identical fields.
    pub fn save_draft(
        &self,
        fields: ProductFields,
        attachments: Vec<NewAttachment>,
    ) -> Result<LocalId> {
        let local_id = self.store_draft(fields, attachments, DraftStatus::PendingUpload)?;
        self.processor.schedule_drain();
        Ok(local_id)
    }

    /// Save a listing without queueing it
    pub fn create_draft(
        &self,
        fields: ProductFields,
        attachments: Vec<NewAttachment>,
    ) -> Result<LocalId> {
        self.store_draft(fields, attachments, DraftStatus::Draft)
    }

    fn store_draft(
        &self,
        fields: ProductFields,
        attachments: Vec<NewAttachment>,
        status: DraftStatus,
    ) -> Result<LocalId> {
        fields.validate().map_err(DraftError::Invalid)?;

        let local_id = LocalId::generate();
        let descriptors = match self.store_attachments(&local_id, attachments) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                self.remove_blobs(&local_id);
                return Err(e);
            }
        };

        let draft = DraftProduct::new(local_id.clone(), fields, descriptors, status);
        let result = self.write_draft(&draft, status == DraftStatus::PendingUpload);
        if let Err(e) = result {
            self.remove_blobs(&local_id);
            return Err(e);
        }

        info!(
            "Saved draft {} ({}, {} images)",
            local_id,
            status,
            draft.attachments.len()
        );
        Ok(local_id)
    }

    fn store_attachments(
        &self,
        local_id: &LocalId,
        attachments: Vec<NewAttachment>,
    ) -> Result<Vec<Attachment>> {
        let mut descriptors = Vec::with_capacity(attachments.len());
        for (position, attachment) in attachments.into_iter().enumerate() {
            let position = position as u32;
            self.blobs
                .put(&BlobKey::new(local_id.as_str(), position), &attachment.data)?;
            descriptors.push(Attachment {
                position,
                file_name: attachment.file_name,
                content_type: attachment.content_type,
                size: attachment.data.len() as u64,
            });
        }
        Ok(descriptors)
    }

    /// Write a draft, plus its create record when `queue` is set, in one batch
    fn write_draft(&self, draft: &DraftProduct, queue: bool) -> Result<Option<i64>> {
        let mut ops = vec![WriteOp::put(draft)?];
        let mut record_id = None;
        if queue {
            let record = self.processor.new_record(create_mutation(draft))?;
            ops.push(WriteOp::put(&record)?);
            record_id = Some(record.id);
        }
        self.store.write_batch(ops)?;
        Ok(record_id)
    }

    fn remove_blobs(&self, local_id: &LocalId) {
        if let Err(e) = self.blobs.delete_all_for_owner(local_id.as_str()) {
            warn!("Could not delete images of draft {}: {:#}", local_id, e);
        }
    }

    fn require(&self, local_id: &LocalId) -> Result<DraftProduct> {
        Ok(self
            .store
            .get_entity::<DraftProduct>(local_id.as_str())?
            .ok_or_else(|| DraftError::NotFound(local_id.clone()))?)
    }

    /// Apply a batch built from an earlier read of the draft
    ///
    /// A sync pass may lease or publish the draft between the read and the
    /// write; the batch then applies nothing and the caller sees the state
    /// the draft moved to.
    fn write_checked(
        &self,
        local_id: &LocalId,
        action: &'static str,
        ops: Vec<WriteOp>,
    ) -> Result<()> {
        match self.store.write_batch(ops) {
            Err(e) if WriteConflict::is_conflict(&e) => {
                let current = self.require(local_id)?;
                warn!(
                    "Draft {} changed during {}; now {}",
                    local_id, action, current.status
                );
                Err(DraftError::InvalidState {
                    local_id: local_id.clone(),
                    status: current.status,
                    action,
                }
                .into())
            }
            result => result,
        }
    }

    /// Queue records that publish this draft
    fn records_for(&self, local_id: &LocalId) -> Result<Vec<SyncRecord>> {
        self.store.query_entities("local_id", local_id.as_str())
    }

    /// Queue a `draft` for publishing; returns the queue record id
    pub fn submit(&self, local_id: &LocalId) -> Result<i64> {
        let mut draft = self.require(local_id)?;
        if draft.status != DraftStatus::Draft {
            return Err(DraftError::InvalidState {
                local_id: local_id.clone(),
                status: draft.status,
                action: "submit",
            }
            .into());
        }

        let expected = WriteOp::expect(local_id.as_str(), Some(&draft))?;
        draft.transition(DraftStatus::PendingUpload, None);
        let record = self.processor.new_record(create_mutation(&draft))?;
        let ops = vec![expected, WriteOp::put(&draft)?, WriteOp::put(&record)?];
        self.write_checked(local_id, "submit", ops)?;
        let record_id = record.id;
        info!("Submitted draft {} as sync record {}", local_id, record_id);
        self.processor.schedule_drain();
        Ok(record_id)
    }

    /// Replace a draft's fields, keeping any queued payload in step
    ///
    /// Refused while the draft is being uploaded.
    pub fn update_draft(&self, local_id: &LocalId, fields: ProductFields) -> Result<DraftProduct> {
        fields.validate().map_err(DraftError::Invalid)?;
        let mut draft = self.require(local_id)?;
        let records = self.records_for(local_id)?;
        if draft.status == DraftStatus::Uploading
            || records.iter().any(|r| r.status == RecordStatus::Syncing)
        {
            return Err(DraftError::InvalidState {
                local_id: local_id.clone(),
                status: draft.status,
                action: "update",
            }
            .into());
        }

        let mut ops = expect_unchanged(&draft, &records)?;
        draft.fields = fields;
        let status = draft.status;
        let error = draft.error.take();
        draft.transition(status, error);

        ops.push(WriteOp::put(&draft)?);
        for mut record in records {
            record.mutation = create_mutation(&draft);
            ops.push(WriteOp::put(&record)?);
        }
        self.write_checked(local_id, "update", ops)?;
        Ok(draft)
    }

    /// Delete a draft with its queue record and images
    ///
    /// Refused while the draft is being uploaded.
    pub fn discard(&self, local_id: &LocalId) -> Result<()> {
        let draft = self.require(local_id)?;
        let records = self.records_for(local_id)?;
        if draft.status == DraftStatus::Uploading
            || records.iter().any(|r| r.status == RecordStatus::Syncing)
        {
            return Err(DraftError::InvalidState {
                local_id: local_id.clone(),
                status: draft.status,
                action: "discard",
            }
            .into());
        }

        let mut ops = expect_unchanged(&draft, &records)?;
        ops.push(WriteOp::delete::<DraftProduct>(local_id.as_str()));
        ops.extend(records.iter().map(|r| WriteOp::delete::<SyncRecord>(r.id)));
        self.write_checked(local_id, "discard", ops)?;
        self.remove_blobs(local_id);

        info!("Discarded draft {}", local_id);
        Ok(())
    }

    pub fn get(&self, local_id: &LocalId) -> Result<Option<DraftProduct>> {
        self.store.get_entity(local_id.as_str())
    }

    /// Drafts queued, in flight or failed, oldest first
    pub fn list_pending(&self) -> Result<Vec<DraftProduct>> {
        let mut drafts = Vec::new();
        for status in [
            DraftStatus::PendingUpload,
            DraftStatus::Uploading,
            DraftStatus::Failed,
        ] {
            drafts.extend(
                self.store
                    .query_entities::<DraftProduct>("status", status.as_str())?,
            );
        }
        drafts.sort_by(|a, b| (a.created_at, &a.local_id).cmp(&(b.created_at, &b.local_id)));
        Ok(drafts)
    }

    /// Every draft, oldest first
    pub fn list_all(&self) -> Result<Vec<DraftProduct>> {
        let mut drafts: Vec<DraftProduct> = self.store.all_entities()?;
        drafts.sort_by(|a, b| (a.created_at, &a.local_id).cmp(&(b.created_at, &b.local_id)));
        Ok(drafts)
    }

    /// Bytes of one attachment, if still stored
    pub fn attachment_data(&self, local_id: &LocalId, position: u32) -> Result<Option<Vec<u8>>> {
        self.blobs.get(&BlobKey::new(local_id.as_str(), position))
    }

    /// Re-queue drafts that lost their create record
    ///
    /// Covers a process that stopped between writing a draft and its record
    /// on a store without batch atomicity, and records removed out of band.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for status in [DraftStatus::PendingUpload, DraftStatus::Uploading] {
            let drafts: Vec<DraftProduct> =
                self.store.query_entities("status", status.as_str())?;
            for mut draft in drafts {
                if !self.records_for(&draft.local_id)?.is_empty() {
                    continue;
                }

                let error = draft.error.take();
                draft.transition(DraftStatus::PendingUpload, error);
                let record_id = self.write_draft(&draft, true)?;
                warn!(
                    "Draft {} had no queue record; re-queued as {:?}",
                    draft.local_id, record_id
                );
                report.requeued.push(draft.local_id);
            }
        }

        if !report.requeued.is_empty() {
            self.processor.schedule_drain();
        }
        Ok(report)
    }
}

/// Expectations that the draft and its records are still as read
fn expect_unchanged(draft: &DraftProduct, records: &[SyncRecord]) -> Result<Vec<WriteOp>> {
    let mut ops = vec![WriteOp::expect(draft.local_id.as_str(), Some(draft))?];
    for record in records {
        ops.push(WriteOp::expect(record.id, Some(record))?);
    }
    Ok(ops)
}

fn create_mutation(draft: &DraftProduct) -> Mutation {
    Mutation::CreateProduct {
        local_id: draft.local_id.clone(),
        product: draft.fields.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkMonitor;
    use crate::storage::{Collection, InMemoryBlobStore, InMemoryStore};
    use crate::sync::{DrainOutcome, ProcessorOptions};
    use crate::testing::{MockRemote, PauseAt, PausingStore};
    use std::thread;

    struct Fixture {
        store: Arc<InMemoryStore>,
        blobs: Arc<InMemoryBlobStore>,
        processor: Arc<SyncProcessor>,
        drafts: DraftManager,
    }

    /// Offline, so nothing drains behind the test's back
    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let processor = Arc::new(SyncProcessor::new(
            store.clone(),
            blobs.clone(),
            Arc::new(MockRemote::new()),
            NetworkMonitor::new(false),
            ProcessorOptions::default(),
        ));
        let drafts = DraftManager::new(store.clone(), blobs.clone(), processor.clone());
        Fixture {
            store,
            blobs,
            processor,
            drafts,
        }
    }

    fn fields() -> ProductFields {
        ProductFields::new("Tomatoes", "VEGETABLES", 50.0, "crate", 120.0)
    }

    #[test]
    fn test_save_draft_writes_draft_record_and_blobs() {
        let f = fixture();
        let local_id = f
            .drafts
            .save_draft(
                fields(),
                vec![
                    NewAttachment::jpeg(0, b"one".to_vec()),
                    NewAttachment::jpeg(1, b"two".to_vec()),
                ],
            )
            .unwrap();

        let draft = f.drafts.get(&local_id).unwrap().unwrap();
        assert_eq!(draft.status, DraftStatus::PendingUpload);
        assert_eq!(draft.attachments.len(), 2);
        assert_eq!(draft.attachments[1].file_name, "product-image-1.jpg");
        assert_eq!(draft.attachments[1].size, 3);

        let records = f.processor.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mutation.local_id(), Some(&local_id));
        assert_eq!(
            f.drafts.attachment_data(&local_id, 1).unwrap(),
            Some(b"two".to_vec())
        );
    }

    #[test]
    fn test_save_draft_has_no_dedup() {
        let f = fixture();
        let a = f.drafts.save_draft(fields(), vec![]).unwrap();
        let b = f.drafts.save_draft(fields(), vec![]).unwrap();

        assert_ne!(a, b);
        assert_eq!(f.drafts.list_pending().unwrap().len(), 2);
        assert_eq!(f.processor.pending_count().unwrap(), 2);
    }

    #[test]
    fn test_save_draft_rejects_invalid_fields() {
        let f = fixture();
        let mut bad = fields();
        bad.price_per_unit = 0.0;

        let err = f
            .drafts
            .save_draft(bad, vec![NewAttachment::jpeg(0, b"x".to_vec())])
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DraftError>(),
            Some(DraftError::Invalid(_))
        ));
        assert!(f.drafts.list_all().unwrap().is_empty());
        assert!(f.blobs.is_empty());
    }

    #[test]
    fn test_create_then_submit() {
        let f = fixture();
        let local_id = f.drafts.create_draft(fields(), vec![]).unwrap();
        assert_eq!(f.processor.pending_count().unwrap(), 0);
        assert!(f.drafts.list_pending().unwrap().is_empty());

        let record_id = f.drafts.submit(&local_id).unwrap();

        let draft = f.drafts.get(&local_id).unwrap().unwrap();
        assert_eq!(draft.status, DraftStatus::PendingUpload);
        let record = f.store.get_entity::<SyncRecord>(record_id).unwrap().unwrap();
        assert_eq!(record.mutation.local_id(), Some(&local_id));

        let err = f.drafts.submit(&local_id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DraftError>(),
            Some(DraftError::InvalidState { action: "submit", .. })
        ));
    }

    #[test]
    fn test_update_rewrites_queued_payload() {
        let f = fixture();
        let local_id = f.drafts.save_draft(fields(), vec![]).unwrap();
        let mut changed = fields();
        changed.price_per_unit = 150.0;

        let draft = f.drafts.update_draft(&local_id, changed.clone()).unwrap();

        assert_eq!(draft.fields, changed);
        assert_eq!(draft.status, DraftStatus::PendingUpload);
        let records = f.processor.records().unwrap();
        assert_eq!(records.len(), 1);
        match &records[0].mutation {
            Mutation::CreateProduct { product, .. } => assert_eq!(product.price_per_unit, 150.0),
            other => panic!("unexpected mutation {:?}", other),
        }
    }

    #[test]
    fn test_update_and_discard_refused_while_uploading() {
        let f = fixture();
        let local_id = f.drafts.save_draft(fields(), vec![]).unwrap();
        let mut draft = f.drafts.get(&local_id).unwrap().unwrap();
        draft.transition(DraftStatus::Uploading, None);
        f.store.put_entity(&draft).unwrap();

        assert!(f.drafts.update_draft(&local_id, fields()).is_err());
        let err = f.drafts.discard(&local_id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DraftError>(),
            Some(DraftError::InvalidState { action: "discard", .. })
        ));
        assert!(f.drafts.get(&local_id).unwrap().is_some());
    }

    #[test]
    fn test_discard_removes_everything() {
        let f = fixture();
        let local_id = f
            .drafts
            .save_draft(fields(), vec![NewAttachment::jpeg(0, b"img".to_vec())])
            .unwrap();

        f.drafts.discard(&local_id).unwrap();

        assert!(f.drafts.get(&local_id).unwrap().is_none());
        assert_eq!(f.store.count(Collection::SyncQueue).unwrap(), 0);
        assert!(f.blobs.is_empty());

        let err = f.drafts.discard(&local_id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DraftError>(),
            Some(DraftError::NotFound(_))
        ));
    }

    #[test]
    fn test_reconcile_requeues_orphans() {
        let f = fixture();
        let orphan = DraftProduct::new(
            LocalId::generate(),
            fields(),
            vec![],
            DraftStatus::PendingUpload,
        );
        f.store.put_entity(&orphan).unwrap();
        let queued = f.drafts.save_draft(fields(), vec![]).unwrap();
        f.drafts.create_draft(fields(), vec![]).unwrap();

        let report = f.drafts.reconcile().unwrap();

        assert_eq!(report.requeued, vec![orphan.local_id.clone()]);
        assert_eq!(f.processor.pending_count().unwrap(), 2);
        assert_eq!(f.drafts.records_for(&queued).unwrap().len(), 1);

        // A second pass finds nothing to do
        assert!(f.drafts.reconcile().unwrap().requeued.is_empty());
    }

    #[test]
    fn test_list_pending_excludes_plain_drafts() {
        let f = fixture();
        f.drafts.create_draft(fields(), vec![]).unwrap();
        let queued = f.drafts.save_draft(fields(), vec![]).unwrap();

        let pending = f.drafts.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id, queued);
        assert_eq!(f.drafts.list_all().unwrap().len(), 2);
    }

    struct RaceFixture {
        store: Arc<PausingStore>,
        blobs: Arc<InMemoryBlobStore>,
        remote: Arc<MockRemote>,
        network: NetworkMonitor,
        processor: Arc<SyncProcessor>,
        drafts: DraftManager,
    }

    /// Offline until the test brings it up and drains by hand
    fn race_fixture() -> RaceFixture {
        let store = Arc::new(PausingStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let remote = Arc::new(MockRemote::new());
        let network = NetworkMonitor::new(false);
        let processor = Arc::new(SyncProcessor::new(
            store.clone(),
            blobs.clone(),
            remote.clone(),
            network.clone(),
            ProcessorOptions::default(),
        ));
        let drafts = DraftManager::new(store.clone(), blobs.clone(), processor.clone());
        RaceFixture {
            store,
            blobs,
            remote,
            network,
            processor,
            drafts,
        }
    }

    fn drain_online(f: &RaceFixture) {
        f.network.report(true);
        assert!(matches!(
            f.processor.drain().unwrap(),
            DrainOutcome::Completed(_)
        ));
    }

    #[test]
    fn test_update_after_publish_does_not_requeue() {
        let f = race_fixture();
        let local_id = f.drafts.save_draft(fields(), vec![]).unwrap();
        let mut changed = fields();
        changed.price_per_unit = 75.0;

        // The update reads the draft and its record, then a pass publishes it
        let pause = f
            .store
            .pause_at(PauseAt::Query(Collection::SyncQueue, "local_id"));
        let result = thread::scope(|s| {
            let update = s.spawn(|| f.drafts.update_draft(&local_id, changed));
            pause.wait_reached();
            drain_online(&f);
            pause.release();
            update.join().unwrap()
        });

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DraftError>(),
            Some(DraftError::NotFound(_))
        ));
        assert!(f.drafts.get(&local_id).unwrap().is_none());
        assert_eq!(f.processor.pending_count().unwrap(), 0);

        drain_online(&f);
        assert_eq!(f.remote.create_attempts(), 1);
    }

    #[test]
    fn test_discard_after_publish_fails() {
        let f = race_fixture();
        let local_id = f
            .drafts
            .save_draft(fields(), vec![NewAttachment::jpeg(0, b"img".to_vec())])
            .unwrap();

        let pause = f
            .store
            .pause_at(PauseAt::Query(Collection::SyncQueue, "local_id"));
        let result = thread::scope(|s| {
            let discard = s.spawn(|| f.drafts.discard(&local_id));
            pause.wait_reached();
            drain_online(&f);
            pause.release();
            discard.join().unwrap()
        });

        assert!(result.is_err());
        assert_eq!(f.remote.create_attempts(), 1);
        assert_eq!(f.remote.uploads().len(), 1);
        assert!(f.blobs.is_empty());
        assert_eq!(f.store.count(Collection::SyncQueue).unwrap(), 0);
    }

    #[test]
    fn test_update_during_lease_is_invalid_state() {
        let f = race_fixture();
        let local_id = f.drafts.save_draft(fields(), vec![]).unwrap();

        let pause = f
            .store
            .pause_at(PauseAt::Query(Collection::SyncQueue, "local_id"));
        let result = thread::scope(|s| {
            let update = s.spawn(|| f.drafts.update_draft(&local_id, fields()));
            pause.wait_reached();

            // What a pass writes when it leases the record
            let mut record = f.processor.records().unwrap().remove(0);
            record.status = RecordStatus::Syncing;
            let mut draft = f.drafts.get(&local_id).unwrap().unwrap();
            draft.transition(DraftStatus::Uploading, None);
            f.store
                .write_batch(vec![WriteOp::put(&record).unwrap(), WriteOp::put(&draft).unwrap()])
                .unwrap();

            pause.release();
            update.join().unwrap()
        });

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DraftError>(),
            Some(DraftError::InvalidState {
                status: DraftStatus::Uploading,
                action: "update",
                ..
            })
        ));
        let record = f.processor.records().unwrap().remove(0);
        assert_eq!(record.status, RecordStatus::Syncing);
    }

    #[test]
    fn test_pass_skips_record_discarded_after_snapshot() {
        let f = race_fixture();
        let local_id = f.drafts.save_draft(fields(), vec![]).unwrap();
        f.network.report(true);

        // The pass re-reads the record, then the user discards the draft
        let pause = f.store.pause_at(PauseAt::Get(Collection::SyncQueue));
        let outcome = thread::scope(|s| {
            let drain = s.spawn(|| f.processor.drain());
            pause.wait_reached();
            f.drafts.discard(&local_id).unwrap();
            pause.release();
            drain.join().unwrap()
        });

        match outcome.unwrap() {
            DrainOutcome::Completed(report) => assert_eq!(report.processed, 0),
            other => panic!("expected a completed pass, got {:?}", other),
        }
        assert_eq!(f.remote.create_attempts(), 0);
        assert_eq!(f.store.count(Collection::SyncQueue).unwrap(), 0);
        assert!(f.drafts.get(&local_id).unwrap().is_none());
    }
}
