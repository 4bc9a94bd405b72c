use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::JobRecord;

/// In-process job store. Records are kept serialized so loads go through the
/// same JSON path as the persistent stores.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, (u64, String)>,
    seq: u64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw text under a job id, bypassing serialization.
    pub async fn put_raw(&self, job_id: Uuid, text: &str) {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let seq = inner.seq;
        inner.records.insert(job_id, (seq, text.to_string()));
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self, job_id: Uuid) -> Result<JobRecord, StoreError> {
        let inner = self.inner.read().await;
        let (_, text) = inner.records.get(&job_id).ok_or(StoreError::NotFound(job_id))?;
        Ok(serde_json::from_str(text)?)
    }

    async fn save(&self, job_id: Uuid, record: &JobRecord) -> Result<(), StoreError> {
        let text = serde_json::to_string(record)?;
        self.put_raw(job_id, &text).await;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<(Uuid, JobRecord)>, StoreError> {
        let inner = self.inner.read().await;
        match inner.records.iter().max_by_key(|(_, (seq, _))| *seq) {
            Some((id, (_, text))) => Ok(Some((*id, serde_json::from_str(text)?))),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
