use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::JobRecord;

/// One pretty-printed JSON file per job under a directory.
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", job_id))
    }

    async fn read(path: &Path) -> Result<JobRecord, StoreError> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn load(&self, job_id: Uuid) -> Result<JobRecord, StoreError> {
        match Self::read(&self.path_for(job_id)).await {
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(job_id)),
            other => other,
        }
    }

    async fn save(&self, job_id: Uuid, record: &JobRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write next to the target, then rename over it
        let body = serde_json::to_vec_pretty(record)?;
        let tmp = self.dir.join(format!(".{}.{}.tmp", job_id, Uuid::new_v4()));
        tokio::fs::write(&tmp, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.path_for(job_id)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn latest(&self) -> Result<Option<(Uuid, JobRecord)>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<(SystemTime, Uuid, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(job_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            let modified = entry.metadata().await?.modified()?;
            if newest.as_ref().map_or(true, |(t, _, _)| modified > *t) {
                newest = Some((modified, job_id, path));
            }
        }

        match newest {
            Some((_, job_id, path)) => Ok(Some((job_id, Self::read(&path).await?))),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{Candidate, JobStatus, Scores};

    fn scored_record() -> JobRecord {
        let mut record = JobRecord::new();
        record.status = JobStatus::Succeeded;
        for (i, total) in [81_u8, 64, 81].iter().enumerate() {
            let mut c = Candidate::new(format!("file:///tmp/cand_{}.jpg", i + 1));
            c.scores = Some(Scores {
                identity: 90,
                color: 63,
                total: *total,
            });
            record.results.push(c);
        }
        record.meta.cost_estimate_usd = 0.117;
        record.meta.autopick_index = Some(1);
        record
    }

    #[tokio::test]
    async fn test_save_load_roundtrip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let id = Uuid::new_v4();
        let record = scored_record();

        store.save(id, &record).await.unwrap();
        let first = store.load(id).await.unwrap();
        store.save(id, &first).await.unwrap();
        let second = store.load(id).await.unwrap();

        assert_eq!(second, record);
        let refs: Vec<_> = second.results.iter().map(|c| c.reference.as_str()).collect();
        assert_eq!(refs, ["file:///tmp/cand_1.jpg", "file:///tmp/cand_2.jpg", "file:///tmp/cand_3.jpg"]);
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let err = store.load(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let id = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{}.json", id)), "{ half written").unwrap();

        let err = store.load(id).await.unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        store.save(Uuid::new_v4(), &scored_record()).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[tokio::test]
    async fn test_latest_picks_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        assert!(store.latest().await.unwrap().is_none());

        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        store.save(older, &JobRecord::new()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.save(newer, &scored_record()).await.unwrap();

        let (id, record) = store.latest().await.unwrap().unwrap();
        assert_eq!(id, newer);
        assert_eq!(record.results.len(), 3);
    }
}
