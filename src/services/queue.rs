use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::TopUpConfig;
use crate::models::run::{MAX_ROUNDS_RANGE, MAX_SIZE_RANGE, MIN_CANDIDATES_RANGE};
use crate::services::topup::{CancelFlag, TopUpPolicy};

const QUEUE_KEY: &str = "restyle:runs";
const PROCESSING_KEY: &str = "restyle:processing";
const CANCEL_PREFIX: &str = "restyle:cancel:";
const CANCEL_TTL_SECS: u64 = 3600;

/// Run payload serialized into Redis.
///
/// The inputs live in image storage; the worker fetches them by reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedRun {
    pub job_id: Uuid,
    pub subject_ref: String,
    pub style_ref: String,
    #[serde(default)]
    pub target_hex: Option<String>,
    #[serde(default)]
    pub style_desc: Option<String>,
    #[serde(default)]
    pub min_candidates: Option<u32>,
    #[serde(default)]
    pub max_rounds: Option<u32>,
    #[serde(default)]
    pub max_size: Option<u32>,
}

fn clamp(value: Option<u32>, default: u32, (lo, hi): (u32, u32)) -> u32 {
    value.unwrap_or(default).clamp(lo, hi)
}

impl QueuedRun {
    /// Top-up policy for this run: per-run overrides on top of the
    /// configured defaults, clamped to the accepted ranges.
    pub fn policy(&self, defaults: &TopUpConfig) -> TopUpPolicy {
        let mut policy = TopUpPolicy::from(defaults);
        policy.min_candidates = clamp(self.min_candidates, defaults.min_candidates, MIN_CANDIDATES_RANGE) as usize;
        policy.max_rounds = clamp(self.max_rounds, defaults.max_rounds, MAX_ROUNDS_RANGE);
        policy
    }

    /// Long edge requested from the generator.
    pub fn max_size(&self, defaults: &TopUpConfig) -> u32 {
        clamp(self.max_size, defaults.max_size, MAX_SIZE_RANGE)
    }
}

/// Redis-backed run queue with cooperative cancellation flags.
pub struct RunQueue {
    client: redis::Client,
}

impl RunQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Enqueue a run.
    pub async fn enqueue(&self, run: &QueuedRun) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(run)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Dequeue a run for processing (pop with move to the processing list).
    pub async fn dequeue(&self) -> Result<Option<QueuedRun>, QueueError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match result {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Mark a run as complete (remove from the processing list and drop any
    /// pending cancellation).
    pub async fn complete(&self, run: &QueuedRun) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(run)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        conn.del::<_, ()>(cancel_key(run.job_id)).await?;
        Ok(())
    }

    /// Ask the worker running `job_id` to stop after its current batch.
    pub async fn request_cancel(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(cancel_key(job_id), 1, CANCEL_TTL_SECS).await?;
        Ok(())
    }

    pub async fn is_cancelled(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.exists(cancel_key(job_id)).await?)
    }

    /// Check Redis connectivity (for health checks).
    /// Poll the cancellation flag once, flipping `cancel` if it is set.
    pub async fn check_cancellation(&self, job_id: Uuid, cancel: &CancelFlag) -> bool {
        match self.is_cancelled(job_id).await {
            Ok(true) => {
                tracing::info!(%job_id, "Cancellation received");
                cancel.cancel();
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "Could not poll cancellation flag");
                false
            }
        }
    }

    /// Keep polling every `interval` until a cancellation shows up.
    pub async fn watch_cancellation(&self, job_id: Uuid, cancel: CancelFlag, interval: Duration) {
        loop {
            sleep(interval).await;
            if self.check_cancellation(job_id, &cancel).await {
                return;
            }
        }
    }

    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Get the current queue depth (pending runs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(QUEUE_KEY).await?)
    }
}

fn cancel_key(job_id: Uuid) -> String {
    format!("{}{}", CANCEL_PREFIX, job_id)
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
