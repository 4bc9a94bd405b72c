//! Bounded-retry candidate generation.
//!
//! The generator is nondeterministic: a call may return an image, return
//! nothing (refusal or abstention), hang, or fail in transit. Top-up keeps
//! calling it in rounds until the job holds `min_candidates` images, the
//! round budget is spent, the generator signals exhaustion, or the run is
//! cancelled. Whatever was collected is kept in every case.

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::TopUpConfig;
use crate::db::{JobStore, StoreError};
use crate::models::job::{Candidate, ErrorCode, JobRecord, JobStatus};
use crate::services::generation::{GenerationClient, GenerationError, GenerationRequest};
use crate::services::storage::{candidate_key, image_kind, ImageStorage, StorageError};

/// Cooperative cancellation shared between a run and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopUpPolicy {
    pub min_candidates: usize,
    pub max_rounds: u32,
    pub fan_out: usize,
    pub call_timeout: Duration,
    /// An empty generation ends the whole top-up instead of the batch.
    pub stop_on_empty: bool,
    pub cost_per_image_usd: f64,
}

impl From<&TopUpConfig> for TopUpPolicy {
    fn from(cfg: &TopUpConfig) -> Self {
        Self {
            min_candidates: cfg.min_candidates.max(1) as usize,
            max_rounds: cfg.max_rounds.max(1),
            fan_out: cfg.fan_out.max(1) as usize,
            call_timeout: cfg.call_timeout(),
            stop_on_empty: cfg.stop_on_empty,
            cost_per_image_usd: cfg.cost_per_image_usd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    MinimumReached,
    GeneratorExhausted,
    RoundsExhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopUpOutcome {
    pub rounds_used: u32,
    pub calls: u32,
    pub added: usize,
    pub empty: u32,
    pub timeouts: u32,
    pub failures: u32,
    pub stop: StopReason,
}

enum CallOutcome {
    Image(Vec<u8>),
    Empty,
    Timeout,
    Failed(GenerationError),
}

/// Drives the generator for one job. The controller is the only writer of
/// the job's candidate list while it runs.
pub struct TopUpController<'a> {
    generator: &'a dyn GenerationClient,
    storage: &'a ImageStorage,
    store: &'a dyn JobStore,
    policy: TopUpPolicy,
}

impl<'a> TopUpController<'a> {
    pub fn new(
        generator: &'a dyn GenerationClient,
        storage: &'a ImageStorage,
        store: &'a dyn JobStore,
        policy: TopUpPolicy,
    ) -> Self {
        Self {
            generator,
            storage,
            store,
            policy,
        }
    }

    async fn call_once(&self, request: &GenerationRequest) -> CallOutcome {
        match tokio::time::timeout(self.policy.call_timeout, self.generator.generate(request)).await {
            Ok(Ok(Some(bytes))) => CallOutcome::Image(bytes),
            Ok(Ok(None)) => CallOutcome::Empty,
            Ok(Err(e)) => CallOutcome::Failed(e),
            Err(_) => CallOutcome::Timeout,
        }
    }

    /// Generate until the job holds `min_candidates` candidates.
    ///
    /// Existing candidates count toward the minimum. The job is saved after
    /// every batch that added candidates and its status is settled before
    /// returning: `succeeded` when any candidate exists, `failed` otherwise.
    pub async fn ensure_minimum(
        &self,
        job_id: Uuid,
        job: &mut JobRecord,
        request: &GenerationRequest,
        cancel: &CancelFlag,
    ) -> Result<TopUpOutcome, TopUpError> {
        let policy = &self.policy;
        let mut outcome = TopUpOutcome {
            rounds_used: 0,
            calls: 0,
            added: 0,
            empty: 0,
            timeouts: 0,
            failures: 0,
            stop: StopReason::RoundsExhausted,
        };

        job.meta.model = Some(self.generator.model().to_string());

        if job.results.len() >= policy.min_candidates {
            outcome.stop = StopReason::MinimumReached;
        } else {
            'rounds: for round in 1..=policy.max_rounds {
                outcome.rounds_used = round;
                tracing::debug!(%job_id, round, have = job.results.len(), "Top-up round started");

                while job.results.len() < policy.min_candidates {
                    if cancel.is_cancelled() {
                        outcome.stop = StopReason::Cancelled;
                        break 'rounds;
                    }

                    let batch = policy.fan_out.min(policy.min_candidates - job.results.len());
                    let started = Instant::now();
                    let results = join_all((0..batch).map(|_| self.call_once(request))).await;
                    job.meta.latency_ms += started.elapsed().as_millis() as u64;
                    outcome.calls += batch as u32;

                    let mut added = 0;
                    let mut exhausted = false;
                    for result in results {
                        match result {
                            CallOutcome::Image(bytes) => {
                                let (extension, content_type) = image_kind(&bytes);
                                let key = candidate_key(&job_id.to_string(), job.results.len() + 1, extension);
                                let reference = self.storage.put(&key, &bytes, content_type).await?;
                                job.results.push(Candidate::new(reference));
                                added += 1;
                                metrics::counter!("generation_calls_total", "outcome" => "image").increment(1);
                            }
                            CallOutcome::Empty => {
                                outcome.empty += 1;
                                exhausted |= policy.stop_on_empty;
                                metrics::counter!("generation_calls_total", "outcome" => "empty").increment(1);
                            }
                            CallOutcome::Timeout => {
                                outcome.timeouts += 1;
                                tracing::warn!(%job_id, round, timeout = ?policy.call_timeout, "Generation call timed out");
                                metrics::counter!("generation_calls_total", "outcome" => "timeout").increment(1);
                            }
                            CallOutcome::Failed(e) => {
                                outcome.failures += 1;
                                tracing::warn!(%job_id, round, error = %e, "Generation call failed");
                                metrics::counter!("generation_calls_total", "outcome" => "error").increment(1);
                            }
                        }
                    }

                    if added > 0 {
                        outcome.added += added;
                        metrics::counter!("candidates_generated_total").increment(added as u64);
                        add_cost(job, policy.cost_per_image_usd * added as f64);
                        job.touch();
                        self.store.save(job_id, job).await?;
                    }

                    if exhausted {
                        tracing::info!(%job_id, round, have = job.results.len(), "Generator returned no image, stopping top-up");
                        outcome.stop = StopReason::GeneratorExhausted;
                        break 'rounds;
                    }
                    if added == 0 {
                        // Nothing came back: spend the rest of this round's budget
                        break;
                    }
                }

                if job.results.len() >= policy.min_candidates {
                    outcome.stop = StopReason::MinimumReached;
                    break;
                }
            }
        }

        job.meta.rounds_used += outcome.rounds_used;
        settle_status(job, &outcome);
        job.touch();

        tracing::info!(
            %job_id,
            rounds_used = outcome.rounds_used,
            calls = outcome.calls,
            added = outcome.added,
            total = job.results.len(),
            stop = %outcome.stop,
            "Top-up finished"
        );

        Ok(outcome)
    }
}

fn add_cost(job: &mut JobRecord, usd: f64) {
    job.meta.cost_estimate_usd = ((job.meta.cost_estimate_usd + usd) * 1000.0).round() / 1000.0;
}

/// Any candidate makes the job deliverable; otherwise record why none came back.
fn settle_status(job: &mut JobRecord, outcome: &TopUpOutcome) {
    if job.is_deliverable() {
        job.status = JobStatus::Succeeded;
        job.error = None;
        return;
    }

    let (code, message) = match outcome.stop {
        StopReason::Cancelled => (ErrorCode::Cancelled, "Run cancelled before any image was generated".to_string()),
        _ if outcome.empty > 0 => (ErrorCode::GenerationEmpty, "No image returned".to_string()),
        _ => (
            ErrorCode::GenerationTimeout,
            format!(
                "No image after {} calls ({} timed out, {} failed)",
                outcome.calls, outcome.timeouts, outcome.failures
            ),
        ),
    };
    job.fail(code, message);
}

#[derive(Debug, thiserror::Error)]
pub enum TopUpError {
    #[error("Failed to store generated image: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to save job record: {0}")]
    Store(#[from] StoreError),
}

impl TopUpError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::StorageError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryJobStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Image,
        Empty,
        Hang,
        Fail,
    }

    /// Plays back a script of outcomes, then repeats `fallback`.
    struct ScriptedGenerator {
        script: Mutex<VecDeque<Step>>,
        fallback: Step,
        calls: AtomicU32,
        cancel_after: Option<(u32, CancelFlag)>,
    }

    impl ScriptedGenerator {
        fn new(script: &[Step], fallback: Step) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
                calls: AtomicU32::new(0),
                cancel_after: None,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Option<Vec<u8>>, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, flag)) = &self.cancel_after {
                if n >= *after {
                    flag.cancel();
                }
            }
            let step = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
            match step {
                Step::Image => Ok(Some(format!("image-{n}").into_bytes())),
                Step::Empty => Ok(None),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(None)
                }
                Step::Fail => Err(GenerationError::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                }),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn policy(min: usize, rounds: u32) -> TopUpPolicy {
        TopUpPolicy {
            min_candidates: min,
            max_rounds: rounds,
            fan_out: 1,
            call_timeout: Duration::from_millis(50),
            stop_on_empty: true,
            cost_per_image_usd: 0.039,
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            subject: b"subject".to_vec(),
            style: b"style".to_vec(),
            swatch: None,
            prompt: "swap".to_string(),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        storage: ImageStorage,
        store: MemoryJobStore,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        Harness {
            storage: ImageStorage::local(dir.path()),
            store: MemoryJobStore::new(),
            _dir: dir,
        }
    }

    async fn run(
        h: &Harness,
        generator: &ScriptedGenerator,
        policy: TopUpPolicy,
        job: &mut JobRecord,
        cancel: &CancelFlag,
    ) -> TopUpOutcome {
        let controller = TopUpController::new(generator, &h.storage, &h.store, policy);
        controller
            .ensure_minimum(Uuid::new_v4(), job, &request(), cancel)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reliable_generator_fills_in_one_round() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[], Step::Image);
        let mut job = JobRecord::new();

        let outcome = run(&h, &generator, policy(3, 2), &mut job, &CancelFlag::new()).await;

        assert_eq!(job.results.len(), 3);
        assert_eq!(outcome.rounds_used, 1);
        assert_eq!(outcome.stop, StopReason::MinimumReached);
        assert_eq!(generator.calls(), 3);
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.meta.cost_estimate_usd, 0.117);
        assert_eq!(job.meta.model.as_deref(), Some("scripted"));
    }

    #[tokio::test]
    async fn test_empty_generation_is_a_hard_stop() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[Step::Image, Step::Image, Step::Empty], Step::Image);
        let mut job = JobRecord::new();

        let outcome = run(&h, &generator, policy(3, 2), &mut job, &CancelFlag::new()).await;

        assert_eq!(job.results.len(), 2);
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(outcome.stop, StopReason::GeneratorExhausted);
        assert_eq!(generator.calls(), 3, "no call after the empty result");
    }

    #[tokio::test]
    async fn test_empty_can_be_retried_when_configured() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[Step::Image, Step::Empty], Step::Image);
        let mut job = JobRecord::new();
        let policy = TopUpPolicy {
            stop_on_empty: false,
            ..policy(3, 2)
        };

        let outcome = run(&h, &generator, policy, &mut job, &CancelFlag::new()).await;

        assert_eq!(job.results.len(), 3);
        assert_eq!(outcome.rounds_used, 2);
        assert_eq!(outcome.empty, 1);
    }

    #[tokio::test]
    async fn test_timeout_retries_next_round() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[Step::Image, Step::Hang], Step::Image);
        let mut job = JobRecord::new();

        let outcome = run(&h, &generator, policy(3, 2), &mut job, &CancelFlag::new()).await;

        assert_eq!(job.results.len(), 3);
        assert_eq!(outcome.timeouts, 1);
        assert_eq!(outcome.rounds_used, 2);
        assert_eq!(outcome.stop, StopReason::MinimumReached);
    }

    #[tokio::test]
    async fn test_round_budget_bounds_calls() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[], Step::Fail);
        let mut job = JobRecord::new();

        let outcome = run(&h, &generator, policy(3, 2), &mut job, &CancelFlag::new()).await;

        assert_eq!(generator.calls(), 2);
        assert_eq!(outcome.stop, StopReason::RoundsExhausted);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_ref().unwrap().code, ErrorCode::GenerationTimeout);
    }

    #[tokio::test]
    async fn test_nothing_generated_fails_with_empty_code() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[], Step::Empty);
        let mut job = JobRecord::new();

        run(&h, &generator, policy(3, 2), &mut job, &CancelFlag::new()).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().code, ErrorCode::GenerationEmpty);
    }

    #[tokio::test]
    async fn test_existing_candidates_count_toward_minimum() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[], Step::Image);
        let mut job = JobRecord::new();
        job.results.push(Candidate::new("file:///prev/cand_1.jpg"));
        job.results.push(Candidate::new("file:///prev/cand_2.jpg"));
        job.meta.latency_ms = 1_000;
        job.meta.cost_estimate_usd = 0.078;

        run(&h, &generator, policy(3, 2), &mut job, &CancelFlag::new()).await;

        assert_eq!(generator.calls(), 1);
        assert_eq!(job.results.len(), 3);
        assert_eq!(job.results[0].reference, "file:///prev/cand_1.jpg");
        assert!(job.results[2].reference.ends_with("cand_3.jpg"));
        assert!(job.meta.latency_ms >= 1_000);
        assert_eq!(job.meta.cost_estimate_usd, 0.117);
    }

    #[tokio::test]
    async fn test_fan_out_never_overshoots() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[], Step::Image);
        let mut job = JobRecord::new();
        let policy = TopUpPolicy {
            fan_out: 4,
            ..policy(3, 2)
        };

        run(&h, &generator, policy, &mut job, &CancelFlag::new()).await;

        assert_eq!(generator.calls(), 3);
        assert_eq!(job.results.len(), 3);
    }

    #[tokio::test]
    async fn test_fan_out_keeps_images_from_the_stopping_batch() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[Step::Image, Step::Empty, Step::Image], Step::Image);
        let mut job = JobRecord::new();
        let policy = TopUpPolicy {
            fan_out: 3,
            ..policy(4, 2)
        };

        let outcome = run(&h, &generator, policy, &mut job, &CancelFlag::new()).await;

        assert_eq!(outcome.stop, StopReason::GeneratorExhausted);
        assert_eq!(job.results.len(), 2);
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_cancel_keeps_collected_candidates() {
        let h = harness();
        let cancel = CancelFlag::new();
        let mut generator = ScriptedGenerator::new(&[], Step::Image);
        generator.cancel_after = Some((2, cancel.clone()));
        let mut job = JobRecord::new();

        let outcome = run(&h, &generator, policy(5, 2), &mut job, &cancel).await;

        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert_eq!(generator.calls(), 2);
        assert_eq!(job.results.len(), 2);
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_progress_is_saved_per_batch() {
        let h = harness();
        let generator = ScriptedGenerator::new(&[Step::Image, Step::Empty], Step::Image);
        let mut job = JobRecord::new();
        let job_id = Uuid::new_v4();

        let controller = TopUpController::new(&generator, &h.storage, &h.store, policy(3, 1));
        controller
            .ensure_minimum(job_id, &mut job, &request(), &CancelFlag::new())
            .await
            .unwrap();

        let saved = h.store.load(job_id).await.unwrap();
        assert_eq!(saved.results, job.results);
    }
}
