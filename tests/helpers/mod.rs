//! Shared test doubles and HTTP helpers

#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::multipart;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use restyle_autopick::config::PipelineConfig;
use restyle_autopick::db::{JobStore, MemoryJobStore};
use restyle_autopick::models::job::{JobRecord, JobStatus};
use restyle_autopick::models::style::{StyleAttributes, StyleDescription};
use restyle_autopick::services::generation::{GenerationClient, GenerationError, GenerationRequest};
use restyle_autopick::services::pipeline::Pipeline;
use restyle_autopick::services::queue::QueuedRun;
use restyle_autopick::services::storage::{upload_key, ImageStorage};
use restyle_autopick::services::style::StyleAnalyzer;

pub const SKIN: [u8; 3] = [200, 160, 140];
pub const AUBURN: [u8; 3] = [120, 60, 20];
pub const BLUE: [u8; 3] = [20, 40, 160];
pub const GREEN: [u8; 3] = [30, 120, 40];

/// PNG of a portrait-like image: `hair` everywhere, a skin block where the
/// face usually sits.
pub fn portrait(hair: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_fn(128, 256, |x, y| {
        if (32..96).contains(&x) && (64..160).contains(&y) {
            Rgb(SKIN)
        } else {
            Rgb(hair)
        }
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Generator that plays back a script, then repeats `fallback`.
pub struct ScriptedGenerator {
    outputs: Mutex<VecDeque<Option<Vec<u8>>>>,
    fallback: Option<Vec<u8>>,
    calls: AtomicU32,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(outputs: Vec<Option<Vec<u8>>>, fallback: Option<Vec<u8>>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            fallback,
            calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<Vec<u8>>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        let next = self.outputs.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }

    fn model(&self) -> &str {
        "scripted-editor"
    }
}

/// Analyzer returning a fixed color, or failing when `color_hex` is `None`.
pub struct FixedAnalyzer {
    pub color_hex: Option<String>,
    pub calls: AtomicU32,
}

impl FixedAnalyzer {
    pub fn new(color_hex: Option<&str>) -> Self {
        Self {
            color_hex: color_hex.map(str::to_string),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StyleAnalyzer for FixedAnalyzer {
    async fn analyze(&self, _style_image: &[u8]) -> Result<StyleDescription, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.color_hex {
            Some(hex) => {
                let attributes = StyleAttributes {
                    length: "long".to_string(),
                    color_hex: hex.clone(),
                    ..StyleAttributes::default()
                };
                Ok(StyleDescription {
                    style_desc: attributes.summary(),
                    attributes,
                })
            }
            None => Err(GenerationError::Api {
                status: 503,
                message: "analyzer unavailable".to_string(),
            }),
        }
    }
}

/// In-process pipeline over a temporary directory and an in-memory store.
pub struct Harness {
    _dir: tempfile::TempDir,
    pub generator: Arc<ScriptedGenerator>,
    pub analyzer: Arc<FixedAnalyzer>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new(generator: ScriptedGenerator, analyzer: FixedAnalyzer) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(generator);
        let analyzer = Arc::new(analyzer);
        let pipeline = Pipeline {
            generator: generator.clone(),
            analyzer: analyzer.clone(),
            store: Arc::new(MemoryJobStore::new()),
            storage: Arc::new(ImageStorage::local(dir.path())),
            config: Arc::new(PipelineConfig::default()),
            region: "test-region".to_string(),
        };
        Self {
            _dir: dir,
            generator,
            analyzer,
            pipeline,
        }
    }

    /// Store the input photos and build a run for a fresh job.
    pub async fn queued_run(&self, subject: &[u8], style: &[u8]) -> QueuedRun {
        let job_id = Uuid::new_v4();
        let key = job_id.to_string();
        let storage = &self.pipeline.storage;
        QueuedRun {
            job_id,
            subject_ref: storage.put(&upload_key(&key, "subject", "png"), subject, "image/png").await.unwrap(),
            style_ref: storage.put(&upload_key(&key, "style", "png"), style, "image/png").await.unwrap(),
            target_hex: None,
            style_desc: None,
            min_candidates: None,
            max_rounds: None,
            max_size: None,
        }
    }

    pub async fn load(&self, job_id: Uuid) -> JobRecord {
        self.pipeline.store.load(job_id).await.unwrap()
    }
}

/// Response from POST /api/v1/runs
#[derive(Debug, serde::Deserialize)]
pub struct RunResponse {
    pub job_id: Uuid,
    pub status: String,
}

/// Submit a run to a live server
pub async fn upload_run(
    client: &reqwest::Client,
    base_url: &str,
    subject: Vec<u8>,
    style: Vec<u8>,
    target_hex: Option<&str>,
) -> Result<RunResponse, Box<dyn std::error::Error>> {
    let mut form = multipart::Form::new()
        .part("subject", multipart::Part::bytes(subject).file_name("subject.png").mime_str("image/png")?)
        .part("style", multipart::Part::bytes(style).file_name("style.png").mime_str("image/png")?);
    if let Some(hex) = target_hex {
        form = form.text("target_hex", hex.to_string());
    }

    let response = client
        .post(format!("{}/api/v1/runs", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<RunResponse>().await?)
}

/// Poll a job until it leaves `processing` (with timeout)
pub async fn poll_job(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobRecord, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for _ in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/jobs/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let job = response.json::<JobRecord>().await?;
        if job.status != JobStatus::Processing {
            return Ok(job);
        }
        sleep(Duration::from_millis(500)).await;
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}
