use serde::Deserialize;

pub mod pipeline;

pub use pipeline::{PipelineConfig, ScoringConfig, TopUpConfig};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreKind {
    /// JSON files under `jobs_dir`
    #[default]
    File,
    /// PostgreSQL table (requires `database_url`)
    Postgres,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local directory under `storage_dir`
    #[default]
    Local,
    /// Cloudflare R2 (requires the `r2_*` settings)
    R2,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:5050"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the run queue
    pub redis_url: String,

    /// Gemini API key
    pub gemini_api_key: String,

    /// Image editing model
    #[serde(default = "default_image_model")]
    pub gemini_image_model: String,

    /// Text model used to describe reference styles
    #[serde(default = "default_text_model")]
    pub gemini_text_model: String,

    /// Region label recorded on each job
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub job_store: JobStoreKind,

    /// Directory of JSON job records (file store)
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: String,

    /// PostgreSQL connection string (postgres store)
    pub database_url: Option<String>,

    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// Root directory for uploads and candidates (local storage)
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// R2 bucket name
    pub r2_bucket: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5050".to_string()
}

fn default_image_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}

fn default_text_model() -> String {
    "gemini-1.5-pro".to_string()
}

fn default_region() -> String {
    "asia-east1".to_string()
}

fn default_jobs_dir() -> String {
    "storage/jobs".to_string()
}

fn default_storage_dir() -> String {
    "storage".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
