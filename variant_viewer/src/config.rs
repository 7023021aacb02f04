//! Runtime settings, read once at startup from the environment.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use crate::data_handling::annotation_cache::{AnnotationLayout, CachePolicy};
use crate::data_handling::annotation_reader::ScanStrategy;
use crate::helper_functions::project_root;

pub const DEFAULT_ANNOTATION_BASE_URL: &str =
    "https://github.com/Pamela-Hao/fortunatecow/releases/download/v1.0/";
pub const DEFAULT_PREDICTION_ENDPOINT: &str = "https://alphagenome.googleapis.com";

/// Model input widths accepted by the prediction service.
pub const SUPPORTED_SEQUENCE_LENGTHS: [i64; 5] = [2048, 16384, 131_072, 524_288, 1_048_576];
pub const SEQUENCE_LENGTH_1MB: i64 = 1_048_576;

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct PredictionSettings {
    pub api_key: String,
    pub endpoint: String,
    pub sequence_length: i64,
}

#[derive(Debug, Clone)]
pub struct AnnotationSettings {
    pub cache_dir: PathBuf,
    pub layout: AnnotationLayout,
    pub policy: CachePolicy,
    pub scan: ScanStrategy,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub prediction: PredictionSettings,
    pub annotation: AnnotationSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(p) => p.parse::<u16>().with_context(|| format!("PORT must be a port number, got '{p}'"))?,
            None => 5000,
        };
        let server = ServerSettings {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
        };

        let api_key = get("ALPHAGENOME_API_KEY")
            .ok_or_else(|| anyhow!("ALPHAGENOME_API_KEY must be set to call the prediction service"))?;
        let sequence_length = match get("PREDICTION_SEQUENCE_LENGTH") {
            Some(raw) => {
                let len = raw
                    .parse::<i64>()
                    .with_context(|| format!("PREDICTION_SEQUENCE_LENGTH must be an integer, got '{raw}'"))?;
                if !SUPPORTED_SEQUENCE_LENGTHS.contains(&len) {
                    bail!(
                        "PREDICTION_SEQUENCE_LENGTH must be one of {:?}, got {len}",
                        SUPPORTED_SEQUENCE_LENGTHS
                    );
                }
                len
            }
            None => SEQUENCE_LENGTH_1MB,
        };
        let prediction = PredictionSettings {
            api_key,
            endpoint: get("ALPHAGENOME_ENDPOINT").unwrap_or_else(|| DEFAULT_PREDICTION_ENDPOINT.to_string()),
            sequence_length,
        };

        let cache_dir = get("ANNOTATION_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| project_root().join("gencode_split"));
        let layout = match get("ANNOTATION_URL") {
            Some(url) => AnnotationLayout::WholeGenome { url },
            None => AnnotationLayout::PerChromosome {
                base_url: get("ANNOTATION_BASE_URL").unwrap_or_else(|| DEFAULT_ANNOTATION_BASE_URL.to_string()),
            },
        };
        let policy = match get("ANNOTATION_CACHE") {
            Some(raw) => raw.parse::<CachePolicy>().context("ANNOTATION_CACHE")?,
            None => CachePolicy::Reuse,
        };
        let scan = match get("ANNOTATION_SCAN") {
            Some(raw) => raw.parse::<ScanStrategy>().context("ANNOTATION_SCAN")?,
            None => ScanStrategy::Streaming,
        };

        Ok(Self {
            server,
            prediction,
            annotation: AnnotationSettings {
                cache_dir,
                layout,
                policy,
                scan,
            },
        })
    }
}
