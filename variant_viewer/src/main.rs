use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::data_handling::annotation_cache::{AnnotationCache, HttpSource};
use crate::data_handling::annotation_reader::AnnotationReader;
use crate::pipeline::VariantPipeline;
use crate::prediction_tools::alphagenome::AlphaGenomeClient;

mod analysis;
mod config;
mod data_handling;
mod helper_functions;
mod models;
mod pipeline;
mod prediction_tools;
mod server;
#[cfg(test)]
mod testing;

fn main() -> Result<()> {
    // Setup logging and configuration
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting the variant viewer");
    let settings = Settings::from_env().context("reading configuration")?;

    // The model client lives for the whole process and is handed to the pipeline
    let predictor = AlphaGenomeClient::new(&settings.prediction)?;
    let annotation = &settings.annotation;
    info!(
        "Annotation cache at {} ({:?}, policy {}, scan {:?})",
        annotation.cache_dir.display(),
        annotation.layout,
        annotation.policy,
        annotation.scan
    );
    let cache = AnnotationCache::new(
        annotation.cache_dir.clone(),
        annotation.layout.clone(),
        annotation.policy,
        Box::new(HttpSource::new()?),
    );

    let pipeline = VariantPipeline::new(
        cache,
        AnnotationReader::new(annotation.scan),
        Box::new(predictor),
        settings.prediction.sequence_length,
    );

    server::start_server(&settings.server, &pipeline)
}
