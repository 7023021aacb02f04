//! Local cache of annotation tables, populated from a remote release on first use.
//!
//! Files are written to a temporary file inside the cache directory and renamed
//! into place, so a request never reads a partially downloaded table.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use flate2::write::GzDecoder;
use reqwest::blocking::Client;
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationLayout {
    /// One `<chrom>.feather` shard per chromosome under `base_url`.
    PerChromosome { base_url: String },
    /// One table holding every chromosome.
    WholeGenome { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Reuse,
    AlwaysDownload,
}

impl FromStr for CachePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse" | "cache" => Ok(CachePolicy::Reuse),
            "always-download" | "always_download" | "download" => Ok(CachePolicy::AlwaysDownload),
            other => Err(anyhow!("unknown cache policy '{other}' (expected 'reuse' or 'always-download')")),
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::Reuse => write!(f, "reuse"),
            CachePolicy::AlwaysDownload => write!(f, "always-download"),
        }
    }
}

/// Where annotation bytes come from.
pub trait RemoteSource: Send {
    /// Stream the body at `url` into `sink`, returning the number of bytes received.
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64>;
}

pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("variant_viewer/", env!("CARGO_PKG_VERSION")))
            // annotation shards can take a while on slow links
            .timeout(None)
            .build()
            .context("building annotation HTTP client")?;
        Ok(Self { client })
    }
}

impl RemoteSource for HttpSource {
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("requesting {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("failed to fetch {url}: HTTP {status}");
        }
        let n = io::copy(&mut response, sink).with_context(|| format!("streaming {url}"))?;
        Ok(n)
    }
}

/// Add the `chr` prefix GENCODE shards are named with.
pub fn normalize_chromosome(chrom: &str) -> String {
    let chrom = chrom.trim();
    if chrom.starts_with("chr") {
        chrom.to_string()
    } else {
        format!("chr{chrom}")
    }
}

fn join_url(base: &str, file_name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file_name)
}

pub struct AnnotationCache {
    dir: PathBuf,
    layout: AnnotationLayout,
    policy: CachePolicy,
    source: Box<dyn RemoteSource>,
}

impl AnnotationCache {
    pub fn new(
        dir: impl Into<PathBuf>,
        layout: AnnotationLayout,
        policy: CachePolicy,
        source: Box<dyn RemoteSource>,
    ) -> Self {
        Self {
            dir: dir.into(),
            layout,
            policy,
            source,
        }
    }

    pub fn layout(&self) -> &AnnotationLayout {
        &self.layout
    }

    /// Remote URL and local path for a chromosome.
    pub fn locate(&self, chrom: &str) -> (String, PathBuf) {
        match &self.layout {
            AnnotationLayout::PerChromosome { base_url } => {
                let file_name = format!("{}.feather", normalize_chromosome(chrom));
                (join_url(base_url, &file_name), self.dir.join(file_name))
            }
            AnnotationLayout::WholeGenome { url } => {
                let last = url.rsplit('/').next().unwrap_or(url.as_str());
                let file_name = last.strip_suffix(".gz").unwrap_or(last);
                let file_name = if file_name.is_empty() { "annotation.feather" } else { file_name };
                (url.clone(), self.dir.join(file_name))
            }
        }
    }

    /// Path to a local table covering `chrom`, downloading it if needed.
    pub fn ensure(&self, chrom: &str) -> Result<PathBuf> {
        let (url, local_path) = self.locate(chrom);
        if self.policy == CachePolicy::Reuse && local_path.is_file() {
            debug!("Annotation cache hit: {}", local_path.display());
            return Ok(local_path);
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating annotation cache directory {}", self.dir.display()))?;
        info!("Downloading annotation table {} -> {}", url, local_path.display());
        let n = self.fetch_into_place(&url, &local_path)?;
        info!("Stored {} bytes at {}", n, local_path.display());
        Ok(local_path)
    }

    fn fetch_into_place(&self, url: &str, destination: &Path) -> Result<u64> {
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("creating temporary file in {}", self.dir.display()))?;

        let n = if url.ends_with(".gz") {
            let mut decoder = GzDecoder::new(tmp.as_file_mut());
            let n = self.source.download(url, &mut decoder)?;
            decoder.try_finish().with_context(|| format!("decompressing {url}"))?;
            n
        } else {
            self.source.download(url, tmp.as_file_mut())?
        };
        tmp.as_file_mut().flush()?;

        tmp.persist(destination)
            .map_err(|e| anyhow!("could not move download into {}: {}", destination.display(), e.error))?;
        Ok(n)
    }
}
