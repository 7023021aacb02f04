//! Fixtures shared by the unit tests.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::thread::JoinHandle;

use anyhow::{bail, Result};
use polars::df;
use polars::prelude::*;
use tiny_http::{Header, Response, Server, StatusCode};

use crate::data_handling::annotation_cache::RemoteSource;
use crate::models::{Interval, Variant};
use crate::prediction_tools::alphagenome::{Output, OutputType, TrackData, TrackMetadata, VariantOutput, VariantPredictor};

pub fn complete_fields() -> HashMap<String, String> {
    [
        ("chromosome", "chr1"),
        ("position", "50000"),
        ("ref", "A"),
        ("alt", "G"),
        ("output_type", "RNA_SEQ"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Write a small GENCODE-shaped `<chrom>.feather` into `dir`.
pub fn seed_chromosome(dir: &Path, chrom: &str) {
    let n = 10;
    let mut df = df![
        "Chromosome" => vec![chrom; n],
        "Source" => vec!["HAVANA"; n],
        "Feature" => &["gene", "transcript", "exon", "CDS", "exon", "transcript", "exon", "gene", "transcript", "exon"],
        "Start" => &[45_000i64, 45_000, 45_000, 46_000, 52_000, 47_000, 47_000, 58_000, 58_000, 58_000],
        "End" => &[60_000i64, 60_000, 47_000, 47_000, 60_000, 49_000, 49_000, 61_000, 61_000, 61_000],
        "Strand" => &["+", "+", "+", "+", "+", "+", "+", "-", "-", "-"],
        "gene_id" => &["G1", "G1", "G1", "G1", "G1", "G1", "G1", "G2", "G2", "G2"],
        "gene_name" => &["CODING", "CODING", "CODING", "CODING", "CODING", "CODING", "CODING", "NONCODING", "NONCODING", "NONCODING"],
        "gene_type" => &["protein_coding", "protein_coding", "protein_coding", "protein_coding", "protein_coding", "protein_coding", "protein_coding", "lncRNA", "lncRNA", "lncRNA"],
        "transcript_id" => &[None, Some("T1"), Some("T1"), Some("T1"), Some("T1"), Some("T2"), Some("T2"), None, Some("T3"), Some("T3")],
        "transcript_type" => &[None, Some("protein_coding"), Some("protein_coding"), Some("protein_coding"), Some("protein_coding"), Some("protein_coding"), Some("protein_coding"), None, Some("lncRNA"), Some("lncRNA")],
    ]
    .unwrap();
    let mut file = File::create(dir.join(format!("{chrom}.feather"))).unwrap();
    IpcWriter::new(&mut file).finish(&mut df).unwrap();
}

/// Remote source that must never be reached.
pub struct UnreachableSource;

impl RemoteSource for UnreachableSource {
    fn download(&self, url: &str, _sink: &mut dyn Write) -> Result<u64> {
        bail!("unexpected download of {url}")
    }
}

/// Deterministic stand-in for the model: a smooth reference signal and a bump at the variant.
pub struct FakePredictor;

impl FakePredictor {
    const RESOLUTION: u32 = 128;

    fn track(interval: &Interval, variant: &Variant, bump: f32) -> TrackData {
        let res = i64::from(Self::RESOLUTION);
        let bins = (interval.width() / res).max(1);
        let values = (0..bins)
            .map(|i| {
                let pos = interval.start + i * res;
                let base = ((pos as f32) / 2_000.0).sin().abs();
                let near = ((pos - variant.position).abs() < 4 * res) as u8 as f32;
                vec![base + bump * near, 0.5 * base]
            })
            .collect();
        TrackData {
            values,
            metadata: vec![
                TrackMetadata { name: "brain".into(), strand: Some("+".into()), ontology_curie: Some("UBERON:0000955".into()) },
                TrackMetadata { name: "brain".into(), strand: Some("-".into()), ontology_curie: Some("UBERON:0000955".into()) },
            ],
            resolution: Self::RESOLUTION,
            interval: Some(interval.clone()),
        }
    }
}

impl VariantPredictor for FakePredictor {
    fn predict_variant(
        &self,
        interval: &Interval,
        variant: &Variant,
        requested_outputs: &[OutputType],
        _ontology_terms: &[String],
    ) -> Result<VariantOutput> {
        let mut reference = Output::default();
        let mut alternate = Output::default();
        for output in requested_outputs {
            reference.tracks.insert(output.attribute_name(), Self::track(interval, variant, 0.0));
            alternate.tracks.insert(output.attribute_name(), Self::track(interval, variant, 2.0));
        }
        Ok(VariantOutput { reference, alternate })
    }
}

/// What a stub endpoint saw for one request.
#[derive(Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Local HTTP endpoint answering with `replies` in order, then shutting down.
///
/// Returns the base URL and a handle yielding the recorded requests.
pub fn stub_endpoint(replies: Vec<(u16, Vec<u8>)>) -> (String, JoinHandle<Vec<RecordedRequest>>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", server.server_addr().to_ip().unwrap());
    let handle = std::thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in replies {
            let mut request = server.recv().unwrap();
            let mut received = String::new();
            request.as_reader().read_to_string(&mut received).unwrap();
            seen.push(RecordedRequest {
                method: request.method().to_string(),
                url: request.url().to_string(),
                headers: request
                    .headers()
                    .iter()
                    .map(|h| (h.field.as_str().as_str().to_string(), h.value.as_str().to_string()))
                    .collect(),
                body: received,
            });
            let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
            let response = Response::from_data(body)
                .with_status_code(StatusCode(status))
                .with_header(content_type);
            request.respond(response).unwrap();
        }
        seen
    });
    (base_url, handle)
}
