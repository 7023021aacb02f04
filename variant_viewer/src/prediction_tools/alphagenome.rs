use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PredictionSettings;
use crate::models::{Interval, Variant};

/// Output heads of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputType {
    Atac,
    Cage,
    Dnase,
    RnaSeq,
    ChipHistone,
    ChipTf,
    SpliceSites,
    SpliceSiteUsage,
    SpliceJunctions,
    ContactMaps,
    Procap,
}

impl OutputType {
    pub const ALL: [OutputType; 11] = [
        OutputType::Atac,
        OutputType::Cage,
        OutputType::Dnase,
        OutputType::RnaSeq,
        OutputType::ChipHistone,
        OutputType::ChipTf,
        OutputType::SpliceSites,
        OutputType::SpliceSiteUsage,
        OutputType::SpliceJunctions,
        OutputType::ContactMaps,
        OutputType::Procap,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OutputType::Atac => "ATAC",
            OutputType::Cage => "CAGE",
            OutputType::Dnase => "DNASE",
            OutputType::RnaSeq => "RNA_SEQ",
            OutputType::ChipHistone => "CHIP_HISTONE",
            OutputType::ChipTf => "CHIP_TF",
            OutputType::SpliceSites => "SPLICE_SITES",
            OutputType::SpliceSiteUsage => "SPLICE_SITE_USAGE",
            OutputType::SpliceJunctions => "SPLICE_JUNCTIONS",
            OutputType::ContactMaps => "CONTACT_MAPS",
            OutputType::Procap => "PROCAP",
        }
    }

    /// Key of this output inside a prediction response.
    pub fn attribute_name(&self) -> String {
        self.name().to_ascii_lowercase()
    }

    /// Junctions and contact maps are not per-position signal tracks.
    pub fn is_track(&self) -> bool {
        !matches!(self, OutputType::SpliceJunctions | OutputType::ContactMaps)
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        OutputType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| anyhow!("unknown output type '{wanted}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub name: String,
    #[serde(default)]
    pub strand: Option<String>,
    #[serde(default)]
    pub ontology_curie: Option<String>,
}

fn default_resolution() -> u32 {
    1
}

/// Signal over an interval: `values[position_bin][track]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackData {
    pub values: Vec<Vec<f32>>,
    #[serde(default)]
    pub metadata: Vec<TrackMetadata>,
    #[serde(default = "default_resolution")]
    pub resolution: u32,
    #[serde(default)]
    pub interval: Option<Interval>,
}

impl TrackData {
    pub fn num_tracks(&self) -> usize {
        self.values.first().map(Vec::len).unwrap_or(0)
    }

    pub fn track_name(&self, index: usize) -> String {
        match self.metadata.get(index) {
            Some(m) => match (&m.strand, &m.ontology_curie) {
                (Some(strand), _) if strand != "." => format!("{} ({})", m.name, strand),
                _ => m.name.clone(),
            },
            None => format!("track {}", index + 1),
        }
    }
}

/// Model outputs for one allele, keyed by [`OutputType::attribute_name`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Output {
    pub tracks: HashMap<String, TrackData>,
}

impl Output {
    pub fn get(&self, output_type: OutputType) -> Option<&TrackData> {
        self.tracks.get(&output_type.attribute_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantOutput {
    pub reference: Output,
    pub alternate: Output,
}

impl VariantOutput {
    /// Reference and alternate tracks for `output_type`.
    pub fn track_pair(&self, output_type: OutputType) -> Result<(&TrackData, &TrackData)> {
        let missing = |allele: &str| {
            anyhow!(
                "prediction response has no '{}' output for the {} allele",
                output_type.attribute_name(),
                allele
            )
        };
        let reference = self.reference.get(output_type).ok_or_else(|| missing("reference"))?;
        let alternate = self.alternate.get(output_type).ok_or_else(|| missing("alternate"))?;
        Ok((reference, alternate))
    }
}

/// Anything that can score a variant against its reference.
pub trait VariantPredictor: Send {
    fn predict_variant(
        &self,
        interval: &Interval,
        variant: &Variant,
        requested_outputs: &[OutputType],
        ontology_terms: &[String],
    ) -> Result<VariantOutput>;
}

#[derive(Serialize)]
struct PredictVariantRequest<'a> {
    interval: &'a Interval,
    variant: &'a Variant,
    requested_outputs: &'a [OutputType],
    ontology_terms: &'a [String],
}

/// Message of a Google-style `{"error": {"message": ...}}` body, or the raw text.
fn api_error_message(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| text.trim().to_string())
}

/// Blocking JSON client for the model-serving gateway.
pub struct AlphaGenomeClient {
    client: Client,
    base_url: String,
}

impl AlphaGenomeClient {
    pub fn new(settings: &PredictionSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("variant_viewer/", env!("CARGO_PKG_VERSION"))),
        );
        let mut key = HeaderValue::from_str(&settings.api_key).context("API key is not a valid header value")?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(None)
            .build()
            .context("building prediction client")?;

        Ok(Self {
            client,
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl VariantPredictor for AlphaGenomeClient {
    fn predict_variant(
        &self,
        interval: &Interval,
        variant: &Variant,
        requested_outputs: &[OutputType],
        ontology_terms: &[String],
    ) -> Result<VariantOutput> {
        let url = format!("{}/v1/predict_variant", self.base_url);
        info!(
            "Predicting {}:{} {}>{} over {}-{}",
            variant.chromosome,
            variant.position,
            variant.reference_bases,
            variant.alternate_bases,
            interval.start,
            interval.end
        );
        let body = PredictVariantRequest {
            interval,
            variant,
            requested_outputs,
            ontology_terms,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("calling {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().unwrap_or_default();
            bail!("prediction request failed. Status: {}. Error: {}", status, api_error_message(&error_text));
        }
        let output: VariantOutput = response.json().context("decoding prediction response")?;
        debug!("Prediction returned {} reference outputs", output.reference.tracks.len());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stub_endpoint;
    use serde_json::json;

    fn client_for(endpoint: &str) -> AlphaGenomeClient {
        AlphaGenomeClient::new(&PredictionSettings {
            api_key: "test-key".into(),
            endpoint: format!("{endpoint}/"),
            sequence_length: 2048,
        })
        .unwrap()
    }

    fn snv() -> (Interval, Variant) {
        let variant = Variant {
            chromosome: "chr22".into(),
            position: 1024,
            reference_bases: "A".into(),
            alternate_bases: "G".into(),
        };
        (Interval::new("chr22", 0, 2048), variant)
    }

    #[test]
    fn output_type_parsing_is_case_insensitive() {
        assert_eq!("RNA_SEQ".parse::<OutputType>().unwrap(), OutputType::RnaSeq);
        assert_eq!("dnase".parse::<OutputType>().unwrap(), OutputType::Dnase);
        assert!("RNA".parse::<OutputType>().is_err());
        assert_eq!(OutputType::ChipHistone.attribute_name(), "chip_histone");
        assert!(!OutputType::ContactMaps.is_track());
    }

    #[test]
    fn request_serializes_selectors_by_name() {
        let interval = Interval::new("chr22", 0, 2048);
        let variant = Variant {
            chromosome: "chr22".into(),
            position: 1024,
            reference_bases: "A".into(),
            alternate_bases: "G".into(),
        };
        let terms = vec!["UBERON:0000955".to_string()];
        let body = PredictVariantRequest {
            interval: &interval,
            variant: &variant,
            requested_outputs: &[OutputType::RnaSeq],
            ontology_terms: &terms,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["requested_outputs"], json!(["RNA_SEQ"]));
        assert_eq!(v["interval"]["end"], json!(2048));
        assert_eq!(v["variant"]["reference_bases"], json!("A"));
    }

    #[test]
    fn response_tracks_are_found_by_attribute_name() {
        let payload = json!({
            "reference": {"dnase": {"values": [[0.1, 0.2], [0.3, 0.4]], "resolution": 1,
                                    "metadata": [{"name": "brain", "strand": "+"}, {"name": "brain", "strand": "-"}]}},
            "alternate": {"dnase": {"values": [[0.5, 0.6], [0.7, 0.8]]}}
        });
        let out: VariantOutput = serde_json::from_value(payload).unwrap();
        let (r, a) = out.track_pair(OutputType::Dnase).unwrap();
        assert_eq!(r.num_tracks(), 2);
        assert_eq!(r.track_name(1), "brain (-)");
        assert_eq!(a.resolution, 1);
        assert_eq!(a.track_name(0), "track 1");
        assert!(out.track_pair(OutputType::Cage).is_err());
    }

    #[test]
    fn client_posts_request_with_key_and_decodes_response() {
        let payload = json!({
            "reference": {"rna_seq": {"values": [[1.0], [2.0]], "resolution": 128,
                                      "interval": {"chromosome": "chr22", "start": 0, "end": 256}}},
            "alternate": {"rna_seq": {"values": [[1.5], [2.5]], "resolution": 128}}
        });
        let (endpoint, handle) = stub_endpoint(vec![(200, payload.to_string().into_bytes())]);
        let (interval, variant) = snv();
        let terms = vec!["UBERON:0000955".to_string()];

        let out = client_for(&endpoint)
            .predict_variant(&interval, &variant, &[OutputType::RnaSeq], &terms)
            .unwrap();
        let (r, a) = out.track_pair(OutputType::RnaSeq).unwrap();
        assert_eq!(r.resolution, 128);
        assert_eq!(r.interval, Some(Interval::new("chr22", 0, 256)));
        assert_eq!(a.values[1], vec![2.5]);

        let seen = handle.join().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].url, "/v1/predict_variant");
        assert_eq!(seen[0].header("x-goog-api-key"), Some("test-key"));
        let sent: serde_json::Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(sent["requested_outputs"], json!(["RNA_SEQ"]));
        assert_eq!(sent["ontology_terms"], json!(["UBERON:0000955"]));
    }

    #[test]
    fn client_reports_status_and_api_message() {
        let body = json!({"error": {"code": 403, "message": "API key not valid."}});
        let (endpoint, handle) = stub_endpoint(vec![
            (403, body.to_string().into_bytes()),
            (200, b"not json".to_vec()),
        ]);
        let (interval, variant) = snv();
        let client = client_for(&endpoint);

        let err = client
            .predict_variant(&interval, &variant, &[OutputType::Dnase], &[])
            .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("403"), "{message}");
        assert!(message.contains("API key not valid."), "{message}");

        let err = client
            .predict_variant(&interval, &variant, &[OutputType::Dnase], &[])
            .unwrap_err();
        assert!(format!("{:#}", err).contains("decoding prediction response"));
        handle.join().unwrap();
    }

    #[test]
    fn error_bodies_fall_back_to_raw_text() {
        assert_eq!(api_error_message(r#"{"error": {"message": "quota"}}"#), "quota");
        assert_eq!(api_error_message(" upstream timeout \n"), "upstream timeout");
    }
}
