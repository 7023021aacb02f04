//! Per-request flow: validate, fetch annotation, filter, predict, reduce, plot, encode.

use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use plotters::style::RGBColor;
use tracing::{info, warn};

use crate::analysis::variant_plot::{render_png, FigureSpec};
use crate::data_handling::annotation_cache::{normalize_chromosome, AnnotationCache, AnnotationLayout};
use crate::data_handling::annotation_reader::{AnnotationReader, RegionQuery};
use crate::data_handling::transcripts::{reduce_region, RegionAnnotation};
use crate::helper_functions::parse_colour;
use crate::models::{Interval, Variant};
use crate::prediction_tools::alphagenome::{OutputType, VariantPredictor};

pub const MISSING_FIELDS_ERROR: &str = "Please fill in all fields.";
pub const DEFAULT_WINDOW_SIZE: i64 = 1 << 15;
pub const DEFAULT_ONTOLOGY_TERM: &str = "UBERON:0000955";
pub const DEFAULT_REF_COLOUR: &str = "dimgrey";
pub const DEFAULT_ALT_COLOUR: &str = "red";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    MissingFields,
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormError::MissingFields => f.write_str(MISSING_FIELDS_ERROR),
        }
    }
}

impl std::error::Error for FormError {}

/// A submission that passed the presence check. Values are not interpreted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantForm {
    pub chromosome: String,
    pub position: String,
    pub reference_bases: String,
    pub alternate_bases: String,
    pub output_type: String,
    pub window_size: i64,
    pub prediction_center: Option<i64>,
    pub ontology_terms: Vec<String>,
    pub ref_colour: String,
    pub alt_colour: String,
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn positive_int(fields: &HashMap<String, String>, name: &str) -> Option<i64> {
    field(fields, name).and_then(|v| v.parse::<i64>().ok()).filter(|v| *v > 0)
}

impl VariantForm {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, FormError> {
        let (Some(chromosome), Some(position), Some(reference), Some(alternate), Some(output_type)) = (
            field(fields, "chromosome"),
            field(fields, "position"),
            field(fields, "ref"),
            field(fields, "alt"),
            field(fields, "output_type"),
        ) else {
            return Err(FormError::MissingFields);
        };

        let mut ontology_terms: Vec<String> = field(fields, "ontology_terms")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if ontology_terms.is_empty() {
            ontology_terms.push(DEFAULT_ONTOLOGY_TERM.to_string());
        }

        Ok(Self {
            chromosome: chromosome.to_string(),
            position: position.to_string(),
            reference_bases: reference.to_string(),
            alternate_bases: alternate.to_string(),
            output_type: output_type.to_string(),
            window_size: positive_int(fields, "window_size").unwrap_or(DEFAULT_WINDOW_SIZE),
            prediction_center: positive_int(fields, "prediction_center"),
            ontology_terms,
            ref_colour: field(fields, "ref_color").unwrap_or(DEFAULT_REF_COLOUR).to_string(),
            alt_colour: field(fields, "alt_color").unwrap_or(DEFAULT_ALT_COLOUR).to_string(),
        })
    }
}

fn colour_or(name: &str, fallback: &str) -> RGBColor {
    parse_colour(name).unwrap_or_else(|| {
        warn!("Unknown colour '{}', using {}", name, fallback);
        parse_colour(fallback).unwrap_or(RGBColor(0, 0, 0))
    })
}

pub struct VariantPipeline {
    cache: AnnotationCache,
    reader: AnnotationReader,
    predictor: Box<dyn VariantPredictor>,
    sequence_length: i64,
}

impl VariantPipeline {
    pub fn new(
        cache: AnnotationCache,
        reader: AnnotationReader,
        predictor: Box<dyn VariantPredictor>,
        sequence_length: i64,
    ) -> Self {
        Self {
            cache,
            reader,
            predictor,
            sequence_length,
        }
    }

    /// Run one submission through to a base64-encoded PNG.
    pub fn run(&self, form: &VariantForm) -> Result<String> {
        let position: i64 = form
            .position
            .parse()
            .with_context(|| format!("position must be an integer, got '{}'", form.position))?;
        let output_type: OutputType = form.output_type.parse()?;
        if !output_type.is_track() {
            bail!("{} outputs cannot be drawn as overlaid tracks", output_type);
        }

        let center = form.prediction_center.unwrap_or(position);
        let figure_interval = Interval::window_around(form.chromosome.clone(), center, form.window_size)?;

        let table = self.cache.ensure(&form.chromosome)?;
        let query = RegionQuery {
            chromosome: match self.cache.layout() {
                AnnotationLayout::WholeGenome { .. } => Some(normalize_chromosome(&form.chromosome)),
                AnnotationLayout::PerChromosome { .. } => None,
            },
            start: figure_interval.start,
            end: figure_interval.end,
        };
        let region = self
            .reader
            .overlapping(&table, &query)
            .with_context(|| format!("filtering annotation table {}", table.display()))?;

        let variant = Variant {
            chromosome: form.chromosome.clone(),
            position,
            reference_bases: form.reference_bases.clone(),
            alternate_bases: form.alternate_bases.clone(),
        };
        let prediction_interval = variant.reference_interval()?.resize(self.sequence_length)?;
        let outputs = self
            .predictor
            .predict_variant(&prediction_interval, &variant, &[output_type], &form.ontology_terms)
            .context("variant prediction failed")?;
        let (reference, alternate) = outputs.track_pair(output_type)?;

        let annotation = reduce_region(region, &figure_interval).context("reducing annotation rows")?;
        if annotation == RegionAnnotation::Empty {
            warn!(
                "No annotation rows overlap {}:{}-{}; plotting tracks only",
                figure_interval.chromosome, figure_interval.start, figure_interval.end
            );
        }

        let png = render_png(&FigureSpec {
            interval: &figure_interval,
            variant: &variant,
            annotation: &annotation,
            reference,
            alternate,
            prediction_interval: &prediction_interval,
            ref_colour: colour_or(&form.ref_colour, DEFAULT_REF_COLOUR),
            alt_colour: colour_or(&form.alt_colour, DEFAULT_ALT_COLOUR),
        })
        .context("rendering figure")?;
        info!("Figure created ({} bytes)", png.len());

        Ok(STANDARD.encode(png))
    }
}
