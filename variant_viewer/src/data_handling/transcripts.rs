use std::collections::{BTreeMap, HashMap, HashSet};

use polars::prelude::*;
use tracing::{debug, info};

use crate::models::{AnnotationRow, Interval, Strand};

/// A transcript clipped to the plotting window.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub transcript_id: String,
    pub gene_id: String,
    pub gene_name: String,
    pub strand: Strand,
    pub start: i64,
    pub end: i64,
    pub exons: Vec<(i64, i64)>,
    pub cds: Vec<(i64, i64)>,
}

/// Coarse gene footprint, drawn as an arrow when the table carries no exon rows.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneExtent {
    pub gene_name: String,
    pub start: i64,
    pub end: i64,
    pub strand: Strand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegionAnnotation {
    Transcripts(Vec<Transcript>),
    GeneExtents(Vec<GeneExtent>),
    Empty,
}

/// Keep protein-coding genes and their protein-coding transcripts.
pub fn filter_protein_coding(df: DataFrame) -> PolarsResult<DataFrame> {
    let as_str = |name: &str| col(name).cast(DataType::String);
    df.lazy()
        .filter(
            as_str("gene_type").eq(lit("protein_coding")).and(
                as_str("Feature")
                    .eq(lit("gene"))
                    .or(as_str("transcript_type").eq(lit("protein_coding"))),
            ),
        )
        .collect()
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

fn str_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    if !has_column(df, name) {
        return Ok(vec![None; df.height()]);
    }
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
}

fn int_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i64>>> {
    let column = df.column(name)?.cast(&DataType::Int64)?;
    Ok(column.i64()?.into_iter().collect())
}

/// Materialise annotation rows. `Feature`, `Start`, `End` are required; other columns may be absent.
pub fn rows_from_frame(df: &DataFrame) -> PolarsResult<Vec<AnnotationRow>> {
    if !has_column(df, "Feature") {
        return Err(PolarsError::ColumnNotFound("Feature".into()));
    }
    let features = str_values(df, "Feature")?;
    let starts = int_values(df, "Start")?;
    let ends = int_values(df, "End")?;
    let chromosomes = str_values(df, "Chromosome")?;
    let strands = str_values(df, "Strand")?;
    let gene_ids = str_values(df, "gene_id")?;
    let gene_names = str_values(df, "gene_name")?;
    let gene_types = str_values(df, "gene_type")?;
    let transcript_ids = str_values(df, "transcript_id")?;
    let transcript_types = str_values(df, "transcript_type")?;

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(start), Some(end)) = (starts[i], ends[i]) else {
            continue;
        };
        let gene_id = gene_ids[i].clone().unwrap_or_default();
        rows.push(AnnotationRow {
            chromosome: chromosomes[i].clone().unwrap_or_default(),
            feature: features[i].clone().unwrap_or_default(),
            start,
            end,
            strand: strands[i].as_deref().map(Strand::parse).unwrap_or(Strand::Unknown),
            gene_name: gene_names[i].clone().unwrap_or_else(|| gene_id.clone()),
            gene_id,
            gene_type: gene_types[i].clone(),
            transcript_id: transcript_ids[i].clone(),
            transcript_type: transcript_types[i].clone(),
        });
    }
    Ok(rows)
}

/// Per gene, keep its gene rows plus every row of its longest transcript.
///
/// Transcript length is the span of its `transcript` row, or of its other rows
/// when the table has none. Ties go to the smallest transcript id.
pub fn filter_to_longest_transcript(rows: Vec<AnnotationRow>) -> Vec<AnnotationRow> {
    let mut spans: HashMap<&str, (String, i64, i64, bool)> = HashMap::new();
    for row in &rows {
        let Some(tx) = row.transcript_id.as_deref() else {
            continue;
        };
        let entry = spans
            .entry(tx)
            .or_insert_with(|| (row.gene_id.clone(), row.start, row.end, false));
        if row.feature == "transcript" {
            *entry = (row.gene_id.clone(), row.start, row.end, true);
        } else if !entry.3 {
            entry.1 = entry.1.min(row.start);
            entry.2 = entry.2.max(row.end);
        }
    }

    let mut best: HashMap<String, (i64, String)> = HashMap::new();
    for (tx, (gene, start, end, _)) in &spans {
        let len = end - start;
        let candidate = (len, tx.to_string());
        best.entry(gene.clone())
            .and_modify(|current| {
                if len > current.0 || (len == current.0 && candidate.1 < current.1) {
                    *current = candidate.clone();
                }
            })
            .or_insert(candidate);
    }
    let keep: HashSet<String> = best.into_values().map(|(_, tx)| tx).collect();
    debug!("Longest transcripts selected for {} genes", keep.len());

    rows.into_iter()
        .filter(|row| match row.transcript_id.as_deref() {
            Some(tx) => keep.contains(tx),
            None => row.feature == "gene",
        })
        .collect()
}

pub struct TranscriptExtractor {
    by_transcript: BTreeMap<String, Vec<AnnotationRow>>,
}

impl TranscriptExtractor {
    pub fn new(rows: &[AnnotationRow]) -> Self {
        let mut by_transcript: BTreeMap<String, Vec<AnnotationRow>> = BTreeMap::new();
        for row in rows {
            if let Some(tx) = &row.transcript_id {
                by_transcript.entry(tx.clone()).or_default().push(row.clone());
            }
        }
        Self { by_transcript }
    }

    /// Transcripts overlapping `interval`, coordinates clipped into it.
    pub fn extract(&self, interval: &Interval) -> Vec<Transcript> {
        let clip = |(s, e): (i64, i64)| -> Option<(i64, i64)> {
            let (s, e) = (s.max(interval.start), e.min(interval.end));
            (s < e).then_some((s, e))
        };

        let mut out = Vec::new();
        for (tx, rows) in &self.by_transcript {
            let Some(first) = rows.first() else {
                continue;
            };
            let (start, end) = match rows.iter().find(|r| r.feature == "transcript") {
                Some(t) => (t.start, t.end),
                None => (
                    rows.iter().map(|r| r.start).min().unwrap_or(first.start),
                    rows.iter().map(|r| r.end).max().unwrap_or(first.end),
                ),
            };
            if !interval.overlaps(start, end) {
                continue;
            }
            let Some((start, end)) = clip((start, end)) else {
                continue;
            };

            let mut exons: Vec<(i64, i64)> = rows
                .iter()
                .filter(|r| r.feature == "exon")
                .filter_map(|r| clip((r.start, r.end)))
                .collect();
            exons.sort_unstable();
            let mut cds: Vec<(i64, i64)> = rows
                .iter()
                .filter(|r| r.feature == "CDS")
                .filter_map(|r| clip((r.start, r.end)))
                .collect();
            cds.sort_unstable();

            out.push(Transcript {
                transcript_id: tx.clone(),
                gene_id: first.gene_id.clone(),
                gene_name: first.gene_name.clone(),
                strand: first.strand,
                start,
                end,
                exons,
                cds,
            });
        }
        out.sort_by(|a, b| (a.start, a.end, &a.transcript_id).cmp(&(b.start, b.end, &b.transcript_id)));
        out
    }
}

/// One extent per gene name, first occurrence wins.
pub fn gene_extents(rows: &[AnnotationRow]) -> Vec<GeneExtent> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|r| seen.insert(r.gene_name.clone()))
        .map(|r| GeneExtent {
            gene_name: r.gene_name.clone(),
            start: r.start,
            end: r.end,
            strand: r.strand,
        })
        .collect()
}

/// Reduce overlapping annotation rows to what gets drawn above the tracks.
pub fn reduce_region(region: DataFrame, interval: &Interval) -> PolarsResult<RegionAnnotation> {
    if region.height() == 0 {
        return Ok(RegionAnnotation::Empty);
    }
    let coding = filter_protein_coding(region)?;
    let rows = rows_from_frame(&coding)?;

    if !rows.is_empty() && rows.iter().any(|r| r.feature.contains("exon")) {
        let longest = filter_to_longest_transcript(rows);
        let transcripts = TranscriptExtractor::new(&longest).extract(interval);
        info!("{} protein-coding transcripts in view", transcripts.len());
        Ok(RegionAnnotation::Transcripts(transcripts))
    } else {
        let extents = gene_extents(&rows);
        info!("No exon rows in region; falling back to {} gene extents", extents.len());
        Ok(RegionAnnotation::GeneExtents(extents))
    }
}
