use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A single point mutation submitted through the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub chromosome: String,
    /// 1-based position of the first reference base
    pub position: i64,
    pub reference_bases: String,
    pub alternate_bases: String,
}

impl Variant {
    /// 0-based half-open interval spanned by the reference bases.
    pub fn reference_interval(&self) -> Result<Interval> {
        let start = self
            .position
            .checked_sub(1)
            .ok_or_else(|| anyhow!("position {} is out of range", self.position))?;
        let end = i64::try_from(self.reference_bases.len())
            .ok()
            .and_then(|len| start.checked_add(len))
            .ok_or_else(|| anyhow!("reference allele at {} runs past the end of the coordinate range", self.position))?;
        Ok(Interval::new(self.chromosome.clone(), start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub chromosome: String,
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(chromosome: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            chromosome: chromosome.into(),
            start,
            end,
        }
    }

    /// Plotting window of `width` bases centred on `center`.
    pub fn window_around(chromosome: impl Into<String>, center: i64, width: i64) -> Result<Self> {
        let half = width.div_euclid(2);
        match (center.checked_sub(half), center.checked_add(half)) {
            (Some(start), Some(end)) => Ok(Self::new(chromosome, start, end)),
            _ => Err(anyhow!("a {width} bp window around {center} is out of range")),
        }
    }

    pub fn width(&self) -> i64 {
        self.end - self.start
    }

    pub fn center(&self) -> i64 {
        // floor((start + end) / 2) without overflowing the sum
        self.start.div_euclid(2) + self.end.div_euclid(2) + (self.start.rem_euclid(2) + self.end.rem_euclid(2)) / 2
    }

    /// Same centre, new width.
    pub fn resize(&self, width: i64) -> Result<Self> {
        let start = self.center().checked_sub(width.div_euclid(2));
        match start.and_then(|s| s.checked_add(width).map(|e| (s, e))) {
            Some((start, end)) => Ok(Self::new(self.chromosome.clone(), start, end)),
            None => Err(anyhow!(
                "resizing {}:{}-{} to {width} bp is out of range",
                self.chromosome,
                self.start,
                self.end
            )),
        }
    }

    /// Inclusive overlap test used for annotation rows: `start <= self.end && end >= self.start`.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        start <= self.end && end >= self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
    Unknown,
}

impl Strand {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "+" => Strand::Forward,
            "-" => Strand::Reverse,
            _ => Strand::Unknown,
        }
    }
}

/// One record of the GENCODE-derived annotation table.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow {
    pub chromosome: String,
    pub feature: String,
    pub start: i64,
    pub end: i64,
    pub strand: Strand,
    pub gene_id: String,
    pub gene_name: String,
    pub gene_type: Option<String>,
    pub transcript_id: Option<String>,
    pub transcript_type: Option<String>,
}
