use std::path::Path;
use std::str::FromStr;

use anyhow::anyhow;
use polars::prelude::*;
use tracing::{debug, warn};

use crate::helper_functions::read_ipc;

/// How the annotation table is scanned for overlapping rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    /// Load the whole table, evaluate the predicate once.
    WholeFile,
    /// Filter record batch by record batch and concatenate every match.
    Batched,
    /// Lazy scan with predicate pushdown.
    Streaming,
    /// Stop at the first batch with any match. Misses overlapping rows stored in
    /// later batches; only kept so old results can be reproduced.
    FirstMatchingBatch,
}

impl FromStr for ScanStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "whole-file" | "full" => Ok(ScanStrategy::WholeFile),
            "batched" | "batches" => Ok(ScanStrategy::Batched),
            "streaming" | "stream" => Ok(ScanStrategy::Streaming),
            "first-batch" | "first-matching-batch" => Ok(ScanStrategy::FirstMatchingBatch),
            other => Err(anyhow!(
                "unknown scan strategy '{other}' (expected whole-file, batched, streaming or first-batch)"
            )),
        }
    }
}

/// Window to pull rows for. `chromosome` is only set when the table spans several chromosomes.
#[derive(Debug, Clone)]
pub struct RegionQuery {
    pub chromosome: Option<String>,
    pub start: i64,
    pub end: i64,
}

impl RegionQuery {
    fn predicate(&self) -> Expr {
        let overlap = col("Start")
            .lt_eq(lit(self.end))
            .and(col("End").gt_eq(lit(self.start)));
        match &self.chromosome {
            Some(chrom) => col("Chromosome")
                .cast(DataType::String)
                .eq(lit(chrom.clone()))
                .and(overlap),
            None => overlap,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnnotationReader {
    strategy: ScanStrategy,
}

impl AnnotationReader {
    pub fn new(strategy: ScanStrategy) -> Self {
        Self { strategy }
    }

    /// Rows of the table at `path` overlapping `query`.
    pub fn overlapping(&self, path: &Path, query: &RegionQuery) -> PolarsResult<DataFrame> {
        debug!(
            "Scanning {} for rows overlapping {}-{} ({:?})",
            path.display(),
            query.start,
            query.end,
            self.strategy
        );
        let df = match self.strategy {
            ScanStrategy::WholeFile => read_ipc(path)?.lazy().filter(query.predicate()).collect()?,
            ScanStrategy::Streaming => LazyFrame::scan_ipc(path, ScanArgsIpc::default())?
                .filter(query.predicate())
                .collect()?,
            ScanStrategy::Batched => scan_batches(path, query, false)?,
            ScanStrategy::FirstMatchingBatch => scan_batches(path, query, true)?,
        };
        debug!("{} overlapping annotation rows", df.height());
        Ok(df)
    }
}

fn scan_batches(path: &Path, query: &RegionQuery, stop_at_first: bool) -> PolarsResult<DataFrame> {
    let mut table = read_ipc(path)?;
    let mut matched: Option<DataFrame> = None;

    for batch in table.split_chunks() {
        let filtered = batch.lazy().filter(query.predicate()).collect()?;
        if filtered.height() == 0 {
            continue;
        }
        match matched.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&filtered)?;
            }
            None => matched = Some(filtered),
        }
        if stop_at_first {
            warn!("first-batch scan stopped early; later batches were not inspected");
            break;
        }
    }

    Ok(match matched {
        Some(df) => df,
        None => table.clear(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;
    use std::fs::File;

    /// Writes `parts` as consecutive record batches of one IPC file.
    fn write_batches(path: &Path, parts: Vec<DataFrame>) {
        let mut iter = parts.into_iter();
        let mut df = iter.next().unwrap();
        for part in iter {
            df.vstack_mut(&part).unwrap();
        }
        let mut file = File::create(path).unwrap();
        IpcWriter::new(&mut file).finish(&mut df).unwrap();
    }

    fn rows(names: &[&str], starts: &[i64], ends: &[i64]) -> DataFrame {
        df![
            "Chromosome" => vec!["chr1"; names.len()],
            "gene_name" => names,
            "Start" => starts,
            "End" => ends,
        ]
        .unwrap()
    }

    fn names(df: &DataFrame) -> Vec<String> {
        let mut v: Vec<String> = df
            .column("gene_name")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        v.sort();
        v
    }

    fn fixture() -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chr1.feather");
        write_batches(
            &path,
            vec![
                rows(&["before", "left_edge"], &[10, 50], &[40, 100]),
                rows(&["inside", "after"], &[150, 400], &[160, 500]),
                rows(&["spanning", "right_edge"], &[0, 300], &[1000, 320]),
            ],
        );
        (tmp, path)
    }

    fn query() -> RegionQuery {
        RegionQuery {
            chromosome: None,
            start: 100,
            end: 300,
        }
    }

    #[test]
    fn full_strategies_return_exactly_the_overlapping_rows() {
        let (_tmp, path) = fixture();
        let expected = vec!["inside", "left_edge", "right_edge", "spanning"];
        for strategy in [ScanStrategy::WholeFile, ScanStrategy::Batched, ScanStrategy::Streaming] {
            let df = AnnotationReader::new(strategy).overlapping(&path, &query()).unwrap();
            assert_eq!(names(&df), expected, "strategy {:?}", strategy);
        }
    }

    #[test]
    fn first_batch_strategy_misses_later_batches() {
        let (_tmp, path) = fixture();
        let df = AnnotationReader::new(ScanStrategy::FirstMatchingBatch)
            .overlapping(&path, &query())
            .unwrap();
        // only the first batch with a hit is returned
        assert_eq!(names(&df), vec!["left_edge"]);
    }

    #[test]
    fn no_overlap_gives_empty_frame() {
        let (_tmp, path) = fixture();
        let far = RegionQuery {
            chromosome: None,
            start: 5_000,
            end: 6_000,
        };
        for strategy in [ScanStrategy::WholeFile, ScanStrategy::Batched, ScanStrategy::Streaming] {
            let df = AnnotationReader::new(strategy).overlapping(&path, &far).unwrap();
            assert_eq!(df.height(), 0);
        }
    }

    #[test]
    fn chromosome_predicate_for_whole_genome_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("genome.feather");
        let mut df = df![
            "Chromosome" => &["chr1", "chr2"],
            "gene_name" => &["A", "B"],
            "Start" => &[100i64, 100],
            "End" => &[200i64, 200],
        ]
        .unwrap();
        IpcWriter::new(&mut File::create(&path).unwrap()).finish(&mut df).unwrap();

        let q = RegionQuery {
            chromosome: Some("chr2".into()),
            start: 150,
            end: 160,
        };
        let out = AnnotationReader::new(ScanStrategy::Streaming).overlapping(&path, &q).unwrap();
        assert_eq!(names(&out), vec!["B"]);
    }

    #[test]
    fn parses_strategy_names() {
        assert_eq!("whole_file".parse::<ScanStrategy>().unwrap(), ScanStrategy::WholeFile);
        assert_eq!("first-batch".parse::<ScanStrategy>().unwrap(), ScanStrategy::FirstMatchingBatch);
        assert!("sideways".parse::<ScanStrategy>().is_err());
    }
}
