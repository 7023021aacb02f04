//! Composite figure: transcript annotation, overlaid REF/ALT tracks and the variant marker.

use std::fs;

use anyhow::{bail, Context, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::{debug, warn};

use crate::data_handling::transcripts::{GeneExtent, RegionAnnotation, Transcript};
use crate::models::{Interval, Strand, Variant};
use crate::prediction_tools::alphagenome::TrackData;

const FIGURE_WIDTH: u32 = 1200;
const TRACK_PANEL_HEIGHT: u32 = 220;
const TRANSCRIPT_ROW_HEIGHT: u32 = 30;
/// Upper bounds on drawn panels and rows; anything beyond is dropped with a warning.
const MAX_TRACK_PANELS: usize = 16;
const MAX_TRANSCRIPT_ROWS: usize = 40;
const VARIANT_COLOUR: RGBColor = RGBColor(255, 165, 0);
const EXON_COLOUR: RGBColor = RGBColor(60, 60, 60);

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

/// Everything needed to draw one figure.
pub struct FigureSpec<'a> {
    pub interval: &'a Interval,
    pub variant: &'a Variant,
    pub annotation: &'a RegionAnnotation,
    pub reference: &'a TrackData,
    pub alternate: &'a TrackData,
    /// Interval the prediction was made over, used when the tracks do not carry their own.
    pub prediction_interval: &'a Interval,
    pub ref_colour: RGBColor,
    pub alt_colour: RGBColor,
}

/// Render the figure to PNG bytes.
///
/// Labels need system fonts; when text cannot be drawn the figure is rendered again without it.
pub fn render_png(spec: &FigureSpec) -> Result<Vec<u8>> {
    match render_with(spec, true) {
        Ok(png) => Ok(png),
        Err(e) => {
            warn!("Rendering with labels failed ({:#}); retrying without text", e);
            render_with(spec, false)
        }
    }
}

fn render_with(spec: &FigureSpec, with_text: bool) -> Result<Vec<u8>> {
    let available = spec.reference.num_tracks().min(spec.alternate.num_tracks());
    if available == 0 {
        bail!("prediction returned no tracks to plot");
    }
    let num_tracks = available.min(MAX_TRACK_PANELS);
    if available > num_tracks {
        warn!("Prediction has {} tracks; plotting the first {}", available, num_tracks);
    }

    let transcripts: &[Transcript] = match spec.annotation {
        RegionAnnotation::Transcripts(txs) if txs.len() > MAX_TRANSCRIPT_ROWS => {
            warn!("{} transcripts in the window; drawing the first {}", txs.len(), MAX_TRANSCRIPT_ROWS);
            &txs[..MAX_TRANSCRIPT_ROWS]
        }
        RegionAnnotation::Transcripts(txs) => txs,
        _ => &[],
    };
    let annotation_height = if transcripts.is_empty() {
        0
    } else {
        40 + TRANSCRIPT_ROW_HEIGHT * transcripts.len() as u32
    };
    let height = annotation_height + TRACK_PANEL_HEIGHT * num_tracks as u32;

    let tmp = tempfile::Builder::new()
        .prefix("variant_plot")
        .suffix(".png")
        .tempfile()
        .context("creating temporary PNG file")?;
    {
        let root = BitMapBackend::new(tmp.path(), (FIGURE_WIDTH, height)).into_drawing_area();
        root.fill(&WHITE)?;

        let tracks_area = if transcripts.is_empty() {
            root.clone()
        } else {
            let (upper, lower) = root.split_vertically(annotation_height as i32);
            draw_transcripts(&upper, spec, transcripts, with_text)?;
            lower
        };

        let panels = tracks_area.split_evenly((num_tracks, 1));
        for (column, panel) in panels.iter().enumerate() {
            let extents: &[GeneExtent] = match spec.annotation {
                RegionAnnotation::GeneExtents(genes) if column == 0 => genes,
                _ => &[],
            };
            draw_track_panel(panel, spec, column, extents, with_text)?;
        }
        root.present()?;
    }

    let png = fs::read(tmp.path()).context("reading rendered PNG")?;
    debug!("Rendered {}x{} figure ({} bytes)", FIGURE_WIDTH, height, png.len());
    Ok(png)
}

/// In-window `(position, value)` points of one track column, max-pooled down to `bins` points.
fn binned_points(track: &TrackData, column: usize, track_start: i64, window: &Interval, bins: usize) -> Vec<(f64, f64)> {
    let resolution = i64::from(track.resolution.max(1));
    let points: Vec<(i64, f32)> = track
        .values
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let pos = track_start + i as i64 * resolution;
            if pos < window.start || pos > window.end {
                return None;
            }
            row.get(column).map(|v| (pos, *v))
        })
        .collect();

    if points.len() <= bins || bins == 0 {
        return points.into_iter().map(|(p, v)| (p as f64, f64::from(v))).collect();
    }
    let chunk = points.len().div_ceil(bins);
    points
        .chunks(chunk)
        .map(|c| {
            let peak = c.iter().map(|(_, v)| *v).fold(f32::NEG_INFINITY, f32::max);
            (c[0].0 as f64, f64::from(peak))
        })
        .collect()
}

fn value_range(series: &[&[(f64, f64)]]) -> (f64, f64) {
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for s in series {
        for &(_, v) in s.iter() {
            if v.is_finite() {
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
    }
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if (hi - lo).abs() < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    (lo.min(0.0), hi)
}

fn draw_track_panel(
    area: &Area,
    spec: &FigureSpec,
    column: usize,
    extents: &[GeneExtent],
    with_text: bool,
) -> Result<()> {
    let window = spec.interval;
    let bins = FIGURE_WIDTH as usize;
    let start_of = |t: &TrackData| t.interval.as_ref().map(|i| i.start).unwrap_or(spec.prediction_interval.start);
    let ref_points = binned_points(spec.reference, column, start_of(spec.reference), window, bins);
    let alt_points = binned_points(spec.alternate, column, start_of(spec.alternate), window, bins);

    let (lo, hi) = value_range(&[ref_points.as_slice(), alt_points.as_slice()]);
    // room above the signal for gene arrows
    let headroom = if extents.is_empty() { 0.05 } else { 0.25 };
    let top = hi + (hi - lo) * headroom;
    let (x0, x1) = (window.start as f64, window.end as f64);

    let mut builder = ChartBuilder::on(area);
    builder.margin(10);
    if with_text {
        builder
            .caption(spec.reference.track_name(column), ("sans-serif", 16))
            .x_label_area_size(30)
            .y_label_area_size(60);
    }
    let mut chart = builder.build_cartesian_2d(x0..x1, lo..top)?;

    if with_text {
        chart
            .configure_mesh()
            .disable_mesh()
            .x_labels(6)
            .y_labels(4)
            .x_label_formatter(&|x| format!("{:.0}", x))
            .label_style(("sans-serif", 12))
            .draw()?;
    } else {
        chart.configure_mesh().disable_mesh().x_labels(0).y_labels(0).draw()?;
    }

    let ref_colour = spec.ref_colour;
    let alt_colour = spec.alt_colour;
    chart
        .draw_series(LineSeries::new(ref_points, ref_colour.stroke_width(2)))?
        .label("REF")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], ref_colour.stroke_width(2)));
    chart
        .draw_series(LineSeries::new(alt_points, alt_colour.stroke_width(2)))?
        .label("ALT")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], alt_colour.stroke_width(2)));

    let vx = spec.variant.position as f64;
    chart.draw_series(std::iter::once(PathElement::new(
        vec![(vx, lo), (vx, top)],
        VARIANT_COLOUR.mix(0.8).stroke_width(2),
    )))?;

    for gene in extents {
        let start = (gene.start as f64).max(x0);
        let end = (gene.end as f64).min(x1);
        if start >= end {
            continue;
        }
        let y = hi + (top - hi) * 0.5;
        let head = (x1 - x0) * 0.01;
        let half = (top - hi) * 0.25;
        let (tail, tip, back) = match gene.strand {
            Strand::Forward => (start, end, end - head),
            _ => (end, start, start + head),
        };
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(tail, y), (tip, y)],
            BLACK.stroke_width(2),
        )))?;
        chart.draw_series(std::iter::once(Polygon::new(
            vec![(tip, y), (back, y + half), (back, y - half)],
            BLACK.filled(),
        )))?;
        if with_text {
            chart.draw_series(std::iter::once(Text::new(
                gene.gene_name.clone(),
                (start, top),
                ("sans-serif", 12).into_font(),
            )))?;
        }
    }

    if with_text {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(&BLACK)
            .label_font(("sans-serif", 12))
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
    }
    Ok(())
}

fn draw_transcripts(area: &Area, spec: &FigureSpec, transcripts: &[Transcript], with_text: bool) -> Result<()> {
    let window = spec.interval;
    let (x0, x1) = (window.start as f64, window.end as f64);
    let rows = transcripts.len() as f64;

    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .build_cartesian_2d(x0..x1, 0.0..rows)?;

    let chevron_step = (x1 - x0) / 40.0;
    let dx = (x1 - x0) * 0.003;
    for (i, tx) in transcripts.iter().enumerate() {
        let y = rows - i as f64 - 0.6;
        let (s, e) = (tx.start as f64, tx.end as f64);

        chart.draw_series(std::iter::once(PathElement::new(vec![(s, y), (e, y)], BLACK.stroke_width(1))))?;

        let mut x = s + chevron_step / 2.0;
        while x < e {
            let back = match tx.strand {
                Strand::Forward => x - dx,
                Strand::Reverse => x + dx,
                Strand::Unknown => x,
            };
            chart.draw_series(std::iter::once(PathElement::new(
                vec![(back, y + 0.12), (x, y), (back, y - 0.12)],
                BLACK.stroke_width(1),
            )))?;
            x += chevron_step;
        }

        chart.draw_series(tx.exons.iter().map(|&(es, ee)| {
            Rectangle::new([(es as f64, y - 0.15), (ee as f64, y + 0.15)], EXON_COLOUR.filled())
        }))?;
        chart.draw_series(tx.cds.iter().map(|&(cs, ce)| {
            Rectangle::new([(cs as f64, y - 0.28), (ce as f64, y + 0.28)], EXON_COLOUR.filled())
        }))?;

        if with_text {
            chart.draw_series(std::iter::once(Text::new(
                format!("{} ({})", tx.gene_name, tx.transcript_id),
                (s, y + 0.5),
                ("sans-serif", 12).into_font(),
            )))?;
        }
    }

    let vx = spec.variant.position as f64;
    chart.draw_series(std::iter::once(PathElement::new(
        vec![(vx, 0.0), (vx, rows)],
        VARIANT_COLOUR.mix(0.8).stroke_width(2),
    )))?;
    Ok(())
}
